use anyhow::Context;
use backoffice_sync::test_harness::{run_simulator, SimulatorConfig, TestHarness};
use backoffice_sync::SyncConfig;
use clap::{value_parser, Arg, ArgAction, Command};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }
}

fn load_config(path: Option<&String>) -> anyhow::Result<SyncConfig> {
    let Some(path) = path else {
        return Ok(SyncConfig::default());
    };
    SyncConfig::from_path(path).with_context(|| format!("loading {path}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Command::new("backoffice-sim")
        .version(backoffice_sync::VERSION)
        .about("Back-office sync protocol simulator")
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Drive seeded sessions against the loopback server")
                .arg(
                    Arg::new("users")
                        .long("users")
                        .default_value("16")
                        .value_parser(value_parser!(usize))
                        .help("Concurrent user-creation sessions"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("keep-going")
                        .long("keep-going")
                        .action(ArgAction::SetTrue)
                        .help("Run every phase even after a violation"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .help("Sync settings (TOML)"),
                ),
        )
        .subcommand(
            Command::new("certify")
                .about("Run the simulator over a range of seeds")
                .arg(
                    Arg::new("seeds")
                        .long("seeds")
                        .default_value("10")
                        .value_parser(value_parser!(u64))
                        .help("Number of seeds, starting at 0"),
                )
                .arg(
                    Arg::new("users")
                        .long("users")
                        .default_value("8")
                        .value_parser(value_parser!(usize))
                        .help("Sessions per seed"),
                ),
        )
        .subcommand(
            Command::new("check-config")
                .about("Validate a sync settings file")
                .arg(Arg::new("path").long("path").required(true).help("TOML file")),
        );

    let matches = cli.get_matches();
    init_tracing(matches.get_flag("json-logs"));

    match matches.subcommand() {
        Some(("simulate", args)) => {
            let config = SimulatorConfig {
                seed: args.get_one::<u64>("seed").copied().unwrap_or(42),
                users: args.get_one::<usize>("users").copied().unwrap_or(16),
                stop_on_first_violation: !args.get_flag("keep-going"),
                sync: load_config(args.get_one::<String>("config"))?,
                ..SimulatorConfig::default()
            };

            let report = run_simulator(config).await;
            println!("{}", report.generate_text());

            std::process::exit(if report.passed() { 0 } else { 1 });
        }
        Some(("certify", args)) => {
            let seeds = args.get_one::<u64>("seeds").copied().unwrap_or(10);
            let users = args.get_one::<usize>("users").copied().unwrap_or(8);

            let report = TestHarness::run_certification(users, 0..seeds).await;
            println!("Certification Report:");
            println!("  Seeds: {}", report.seeds_tested);
            println!("  Violations: {}", report.total_violations);
            println!("  Failed seeds: {:?}", report.failed_seeds);

            std::process::exit(if report.passed() { 0 } else { 1 });
        }
        Some(("check-config", args)) => {
            let config = load_config(args.get_one::<String>("path"))?;
            println!("{config:#?}");
        }
        _ => {
            println!("Back-office sync simulator");
            println!("Use --help for available commands");
        }
    }

    Ok(())
}
