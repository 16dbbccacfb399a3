//! Test harness module
//!
//! In-process server and seeded simulator

pub mod loopback;
pub mod simulator;

pub use loopback::*;
pub use simulator::*;

/// Runs the simulator across several seeds
#[derive(Debug, Clone, Copy, Default)]
pub struct TestHarness;

impl TestHarness {
    /// Run one simulation per seed and summarise
    pub async fn run_certification(users: usize, seeds: std::ops::Range<u64>) -> CertificationReport {
        let mut report = CertificationReport::default();

        for seed in seeds {
            let run = run_simulator(SimulatorConfig {
                seed,
                users,
                ..SimulatorConfig::default()
            })
            .await;
            if !run.passed() {
                tracing::warn!(seed, violations = run.violations.len(), "seed failed");
                report.failed_seeds.push(seed);
            }
            report.total_violations += run.violations.len();
            report.seeds_tested += 1;
        }

        report
    }
}

/// Report from certification
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificationReport {
    /// Seeds that found a violation
    pub failed_seeds: Vec<u64>,
    /// Violations across every seed
    pub total_violations: usize,
    /// Seeds run
    pub seeds_tested: u64,
}

impl CertificationReport {
    /// Whether every seed passed
    #[must_use]
    pub fn passed(&self) -> bool {
        self.failed_seeds.is_empty()
    }
}
