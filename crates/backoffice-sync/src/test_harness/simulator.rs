//! Back-office simulator
//!
//! Drives seeded user sessions through real views against the loopback
//! server and checks the protocol invariants after every step:
//! - one command per accepted submit, however often Save is pressed
//! - every flag released once its session ends
//! - a confirmed save is visible in the shared store
//! - a declined delete sends nothing
//! - client store and server agree at the end

use super::loopback::{LoopbackConfig, LoopbackServer};
use crate::buffer::EditBuffer;
use crate::config::SyncConfig;
use crate::confirm::{AutoConfirm, ConfirmationGate};
use crate::correlation::PendingKind;
use crate::envelope::Envelope;
use crate::error::RejectionKind;
use crate::list::ListController;
use crate::lookup::LookupController;
use crate::mutation::MutationController;
use crate::runtime::{spawn_view, ViewHandle};
use crate::transport::{ChannelTransport, PushHub, Transport};
use crate::view::{FormIntent, FormView, ListIntent, ListView, ViewEffect};
use backoffice_model::{AddressField, PostalAddress, RecordId, User, UserDraft, UserField};
use backoffice_store::SharedStore;
use futures::future::join_all;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Longest wait for any single effect
const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Postal codes the loopback server resolves
const DIRECTORY: &[(&str, &str, &str, &str, &str)] = &[
    ("80010000", "Rua XV de Novembro", "Centro", "Curitiba", "PR"),
    ("01310100", "Avenida Paulista", "Bela Vista", "São Paulo", "SP"),
    ("22021001", "Avenida Atlântica", "Copacabana", "Rio de Janeiro", "RJ"),
];

/// Simulator configuration
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Concurrent user-creation sessions
    pub users: usize,
    /// Skip later phases once something is wrong
    pub stop_on_first_violation: bool,
    /// Client protocol settings
    pub sync: SyncConfig,
    /// Server answer delay
    pub latency: Duration,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            users: 16,
            stop_on_first_violation: true,
            sync: SyncConfig::default(),
            latency: Duration::from_millis(2),
        }
    }
}

/// A broken protocol invariant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// More than one command went out for one accepted action
    DuplicateCommand {
        /// Session index
        session: usize,
        /// Command event
        event: String,
        /// Commands observed
        count: usize,
    },
    /// The view ended in a different state than the scenario implies
    UnexpectedOutcome {
        /// Session index
        session: usize,
        /// What the scenario implies
        expected: &'static str,
        /// What happened
        actual: String,
    },
    /// A flag was still held after the session ended
    FlagStuck {
        /// Session index
        session: usize,
    },
    /// A view never produced the effect the session waited for
    Stalled {
        /// Session index
        session: usize,
        /// Awaited effect
        waiting_for: &'static str,
    },
    /// Client cache and server disagree
    StoreMismatch {
        /// Ids in the client store
        client: Vec<RecordId>,
        /// Ids on the server
        server: Vec<RecordId>,
    },
}

/// Counters collected during a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatorStats {
    /// Sessions driven
    pub sessions: usize,
    /// Commands the server received
    pub commands: usize,
    /// Records created
    pub saved: usize,
    /// Saves refused as conflicts
    pub conflicts: usize,
    /// Extra submits refused while a save was pending
    pub busy: usize,
    /// Postal codes resolved
    pub lookups_found: usize,
    /// Postal codes unknown to the server
    pub lookups_missing: usize,
    /// Deletes confirmed and applied
    pub deletes_confirmed: usize,
    /// Deletes declined at the prompt
    pub deletes_declined: usize,
}

/// Outcome of a simulator run
#[derive(Debug, Clone)]
pub struct SimulatorReport {
    /// Configuration used
    pub config: SimulatorConfig,
    /// Counters
    pub stats: SimulatorStats,
    /// Invariant violations found
    pub violations: Vec<Violation>,
    /// Users on the server at the end
    pub final_users: usize,
}

impl SimulatorReport {
    /// Whether the run found no violation
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Human-readable report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::new();
        let stats = &self.stats;

        report.push_str("=== Backoffice Simulator Report ===\n\n");
        report.push_str(&format!("Seed: {}\n", self.config.seed));
        report.push_str(&format!("Sessions: {}\n", stats.sessions));
        report.push_str(&format!("Commands: {}\n", stats.commands));
        report.push_str(&format!("Saved: {}\n", stats.saved));
        report.push_str(&format!("Conflicts: {}\n", stats.conflicts));
        report.push_str(&format!("Busy submits: {}\n", stats.busy));
        report.push_str(&format!(
            "Lookups: {} found, {} missing\n",
            stats.lookups_found, stats.lookups_missing
        ));
        report.push_str(&format!(
            "Deletes: {} confirmed, {} declined\n",
            stats.deletes_confirmed, stats.deletes_declined
        ));
        report.push_str(&format!("Final Users: {}\n", self.final_users));
        report.push_str(&format!("Violations: {}\n", self.violations.len()));

        if !self.violations.is_empty() {
            report.push_str("\n=== Violations ===\n");
            for (i, v) in self.violations.iter().enumerate() {
                report.push_str(&format!("{}. {:?}\n", i + 1, v));
            }
        }

        report.push_str(&format!(
            "\n=== Result: {} ===\n",
            if self.passed() { "PASS" } else { "FAIL" }
        ));

        report
    }
}

#[derive(Debug, Clone)]
struct SessionPlan {
    index: usize,
    name: String,
    email: String,
    cpf: String,
    phone: String,
    cep: String,
    known_cep: bool,
    double_submit: bool,
}

#[derive(Debug, Default)]
struct SessionResult {
    saved: Option<RecordId>,
    conflict: bool,
    busy: bool,
    lookup_found: Option<bool>,
    deleted: Option<bool>,
    violations: Vec<Violation>,
}

impl SessionResult {
    fn violation(mut self, violation: Violation) -> Self {
        self.violations.push(violation);
        self
    }
}

struct SimEnv {
    transport: Arc<dyn Transport>,
    channel: ChannelTransport,
    hub: PushHub,
    server: LoopbackServer,
    users: SharedStore<User>,
    sync: SyncConfig,
}

impl SimEnv {
    fn form(&self, buffer: EditBuffer<UserDraft>, confirm: bool) -> FormView<User> {
        let mutation = MutationController::new(self.transport.clone(), self.users.clone(), self.sync);
        FormView::new(buffer, mutation, ConfirmationGate::new(AutoConfirm(confirm)))
            .with_lookup(LookupController::<UserDraft>::new(self.transport.clone(), self.sync))
    }

    fn mount(
        &self,
        view: FormView<User>,
    ) -> (ViewHandle<FormIntent<UserField>>, JoinHandle<FormView<User>>) {
        spawn_view(view, &self.hub, self.channel.connection())
    }

    fn commands(&self, event: &str, matches: impl Fn(&Envelope) -> bool) -> usize {
        self.server
            .received()
            .iter()
            .filter(|e| e.event == event && matches(e))
            .count()
    }
}

/// Run the simulator
pub async fn run_simulator(config: SimulatorConfig) -> SimulatorReport {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let capacity = config.sync.channel_capacity.max(config.users * 8);

    let (channel, outbound) = ChannelTransport::new(capacity);
    let hub = PushHub::new(capacity);
    let server = DIRECTORY.iter().fold(
        LoopbackServer::new(hub.clone(), LoopbackConfig::echoing().with_latency(config.latency)),
        |server, (code, street, district, city, uf)| {
            server.with_postal_code(
                *code,
                PostalAddress {
                    street: Some((*street).into()),
                    district: Some((*district).into()),
                    city: Some((*city).into()),
                    uf: Some((*uf).into()),
                },
            )
        },
    );
    let serving = server.spawn(outbound);
    let users = SharedStore::new();
    hub.attach(users.clone());

    let env = SimEnv {
        transport: Arc::new(channel.clone()),
        channel,
        hub,
        server,
        users,
        sync: config.sync,
    };

    let mut stats = SimulatorStats::default();
    let mut violations = Vec::new();
    let plans: Vec<SessionPlan> = (0..config.users).map(|i| plan_session(&mut rng, i)).collect();
    tracing::info!(seed = config.seed, users = config.users, "simulation started");

    // Phase 1: concurrent creates
    let results = join_all(plans.iter().map(|plan| create_session(&env, plan))).await;
    let mut created = Vec::new();
    for (plan, result) in plans.iter().zip(results) {
        stats.sessions += 1;
        stats.busy += usize::from(result.busy);
        match result.lookup_found {
            Some(true) => stats.lookups_found += 1,
            Some(false) => stats.lookups_missing += 1,
            None => {}
        }
        if let Some(id) = result.saved {
            stats.saved += 1;
            created.push((plan.clone(), id));
        }
        violations.extend(result.violations);
    }
    let stop = |violations: &Vec<Violation>| config.stop_on_first_violation && !violations.is_empty();

    // Phase 2: duplicate CPFs must conflict
    if !stop(&violations) {
        let duplicates: Vec<&SessionPlan> = created
            .iter()
            .filter(|_| rng.random_bool(0.3))
            .map(|(plan, _)| plan)
            .collect();
        let offset = plans.len();
        let results = join_all(
            duplicates
                .iter()
                .enumerate()
                .map(|(i, original)| duplicate_session(&env, offset + i, original)),
        )
        .await;
        for result in results {
            stats.sessions += 1;
            stats.conflicts += usize::from(result.conflict);
            violations.extend(result.violations);
        }
    }

    // Phase 3: deletes, some declined
    if !stop(&violations) {
        let offset = stats.sessions;
        let mut deletes: Vec<(RecordId, bool)> = Vec::new();
        for (_, id) in &created {
            if rng.random_bool(0.5) {
                deletes.push((*id, rng.random_bool(0.5)));
            }
        }
        let results = join_all(
            deletes
                .iter()
                .enumerate()
                .map(|(i, (id, confirm))| delete_session(&env, offset + i, *id, *confirm)),
        )
        .await;
        for result in results {
            stats.sessions += 1;
            match result.deleted {
                Some(true) => stats.deletes_confirmed += 1,
                Some(false) => stats.deletes_declined += 1,
                None => {}
            }
            violations.extend(result.violations);
        }
    }

    // Phase 4: a fresh list must match both the server and the shared cache
    if !stop(&violations) {
        violations.extend(reconcile(&env).await);
    }

    stats.commands = env.server.received().len();
    let final_users = env.server.users().len();
    drop(env);
    serving.abort();

    tracing::info!(
        saved = stats.saved,
        violations = violations.len(),
        "simulation finished"
    );
    SimulatorReport {
        config,
        stats,
        violations,
        final_users,
    }
}

fn plan_session(rng: &mut StdRng, index: usize) -> SessionPlan {
    let known_cep = rng.random_bool(0.7);
    let cep = if known_cep {
        DIRECTORY[rng.random_range(0..DIRECTORY.len())].0.to_string()
    } else {
        format!("{:08}", rng.random_range(90_000_000..100_000_000u64))
    };
    SessionPlan {
        index,
        name: format!("User {index}"),
        email: format!("user{index}@example.com"),
        cpf: format!("{:03}{:08}", index % 1000, rng.random_range(0..100_000_000u64)),
        phone: format!("419{:08}", rng.random_range(0..100_000_000u64)),
        cep,
        known_cep,
        double_submit: rng.random_bool(0.5),
    }
}

async fn await_effect<I: Send + 'static>(
    handle: &mut ViewHandle<I>,
    session: usize,
    waiting_for: &'static str,
    pred: impl FnMut(&ViewEffect) -> bool,
) -> Result<ViewEffect, Violation> {
    match tokio::time::timeout(STEP_TIMEOUT, handle.wait_for(pred)).await {
        Ok(Some(effect)) => Ok(effect),
        Ok(None) | Err(_) => Err(Violation::Stalled {
            session,
            waiting_for,
        }),
    }
}

async fn fill(
    handle: &ViewHandle<FormIntent<UserField>>,
    session: usize,
    fields: Vec<(UserField, String)>,
) -> Result<(), Violation> {
    for (field, value) in fields {
        if handle.send(FormIntent::SetField(field, value)).await.is_err() {
            return Err(Violation::Stalled {
                session,
                waiting_for: "form input",
            });
        }
    }
    Ok(())
}

async fn unmount(
    handle: ViewHandle<FormIntent<UserField>>,
    task: JoinHandle<FormView<User>>,
    session: usize,
    result: SessionResult,
) -> SessionResult {
    // Close is refused with Closed once the view already finished
    let _ = handle.send(FormIntent::Close).await;
    drop(handle.close());
    match tokio::time::timeout(STEP_TIMEOUT, task).await {
        Ok(Ok(view)) if view.is_busy() => result.violation(Violation::FlagStuck { session }),
        Ok(Ok(_)) => result,
        Ok(Err(_)) | Err(_) => result.violation(Violation::Stalled {
            session,
            waiting_for: "unmount",
        }),
    }
}

async fn create_session(env: &SimEnv, plan: &SessionPlan) -> SessionResult {
    let session = plan.index;
    let (mut handle, task) = env.mount(env.form(EditBuffer::blank(), true));
    let mut result = SessionResult::default();

    let identity = vec![
        (UserField::Name, plan.name.clone()),
        (UserField::Email, plan.email.clone()),
        (UserField::Cpf, plan.cpf.clone()),
        (UserField::Phone, plan.phone.clone()),
        (UserField::Pronoun, "Sr.".to_string()),
        (UserField::Password, format!("secret-{session}")),
        (UserField::Address(AddressField::Cep), plan.cep.clone()),
    ];
    if let Err(violation) = fill(&handle, session, identity).await {
        return unmount(handle, task, session, result.violation(violation)).await;
    }

    let lookup = await_effect(&mut handle, session, "lookup", |e| {
        matches!(e, ViewEffect::Focus(_) | ViewEffect::LookupNotFound(_) | ViewEffect::Failed { .. })
    })
    .await;
    let mut address = Vec::new();
    match lookup {
        Ok(ViewEffect::Focus(field)) if plan.known_cep && field == "address.number" => {
            result.lookup_found = Some(true);
        }
        Ok(ViewEffect::LookupNotFound(_)) if !plan.known_cep => {
            result.lookup_found = Some(false);
            address.extend([
                (UserField::Address(AddressField::Street), "Rua Sem Nome".to_string()),
                (UserField::Address(AddressField::District), "Centro".to_string()),
                (UserField::Address(AddressField::City), "Campo Largo".to_string()),
                (UserField::Address(AddressField::Uf), "PR".to_string()),
            ]);
        }
        Ok(other) => {
            let expected = if plan.known_cep { "lookup merged" } else { "lookup not found" };
            let violation = Violation::UnexpectedOutcome {
                session,
                expected,
                actual: format!("{other:?}"),
            };
            return unmount(handle, task, session, result.violation(violation)).await;
        }
        Err(violation) => return unmount(handle, task, session, result.violation(violation)).await,
    }
    address.push((UserField::Address(AddressField::Number), (100 + session).to_string()));
    if let Err(violation) = fill(&handle, session, address).await {
        return unmount(handle, task, session, result.violation(violation)).await;
    }

    let _ = handle.send(FormIntent::Submit).await;
    if plan.double_submit {
        // may race the confirmation and find the view already gone
        let _ = handle.send(FormIntent::Submit).await;
    }

    let mut busy = false;
    let outcome = await_effect(&mut handle, session, "save", |e| {
        busy |= matches!(e, ViewEffect::Busy(PendingKind::Save));
        matches!(
            e,
            ViewEffect::Saved { .. } | ViewEffect::Rejected(_) | ViewEffect::Failed { .. } | ViewEffect::Invalid(_)
        )
    })
    .await;
    result.busy = busy;
    match outcome {
        Ok(ViewEffect::Saved { id, created: true }) => {
            result.saved = Some(id);
            if env.users.find(id).is_none() {
                result.violations.push(Violation::UnexpectedOutcome {
                    session,
                    expected: "saved record in store",
                    actual: format!("{id} missing"),
                });
            }
        }
        Ok(other) => result.violations.push(Violation::UnexpectedOutcome {
            session,
            expected: "created",
            actual: format!("{other:?}"),
        }),
        Err(violation) => result.violations.push(violation),
    }

    let result = unmount(handle, task, session, result).await;
    let sent = env.commands("user:create", |e| e.payload["email"] == plan.email.as_str());
    if sent == 1 {
        result
    } else {
        result.violation(Violation::DuplicateCommand {
            session,
            event: "user:create".into(),
            count: sent,
        })
    }
}

async fn duplicate_session(env: &SimEnv, session: usize, original: &SessionPlan) -> SessionResult {
    let (mut handle, task) = env.mount(env.form(EditBuffer::blank(), true));
    let mut result = SessionResult::default();
    let email = format!("dup{session}@example.com");

    let fields = vec![
        (UserField::Name, format!("Copy of {}", original.name)),
        (UserField::Email, email.clone()),
        (UserField::Cpf, original.cpf.clone()),
        (UserField::Phone, original.phone.clone()),
        (UserField::Pronoun, "Sr.".to_string()),
        (UserField::Password, "copy".to_string()),
    ];
    if let Err(violation) = fill(&handle, session, fields).await {
        return unmount(handle, task, session, result.violation(violation)).await;
    }
    let _ = handle.send(FormIntent::Submit).await;

    let outcome = await_effect(&mut handle, session, "conflict", |e| {
        matches!(
            e,
            ViewEffect::Saved { .. } | ViewEffect::Rejected(_) | ViewEffect::Failed { .. } | ViewEffect::Invalid(_)
        )
    })
    .await;
    match outcome {
        Ok(ViewEffect::Rejected(rejection)) if rejection.kind == RejectionKind::Conflict => {
            result.conflict = true;
        }
        Ok(other) => result.violations.push(Violation::UnexpectedOutcome {
            session,
            expected: "conflict",
            actual: format!("{other:?}"),
        }),
        Err(violation) => result.violations.push(violation),
    }

    let result = unmount(handle, task, session, result).await;
    let sent = env.commands("user:create", |e| e.payload["email"] == email.as_str());
    if sent == 1 {
        result
    } else {
        result.violation(Violation::DuplicateCommand {
            session,
            event: "user:create".into(),
            count: sent,
        })
    }
}

async fn delete_session(env: &SimEnv, session: usize, id: RecordId, confirm: bool) -> SessionResult {
    let mut result = SessionResult::default();
    let Some(user) = env.users.find(id) else {
        return result.violation(Violation::UnexpectedOutcome {
            session,
            expected: "record to delete in store",
            actual: format!("{id} missing"),
        });
    };
    let (mut handle, task) = env.mount(env.form(EditBuffer::for_record(&user), confirm));
    let _ = handle.send(FormIntent::Delete).await;

    let outcome = await_effect(&mut handle, session, "delete", |e| {
        matches!(
            e,
            ViewEffect::Deleted(_) | ViewEffect::ConfirmationDeclined | ViewEffect::Failed { .. } | ViewEffect::Rejected(_)
        )
    })
    .await;
    let expected = if confirm { "deleted" } else { "declined" };
    match outcome {
        Ok(ViewEffect::Deleted(deleted)) if confirm && deleted == id => {
            result.deleted = Some(true);
            if env.users.find(id).is_some() {
                result.violations.push(Violation::UnexpectedOutcome {
                    session,
                    expected: "record gone from store",
                    actual: format!("{id} still present"),
                });
            }
        }
        Ok(ViewEffect::ConfirmationDeclined) if !confirm => result.deleted = Some(false),
        Ok(other) => result.violations.push(Violation::UnexpectedOutcome {
            session,
            expected,
            actual: format!("{other:?}"),
        }),
        Err(violation) => result.violations.push(violation),
    }

    let result = unmount(handle, task, session, result).await;
    let sent = env.commands("user:delete", |e| e.payload["id"] == id.get());
    if sent == usize::from(confirm) {
        result
    } else {
        result.violation(Violation::DuplicateCommand {
            session,
            event: "user:delete".into(),
            count: sent,
        })
    }
}

async fn reconcile(env: &SimEnv) -> Vec<Violation> {
    let fresh = SharedStore::<User>::new();
    env.hub.attach(fresh.clone());
    let list = ListController::new(env.transport.clone(), fresh, env.sync);
    let (mut handle, task) = spawn_view(ListView::new(list), &env.hub, env.channel.connection());
    let mut violations = Vec::new();

    if let Err(violation) = await_effect(&mut handle, usize::MAX, "list", |e| matches!(e, ViewEffect::Loaded(_))).await {
        violations.push(violation);
    }
    let _ = handle.send(ListIntent::Close).await;
    drop(handle.close());

    let Ok(Ok(view)) = tokio::time::timeout(STEP_TIMEOUT, task).await else {
        violations.push(Violation::Stalled {
            session: usize::MAX,
            waiting_for: "list unmount",
        });
        return violations;
    };

    let ids = |users: Vec<User>| users.iter().map(|u| u.id).collect::<BTreeSet<_>>();
    let server = ids(env.server.users());
    for client in [ids(view.controller().rows()), ids(env.users.snapshot())] {
        if client != server {
            violations.push(Violation::StoreMismatch {
                client: client.into_iter().collect(),
                server: server.iter().copied().collect(),
            });
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seeded_run_passes() {
        let report = run_simulator(SimulatorConfig {
            users: 6,
            ..SimulatorConfig::default()
        })
        .await;

        assert!(report.passed(), "{}", report.generate_text());
        assert_eq!(report.stats.saved, 6);
        assert_eq!(report.stats.lookups_found + report.stats.lookups_missing, 6);
        assert_eq!(
            report.final_users,
            6 - report.stats.deletes_confirmed
        );
    }

    #[test]
    fn plans_are_reproducible() {
        let a: Vec<_> = (0..4)
            .map({
                let mut rng = StdRng::seed_from_u64(7);
                move |i| plan_session(&mut rng, i).cpf
            })
            .collect();
        let b: Vec<_> = (0..4)
            .map({
                let mut rng = StdRng::seed_from_u64(7);
                move |i| plan_session(&mut rng, i).cpf
            })
            .collect();
        assert_eq!(a, b);
        assert!(a.iter().all(|cpf| cpf.len() == 11));
    }

    #[test]
    fn report_text_shows_result() {
        let report = SimulatorReport {
            config: SimulatorConfig::default(),
            stats: SimulatorStats::default(),
            violations: vec![Violation::FlagStuck { session: 3 }],
            final_users: 0,
        };
        let text = report.generate_text();
        assert!(text.contains("Seed: 42"));
        assert!(text.contains("FlagStuck"));
        assert!(text.ends_with("=== Result: FAIL ===\n"));
    }
}
