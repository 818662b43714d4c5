//! Case execution: setup plan, body plan, teardown plan.
//!
//! All three phases of a case share one placeholder map, so captures made in
//! setup are visible to the body and the teardown. Each phase gets its own
//! fail-fast flag: a fatal setup failure skips body *and* teardown (teardown
//! presumes setup succeeded), while a failed body still tears down.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crucible_types::{Failure, PropertyMap};

use crate::process::ClientInvoker;
use crate::spec::Case;
use crate::step::PhaseRunner;

/// Result of running one plan as a phase.
#[derive(Debug, Default)]
pub struct PhaseOutcome {
    pub failures: Vec<Failure>,
    pub fatal: bool,
    pub new_properties: PropertyMap,
}

/// Run one plan against a shared placeholder map.
pub async fn run_phase(
    invoker: Arc<dyn ClientInvoker>,
    plan: &[PathBuf],
    placeholders: Arc<Mutex<PropertyMap>>,
    maximum_concurrency: u64,
) -> PhaseOutcome {
    let runner = PhaseRunner::new(invoker, placeholders, maximum_concurrency);
    runner.run_plan(plan).await;
    PhaseOutcome {
        fatal: !runner.healthy(),
        failures: runner.take_failures(),
        new_properties: runner.take_new_properties(),
    }
}

/// Run a case's three phases and collect every recorded failure.
///
/// `starting_properties` is the case-scoped map: a clone of the owning
/// suite's map. Captures made here stay in the clone and never reach the
/// suite.
pub async fn run_case(
    invoker: Arc<dyn ClientInvoker>,
    case: &Case,
    starting_properties: PropertyMap,
    maximum_concurrency: u64,
) -> Vec<Failure> {
    let placeholders = Arc::new(Mutex::new(starting_properties));
    let mut failures = Vec::new();

    let setup = run_phase(
        invoker.clone(),
        &case.setup,
        placeholders.clone(),
        maximum_concurrency,
    )
    .await;
    let setup_fatal = setup.fatal;
    failures.extend(setup.failures);
    if setup_fatal {
        tracing::warn!(case = %case.name, "case setup failed; skipping body and teardown");
        return failures;
    }

    let body = run_phase(
        invoker.clone(),
        &case.plan,
        placeholders.clone(),
        maximum_concurrency,
    )
    .await;
    failures.extend(body.failures);

    let teardown = run_phase(invoker, &case.teardown, placeholders, maximum_concurrency).await;
    failures.extend(teardown.failures);

    failures
}
