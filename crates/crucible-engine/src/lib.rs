//! Test execution engine for crucible.
//!
//! This crate implements the whole orchestration core: client process
//! invocation, placeholder substitution and capture, XML comparison with
//! XPath suppression, the dataflow step executor, case and suite lifecycles,
//! specification loading, and the reporter adapters.

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod case;
pub mod driver;
pub mod placeholder;
pub mod process;
pub mod reporter;
pub mod spec;
pub mod step;
pub mod xml;

pub use case::{run_case, run_phase, PhaseOutcome};
pub use driver::LifecycleDriver;
pub use placeholder::{
    apply_placeholders, extract_captures, load_control_sidecar, CaptureResult, CaptureSpec,
};
pub use process::{ClientInvoker, ProcessClient, RunOutput};
pub use reporter::{ConsoleReporter, JsonReporter, RecordingReporter, Reporter, RunReport};
pub use spec::{load_specification, Case, Specification, Suite};
pub use step::PhaseRunner;
pub use xml::{canonical_form, load_ignore_sidecar, Suppressions};

/// Lock a mutex, recovering from poisoning. Test state behind these locks is
/// plain data, safe to read after a panicked writer.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
