//! Reporter adapters.
//!
//! The engine reports through the [`Reporter`] trait and never depends on a
//! concrete frontend. [`ConsoleReporter`] prints human-readable lines,
//! [`JsonReporter`] writes a machine-readable run report, and
//! [`RecordingReporter`] captures everything for assertions in tests.

use std::path::PathBuf;

use crucible_types::{CaseReport, CaseStatus, Failure, RunSummary};
use serde::{Deserialize, Serialize};

pub trait Reporter: Send {
    /// A case has been registered under its final (possibly `DISABLED_`-
    /// prefixed) names. Called before any suite starts running.
    fn register_case(&mut self, _suite_name: &str, _case_name: &str) {}

    /// A case finished (or was skipped as disabled).
    fn case_finished(&mut self, report: &CaseReport);

    /// A suite-level phase (setup or teardown) recorded failures.
    fn suite_failure(&mut self, _suite_name: &str, _phase: &str, _failures: &[Failure]) {}

    /// The whole run is over.
    fn run_finished(&mut self, _summary: &RunSummary) {}
}

// ---------------------------------------------------------------------------
// ConsoleReporter
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct ConsoleReporter;

impl ConsoleReporter {
    pub fn new() -> Self {
        Self
    }
}

impl Reporter for ConsoleReporter {
    fn case_finished(&mut self, report: &CaseReport) {
        match report.status {
            CaseStatus::Passed => println!("PASS {}", report.full_name()),
            CaseStatus::Disabled => println!("SKIP {} (disabled)", report.full_name()),
            CaseStatus::Failed => {
                println!("FAIL {}", report.full_name());
                for failure in &report.failures {
                    let marker = if failure.fatal { "fatal" } else { "error" };
                    println!("  [{marker}] {}", failure.message);
                }
            }
        }
    }

    fn suite_failure(&mut self, suite_name: &str, phase: &str, failures: &[Failure]) {
        println!("FAIL {suite_name} ({phase})");
        for failure in failures {
            println!("  [suite] {}", failure.message);
        }
    }

    fn run_finished(&mut self, summary: &RunSummary) {
        println!(
            "\n{} cases: {} passed, {} failed, {} disabled ({} ms)",
            summary.total, summary.passed, summary.failed, summary.disabled, summary.duration_ms
        );
    }
}

// ---------------------------------------------------------------------------
// JsonReporter
// ---------------------------------------------------------------------------

/// The document written by [`JsonReporter`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub summary: RunSummary,
    pub cases: Vec<CaseReport>,
}

/// Collects case reports and writes one JSON document when the run finishes.
pub struct JsonReporter {
    path: PathBuf,
    cases: Vec<CaseReport>,
}

impl JsonReporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cases: Vec::new(),
        }
    }
}

impl Reporter for JsonReporter {
    fn case_finished(&mut self, report: &CaseReport) {
        self.cases.push(report.clone());
    }

    fn run_finished(&mut self, summary: &RunSummary) {
        let report = RunReport {
            summary: summary.clone(),
            cases: std::mem::take(&mut self.cases),
        };
        match serde_json::to_string_pretty(&report) {
            Ok(json) => {
                if let Err(err) = std::fs::write(&self.path, json) {
                    tracing::error!(path = %self.path.display(), error = %err, "failed to write run report");
                }
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to serialise run report");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingReporter
// ---------------------------------------------------------------------------

/// Test double that records every callback.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    pub registered: Vec<(String, String)>,
    pub reports: Vec<CaseReport>,
    pub suite_failures: Vec<(String, String, Vec<Failure>)>,
    pub summary: Option<RunSummary>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report_for(&self, full_name: &str) -> Option<&CaseReport> {
        self.reports.iter().find(|r| r.full_name() == full_name)
    }
}

impl Reporter for RecordingReporter {
    fn register_case(&mut self, suite_name: &str, case_name: &str) {
        self.registered
            .push((suite_name.to_string(), case_name.to_string()));
    }

    fn case_finished(&mut self, report: &CaseReport) {
        self.reports.push(report.clone());
    }

    fn suite_failure(&mut self, suite_name: &str, phase: &str, failures: &[Failure]) {
        self.suite_failures
            .push((suite_name.to_string(), phase.to_string(), failures.to_vec()));
    }

    fn run_finished(&mut self, summary: &RunSummary) {
        self.summary = Some(summary.clone());
    }
}
