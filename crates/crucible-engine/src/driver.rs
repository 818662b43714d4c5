//! Lifecycle driver.
//!
//! Runs a loaded specification suite by suite: the suite map is seeded from
//! the process-level properties, suite setup runs once before any case,
//! every enabled case runs against a clone of the suite map, and suite
//! teardown runs once at the end (even when setup failed, matching the
//! original harness). Disabled suites and cases are registered under a
//! `DISABLED_` prefix and never touch the client.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use crucible_types::{CaseReport, CaseStatus, PropertyMap, RunSummary};

use crate::case::{run_case, run_phase};
use crate::lock;
use crate::process::ClientInvoker;
use crate::reporter::Reporter;
use crate::spec::{Specification, Suite};

const DISABLED_PREFIX: &str = "DISABLED_";

pub struct LifecycleDriver {
    invoker: Arc<dyn ClientInvoker>,
    maximum_concurrency: u64,
    properties: PropertyMap,
}

fn registration_name(name: &str, enabled: bool) -> String {
    if enabled {
        name.to_string()
    } else {
        format!("{DISABLED_PREFIX}{name}")
    }
}

impl LifecycleDriver {
    pub fn new(
        invoker: Arc<dyn ClientInvoker>,
        maximum_concurrency: u64,
        properties: PropertyMap,
    ) -> Self {
        Self {
            invoker,
            maximum_concurrency,
            properties,
        }
    }

    /// Execute the whole specification, reporting as cases finish.
    pub async fn run(
        &self,
        spec: &Specification,
        reporters: &mut [&mut dyn Reporter],
    ) -> RunSummary {
        let started = Instant::now();
        let mut summary = RunSummary::default();

        for suite in &spec.suites {
            let suite_name = registration_name(&suite.name, suite.enabled);
            for case in &suite.cases {
                let case_name = registration_name(&case.name, case.enabled);
                for reporter in reporters.iter_mut() {
                    reporter.register_case(&suite_name, &case_name);
                }
            }
        }

        for suite in &spec.suites {
            self.run_suite(suite, reporters, &mut summary).await;
        }

        summary.duration_ms = started.elapsed().as_millis() as u64;
        for reporter in reporters.iter_mut() {
            reporter.run_finished(&summary);
        }
        summary
    }

    async fn run_suite(
        &self,
        suite: &Suite,
        reporters: &mut [&mut dyn Reporter],
        summary: &mut RunSummary,
    ) {
        let suite_name = registration_name(&suite.name, suite.enabled);

        if !suite.enabled {
            tracing::info!(suite = %suite.name, "suite disabled");
            for case in &suite.cases {
                let case_name = registration_name(&case.name, case.enabled);
                report_case(
                    reporters,
                    summary,
                    CaseReport::disabled(suite_name.clone(), case_name),
                );
            }
            return;
        }

        tracing::info!(suite = %suite.name, cases = suite.cases.len(), "running suite");
        let suite_map = Arc::new(Mutex::new(self.properties.clone()));

        let setup = run_phase(
            self.invoker.clone(),
            &suite.setup,
            suite_map.clone(),
            self.maximum_concurrency,
        )
        .await;

        if setup.failures.is_empty() {
            tracing::debug!(
                suite = %suite.name,
                captured = setup.new_properties.len(),
                "suite setup complete"
            );
            // Setup captures were published straight into the suite map; the
            // clone below is what every case of this suite starts from.
            let case_base = lock(&suite_map).clone();
            for case in &suite.cases {
                let case_name = registration_name(&case.name, case.enabled);
                if !case.enabled {
                    report_case(
                        reporters,
                        summary,
                        CaseReport::disabled(suite_name.clone(), case_name),
                    );
                    continue;
                }
                tracing::info!(suite = %suite.name, case = %case.name, "running case");
                let failures = run_case(
                    self.invoker.clone(),
                    case,
                    case_base.clone(),
                    self.maximum_concurrency,
                )
                .await;
                let report = if failures.is_empty() {
                    CaseReport::passed(suite_name.clone(), case_name)
                } else {
                    CaseReport::failed(suite_name.clone(), case_name, failures)
                };
                report_case(reporters, summary, report);
            }
        } else {
            // Suite setup failed: every case of the suite fails without its
            // client ever being invoked.
            tracing::error!(suite = %suite.name, "suite setup failed; failing all cases");
            for reporter in reporters.iter_mut() {
                reporter.suite_failure(&suite_name, "setup", &setup.failures);
            }
            for case in &suite.cases {
                let case_name = registration_name(&case.name, case.enabled);
                let report = if case.enabled {
                    CaseReport::failed(suite_name.clone(), case_name, setup.failures.clone())
                } else {
                    CaseReport::disabled(suite_name.clone(), case_name)
                };
                report_case(reporters, summary, report);
            }
        }

        // Teardown runs regardless of what happened above.
        let teardown = run_phase(
            self.invoker.clone(),
            &suite.teardown,
            suite_map,
            self.maximum_concurrency,
        )
        .await;
        if !teardown.failures.is_empty() {
            for reporter in reporters.iter_mut() {
                reporter.suite_failure(&suite_name, "teardown", &teardown.failures);
            }
        }
    }
}

fn report_case(
    reporters: &mut [&mut dyn Reporter],
    summary: &mut RunSummary,
    report: CaseReport,
) {
    summary.total += 1;
    match report.status {
        CaseStatus::Passed => summary.passed += 1,
        CaseStatus::Failed => summary.failed += 1,
        CaseStatus::Disabled => summary.disabled += 1,
    }
    if report.status == CaseStatus::Failed {
        let fatal_count = report.failures.iter().filter(|f| f.fatal).count();
        tracing::warn!(
            case = %report.full_name(),
            failures = report.failures.len(),
            fatal = fatal_count,
            "case failed"
        );
    }
    for reporter in reporters.iter_mut() {
        reporter.case_finished(&report);
    }
}
