//! Shared types for the crucible test orchestrator.
//!
//! This crate provides the foundational types used across all other crucible
//! crates:
//! - `HarnessError` — unified error taxonomy
//! - `Failure` — a single recorded test failure, fatal or not
//! - `CaseReport` / `RunSummary` — per-case and per-run results
//! - `PropertyMap` — the placeholder environment threaded through a run

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Placeholder environment: raw key → replacement value.
///
/// Keys are stored unwrapped; the substitution engine forms the `${key}`
/// pattern itself when scanning a message.
pub type PropertyMap = HashMap<String, String>;

/// Unified error type for all crucible subsystems.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("test specification '{}': {}", .path.display(), .message)]
    SpecParse { path: PathBuf, message: String },

    #[error("step plan '{}': {}", .file.display(), .message)]
    PlanParse { file: PathBuf, message: String },

    #[error("missing artifact '{}': {}", .file.display(), .context)]
    MissingArtifact { file: PathBuf, context: String },

    #[error("client exited with code {}: {}", .exit_code, .context)]
    ClientInvocationFailed { exit_code: i32, context: String },

    #[error(
        "response mismatch for request '{}':\n--- expected ---\n{}--- observed ---\n{}",
        .request_file.display(),
        .expected,
        .observed
    )]
    ResponseMismatch {
        request_file: PathBuf,
        expected: String,
        observed: String,
    },

    #[error("invalid XML in {}: {}", .origin, .message)]
    ResponseNotXml { origin: String, message: String },

    #[error("capture '{}' matched no node for XPath '{}' (request '{}')", .name, .metavalue, .request_file.display())]
    CaptureMissing {
        name: String,
        metavalue: String,
        request_file: PathBuf,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// The failure category used for reporting.
    pub fn kind(&self) -> FailureKind {
        match self {
            HarnessError::SpecParse { .. } => FailureKind::SpecParse,
            HarnessError::PlanParse { .. } => FailureKind::PlanParse,
            HarnessError::MissingArtifact { .. } => FailureKind::MissingArtifact,
            HarnessError::ClientInvocationFailed { .. } => FailureKind::ClientInvocationFailed,
            HarnessError::ResponseMismatch { .. } => FailureKind::ResponseMismatch,
            HarnessError::ResponseNotXml { .. } => FailureKind::ResponseNotXml,
            HarnessError::CaptureMissing { .. } => FailureKind::CaptureMissing,
            HarnessError::Io(_) => FailureKind::Io,
        }
    }

    /// Returns `true` when the error aborts the enclosing phase.
    ///
    /// Non-fatal kinds are recorded on the case and execution continues with
    /// sibling nodes; fatal kinds trip the fail-fast flag.
    pub fn is_fatal(&self) -> bool {
        self.kind().is_fatal()
    }
}

/// A convenience alias for `Result<T, HarnessError>`.
pub type Result<T> = std::result::Result<T, HarnessError>;

// ---------------------------------------------------------------------------
// Failure records
// ---------------------------------------------------------------------------

/// Category of a recorded failure, mirroring [`HarnessError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    SpecParse,
    PlanParse,
    MissingArtifact,
    ClientInvocationFailed,
    ResponseMismatch,
    ResponseNotXml,
    CaptureMissing,
    Io,
}

impl FailureKind {
    pub fn is_fatal(self) -> bool {
        !matches!(
            self,
            FailureKind::ResponseMismatch
                | FailureKind::CaptureMissing
                | FailureKind::ClientInvocationFailed
        )
    }
}

/// One recorded failure on a test case.
///
/// `fatal` reflects what actually happened at the point of recording, not
/// just the kind's default: a `ClientInvocationFailed` escalates to fatal
/// when the node cannot produce a comparable response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub fatal: bool,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, fatal: bool, message: impl Into<String>) -> Self {
        Self {
            kind,
            fatal,
            message: message.into(),
        }
    }

    /// Record an error with its default fatality.
    pub fn from_error(err: &HarnessError) -> Self {
        Self::new(err.kind(), err.is_fatal(), err.to_string())
    }

    /// Record an error, forcing it fatal.
    pub fn fatal_from(err: &HarnessError) -> Self {
        Self::new(err.kind(), true, err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Case and run reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Passed,
    Failed,
    Disabled,
}

/// Final outcome of one registered case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseReport {
    pub suite_name: String,
    pub case_name: String,
    pub status: CaseStatus,
    pub failures: Vec<Failure>,
}

impl CaseReport {
    pub fn passed(suite_name: impl Into<String>, case_name: impl Into<String>) -> Self {
        Self {
            suite_name: suite_name.into(),
            case_name: case_name.into(),
            status: CaseStatus::Passed,
            failures: Vec::new(),
        }
    }

    pub fn failed(
        suite_name: impl Into<String>,
        case_name: impl Into<String>,
        failures: Vec<Failure>,
    ) -> Self {
        Self {
            suite_name: suite_name.into(),
            case_name: case_name.into(),
            status: CaseStatus::Failed,
            failures,
        }
    }

    pub fn disabled(suite_name: impl Into<String>, case_name: impl Into<String>) -> Self {
        Self {
            suite_name: suite_name.into(),
            case_name: case_name.into(),
            status: CaseStatus::Disabled,
            failures: Vec::new(),
        }
    }

    /// The fully qualified registration name, `<suite>.<case>`.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.suite_name, self.case_name)
    }
}

/// Aggregate counters for a whole run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub disabled: usize,
    pub duration_ms: u64,
}

impl RunSummary {
    /// The process-level success criterion: every enabled case passed.
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}
