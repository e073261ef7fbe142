//! Case outcomes and the failure taxonomy.

use medata_core::{HarnessError, ValidationError};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Failed,
    Errored,
    TimedOut,
    Skipped,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Passed => "passed",
            Outcome::Failed => "failed",
            Outcome::Errored => "errored",
            Outcome::TimedOut => "timed out",
            Outcome::Skipped => "skipped",
        }
    }

    /// Failed, errored and timed-out cases fail the run.
    pub fn is_problem(self) -> bool {
        matches!(self, Outcome::Failed | Outcome::Errored | Outcome::TimedOut)
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a case attempt did not pass.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CaseFailure {
    /// A check on the API's behaviour failed.
    #[error("{0}")]
    Assertion(String),
    /// Fixtures, database, storage or transport were unavailable.
    #[error("setup error: {0}")]
    Setup(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("skipped: {0}")]
    Skip(String),
}

impl CaseFailure {
    pub fn skip(reason: impl Into<String>) -> Self {
        CaseFailure::Skip(reason.into())
    }

    pub fn assertion(message: impl Into<String>) -> Self {
        CaseFailure::Assertion(message.into())
    }

    pub fn outcome(&self) -> Outcome {
        match self {
            CaseFailure::Assertion(_) => Outcome::Failed,
            CaseFailure::Setup(_) => Outcome::Errored,
            CaseFailure::Timeout(_) => Outcome::TimedOut,
            CaseFailure::Skip(_) => Outcome::Skipped,
        }
    }
}

impl From<ValidationError> for CaseFailure {
    fn from(e: ValidationError) -> Self {
        CaseFailure::Assertion(e.message)
    }
}

impl From<HarnessError> for CaseFailure {
    fn from(e: HarnessError) -> Self {
        match e {
            HarnessError::Timeout { .. } => CaseFailure::Timeout(e.to_string()),
            HarnessError::Decode { .. } => CaseFailure::Assertion(e.to_string()),
            other => CaseFailure::Setup(other.to_string()),
        }
    }
}

pub type CaseResult = Result<(), CaseFailure>;
