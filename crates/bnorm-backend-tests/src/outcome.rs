use std::fmt;

use bnorm::BackendError;
use thiserror::Error;

use crate::compare::ComparisonReport;
use crate::params::{ApiVersion, BnOp};

/// Result of one test instance.
#[derive(Debug)]
pub enum TestOutcome {
    Passed,
    Skipped { reason: String },
    Failed(Failure),
}

impl TestOutcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, TestOutcome::Passed)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, TestOutcome::Skipped { .. })
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            TestOutcome::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            TestOutcome::Passed => "ok",
            TestOutcome::Skipped { .. } => "skip",
            TestOutcome::Failed(_) => "fail",
        }
    }
}

#[derive(Debug, Error)]
pub enum Failure {
    #[error("unsupported configuration: {0}")]
    UnsupportedConfiguration(String),
    #[error("{op} {api} call failed: {source}")]
    DeviceCall {
        op: BnOp,
        api: ApiVersion,
        #[source]
        source: BackendError,
    },
    #[error("{}", MismatchList(.0))]
    Mismatch(Vec<ComparisonReport>),
    #[error("setup failed: {0}")]
    Setup(String),
    #[error("readback failed: {0}")]
    Readback(String),
}

impl Failure {
    /// Reports of the tensors that failed comparison; empty for other failure kinds.
    pub fn reports(&self) -> &[ComparisonReport] {
        match self {
            Failure::Mismatch(reports) => reports,
            _ => &[],
        }
    }
}

struct MismatchList<'a>(&'a [ComparisonReport]);

impl fmt::Display for MismatchList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} tensor(s) outside tolerance", self.0.len())?;
        for report in self.0 {
            write!(f, "\n{report}")?;
        }
        Ok(())
    }
}
