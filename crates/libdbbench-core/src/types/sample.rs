//! Latency samples recorded by workers

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::operation::OpKind;

/// How a failed execution should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorClass {
    /// Likely to succeed on retry (busy, lock timeout, serialization failure)
    Transient,
    /// The engine refused this statement; neither retried nor fatal
    Rejected,
    /// Aborts the whole run (authentication, lost connection, I/O)
    Fatal,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::Rejected => "rejected",
            ErrorClass::Fatal => "fatal",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure(ErrorClass),
}

/// One measured execution of one operation. Never mutated after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub kind: OpKind,
    pub latency: Duration,
    pub outcome: Outcome,
}

impl Sample {
    pub fn success(kind: OpKind, latency: Duration) -> Self {
        Self {
            kind,
            latency,
            outcome: Outcome::Success,
        }
    }

    pub fn failure(kind: OpKind, latency: Duration, class: ErrorClass) -> Self {
        Self {
            kind,
            latency,
            outcome: Outcome::Failure(class),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}
