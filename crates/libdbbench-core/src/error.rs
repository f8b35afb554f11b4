use thiserror::Error;

use crate::types::{ErrorClass, OpKind};

/// Main error type for dbbench operations
#[derive(Debug, Error)]
pub enum BenchError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("script error: {0}")]
    Script(#[from] ScriptError),

    #[error("{backend}: {message}")]
    Backend {
        backend: &'static str,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl BenchError {
    /// Stable error code for machine-readable output
    pub fn error_code(&self) -> &'static str {
        match self {
            BenchError::Config(_) => "invalid_config",
            BenchError::Connection(_) => "connection_failed",
            BenchError::Execution(_) => "execution_failed",
            BenchError::Script(_) => "invalid_script",
            BenchError::Backend { .. } => "backend_error",
            BenchError::Io(_) => "io_error",
            BenchError::Json(_) => "internal_error",
            BenchError::TomlParse(_) => "invalid_config",
            BenchError::Csv(_) => "io_error",
            BenchError::Internal(_) => "internal_error",
        }
    }

    /// Process exit code for the CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            BenchError::Config(_) => 2,
            BenchError::Script(_) => 2,
            BenchError::TomlParse(_) => 2,
            BenchError::Connection(_) => 3,
            BenchError::Execution(_) => 4,
            _ => 1,
        }
    }
}

/// Opening a connection failed. Always aborts the run.
#[derive(Debug, Clone, Error)]
#[error("{backend}: connection failed: {message}")]
pub struct ConnectionError {
    pub backend: &'static str,
    pub message: String,
}

impl ConnectionError {
    pub fn new(backend: &'static str, message: impl Into<String>) -> Self {
        Self {
            backend,
            message: message.into(),
        }
    }
}

/// Executing one operation failed
#[derive(Debug, Clone, Error)]
#[error("{backend}: {op} failed ({class}): {message}")]
pub struct ExecutionError {
    pub backend: &'static str,
    pub op: OpKind,
    pub class: ErrorClass,
    pub message: String,
}

impl ExecutionError {
    pub fn new(
        backend: &'static str,
        op: OpKind,
        class: ErrorClass,
        message: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            op,
            class,
            message: message.into(),
        }
    }

    pub fn transient(backend: &'static str, op: OpKind, message: impl Into<String>) -> Self {
        Self::new(backend, op, ErrorClass::Transient, message)
    }

    pub fn rejected(backend: &'static str, op: OpKind, message: impl Into<String>) -> Self {
        Self::new(backend, op, ErrorClass::Rejected, message)
    }

    pub fn fatal(backend: &'static str, op: OpKind, message: impl Into<String>) -> Self {
        Self::new(backend, op, ErrorClass::Fatal, message)
    }

    pub fn is_transient(&self) -> bool {
        self.class == ErrorClass::Transient
    }

    pub fn is_fatal(&self) -> bool {
        self.class == ErrorClass::Fatal
    }
}

/// Errors raised while parsing a benchmark script
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    #[error("failed to parse \\benchmark line, missing mode")]
    NoMode,

    #[error("failed to parse mode, neither 'once' nor 'loop': {0}")]
    UnknownMode(String),

    #[error("missing name after \\name token")]
    NoName,

    #[error("line {line}: {message}")]
    Template { line: usize, message: String },
}

pub type Result<T> = std::result::Result<T, BenchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_error_names_backend_and_operation() {
        let err = ExecutionError::transient("sqlite", OpKind::Update, "database is locked");
        assert_eq!(
            err.to_string(),
            "sqlite: update failed (transient): database is locked"
        );
        assert!(err.is_transient());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(BenchError::Config("x".into()).exit_code(), 2);
        assert_eq!(BenchError::Script(ScriptError::NoMode).exit_code(), 2);
        assert_eq!(
            BenchError::from(ConnectionError::new("postgres", "refused")).exit_code(),
            3
        );
        assert_eq!(
            BenchError::from(ExecutionError::fatal("mysql", OpKind::Insert, "denied")).exit_code(),
            4
        );
        assert_eq!(BenchError::Internal("x".into()).exit_code(), 1);
    }
}
