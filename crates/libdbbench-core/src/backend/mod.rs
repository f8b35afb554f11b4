//! Backend adapters
//!
//! A [`Backend`] is selected once from a [`BackendConfig`] and hands out one
//! [`Connection`] per worker. Connections are owned by exactly one worker
//! thread for the whole run.

pub mod memory;
#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod retry;
pub mod sled;
pub mod sql;
pub mod sqlite;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::BenchmarkConfig;
use crate::error::{BenchError, ConnectionError, ExecutionError, Result};
use crate::types::{ErrorClass, Operation};
use crate::workload::{builtin_suite, Benchmark};

pub use memory::{MemoryBackend, MemoryConfig};
pub use retry::{with_retry, Retrying};

/// Supported database engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Sqlite,
    Sled,
    Postgres,
    Cockroach,
    Mysql,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::Sqlite => "sqlite",
            BackendKind::Sled => "sled",
            BackendKind::Postgres => "postgres",
            BackendKind::Cockroach => "cockroach",
            BackendKind::Mysql => "mysql",
        }
    }

    /// Port used when the connection target leaves it at 0
    pub fn default_port(&self) -> Option<u16> {
        match self {
            BackendKind::Postgres => Some(5432),
            BackendKind::Cockroach => Some(26257),
            BackendKind::Mysql => Some(3306),
            _ => None,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Address and credentials of a network database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkTarget {
    pub host: String,
    /// 0 selects the engine's default port
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: Option<String>,
    pub connect_timeout: Duration,
}

impl Default for NetworkTarget {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 0,
            user: "root".to_string(),
            password: "root".to_string(),
            dbname: None,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl NetworkTarget {
    pub fn port_for(&self, kind: BackendKind) -> u16 {
        match (self.port, kind.default_port()) {
            (0, Some(default)) => default,
            (port, _) => port,
        }
    }
}

/// Which backend to open and how to reach it
#[derive(Debug, Clone, PartialEq)]
pub enum BackendConfig {
    Memory(MemoryConfig),
    Sqlite { path: PathBuf },
    Sled { path: PathBuf },
    Postgres(NetworkTarget),
    Cockroach(NetworkTarget),
    Mysql(NetworkTarget),
}

impl BackendConfig {
    pub fn kind(&self) -> BackendKind {
        match self {
            BackendConfig::Memory(_) => BackendKind::Memory,
            BackendConfig::Sqlite { .. } => BackendKind::Sqlite,
            BackendConfig::Sled { .. } => BackendKind::Sled,
            BackendConfig::Postgres(_) => BackendKind::Postgres,
            BackendConfig::Cockroach(_) => BackendKind::Cockroach,
            BackendConfig::Mysql(_) => BackendKind::Mysql,
        }
    }
}

/// A database engine the runner can benchmark
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Open a new connection, owned by one worker
    fn connect(&self) -> std::result::Result<Box<dyn Connection>, ConnectionError>;

    /// Create the schema the built-in benchmarks use
    fn setup(&self) -> Result<()>;

    /// Drop everything `setup` created
    fn cleanup(&self) -> Result<()>;

    /// Whether raw statements from scripts can be executed
    fn supports_statements(&self) -> bool {
        false
    }

    /// Benchmarks run when no script or mix is given
    fn builtin_benchmarks(&self) -> Vec<Benchmark> {
        builtin_suite()
    }
}

/// One connection to the engine
pub trait Connection: Send {
    /// Execute `op` and return the latency the engine call took
    fn execute(&mut self, op: &Operation) -> std::result::Result<Duration, ExecutionError>;
}

/// Build the backend described by `backend` for a run configured by `config`
pub fn open_backend(backend: &BackendConfig, config: &BenchmarkConfig) -> Result<Box<dyn Backend>> {
    tracing::debug!(backend = %backend.kind(), "Opening backend");

    match backend {
        BackendConfig::Memory(memory) => Ok(Box::new(MemoryBackend::new(memory.clone()))),
        BackendConfig::Sqlite { path } => Ok(Box::new(sqlite::SqliteBackend::open(
            path.clone(),
            &config.table,
        )?)),
        BackendConfig::Sled { path } => Ok(Box::new(self::sled::SledBackend::open(
            path.clone(),
            &config.table,
        )?)),
        BackendConfig::Postgres(target) => open_postgres(BackendKind::Postgres, target, config),
        BackendConfig::Cockroach(target) => open_postgres(BackendKind::Cockroach, target, config),
        BackendConfig::Mysql(target) => open_mysql(target, config),
    }
}

#[cfg(feature = "postgres")]
fn open_postgres(
    kind: BackendKind,
    target: &NetworkTarget,
    config: &BenchmarkConfig,
) -> Result<Box<dyn Backend>> {
    Ok(Box::new(self::postgres::PostgresBackend::new(kind, target, &config.table)))
}

#[cfg(not(feature = "postgres"))]
fn open_postgres(
    kind: BackendKind,
    _target: &NetworkTarget,
    _config: &BenchmarkConfig,
) -> Result<Box<dyn Backend>> {
    Err(BenchError::Config(format!(
        "{} support was not compiled in (enable the `postgres` feature)",
        kind
    )))
}

#[cfg(feature = "mysql")]
fn open_mysql(target: &NetworkTarget, config: &BenchmarkConfig) -> Result<Box<dyn Backend>> {
    Ok(Box::new(self::mysql::MysqlBackend::new(target, &config.table)))
}

#[cfg(not(feature = "mysql"))]
fn open_mysql(_target: &NetworkTarget, _config: &BenchmarkConfig) -> Result<Box<dyn Backend>> {
    Err(BenchError::Config(
        "mysql support was not compiled in (enable the `mysql` feature)".to_string(),
    ))
}

/// Execution error for an engine failure, keeping its display text
pub(crate) fn engine_error(
    kind: BackendKind,
    op: &Operation,
    class: ErrorClass,
    err: impl fmt::Display,
) -> ExecutionError {
    ExecutionError::new(kind.as_str(), op.kind(), class, err.to_string())
}

/// Backend-level failure during setup or cleanup
pub(crate) fn backend_error(kind: BackendKind, err: impl fmt::Display) -> BenchError {
    BenchError::Backend {
        backend: kind.as_str(),
        message: err.to_string(),
    }
}

/// SQL key parameter. Keys never exceed the iteration count, so the clamp
/// only guards against absurd budgets.
pub(crate) fn key_param(key: u64) -> i64 {
    i64::try_from(key).unwrap_or(i64::MAX)
}
