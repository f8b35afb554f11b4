//! SQLite backend (rusqlite, bundled)

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rusqlite::{params, ErrorCode};
use tracing::{debug, info, warn};

use super::sql::{CrudSql, Dialect};
use super::{backend_error, engine_error, key_param, Backend, BackendKind, Connection};
use crate::error::{ConnectionError, ExecutionError, Result};
use crate::types::{ErrorClass, Operation};
use crate::workload::Benchmark;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite database file shared by all workers
pub struct SqliteBackend {
    path: PathBuf,
    table: String,
    /// The file did not exist before this run
    created: bool,
}

impl SqliteBackend {
    pub fn open(path: PathBuf, table: &str) -> Result<Self> {
        let created = !path.exists();
        Ok(Self {
            path,
            table: table.to_string(),
            created,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_connection(&self) -> rusqlite::Result<rusqlite::Connection> {
        let conn = rusqlite::Connection::open(&self.path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }
}

impl Backend for SqliteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn connect(&self) -> std::result::Result<Box<dyn Connection>, ConnectionError> {
        let conn = self
            .open_connection()
            .map_err(|e| ConnectionError::new("sqlite", format!("{}: {}", self.path.display(), e)))?;
        Ok(Box::new(SqliteConnection {
            conn,
            statements: HashMap::new(),
        }))
    }

    fn setup(&self) -> Result<()> {
        let conn = self
            .open_connection()
            .map_err(|e| ConnectionError::new("sqlite", e.to_string()))?;
        for stmt in Dialect::Sqlite.setup_statements(&self.table) {
            debug!(sql = %stmt, "sqlite setup");
            conn.execute_batch(&stmt)
                .map_err(|e| backend_error(BackendKind::Sqlite, e))?;
        }
        info!(path = %self.path.display(), "sqlite schema ready");
        Ok(())
    }

    fn cleanup(&self) -> Result<()> {
        {
            let conn = self
                .open_connection()
                .map_err(|e| ConnectionError::new("sqlite", e.to_string()))?;
            for stmt in Dialect::Sqlite.cleanup_statements(&self.table) {
                if let Err(e) = conn.execute_batch(&stmt) {
                    warn!(sql = %stmt, error = %e, "sqlite cleanup statement failed");
                }
            }
        }

        if self.created {
            for suffix in ["", "-wal", "-shm"] {
                let mut file = self.path.clone().into_os_string();
                file.push(suffix);
                let file = PathBuf::from(file);
                if file.exists() {
                    std::fs::remove_file(&file)?;
                }
            }
            info!(path = %self.path.display(), "removed database file created by dbbench");
        }
        Ok(())
    }

    fn supports_statements(&self) -> bool {
        true
    }

    fn builtin_benchmarks(&self) -> Vec<Benchmark> {
        Dialect::Sqlite.builtin_benchmarks()
    }
}

struct SqliteConnection {
    conn: rusqlite::Connection,
    statements: HashMap<Arc<str>, CrudSql>,
}

fn crud<'a>(cache: &'a mut HashMap<Arc<str>, CrudSql>, table: &Arc<str>) -> &'a CrudSql {
    cache
        .entry(Arc::clone(table))
        .or_insert_with(|| CrudSql::new(Dialect::Sqlite, table))
}

impl SqliteConnection {
    fn run(&mut self, op: &Operation) -> rusqlite::Result<()> {
        match op {
            Operation::Insert { table, key, payload } => {
                let sql = crud(&mut self.statements, table);
                let mut stmt = self.conn.prepare_cached(&sql.insert)?;
                stmt.execute(params![key_param(*key), payload])?;
            }
            Operation::Select { table, key } => {
                let sql = crud(&mut self.statements, table);
                let mut stmt = self.conn.prepare_cached(&sql.select)?;
                let mut rows = stmt.query(params![key_param(*key)])?;
                while rows.next()?.is_some() {}
            }
            Operation::Update { table, key, payload } => {
                let sql = crud(&mut self.statements, table);
                let mut stmt = self.conn.prepare_cached(&sql.update)?;
                stmt.execute(params![payload, key_param(*key)])?;
            }
            Operation::Delete { table, key } => {
                let sql = crud(&mut self.statements, table);
                let mut stmt = self.conn.prepare_cached(&sql.delete)?;
                stmt.execute(params![key_param(*key)])?;
            }
            Operation::Statement { sql } => self.conn.execute_batch(sql)?,
        }
        Ok(())
    }
}

impl Connection for SqliteConnection {
    fn execute(&mut self, op: &Operation) -> std::result::Result<Duration, ExecutionError> {
        let start = Instant::now();
        self.run(op)
            .map_err(|e| engine_error(BackendKind::Sqlite, op, classify(&e), e))?;
        Ok(start.elapsed())
    }
}

/// Map a rusqlite error onto the retry/abort policy
pub fn classify(err: &rusqlite::Error) -> ErrorClass {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => match e.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => ErrorClass::Transient,
            ErrorCode::ConstraintViolation => ErrorClass::Rejected,
            ErrorCode::CannotOpen
            | ErrorCode::NotADatabase
            | ErrorCode::PermissionDenied
            | ErrorCode::ReadOnly
            | ErrorCode::DiskFull
            | ErrorCode::DatabaseCorrupt
            | ErrorCode::SystemIoFailure => ErrorClass::Fatal,
            _ => ErrorClass::Rejected,
        },
        _ => ErrorClass::Rejected,
    }
}
