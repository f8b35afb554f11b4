//! PostgreSQL and CockroachDB backend (postgres crate, blocking client)

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use postgres::{Client, Config, NoTls, Statement};
use tracing::{debug, info, warn};

use super::sql::{CrudSql, Dialect};
use super::{backend_error, engine_error, key_param, Backend, BackendKind, Connection, NetworkTarget};
use crate::error::{ConnectionError, ExecutionError, Result};
use crate::types::{ErrorClass, Operation};
use crate::workload::Benchmark;

/// SQLSTATE codes worth retrying: serialization failure, deadlock, lock not
/// available, statement timeout, too many connections
const TRANSIENT_STATES: &[&str] = &["40001", "40P01", "55P03", "57014", "53300"];

/// SQLSTATE codes that end the run: bad credentials, server shutting down
const FATAL_STATES: &[&str] = &["28P01", "28000", "57P01", "57P02", "57P03"];

pub struct PostgresBackend {
    kind: BackendKind,
    dialect: Dialect,
    config: Config,
    table: String,
}

impl PostgresBackend {
    pub fn new(kind: BackendKind, target: &NetworkTarget, table: &str) -> Self {
        let mut config = Config::new();
        config
            .host(&target.host)
            .port(target.port_for(kind))
            .user(&target.user)
            .password(&target.password)
            .connect_timeout(target.connect_timeout)
            .application_name("dbbench");
        if let Some(dbname) = &target.dbname {
            config.dbname(dbname);
        }

        let dialect = match kind {
            BackendKind::Cockroach => Dialect::Cockroach,
            _ => Dialect::Postgres,
        };

        Self {
            kind,
            dialect,
            config,
            table: table.to_string(),
        }
    }

    fn client(&self) -> std::result::Result<Client, ConnectionError> {
        self.config
            .connect(NoTls)
            .map_err(|e| ConnectionError::new(self.kind.as_str(), e.to_string()))
    }
}

impl Backend for PostgresBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn connect(&self) -> std::result::Result<Box<dyn Connection>, ConnectionError> {
        Ok(Box::new(PostgresConnection {
            kind: self.kind,
            dialect: self.dialect,
            client: self.client()?,
            prepared: HashMap::new(),
        }))
    }

    fn setup(&self) -> Result<()> {
        let mut client = self.client()?;
        for stmt in self.dialect.setup_statements(&self.table) {
            debug!(backend = %self.kind, sql = %stmt, "setup");
            client
                .batch_execute(&stmt)
                .map_err(|e| backend_error(self.kind, e))?;
        }
        info!(backend = %self.kind, "schema ready");
        Ok(())
    }

    fn cleanup(&self) -> Result<()> {
        let mut client = self.client()?;
        for stmt in self.dialect.cleanup_statements(&self.table) {
            if let Err(e) = client.batch_execute(&stmt) {
                warn!(backend = %self.kind, sql = %stmt, error = %e, "cleanup statement failed");
            }
        }
        Ok(())
    }

    fn supports_statements(&self) -> bool {
        true
    }

    fn builtin_benchmarks(&self) -> Vec<Benchmark> {
        self.dialect.builtin_benchmarks()
    }
}

/// CRUD statements prepared on one connection
#[derive(Clone)]
struct Prepared {
    insert: Statement,
    select: Statement,
    update: Statement,
    delete: Statement,
}

struct PostgresConnection {
    kind: BackendKind,
    dialect: Dialect,
    client: Client,
    prepared: HashMap<Arc<str>, Prepared>,
}

impl PostgresConnection {
    fn prepared(&mut self, table: &Arc<str>) -> std::result::Result<Prepared, postgres::Error> {
        if let Some(prepared) = self.prepared.get(table) {
            return Ok(prepared.clone());
        }

        let sql = CrudSql::new(self.dialect, table);
        let prepared = Prepared {
            insert: self.client.prepare(&sql.insert)?,
            select: self.client.prepare(&sql.select)?,
            update: self.client.prepare(&sql.update)?,
            delete: self.client.prepare(&sql.delete)?,
        };
        self.prepared.insert(Arc::clone(table), prepared.clone());
        Ok(prepared)
    }

    fn run(&mut self, op: &Operation) -> std::result::Result<(), postgres::Error> {
        match op {
            Operation::Insert { table, key, payload } => {
                let st = self.prepared(table)?;
                self.client.execute(&st.insert, &[&key_param(*key), payload])?;
            }
            Operation::Select { table, key } => {
                let st = self.prepared(table)?;
                self.client.query(&st.select, &[&key_param(*key)])?;
            }
            Operation::Update { table, key, payload } => {
                let st = self.prepared(table)?;
                self.client.execute(&st.update, &[payload, &key_param(*key)])?;
            }
            Operation::Delete { table, key } => {
                let st = self.prepared(table)?;
                self.client.execute(&st.delete, &[&key_param(*key)])?;
            }
            Operation::Statement { sql } => self.client.batch_execute(sql)?,
        }
        Ok(())
    }
}

impl Connection for PostgresConnection {
    fn execute(&mut self, op: &Operation) -> std::result::Result<Duration, ExecutionError> {
        let start = Instant::now();
        self.run(op)
            .map_err(|e| engine_error(self.kind, op, classify(&e), e))?;
        Ok(start.elapsed())
    }
}

/// Map a postgres error onto the retry/abort policy
pub fn classify(err: &postgres::Error) -> ErrorClass {
    if err.is_closed() {
        return ErrorClass::Fatal;
    }
    match err.code() {
        Some(state) => classify_sqlstate(state.code()),
        // No SQLSTATE means the failure happened below the protocol
        None => ErrorClass::Fatal,
    }
}

fn classify_sqlstate(code: &str) -> ErrorClass {
    if TRANSIENT_STATES.contains(&code) {
        ErrorClass::Transient
    } else if FATAL_STATES.contains(&code) {
        ErrorClass::Fatal
    } else {
        ErrorClass::Rejected
    }
}
