//! MySQL, MariaDB and TiDB backend (mysql crate, blocking client)

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mysql::prelude::Queryable;
use mysql::{Conn, OptsBuilder, Row, Statement};
use tracing::{debug, info, warn};

use super::sql::{CrudSql, Dialect};
use super::{backend_error, engine_error, key_param, Backend, BackendKind, Connection, NetworkTarget};
use crate::error::{ConnectionError, ExecutionError, Result};
use crate::types::{ErrorClass, Operation};
use crate::workload::Benchmark;

/// Server error codes worth retrying: lock wait timeout, deadlock, too many
/// connections, user connection limit
const TRANSIENT_CODES: &[u16] = &[1205, 1213, 1040, 1203];

/// Server error codes that end the run: access denied
const FATAL_CODES: &[u16] = &[1044, 1045, 1698];

pub struct MysqlBackend {
    opts: OptsBuilder,
    table: String,
}

impl MysqlBackend {
    pub fn new(target: &NetworkTarget, table: &str) -> Self {
        let opts = OptsBuilder::new()
            .ip_or_hostname(Some(target.host.clone()))
            .tcp_port(target.port_for(BackendKind::Mysql))
            .user(Some(target.user.clone()))
            .pass(Some(target.password.clone()))
            .db_name(target.dbname.clone())
            .tcp_connect_timeout(Some(target.connect_timeout));

        Self {
            opts,
            table: table.to_string(),
        }
    }

    fn conn(&self) -> std::result::Result<Conn, ConnectionError> {
        Conn::new(self.opts.clone()).map_err(|e| ConnectionError::new("mysql", e.to_string()))
    }
}

impl Backend for MysqlBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Mysql
    }

    fn connect(&self) -> std::result::Result<Box<dyn Connection>, ConnectionError> {
        Ok(Box::new(MysqlConnection {
            conn: self.conn()?,
            prepared: HashMap::new(),
        }))
    }

    fn setup(&self) -> Result<()> {
        let mut conn = self.conn()?;
        for stmt in Dialect::Mysql.setup_statements(&self.table) {
            debug!(sql = %stmt, "mysql setup");
            conn.query_drop(stmt.as_str())
                .map_err(|e| backend_error(BackendKind::Mysql, e))?;
        }
        info!("mysql schema ready");
        Ok(())
    }

    fn cleanup(&self) -> Result<()> {
        let mut conn = self.conn()?;
        for stmt in Dialect::Mysql.cleanup_statements(&self.table) {
            if let Err(e) = conn.query_drop(stmt.as_str()) {
                warn!(sql = %stmt, error = %e, "mysql cleanup statement failed");
            }
        }
        Ok(())
    }

    fn supports_statements(&self) -> bool {
        true
    }

    fn builtin_benchmarks(&self) -> Vec<Benchmark> {
        Dialect::Mysql.builtin_benchmarks()
    }
}

#[derive(Clone)]
struct Prepared {
    insert: Statement,
    select: Statement,
    update: Statement,
    delete: Statement,
}

struct MysqlConnection {
    conn: Conn,
    prepared: HashMap<Arc<str>, Prepared>,
}

impl MysqlConnection {
    fn prepared(&mut self, table: &Arc<str>) -> mysql::Result<Prepared> {
        if let Some(prepared) = self.prepared.get(table) {
            return Ok(prepared.clone());
        }

        let sql = CrudSql::new(Dialect::Mysql, table);
        let prepared = Prepared {
            insert: self.conn.prep(&sql.insert)?,
            select: self.conn.prep(&sql.select)?,
            update: self.conn.prep(&sql.update)?,
            delete: self.conn.prep(&sql.delete)?,
        };
        self.prepared.insert(Arc::clone(table), prepared.clone());
        Ok(prepared)
    }

    fn run(&mut self, op: &Operation) -> mysql::Result<()> {
        match op {
            Operation::Insert { table, key, payload } => {
                let st = self.prepared(table)?;
                self.conn.exec_drop(&st.insert, (key_param(*key), *payload))?;
            }
            Operation::Select { table, key } => {
                let st = self.prepared(table)?;
                let _rows: Vec<Row> = self.conn.exec(&st.select, (key_param(*key),))?;
            }
            Operation::Update { table, key, payload } => {
                let st = self.prepared(table)?;
                self.conn.exec_drop(&st.update, (*payload, key_param(*key)))?;
            }
            Operation::Delete { table, key } => {
                let st = self.prepared(table)?;
                self.conn.exec_drop(&st.delete, (key_param(*key),))?;
            }
            Operation::Statement { sql } => self.conn.query_drop(sql.as_str())?,
        }
        Ok(())
    }
}

impl Connection for MysqlConnection {
    fn execute(&mut self, op: &Operation) -> std::result::Result<Duration, ExecutionError> {
        let start = Instant::now();
        self.run(op)
            .map_err(|e| engine_error(BackendKind::Mysql, op, classify(&e), e))?;
        Ok(start.elapsed())
    }
}

/// Map a mysql error onto the retry/abort policy
pub fn classify(err: &mysql::Error) -> ErrorClass {
    match err {
        mysql::Error::MySqlError(e) => classify_code(e.code),
        mysql::Error::IoError(_) | mysql::Error::DriverError(_) => ErrorClass::Fatal,
        _ => ErrorClass::Rejected,
    }
}

fn classify_code(code: u16) -> ErrorClass {
    if TRANSIENT_CODES.contains(&code) {
        ErrorClass::Transient
    } else if FATAL_CODES.contains(&code) {
        ErrorClass::Fatal
    } else {
        ErrorClass::Rejected
    }
}
