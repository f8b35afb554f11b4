//! Benchmark operations issued by the workload driver

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Kind of an operation, used to bucket samples in the report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Insert,
    Select,
    Update,
    Delete,
    Statement,
}

impl OpKind {
    /// Number of operation kinds
    pub const COUNT: usize = 5;

    /// All kinds, in report order
    pub const ALL: [OpKind; OpKind::COUNT] = [
        OpKind::Insert,
        OpKind::Select,
        OpKind::Update,
        OpKind::Delete,
        OpKind::Statement,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Insert => "insert",
            OpKind::Select => "select",
            OpKind::Update => "update",
            OpKind::Delete => "delete",
            OpKind::Statement => "statement",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpKind {
    type Err = String;

    /// Accepts singular and plural names, so `inserts` works like `insert`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_lowercase();
        match name.strip_suffix('s').unwrap_or(name.as_str()) {
            "insert" => Ok(OpKind::Insert),
            "select" => Ok(OpKind::Select),
            "update" => Ok(OpKind::Update),
            "delete" => Ok(OpKind::Delete),
            "statement" => Ok(OpKind::Statement),
            _ => Err(format!(
                "unknown operation '{}', expected insert, select, update or delete",
                s.trim()
            )),
        }
    }
}

/// A single benchmark operation.
///
/// Produced by the driver and consumed immediately by exactly one worker.
/// `table` is the logical table name; adapters map it onto their own
/// schema (for example `dbbench_simple` in SQLite).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Insert { table: Arc<str>, key: u64, payload: i64 },
    Select { table: Arc<str>, key: u64 },
    Update { table: Arc<str>, key: u64, payload: i64 },
    Delete { table: Arc<str>, key: u64 },
    /// Raw statement rendered from a script template
    Statement { sql: String },
}

impl Operation {
    pub fn kind(&self) -> OpKind {
        match self {
            Operation::Insert { .. } => OpKind::Insert,
            Operation::Select { .. } => OpKind::Select,
            Operation::Update { .. } => OpKind::Update,
            Operation::Delete { .. } => OpKind::Delete,
            Operation::Statement { .. } => OpKind::Statement,
        }
    }

    pub fn key(&self) -> Option<u64> {
        match self {
            Operation::Insert { key, .. }
            | Operation::Select { key, .. }
            | Operation::Update { key, .. }
            | Operation::Delete { key, .. } => Some(*key),
            Operation::Statement { .. } => None,
        }
    }
}
