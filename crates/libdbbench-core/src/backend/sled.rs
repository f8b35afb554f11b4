//! Embedded key/value backend on sled.
//!
//! Each logical table is a sled tree; keys are big-endian `u64`, values the
//! big-endian `i64` balance.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::{backend_error, engine_error, Backend, BackendKind, Connection};
use crate::error::{ConnectionError, ExecutionError, Result};
use crate::types::{ErrorClass, Operation};

/// sled database directory shared by all workers
pub struct SledBackend {
    path: PathBuf,
    table: String,
    /// The directory did not exist before this run
    created: bool,
    db: sled::Db,
}

impl SledBackend {
    pub fn open(path: PathBuf, table: &str) -> Result<Self> {
        let created = !path.exists();
        let db = sled::open(&path)
            .map_err(|e| ConnectionError::new("sled", format!("{}: {}", path.display(), e)))?;
        debug!(path = %path.display(), created, "Opened sled database");

        Ok(Self {
            path,
            table: table.to_string(),
            created,
            db,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Backend for SledBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sled
    }

    fn connect(&self) -> std::result::Result<Box<dyn Connection>, ConnectionError> {
        Ok(Box::new(SledConnection {
            db: self.db.clone(),
            trees: HashMap::new(),
        }))
    }

    fn setup(&self) -> Result<()> {
        self.db
            .open_tree(&self.table)
            .map_err(|e| backend_error(BackendKind::Sled, e))?;
        info!(path = %self.path.display(), tree = %self.table, "sled tree ready");
        Ok(())
    }

    fn cleanup(&self) -> Result<()> {
        self.db
            .drop_tree(&self.table)
            .map_err(|e| backend_error(BackendKind::Sled, e))?;
        self.db
            .flush()
            .map_err(|e| backend_error(BackendKind::Sled, e))?;

        if self.created && self.path.exists() {
            std::fs::remove_dir_all(&self.path)?;
            info!(path = %self.path.display(), "removed database directory created by dbbench");
        }
        Ok(())
    }
}

struct SledConnection {
    db: sled::Db,
    trees: HashMap<Arc<str>, sled::Tree>,
}

impl SledConnection {
    fn tree(&mut self, table: &Arc<str>) -> sled::Result<&sled::Tree> {
        if !self.trees.contains_key(table) {
            let tree = self.db.open_tree(table.as_bytes())?;
            self.trees.insert(Arc::clone(table), tree);
        }
        Ok(&self.trees[table])
    }

    fn run(&mut self, op: &Operation) -> std::result::Result<(), ExecutionError> {
        let fail = |e: sled::Error| engine_error(BackendKind::Sled, op, classify(&e), e);

        match op {
            Operation::Insert { table, key, payload } => {
                let tree = self.tree(table).map_err(fail)?;
                let swapped = tree
                    .compare_and_swap(
                        key.to_be_bytes(),
                        None as Option<&[u8]>,
                        Some(&payload.to_be_bytes()[..]),
                    )
                    .map_err(fail)?;
                if swapped.is_err() {
                    return Err(ExecutionError::rejected(
                        "sled",
                        op.kind(),
                        format!("duplicate key {}", key),
                    ));
                }
            }
            Operation::Select { table, key } => {
                let tree = self.tree(table).map_err(fail)?;
                tree.get(key.to_be_bytes()).map_err(fail)?;
            }
            Operation::Update { table, key, payload } => {
                let tree = self.tree(table).map_err(fail)?;
                let value = payload.to_be_bytes();
                // A missing row stays missing, like an UPDATE matching no rows
                tree.update_and_fetch(key.to_be_bytes(), |old| old.map(|_| value.to_vec()))
                    .map_err(fail)?;
            }
            Operation::Delete { table, key } => {
                let tree = self.tree(table).map_err(fail)?;
                tree.remove(key.to_be_bytes()).map_err(fail)?;
            }
            Operation::Statement { .. } => {
                return Err(ExecutionError::rejected(
                    "sled",
                    op.kind(),
                    "raw statements are not supported",
                ))
            }
        }
        Ok(())
    }
}

impl Connection for SledConnection {
    fn execute(&mut self, op: &Operation) -> std::result::Result<Duration, ExecutionError> {
        let start = Instant::now();
        self.run(op)?;
        Ok(start.elapsed())
    }
}

/// Map a sled error onto the retry/abort policy
pub fn classify(err: &sled::Error) -> ErrorClass {
    match err {
        sled::Error::CollectionNotFound(_) | sled::Error::Unsupported(_) => ErrorClass::Rejected,
        _ => ErrorClass::Fatal,
    }
}
