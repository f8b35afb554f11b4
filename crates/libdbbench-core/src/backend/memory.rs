//! In-process key/value backend
//!
//! Useful for dry runs of a workload and for exercising the runner without a
//! database: latency and failures can be injected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use super::{Backend, BackendKind, Connection};
use crate::error::{ConnectionError, ExecutionError, Result};
use crate::types::{ErrorClass, Operation};

const BACKEND: &str = "memory";

/// Memory backend settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryConfig {
    /// Sleep added to every call
    pub latency: Duration,
    /// Fail every N-th call across all connections
    pub fail_every: Option<u64>,
    /// Class of the injected failures
    pub fail_class: ErrorClass,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            latency: Duration::ZERO,
            fail_every: None,
            fail_class: ErrorClass::Transient,
        }
    }
}

type Rows = HashMap<(Arc<str>, u64), i64>;

/// Shared map plus the call counter used for failure injection
pub struct MemoryBackend {
    config: MemoryConfig,
    rows: Arc<RwLock<Rows>>,
    calls: Arc<AtomicU64>,
}

impl MemoryBackend {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            rows: Arc::new(RwLock::new(HashMap::new())),
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of rows currently stored
    pub fn len(&self) -> usize {
        self.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Calls received so far, retries included
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl Backend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn connect(&self) -> std::result::Result<Box<dyn Connection>, ConnectionError> {
        Ok(Box::new(MemoryConnection {
            config: self.config.clone(),
            rows: Arc::clone(&self.rows),
            calls: Arc::clone(&self.calls),
        }))
    }

    fn setup(&self) -> Result<()> {
        Ok(())
    }

    fn cleanup(&self) -> Result<()> {
        if let Ok(mut rows) = self.rows.write() {
            rows.clear();
        }
        Ok(())
    }
}

struct MemoryConnection {
    config: MemoryConfig,
    rows: Arc<RwLock<Rows>>,
    calls: Arc<AtomicU64>,
}

impl MemoryConnection {
    fn apply(&self, op: &Operation) -> std::result::Result<(), ExecutionError> {
        match op {
            Operation::Insert { table, key, payload } => {
                let mut rows = self.rows.write().map_err(|_| lock_poisoned(op))?;
                let slot = (Arc::clone(table), *key);
                if rows.contains_key(&slot) {
                    return Err(ExecutionError::rejected(
                        BACKEND,
                        op.kind(),
                        format!("duplicate key {}", key),
                    ));
                }
                rows.insert(slot, *payload);
            }
            Operation::Select { table, key } => {
                let rows = self.rows.read().map_err(|_| lock_poisoned(op))?;
                let _ = rows.get(&(Arc::clone(table), *key));
            }
            Operation::Update { table, key, payload } => {
                let mut rows = self.rows.write().map_err(|_| lock_poisoned(op))?;
                if let Some(balance) = rows.get_mut(&(Arc::clone(table), *key)) {
                    *balance = *payload;
                }
            }
            Operation::Delete { table, key } => {
                let mut rows = self.rows.write().map_err(|_| lock_poisoned(op))?;
                rows.remove(&(Arc::clone(table), *key));
            }
            Operation::Statement { .. } => {
                return Err(ExecutionError::rejected(
                    BACKEND,
                    op.kind(),
                    "raw statements are not supported",
                ))
            }
        }
        Ok(())
    }
}

fn lock_poisoned(op: &Operation) -> ExecutionError {
    ExecutionError::fatal(BACKEND, op.kind(), "row map lock poisoned")
}

impl Connection for MemoryConnection {
    fn execute(&mut self, op: &Operation) -> std::result::Result<Duration, ExecutionError> {
        let start = Instant::now();
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;

        if !self.config.latency.is_zero() {
            thread::sleep(self.config.latency);
        }

        if let Some(every) = self.config.fail_every {
            if every > 0 && call % every == 0 {
                return Err(ExecutionError::new(
                    BACKEND,
                    op.kind(),
                    self.config.fail_class,
                    format!("injected failure on call {}", call),
                ));
            }
        }

        self.apply(op)?;
        Ok(start.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Arc<str> {
        Arc::from("simple")
    }

    #[test]
    fn test_crud_round() {
        let backend = MemoryBackend::new(MemoryConfig::default());
        let mut conn = backend.connect().unwrap();

        conn.execute(&Operation::Insert { table: table(), key: 1, payload: 10 })
            .unwrap();
        assert_eq!(backend.len(), 1);

        let dup = conn
            .execute(&Operation::Insert { table: table(), key: 1, payload: 11 })
            .unwrap_err();
        assert_eq!(dup.class, ErrorClass::Rejected);

        conn.execute(&Operation::Update { table: table(), key: 1, payload: 12 })
            .unwrap();
        conn.execute(&Operation::Select { table: table(), key: 1 }).unwrap();
        conn.execute(&Operation::Delete { table: table(), key: 1 }).unwrap();
        assert!(backend.is_empty());
    }

    #[test]
    fn test_fail_every_counts_across_connections() {
        let backend = MemoryBackend::new(MemoryConfig {
            fail_every: Some(3),
            ..Default::default()
        });
        let mut a = backend.connect().unwrap();
        let mut b = backend.connect().unwrap();

        let mut failures = 0;
        for key in 0..9 {
            let conn = if key % 2 == 0 { &mut a } else { &mut b };
            if let Err(e) = conn.execute(&Operation::Select { table: table(), key }) {
                assert!(e.is_transient());
                failures += 1;
            }
        }
        assert_eq!(failures, 3);
        assert_eq!(backend.calls(), 9);
    }

    #[test]
    fn test_injected_latency_is_measured() {
        let backend = MemoryBackend::new(MemoryConfig {
            latency: Duration::from_millis(2),
            ..Default::default()
        });
        let mut conn = backend.connect().unwrap();
        let latency = conn
            .execute(&Operation::Select { table: table(), key: 1 })
            .unwrap();
        assert!(latency >= Duration::from_millis(2));
    }

    #[test]
    fn test_cleanup_clears_rows() {
        let backend = MemoryBackend::new(MemoryConfig::default());
        let mut conn = backend.connect().unwrap();
        conn.execute(&Operation::Insert { table: table(), key: 5, payload: 1 })
            .unwrap();
        backend.cleanup().unwrap();
        assert!(backend.is_empty());
    }
}
