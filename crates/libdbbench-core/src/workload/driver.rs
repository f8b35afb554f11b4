//! Workload driver - hands out operations to workers

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::{OperationMix, Template, Workload};
use crate::config::{BenchmarkConfig, KeyPattern};
use crate::types::{OpKind, Operation};

/// Random draws spent looking for an earlier insert before scanning back to
/// the most recent one
const KEY_DRAWS: usize = 16;

#[derive(Debug)]
enum Source {
    Mix {
        mix: OperationMix,
        table: Arc<str>,
        key_pattern: KeyPattern,
    },
    Script(Template),
}

/// Lazy, deterministic operation stream shared by all workers of a run.
///
/// The operation at index `i` depends only on `(seed, i)`: every index gets
/// its own ChaCha stream, so the issued sequence is the same no matter which
/// worker pulls which index. Allocation is one atomic increment.
#[derive(Debug)]
pub struct WorkloadDriver {
    source: Source,
    seed: u64,
    budget: Option<u64>,
    next_index: AtomicU64,
}

impl WorkloadDriver {
    /// Driver for `workload` with the seed, key pattern, table and stop
    /// condition of `config`
    pub fn new(workload: &Workload, config: &BenchmarkConfig) -> Self {
        let source = match workload {
            Workload::Mix(mix) => Source::Mix {
                mix: *mix,
                table: Arc::from(config.table.as_str()),
                key_pattern: config.key_pattern,
            },
            Workload::Script(template) => Source::Script(template.clone()),
        };

        Self {
            source,
            seed: config.seed,
            budget: config.iterations(),
            next_index: AtomicU64::new(0),
        }
    }

    /// Override the operation budget; `None` makes the stream unbounded
    pub fn with_budget(mut self, budget: Option<u64>) -> Self {
        self.budget = budget;
        self
    }

    pub fn budget(&self) -> Option<u64> {
        self.budget
    }

    /// Next operation, or `None` once the budget is spent
    pub fn next(&self) -> Option<Operation> {
        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        if let Some(budget) = self.budget {
            if index >= budget {
                return None;
            }
        }
        Some(self.operation_at(index))
    }

    /// Number of operations handed out so far
    pub fn issued(&self) -> u64 {
        let allocated = self.next_index.load(Ordering::Relaxed);
        match self.budget {
            Some(budget) => allocated.min(budget),
            None => allocated,
        }
    }

    /// The operation at 0-based `index`. Pure: same seed and index, same
    /// operation.
    pub fn operation_at(&self, index: u64) -> Operation {
        let mut rng = self.rng_at(index);
        let iteration = index + 1;

        match &self.source {
            Source::Script(template) => Operation::Statement {
                sql: template.render(iteration, &mut rng),
            },
            Source::Mix {
                mix,
                table,
                key_pattern,
            } => {
                let kind = mix.select(rng.gen::<f64>());
                let key = match (key_pattern, kind) {
                    (KeyPattern::Sequential, _) | (KeyPattern::Random, OpKind::Insert) => iteration,
                    (KeyPattern::Random, _) => self.inserted_key(mix, index, &mut rng),
                };
                let table = Arc::clone(table);

                match kind {
                    OpKind::Insert => Operation::Insert {
                        table,
                        key,
                        payload: rng.gen_range(0..=i64::MAX),
                    },
                    OpKind::Select => Operation::Select { table, key },
                    OpKind::Update => Operation::Update {
                        table,
                        key,
                        payload: rng.gen_range(0..=i64::MAX),
                    },
                    OpKind::Delete => Operation::Delete { table, key },
                    OpKind::Statement => unreachable!("operation mixes never select statements"),
                }
            }
        }
    }

    fn rng_at(&self, index: u64) -> ChaCha8Rng {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        rng.set_stream(index);
        rng
    }

    /// Kind of the mix operation at `index`, without building it
    fn kind_at(&self, mix: &OperationMix, index: u64) -> OpKind {
        mix.select(self.rng_at(index).gen::<f64>())
    }

    /// Key of an insert issued before `index`. Uniform over earlier inserts
    /// when one turns up within a few draws, otherwise the most recent one.
    fn inserted_key(&self, mix: &OperationMix, index: u64, rng: &mut ChaCha8Rng) -> u64 {
        if mix.insert <= 0.0 {
            // No inserts in this stream; the rows come from an earlier
            // benchmark that inserted keys 1..=N
            return rng.gen_range(1..=index + 1);
        }
        if index == 0 {
            return 1;
        }

        for _ in 0..KEY_DRAWS {
            let j = rng.gen_range(0..index);
            if self.kind_at(mix, j) == OpKind::Insert {
                return j + 1;
            }
        }
        (0..index)
            .rev()
            .find(|&j| self.kind_at(mix, j) == OpKind::Insert)
            .map_or(index + 1, |j| j + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StopCondition;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::thread;

    fn config(iterations: u64) -> BenchmarkConfig {
        BenchmarkConfig {
            stop: StopCondition::Iterations(iterations),
            ..Default::default()
        }
    }

    #[test]
    fn test_budget_is_exact() {
        let driver = WorkloadDriver::new(&Workload::Mix(OperationMix::only(OpKind::Insert)), &config(5));
        let ops: Vec<_> = std::iter::from_fn(|| driver.next()).collect();
        assert_eq!(ops.len(), 5);
        assert!(driver.next().is_none());
        assert_eq!(driver.issued(), 5);

        let keys: Vec<_> = ops.iter().filter_map(Operation::key).collect();
        assert_eq!(keys, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let workload = Workload::Mix(OperationMix::new(0.25, 0.25, 0.25, 0.25));
        let a = WorkloadDriver::new(&workload, &config(200));
        let b = WorkloadDriver::new(&workload, &config(200));
        let left: Vec<_> = std::iter::from_fn(|| a.next()).collect();
        let right: Vec<_> = std::iter::from_fn(|| b.next()).collect();
        assert_eq!(left, right);

        let mut other = config(200);
        other.seed = 12345;
        let c = WorkloadDriver::new(&workload, &other);
        let shifted: Vec<_> = std::iter::from_fn(|| c.next()).collect();
        assert_ne!(left, shifted);
    }

    #[test]
    fn test_concurrent_pulls_hand_out_every_index_once() {
        let driver = WorkloadDriver::new(&Workload::Mix(OperationMix::only(OpKind::Insert)), &config(10_000));
        let seen = Mutex::new(HashSet::new());

        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    while let Some(op) = driver.next() {
                        let fresh = seen.lock().unwrap().insert(op.key().unwrap());
                        assert!(fresh);
                    }
                });
            }
        });

        assert_eq!(seen.lock().unwrap().len(), 10_000);
    }

    #[test]
    fn test_random_keys_target_earlier_inserts() {
        let mut cfg = config(1000);
        cfg.key_pattern = KeyPattern::Random;
        let mix = OperationMix::new(0.5, 0.3, 0.1, 0.1);
        let driver = WorkloadDriver::new(&Workload::Mix(mix), &cfg);
        let ops: Vec<_> = (0..1000).map(|i| driver.operation_at(i)).collect();

        let first_insert = ops.iter().position(|op| op.kind() == OpKind::Insert).unwrap() as u64;
        let mut distinct = HashSet::new();
        for (index, op) in ops.iter().enumerate() {
            let index = index as u64;
            let key = op.key().unwrap();
            if op.kind() == OpKind::Insert {
                assert_eq!(key, index + 1);
                continue;
            }
            if index <= first_insert {
                continue;
            }
            let source = key - 1;
            assert!(source < index, "op {} targets key {} not yet issued", index, key);
            assert_eq!(
                ops[source as usize].kind(),
                OpKind::Insert,
                "op {} targets key {} that no insert issued",
                index,
                key
            );
            distinct.insert(key);
        }
        // Spread over the inserts, not pinned to the latest one
        assert!(distinct.len() > 100, "only {} distinct keys", distinct.len());
    }

    #[test]
    fn test_random_keys_without_inserts_cover_earlier_rows() {
        let mut cfg = config(300);
        cfg.key_pattern = KeyPattern::Random;
        let driver = WorkloadDriver::new(&Workload::Mix(OperationMix::only(OpKind::Select)), &cfg);

        for index in 0..300 {
            let key = driver.operation_at(index).key().unwrap();
            assert!((1..=index + 1).contains(&key));
        }
    }

    #[test]
    fn test_mix_frequencies_converge() {
        let mix = OperationMix::new(0.8, 0.2, 0.0, 0.0);
        let driver = WorkloadDriver::new(&Workload::Mix(mix), &config(20_000));
        let mut inserts = 0u64;
        let mut total = 0u64;
        while let Some(op) = driver.next() {
            total += 1;
            if op.kind() == OpKind::Insert {
                inserts += 1;
            }
        }
        let observed = inserts as f64 / total as f64;
        assert!((observed - 0.8).abs() < 0.02, "observed insert share {}", observed);
    }

    #[test]
    fn test_script_renders_iteration() {
        let template = Template::parse("DELETE FROM t WHERE id = {{.Iter}}").unwrap();
        let driver = WorkloadDriver::new(&Workload::Script(template), &config(3)).with_budget(Some(1));
        assert_eq!(
            driver.next(),
            Some(Operation::Statement {
                sql: "DELETE FROM t WHERE id = 1".to_string()
            })
        );
        assert!(driver.next().is_none());
    }

    #[test]
    fn test_unbounded_driver() {
        let driver = WorkloadDriver::new(&Workload::Mix(OperationMix::only(OpKind::Select)), &config(1))
            .with_budget(None);
        for _ in 0..10 {
            assert!(driver.next().is_some());
        }
        assert_eq!(driver.issued(), 10);
    }
}
