//! Thread-safe latency aggregation
//!
//! Every worker records into its own shard, so the lock a worker takes is
//! never contended during the run. Shards hold one HDR histogram per
//! operation kind, which keeps memory bounded no matter how many samples
//! are recorded.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};

use crate::types::{ErrorClass, OpKind, Outcome, Sample};

/// Highest trackable latency: 60 seconds, in nanoseconds
const MAX_TRACKABLE_NS: u64 = 60_000_000_000;
const SIGNIFICANT_FIGURES: u8 = 3;
/// Throughput samples kept for the peak computation
const THROUGHPUT_WINDOW: usize = 3600;

fn new_histogram() -> Histogram<u64> {
    // 1 nanosecond to 60 seconds, 3 significant figures
    Histogram::new_with_bounds(1, MAX_TRACKABLE_NS, SIGNIFICANT_FIGURES)
        .expect("histogram bounds are valid")
}

/// Per-kind accumulator inside a shard
#[derive(Debug, Clone)]
struct KindAccumulator {
    count: u64,
    successes: u64,
    transient: u64,
    rejected: u64,
    fatal: u64,
    sum_ns: u128,
    min_ns: u64,
    max_ns: u64,
    histogram: Histogram<u64>,
}

impl KindAccumulator {
    fn new() -> Self {
        Self {
            count: 0,
            successes: 0,
            transient: 0,
            rejected: 0,
            fatal: 0,
            sum_ns: 0,
            min_ns: u64::MAX,
            max_ns: 0,
            histogram: new_histogram(),
        }
    }

    fn record(&mut self, sample: &Sample) {
        self.count += 1;
        match sample.outcome {
            Outcome::Success => {
                let ns = u64::try_from(sample.latency.as_nanos()).unwrap_or(u64::MAX);
                self.successes += 1;
                self.sum_ns += u128::from(ns);
                self.min_ns = self.min_ns.min(ns);
                self.max_ns = self.max_ns.max(ns);
                self.histogram.saturating_record(ns);
            }
            Outcome::Failure(ErrorClass::Transient) => self.transient += 1,
            Outcome::Failure(ErrorClass::Rejected) => self.rejected += 1,
            Outcome::Failure(ErrorClass::Fatal) => self.fatal += 1,
        }
    }

    fn merge(&mut self, other: &KindAccumulator) {
        self.count += other.count;
        self.successes += other.successes;
        self.transient += other.transient;
        self.rejected += other.rejected;
        self.fatal += other.fatal;
        self.sum_ns += other.sum_ns;
        self.min_ns = self.min_ns.min(other.min_ns);
        self.max_ns = self.max_ns.max(other.max_ns);
        // Both histograms share the same bounds, so adding cannot fail
        let _ = self.histogram.add(&other.histogram);
    }

    fn stats(&self, kind: OpKind) -> OperationStats {
        let failures = self.transient + self.rejected + self.fatal;
        let (min_ns, mean_ns, p50_ns, p90_ns, p99_ns) = if self.successes == 0 {
            (0, 0, 0, 0, 0)
        } else {
            (
                self.min_ns,
                u64::try_from(self.sum_ns / u128::from(self.successes)).unwrap_or(u64::MAX),
                self.histogram.value_at_quantile(0.50),
                self.histogram.value_at_quantile(0.90),
                self.histogram.value_at_quantile(0.99),
            )
        };

        OperationStats {
            kind,
            count: self.count,
            successes: self.successes,
            failures,
            transient_failures: self.transient,
            rejected_failures: self.rejected,
            fatal_failures: self.fatal,
            min_ns,
            max_ns: self.max_ns,
            mean_ns,
            p50_ns,
            p90_ns,
            p99_ns,
        }
    }
}

/// Everything one worker recorded
#[derive(Debug, Default)]
struct Shard {
    kinds: [Option<KindAccumulator>; OpKind::COUNT],
    operations: u64,
    successes: u64,
    failures: u64,
}

impl Shard {
    fn record(&mut self, sample: &Sample) {
        self.operations += 1;
        if sample.is_success() {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        self.kinds[sample.kind.index()]
            .get_or_insert_with(KindAccumulator::new)
            .record(sample);
    }
}

/// Sharded sample accumulator shared by all workers of a run
pub struct Aggregator {
    shards: Vec<Mutex<Shard>>,

    // Live counters for progress reporting
    total: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,

    throughput: Mutex<ThroughputHistory>,
}

impl Aggregator {
    pub fn new(workers: usize) -> Self {
        Self {
            shards: (0..workers.max(1)).map(|_| Mutex::new(Shard::default())).collect(),
            total: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            throughput: Mutex::new(ThroughputHistory::new(THROUGHPUT_WINDOW)),
        }
    }

    pub fn workers(&self) -> usize {
        self.shards.len()
    }

    /// Record a sample produced by `worker`
    pub fn record(&self, worker: usize, sample: &Sample) {
        let Some(shard) = self.shards.get(worker) else {
            tracing::warn!(worker, "sample from unknown worker dropped");
            return;
        };
        // A worker that panicked mid-record leaves a usable shard behind
        shard
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record(sample);

        self.total.fetch_add(1, Ordering::Relaxed);
        if sample.is_success() {
            self.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Update throughput sample (call once per second)
    pub fn sample_throughput(&self) {
        let current = self.total();
        if let Ok(mut history) = self.throughput.lock() {
            history.add_sample(current);
        }
    }

    pub fn current_throughput(&self) -> f64 {
        self.throughput
            .lock()
            .map(|h| h.current_rate())
            .unwrap_or(0.0)
    }

    pub fn peak_throughput(&self) -> f64 {
        self.throughput.lock().map(|h| h.peak_rate()).unwrap_or(0.0)
    }

    /// Per-kind statistics over everything recorded so far, in kind order.
    ///
    /// Merging is commutative, so the result does not depend on the order in
    /// which samples arrived. Recording stays possible afterwards.
    pub fn summarize(&self) -> Vec<OperationStats> {
        let mut merged: [Option<KindAccumulator>; OpKind::COUNT] = Default::default();

        for shard in &self.shards {
            let shard = shard.lock().unwrap_or_else(|e| e.into_inner());
            for (slot, acc) in merged.iter_mut().zip(shard.kinds.iter()) {
                if let Some(acc) = acc {
                    match slot {
                        Some(total) => total.merge(acc),
                        None => *slot = Some(acc.clone()),
                    }
                }
            }
        }

        OpKind::ALL
            .iter()
            .zip(merged.iter())
            .filter_map(|(kind, acc)| acc.as_ref().map(|acc| acc.stats(*kind)))
            .collect()
    }

    /// Counters of every worker, by worker index
    pub fn worker_stats(&self) -> Vec<WorkerStats> {
        self.shards
            .iter()
            .enumerate()
            .map(|(worker, shard)| {
                let s = shard.lock().unwrap_or_else(|e| e.into_inner());
                WorkerStats {
                    worker,
                    operations: s.operations,
                    successes: s.successes,
                    failures: s.failures,
                }
            })
            .collect()
    }
}

/// Statistics for one operation kind. Latencies are nanoseconds over the
/// successful samples only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationStats {
    pub kind: OpKind,
    pub count: u64,
    pub successes: u64,
    pub failures: u64,
    pub transient_failures: u64,
    pub rejected_failures: u64,
    pub fatal_failures: u64,
    pub min_ns: u64,
    pub max_ns: u64,
    pub mean_ns: u64,
    pub p50_ns: u64,
    pub p90_ns: u64,
    pub p99_ns: u64,
}

/// Per-worker counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub worker: usize,
    pub operations: u64,
    pub successes: u64,
    pub failures: u64,
}

/// Per-second throughput history
pub struct ThroughputHistory {
    rates: VecDeque<f64>,
    max_samples: usize,
    last_count: u64,
}

impl ThroughputHistory {
    pub fn new(max_samples: usize) -> Self {
        Self {
            rates: VecDeque::with_capacity(max_samples.min(64)),
            max_samples,
            last_count: 0,
        }
    }

    pub fn add_sample(&mut self, current_count: u64) {
        let rate = current_count.saturating_sub(self.last_count) as f64;
        self.last_count = current_count;

        self.rates.push_back(rate);
        if self.rates.len() > self.max_samples {
            self.rates.pop_front();
        }
    }

    pub fn current_rate(&self) -> f64 {
        self.rates.back().copied().unwrap_or(0.0)
    }

    pub fn peak_rate(&self) -> f64 {
        self.rates.iter().copied().fold(0.0, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ok(kind: OpKind, micros: u64) -> Sample {
        Sample::success(kind, Duration::from_micros(micros))
    }

    #[test]
    fn test_counts_split_by_kind_and_outcome() {
        let agg = Aggregator::new(2);
        agg.record(0, &ok(OpKind::Insert, 100));
        agg.record(1, &ok(OpKind::Insert, 300));
        agg.record(1, &Sample::failure(OpKind::Insert, Duration::from_secs(5), ErrorClass::Transient));
        agg.record(0, &ok(OpKind::Select, 50));

        let stats = agg.summarize();
        assert_eq!(stats.len(), 2);

        let insert = &stats[0];
        assert_eq!(insert.kind, OpKind::Insert);
        assert_eq!(insert.count, 3);
        assert_eq!(insert.successes, 2);
        assert_eq!(insert.failures, 1);
        assert_eq!(insert.transient_failures, 1);
        // Failed samples do not pollute latency statistics
        assert_eq!(insert.max_ns, 300_000);
        assert_eq!(insert.min_ns, 100_000);
        assert_eq!(insert.mean_ns, 200_000);

        assert_eq!(stats[1].kind, OpKind::Select);
        assert_eq!(agg.total(), 4);
        assert_eq!(agg.failures(), 1);
    }

    #[test]
    fn test_poisoned_shard_keeps_recording() {
        let agg = Aggregator::new(1);
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = agg.shards[0].lock().unwrap();
            panic!("worker died while recording");
        }));
        assert!(agg.shards[0].is_poisoned());

        agg.record(0, &ok(OpKind::Insert, 100));
        agg.record(0, &Sample::failure(OpKind::Insert, Duration::from_micros(5), ErrorClass::Rejected));

        let stats = agg.summarize();
        assert_eq!(stats[0].count, 2);
        assert_eq!(stats.iter().map(|s| s.count).sum::<u64>(), agg.total());
        assert_eq!(agg.worker_stats()[0].operations, 2);
    }

    #[test]
    fn test_summarize_is_idempotent() {
        let agg = Aggregator::new(3);
        for i in 0..300u64 {
            agg.record((i % 3) as usize, &ok(OpKind::Update, 10 + i));
        }
        assert_eq!(agg.summarize(), agg.summarize());
    }

    #[test]
    fn test_result_independent_of_arrival_order() {
        let samples: Vec<Sample> = (1..=500u64)
            .map(|i| {
                if i % 7 == 0 {
                    Sample::failure(OpKind::Delete, Duration::from_micros(i), ErrorClass::Rejected)
                } else {
                    ok(OpKind::Delete, i)
                }
            })
            .collect();

        let forward = Aggregator::new(4);
        for (i, s) in samples.iter().enumerate() {
            forward.record(i % 4, s);
        }
        let backward = Aggregator::new(4);
        for (i, s) in samples.iter().rev().enumerate() {
            backward.record((i * 3) % 4, s);
        }

        assert_eq!(forward.summarize(), backward.summarize());
    }

    #[test]
    fn test_percentiles() {
        let agg = Aggregator::new(1);
        for i in 1..=1000u64 {
            agg.record(0, &ok(OpKind::Select, i));
        }
        let stats = &agg.summarize()[0];
        let p50 = stats.p50_ns as f64;
        let p99 = stats.p99_ns as f64;
        assert!((p50 - 500_000.0).abs() / 500_000.0 < 0.01, "p50 {}", p50);
        assert!((p99 - 990_000.0).abs() / 990_000.0 < 0.01, "p99 {}", p99);
    }

    #[test]
    fn test_worker_stats() {
        let agg = Aggregator::new(2);
        agg.record(1, &ok(OpKind::Insert, 1));
        agg.record(1, &Sample::failure(OpKind::Insert, Duration::ZERO, ErrorClass::Fatal));
        let workers = agg.worker_stats();
        assert_eq!(workers[0].operations, 0);
        assert_eq!(workers[1].operations, 2);
        assert_eq!(workers[1].failures, 1);
    }

    #[test]
    fn test_throughput_history() {
        let mut history = ThroughputHistory::new(3);
        history.add_sample(10);
        history.add_sample(40);
        history.add_sample(45);
        assert_eq!(history.current_rate(), 5.0);
        assert_eq!(history.peak_rate(), 30.0);
    }
}
