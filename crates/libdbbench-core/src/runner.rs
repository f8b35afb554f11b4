//! Benchmark runner - executes one benchmark against one backend

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Barrier, Mutex, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::backend::{with_retry, Backend, Connection};
use crate::config::{BenchmarkConfig, StopCondition};
use crate::error::{BenchError, Result};
use crate::metrics::Aggregator;
use crate::report::{Report, RunOutcome};
use crate::types::Sample;
use crate::workload::{BenchMode, Benchmark, WorkloadDriver};

/// How often the monitor wakes up to check the deadline and the stop signal
const MONITOR_TICK: Duration = Duration::from_millis(100);
const THROUGHPUT_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Lifecycle of a run. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    Idle = 0,
    Running = 1,
    /// Stop requested; workers finish their in-flight operation
    Draining = 2,
    Done = 3,
}

impl RunState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => RunState::Idle,
            1 => RunState::Running,
            2 => RunState::Draining,
            _ => RunState::Done,
        }
    }
}

/// Why a run stopped before its budget ran out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    DurationElapsed,
    Interrupted,
    Fatal(String),
}

/// Stop flag shared by the workers, the monitor and the retry decorator.
/// The first reason raised is the one reported.
///
/// When bound to a runner's state, raising a stop moves a running run to
/// `Draining` on the spot.
pub struct StopSignal {
    raised: AtomicBool,
    reason: Mutex<Option<StopReason>>,
    interrupt: Option<Arc<AtomicBool>>,
    deadline: OnceLock<Instant>,
    state: Option<Arc<AtomicU8>>,
}

impl StopSignal {
    pub fn new(interrupt: Option<Arc<AtomicBool>>) -> Self {
        Self {
            raised: AtomicBool::new(false),
            reason: Mutex::new(None),
            interrupt,
            deadline: OnceLock::new(),
            state: None,
        }
    }

    fn with_state(mut self, state: Arc<AtomicU8>) -> Self {
        self.state = Some(state);
        self
    }

    /// Raise `DurationElapsed` once `at` has passed. Only the first call
    /// counts.
    pub fn set_deadline(&self, at: Instant) {
        let _ = self.deadline.set(at);
    }

    pub fn raise(&self, reason: StopReason) {
        if let Ok(mut slot) = self.reason.lock() {
            if slot.is_none() {
                *slot = Some(reason);
            }
        }
        self.raised.store(true, Ordering::SeqCst);
        self.begin_drain();
    }

    /// Move the bound run from `Running` to `Draining`; no-op in any other
    /// state
    pub fn begin_drain(&self) {
        if let Some(state) = &self.state {
            let _ = state.compare_exchange(
                RunState::Running as u8,
                RunState::Draining as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
        }
    }

    /// Whether workers should stop pulling operations. Picks up an external
    /// interrupt or a passed deadline on the way.
    pub fn should_stop(&self) -> bool {
        if self.raised.load(Ordering::SeqCst) {
            return true;
        }
        if let Some(flag) = &self.interrupt {
            if flag.load(Ordering::SeqCst) {
                self.raise(StopReason::Interrupted);
                return true;
            }
        }
        if let Some(deadline) = self.deadline.get() {
            if Instant::now() >= *deadline {
                self.raise(StopReason::DurationElapsed);
                return true;
            }
        }
        false
    }

    pub fn reason(&self) -> Option<StopReason> {
        self.reason.lock().ok().and_then(|r| r.clone())
    }
}

/// Runs a single benchmark: opens one connection per worker, starts the
/// workers together, monitors the run and builds the report.
pub struct Runner<'a> {
    backend: &'a dyn Backend,
    config: &'a BenchmarkConfig,
    interrupt: Option<Arc<AtomicBool>>,
    state: Arc<AtomicU8>,
}

impl<'a> Runner<'a> {
    pub fn new(backend: &'a dyn Backend, config: &'a BenchmarkConfig) -> Self {
        Self {
            backend,
            config,
            interrupt: None,
            state: Arc::new(AtomicU8::new(RunState::Idle as u8)),
        }
    }

    /// Stop the run when `flag` becomes true (wired to Ctrl-C by the CLI)
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    pub fn state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: RunState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Execute `benchmark` once. A runner can only be run once.
    ///
    /// Connection failures are returned as errors before any operation is
    /// issued. A fatal error during the run does not: the run drains and the
    /// report says `aborted`.
    pub fn run(&self, benchmark: &Benchmark) -> Result<Report> {
        if self
            .state
            .compare_exchange(
                RunState::Idle as u8,
                RunState::Running as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return Err(BenchError::Internal("runner was already used".to_string()));
        }

        let once = benchmark.mode == BenchMode::Once;
        let workers = if once { 1 } else { self.config.worker_count() };
        let budget = if once { Some(1) } else { self.config.iterations() };
        let run_for = match self.config.stop {
            StopCondition::Duration(d) if !once => Some(d),
            _ => None,
        };

        let driver = WorkloadDriver::new(&benchmark.workload, self.config).with_budget(budget);
        let stop = Arc::new(
            StopSignal::new(self.interrupt.clone()).with_state(Arc::clone(&self.state)),
        );

        let mut connections = Vec::with_capacity(workers);
        for worker in 0..workers {
            match self.backend.connect() {
                Ok(conn) => connections.push(with_retry(conn, self.config.retry, Arc::clone(&stop))),
                Err(e) => {
                    error!(worker, error = %e, "Failed to open connection");
                    self.set_state(RunState::Done);
                    return Err(e.into());
                }
            }
        }

        info!(
            benchmark = %benchmark.name,
            backend = %self.backend.kind(),
            workers,
            budget = ?budget,
            duration = ?run_for,
            "Starting benchmark"
        );

        let aggregator = Aggregator::new(workers);
        let barrier = Barrier::new(workers + 1);
        let (done_tx, done_rx) = mpsc::channel::<()>();

        let started_at = Utc::now();
        let start = Instant::now();
        if let Some(d) = run_for {
            stop.set_deadline(start + d);
        }

        thread::scope(|s| {
            let mut handles = Vec::with_capacity(workers);
            for (worker, conn) in connections.into_iter().enumerate() {
                let ctx = WorkerContext {
                    worker,
                    driver: &driver,
                    aggregator: &aggregator,
                    stop: &stop,
                    barrier: &barrier,
                    _done: done_tx.clone(),
                };
                handles.push(s.spawn(move || run_worker(ctx, conn)));
            }
            drop(done_tx);

            // Release all workers at once
            barrier.wait();
            self.monitor(benchmark, &aggregator, &stop, &done_rx);

            for (worker, handle) in handles.into_iter().enumerate() {
                if handle.join().is_err() {
                    stop.raise(StopReason::Fatal(format!("worker {} panicked", worker)));
                }
            }
        });

        let elapsed = start.elapsed();
        self.set_state(RunState::Done);

        let outcome = match stop.reason() {
            Some(StopReason::Fatal(reason)) => RunOutcome::Aborted { reason },
            Some(StopReason::Interrupted) => RunOutcome::Interrupted,
            Some(StopReason::DurationElapsed) | None => RunOutcome::Completed,
        };

        let operations = aggregator.summarize();
        let operations_total = aggregator.total();
        let secs = elapsed.as_secs_f64();
        let throughput = if secs > 0.0 {
            operations_total as f64 / secs
        } else {
            0.0
        };

        let report = Report {
            benchmark: benchmark.name.clone(),
            backend: self.backend.kind(),
            started_at,
            concurrency: workers,
            seed: self.config.seed,
            outcome,
            elapsed,
            operations_total,
            successes: aggregator.successes(),
            failures: aggregator.failures(),
            throughput,
            // Runs shorter than a second have no full window
            peak_throughput: aggregator.peak_throughput().max(throughput),
            operations,
            workers: aggregator.worker_stats(),
        };

        match &report.outcome {
            RunOutcome::Aborted { reason } => {
                warn!(benchmark = %report.benchmark, reason = %reason, "Benchmark aborted")
            }
            outcome => info!(
                benchmark = %report.benchmark,
                operations = report.operations_total,
                failures = report.failures,
                elapsed_ms = elapsed.as_millis() as u64,
                throughput = %format!("{:.1}", report.throughput),
                status = outcome.as_str(),
                "Benchmark finished"
            ),
        }

        Ok(report)
    }

    /// Watch the run until every worker has exited
    fn monitor(
        &self,
        benchmark: &Benchmark,
        aggregator: &Aggregator,
        stop: &StopSignal,
        done: &mpsc::Receiver<()>,
    ) {
        let mut last_sample = Instant::now();
        let mut last_progress = Instant::now();
        let mut drain_logged = false;

        loop {
            match done.recv_timeout(MONITOR_TICK) {
                Err(RecvTimeoutError::Disconnected) => break,
                Ok(()) | Err(RecvTimeoutError::Timeout) => {}
            }

            // Also raises the deadline for workers stuck in a long operation
            if stop.should_stop() && !drain_logged {
                debug!(benchmark = %benchmark.name, reason = ?stop.reason(), "Draining workers");
                drain_logged = true;
            }

            if last_sample.elapsed() >= THROUGHPUT_SAMPLE_INTERVAL {
                aggregator.sample_throughput();
                last_sample = Instant::now();
            }
            if last_progress.elapsed() >= self.config.progress_interval {
                info!(
                    benchmark = %benchmark.name,
                    operations = aggregator.total(),
                    failures = aggregator.failures(),
                    rate = %format!("{:.1}", aggregator.current_throughput()),
                    "Progress"
                );
                last_progress = Instant::now();
            }
        }
    }
}

/// Everything a worker thread borrows from the run
struct WorkerContext<'r> {
    worker: usize,
    driver: &'r WorkloadDriver,
    aggregator: &'r Aggregator,
    stop: &'r StopSignal,
    barrier: &'r Barrier,
    /// Dropped when the worker exits; the monitor waits for all of them
    _done: mpsc::Sender<()>,
}

fn run_worker(ctx: WorkerContext<'_>, mut conn: Box<dyn Connection>) {
    ctx.barrier.wait();

    loop {
        if ctx.stop.should_stop() {
            break;
        }

        let Some(op) = ctx.driver.next() else {
            // Budget spent; the others finish their in-flight operation
            ctx.stop.begin_drain();
            break;
        };
        let kind = op.kind();

        let begin = Instant::now();
        let sample = match conn.execute(&op) {
            Ok(latency) => Sample::success(kind, latency),
            Err(e) => {
                if e.is_fatal() {
                    error!(worker = ctx.worker, error = %e, "Fatal error, stopping run");
                    ctx.stop.raise(StopReason::Fatal(e.to_string()));
                } else {
                    debug!(worker = ctx.worker, error = %e, "Operation failed");
                }
                Sample::failure(kind, begin.elapsed(), e.class)
            }
        };
        ctx.aggregator.record(ctx.worker, &sample);
    }

    debug!(worker = ctx.worker, "Worker finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_stop_reason_wins() {
        let stop = StopSignal::new(None);
        assert!(!stop.should_stop());
        stop.raise(StopReason::Fatal("boom".to_string()));
        stop.raise(StopReason::DurationElapsed);
        assert!(stop.should_stop());
        assert_eq!(stop.reason(), Some(StopReason::Fatal("boom".to_string())));
    }

    #[test]
    fn test_interrupt_flag_raises_stop() {
        let flag = Arc::new(AtomicBool::new(false));
        let stop = StopSignal::new(Some(Arc::clone(&flag)));
        assert!(!stop.should_stop());
        flag.store(true, Ordering::SeqCst);
        assert!(stop.should_stop());
        assert_eq!(stop.reason(), Some(StopReason::Interrupted));
    }

    #[test]
    fn test_raise_moves_running_to_draining() {
        let state = Arc::new(AtomicU8::new(RunState::Running as u8));
        let stop = StopSignal::new(None).with_state(Arc::clone(&state));
        stop.raise(StopReason::Fatal("boom".to_string()));
        assert_eq!(RunState::from_u8(state.load(Ordering::SeqCst)), RunState::Draining);
    }

    #[test]
    fn test_drain_only_from_running() {
        let state = Arc::new(AtomicU8::new(RunState::Done as u8));
        let stop = StopSignal::new(None).with_state(Arc::clone(&state));
        stop.begin_drain();
        assert_eq!(RunState::from_u8(state.load(Ordering::SeqCst)), RunState::Done);
    }

    #[test]
    fn test_passed_deadline_raises_stop() {
        let stop = StopSignal::new(None);
        stop.set_deadline(Instant::now() + Duration::from_secs(3600));
        assert!(!stop.should_stop());

        let stop = StopSignal::new(None);
        stop.set_deadline(Instant::now());
        assert!(stop.should_stop());
        assert_eq!(stop.reason(), Some(StopReason::DurationElapsed));
    }

    #[test]
    fn test_state_round_trip() {
        for state in [
            RunState::Idle,
            RunState::Running,
            RunState::Draining,
            RunState::Done,
        ] {
            assert_eq!(RunState::from_u8(state as u8), state);
        }
    }
}
