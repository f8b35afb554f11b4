//! Benchmark suite - runs named benchmarks one after another

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ScopedJoinHandle};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::backend::Backend;
use crate::config::BenchmarkConfig;
use crate::error::{BenchError, Result};
use crate::report::{Report, RunOutcome};
use crate::runner::Runner;
use crate::workload::Benchmark;

/// Granularity of the interruptible pause between benchmarks
const PAUSE_STEP: Duration = Duration::from_millis(100);

/// Reports of every benchmark that ran
#[derive(Debug, Clone)]
pub struct SuiteResult {
    pub reports: Vec<Report>,
    pub elapsed: Duration,
    /// The suite was cut short by an interrupt
    pub interrupted: bool,
}

impl SuiteResult {
    /// First aborted report, if any
    pub fn aborted(&self) -> Option<&Report> {
        self.reports.iter().find(|r| r.is_aborted())
    }
}

pub struct Suite<'a> {
    backend: &'a dyn Backend,
    config: &'a BenchmarkConfig,
    interrupt: Option<Arc<AtomicBool>>,
}

impl<'a> Suite<'a> {
    pub fn new(backend: &'a dyn Backend, config: &'a BenchmarkConfig) -> Self {
        Self {
            backend,
            config,
            interrupt: None,
        }
    }

    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    fn interrupted(&self) -> bool {
        self.interrupt
            .as_ref()
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Run the benchmarks selected by the run filter, in order.
    ///
    /// A benchmark marked parallel starts in the background and is joined
    /// once the next sequential benchmark has finished.
    pub fn run(&self, benchmarks: &[Benchmark]) -> Result<SuiteResult> {
        if !self.backend.supports_statements() {
            if let Some(script) = benchmarks.iter().find(|b| b.is_script()) {
                return Err(BenchError::Config(format!(
                    "backend {} cannot run statement benchmark '{}'",
                    self.backend.kind(),
                    script.name
                )));
            }
        }

        let selected: Vec<&Benchmark> = benchmarks
            .iter()
            .filter(|b| self.config.should_run(&b.name))
            .collect();
        if selected.is_empty() {
            warn!(filter = ?self.config.run_filter, "No benchmark matches the run filter");
        }

        let start = Instant::now();
        let mut reports = Vec::with_capacity(selected.len());

        thread::scope(|s| -> Result<()> {
            let mut background: Vec<ScopedJoinHandle<'_, Result<Report>>> = Vec::new();

            for (i, &benchmark) in selected.iter().enumerate() {
                if self.interrupted() {
                    break;
                }
                if i > 0 && !self.pause(self.config.sleep) {
                    break;
                }

                if benchmark.parallel {
                    info!(benchmark = %benchmark.name, "Starting benchmark in background");
                    background.push(s.spawn(move || self.run_one(benchmark)));
                    continue;
                }

                let report = self.run_one(benchmark);
                join_all(&mut background, &mut reports)?;
                reports.push(report?);

                if reports.iter().any(should_stop_suite) {
                    break;
                }
            }

            join_all(&mut background, &mut reports)
        })?;

        let elapsed = start.elapsed();
        let interrupted = self.interrupted()
            || reports.iter().any(|r| r.outcome == RunOutcome::Interrupted);

        info!(
            benchmarks = reports.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            interrupted,
            "Suite finished"
        );

        Ok(SuiteResult {
            reports,
            elapsed,
            interrupted,
        })
    }

    fn run_one(&self, benchmark: &Benchmark) -> Result<Report> {
        let mut runner = Runner::new(self.backend, self.config);
        if let Some(flag) = &self.interrupt {
            runner = runner.with_interrupt(Arc::clone(flag));
        }
        runner.run(benchmark)
    }

    /// Sleep between benchmarks; returns false when interrupted
    fn pause(&self, total: Duration) -> bool {
        let until = Instant::now() + total;
        loop {
            if self.interrupted() {
                return false;
            }
            let now = Instant::now();
            if now >= until {
                return true;
            }
            thread::sleep(PAUSE_STEP.min(until - now));
        }
    }
}

fn join_all(
    handles: &mut Vec<ScopedJoinHandle<'_, Result<Report>>>,
    reports: &mut Vec<Report>,
) -> Result<()> {
    for handle in handles.drain(..) {
        let report = handle
            .join()
            .map_err(|_| BenchError::Internal("benchmark thread panicked".to_string()))??;
        reports.push(report);
    }
    Ok(())
}

fn should_stop_suite(report: &Report) -> bool {
    !matches!(report.outcome, RunOutcome::Completed)
}
