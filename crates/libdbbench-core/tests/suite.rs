//! Suite behaviour: run filter, once benchmarks, pauses and early stop

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use libdbbench_core::backend::MemoryBackend;
use libdbbench_core::workload::Template;
use libdbbench_core::{
    builtin_suite, BenchError, BenchMode, Benchmark, BenchmarkConfig, ErrorClass, MemoryConfig,
    OpKind, OperationMix, RunOutcome, StopCondition, Suite,
};

fn config(concurrency: usize, iterations: u64) -> BenchmarkConfig {
    BenchmarkConfig {
        concurrency,
        stop: StopCondition::Iterations(iterations),
        ..Default::default()
    }
}

fn names(result: &libdbbench_core::SuiteResult) -> Vec<&str> {
    result.reports.iter().map(|r| r.benchmark.as_str()).collect()
}

#[test]
fn test_builtin_suite_runs_in_order() {
    let backend = MemoryBackend::new(MemoryConfig::default());
    let config = config(2, 50);

    let result = Suite::new(&backend, &config).run(&builtin_suite()).unwrap();

    assert_eq!(names(&result), vec!["inserts", "selects", "updates", "deletes"]);
    assert!(!result.interrupted);
    assert!(result.aborted().is_none());
    for report in &result.reports {
        assert_eq!(report.operations_total, 50);
        assert_eq!(report.failures, 0, "{} had failures", report.benchmark);
    }
    // Deletes removed every row the inserts created
    assert!(backend.is_empty());
}

#[test]
fn test_run_filter_skips_benchmarks() {
    let backend = MemoryBackend::new(MemoryConfig::default());
    let mut config = config(2, 20);
    config.run_filter = vec!["inserts".to_string(), "deletes".to_string()];

    let result = Suite::new(&backend, &config).run(&builtin_suite()).unwrap();

    assert_eq!(names(&result), vec!["inserts", "deletes"]);
}

#[test]
fn test_once_benchmark_runs_one_operation() {
    let backend = MemoryBackend::new(MemoryConfig::default());
    let config = config(8, 500);
    let mut once = Benchmark::mixed("setup-row", OperationMix::only(OpKind::Insert));
    once.mode = BenchMode::Once;

    let result = Suite::new(&backend, &config).run(&[once]).unwrap();

    let report = &result.reports[0];
    assert_eq!(report.operations_total, 1);
    assert_eq!(report.concurrency, 1);
    assert_eq!(backend.len(), 1);
}

#[test]
fn test_sleep_between_benchmarks() {
    let backend = MemoryBackend::new(MemoryConfig::default());
    let mut config = config(1, 5);
    config.sleep = Duration::from_millis(150);

    let result = Suite::new(&backend, &config)
        .run(&builtin_suite()[..3])
        .unwrap();

    // Two pauses: none after the last benchmark
    assert!(result.elapsed >= Duration::from_millis(300));
    assert!(result.elapsed < Duration::from_millis(450) + Duration::from_secs(2));
}

#[test]
fn test_parallel_benchmark_is_joined_with_the_next_one() {
    let backend = MemoryBackend::new(MemoryConfig {
        latency: Duration::from_millis(1),
        ..Default::default()
    });
    let config = config(2, 40);
    let mut background = Benchmark::mixed("background", OperationMix::only(OpKind::Select));
    background.parallel = true;
    let foreground = Benchmark::mixed("foreground", OperationMix::only(OpKind::Insert));

    let result = Suite::new(&backend, &config)
        .run(&[background, foreground])
        .unwrap();

    assert_eq!(names(&result), vec!["background", "foreground"]);
    assert!(result.reports.iter().all(|r| r.operations_total == 40));
}

#[test]
fn test_fatal_error_stops_the_suite() {
    let backend = MemoryBackend::new(MemoryConfig {
        fail_every: Some(1),
        fail_class: ErrorClass::Fatal,
        ..Default::default()
    });
    let config = config(1, 10);

    let result = Suite::new(&backend, &config).run(&builtin_suite()).unwrap();

    assert_eq!(names(&result), vec!["inserts"]);
    assert!(result.aborted().is_some());
}

#[test]
fn test_interrupt_skips_remaining_benchmarks() {
    let backend = MemoryBackend::new(MemoryConfig::default());
    let config = config(1, 10);
    let flag = Arc::new(AtomicBool::new(true));

    let result = Suite::new(&backend, &config)
        .with_interrupt(flag)
        .run(&builtin_suite())
        .unwrap();

    assert!(result.interrupted);
    assert!(result.reports.iter().all(|r| r.outcome == RunOutcome::Interrupted));
    assert!(result.reports.len() <= 1);
}

#[test]
fn test_statement_benchmarks_need_statement_support() {
    let backend = MemoryBackend::new(MemoryConfig::default());
    let config = config(1, 10);
    let script = Benchmark::statement(
        "raw",
        BenchMode::Loop,
        Template::parse("SELECT 1;").unwrap(),
    );

    let err = Suite::new(&backend, &config).run(&[script]).unwrap_err();

    assert!(matches!(err, BenchError::Config(_)));
    assert_eq!(err.exit_code(), 2);
}
