pub mod types;
pub mod config;
pub mod error;
pub mod workload;
pub mod backend;
pub mod metrics;
pub mod runner;
pub mod suite;
pub mod report;

pub use error::{BenchError, ConnectionError, ExecutionError, ScriptError};
pub use types::{ErrorClass, OpKind, Operation, Outcome, Sample};
pub use config::{load_config_file, BenchmarkConfig, ConfigFile, KeyPattern, RetryPolicy, StopCondition};
pub use workload::{builtin_suite, parse_script, BenchMode, Benchmark, OperationMix, Workload, WorkloadDriver};
pub use backend::{open_backend, Backend, BackendConfig, BackendKind, Connection, MemoryConfig, NetworkTarget};
pub use metrics::{Aggregator, OperationStats, WorkerStats};
pub use runner::{RunState, Runner, StopReason};
pub use suite::{Suite, SuiteResult};
pub use report::{render, OutputFormat, Report, RunOutcome};
