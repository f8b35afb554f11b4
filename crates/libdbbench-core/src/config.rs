//! Benchmark configuration
//!
//! A [`BenchmarkConfig`] is built once at startup (defaults, then an optional
//! TOML profile, then command line flags) and passed by reference to every
//! component afterwards.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BenchError, Result};
use crate::workload::OperationMix;

pub const DEFAULT_ITERATIONS: u64 = 1000;
pub const DEFAULT_CONCURRENCY: usize = 25;
pub const DEFAULT_SEED: u64 = 0x6462_6265_6e63_6821;
pub const DEFAULT_TABLE: &str = "simple";
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(5);
/// Upper bound of a single retry delay
pub const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// When a benchmark run ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCondition {
    /// Stop after this many operations in total
    Iterations(u64),
    /// Keep issuing operations until this much time has passed
    Duration(Duration),
}

/// How keys are chosen for CRUD operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyPattern {
    /// Key is the iteration number. Fits the built-in suite, where selects,
    /// updates and deletes run after an inserts benchmark over the same
    /// keys. In a mixed workload a non-insert operation at iteration `i`
    /// targets key `i`, which no insert of that run created, so it finds no
    /// row.
    #[default]
    Sequential,
    /// Inserts take the iteration number; other kinds pick among the keys
    /// earlier inserts of the run issued
    Random,
}

impl FromStr for KeyPattern {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sequential" | "seq" => Ok(KeyPattern::Sequential),
            "random" | "rand" => Ok(KeyPattern::Random),
            other => Err(format!(
                "unknown key pattern '{}', expected sequential or random",
                other
            )),
        }
    }
}

/// Bounded local retry for transient errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Delay before the first retry; doubles for every further attempt
    #[serde(with = "humantime_serde")]
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            backoff: Duration::from_millis(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), capped at
    /// [`MAX_RETRY_BACKOFF`]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff.saturating_mul(factor).min(MAX_RETRY_BACKOFF)
    }
}

/// Configuration for a benchmark run
#[derive(Debug, Clone)]
pub struct BenchmarkConfig {
    /// Number of workers, each with its own connection
    pub concurrency: usize,
    pub stop: StopCondition,
    /// Run a single mixed benchmark instead of the built-in suite
    pub mix: Option<OperationMix>,
    pub seed: u64,
    pub key_pattern: KeyPattern,
    /// Logical table the CRUD operations target
    pub table: String,
    pub retry: RetryPolicy,
    /// Pause between two benchmarks of a suite
    pub sleep: Duration,
    /// Benchmark names to run; empty or `all` runs everything
    pub run_filter: Vec<String>,
    pub progress_interval: Duration,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            stop: StopCondition::Iterations(DEFAULT_ITERATIONS),
            mix: None,
            seed: DEFAULT_SEED,
            key_pattern: KeyPattern::default(),
            table: DEFAULT_TABLE.to_string(),
            retry: RetryPolicy::default(),
            sleep: Duration::ZERO,
            run_filter: Vec::new(),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

impl BenchmarkConfig {
    /// Check the configuration before any connection is opened
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(BenchError::Config(
                "concurrency must be at least 1".to_string(),
            ));
        }
        match self.stop {
            StopCondition::Iterations(0) => {
                return Err(BenchError::Config(
                    "iterations must be at least 1".to_string(),
                ))
            }
            StopCondition::Duration(d) if d.is_zero() => {
                return Err(BenchError::Config(
                    "duration must be greater than zero".to_string(),
                ))
            }
            _ => {}
        }
        if let Some(mix) = &self.mix {
            mix.validate()?;
        }
        if !is_identifier(&self.table) {
            return Err(BenchError::Config(format!(
                "table name '{}' must start with a letter or underscore and contain only letters, digits and underscores",
                self.table
            )));
        }
        if self.progress_interval.is_zero() {
            return Err(BenchError::Config(
                "progress interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Operation budget, `None` for duration-based runs
    pub fn iterations(&self) -> Option<u64> {
        match self.stop {
            StopCondition::Iterations(n) => Some(n),
            StopCondition::Duration(_) => None,
        }
    }

    /// Workers actually started: never more than there are iterations
    pub fn worker_count(&self) -> usize {
        match self.iterations() {
            Some(n) => self.concurrency.min(usize::try_from(n).unwrap_or(usize::MAX)),
            None => self.concurrency,
        }
        .max(1)
    }

    /// Whether the run filter selects the benchmark called `name`
    pub fn should_run(&self, name: &str) -> bool {
        self.run_filter.is_empty()
            || self
                .run_filter
                .iter()
                .any(|wanted| wanted == "all" || wanted == name)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Benchmark profile stored as TOML.
///
/// Every field is optional; set fields override the defaults and are in turn
/// overridden by explicit command line flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iterations: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub duration: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_pattern: Option<KeyPattern>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub sleep: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<Vec<String>>,
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub progress_interval: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mix: Option<OperationMix>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}

impl ConfigFile {
    /// Overlay the values set in this file onto `config`
    pub fn apply(&self, config: &mut BenchmarkConfig) {
        if let Some(n) = self.iterations {
            config.stop = StopCondition::Iterations(n);
        }
        // A duration wins over iterations when both are present
        if let Some(d) = self.duration {
            config.stop = StopCondition::Duration(d);
        }
        if let Some(c) = self.concurrency {
            config.concurrency = c;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(pattern) = self.key_pattern {
            config.key_pattern = pattern;
        }
        if let Some(ref table) = self.table {
            config.table = table.clone();
        }
        if let Some(sleep) = self.sleep {
            config.sleep = sleep;
        }
        if let Some(ref run) = self.run {
            config.run_filter = run.clone();
        }
        if let Some(interval) = self.progress_interval {
            config.progress_interval = interval;
        }
        if let Some(mix) = self.mix {
            config.mix = Some(mix);
        }
        if let Some(retry) = self.retry {
            config.retry = retry;
        }
    }
}

/// Load a benchmark profile from a TOML file
pub fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)?;
    let file: ConfigFile = toml::from_str(&content)?;
    Ok(file)
}
