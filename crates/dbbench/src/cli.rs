use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use libdbbench_core::{
    BackendConfig, BenchmarkConfig, ErrorClass, KeyPattern, MemoryConfig, NetworkTarget,
    OperationMix, OutputFormat, StopCondition,
};

#[derive(Parser)]
#[command(
    name = "dbbench",
    about = "Benchmark databases with concurrent, reproducible workloads",
    version
)]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// TOML benchmark profile; explicit flags override its values
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub backend: BackendCommand,
}

#[derive(Subcommand)]
pub enum BackendCommand {
    /// In-process key/value store, for dry runs without a database
    Memory {
        #[command(flatten)]
        memory: MemoryArgs,

        #[command(flatten)]
        bench: BenchArgs,
    },

    /// SQLite database file
    Sqlite {
        /// Database file, created if missing
        #[arg(long, default_value = "dbbench.sqlite")]
        path: PathBuf,

        #[command(flatten)]
        bench: BenchArgs,
    },

    /// sled embedded key/value store
    Sled {
        /// Database directory, created if missing
        #[arg(long, default_value = "dbbench.sled")]
        path: PathBuf,

        #[command(flatten)]
        bench: BenchArgs,
    },

    /// PostgreSQL server
    Postgres {
        #[command(flatten)]
        conn: ConnArgs,

        #[command(flatten)]
        bench: BenchArgs,
    },

    /// CockroachDB cluster
    Cockroach {
        #[command(flatten)]
        conn: ConnArgs,

        #[command(flatten)]
        bench: BenchArgs,
    },

    /// MySQL, MariaDB or TiDB server
    #[command(visible_aliases = ["mariadb", "tidb"])]
    Mysql {
        #[command(flatten)]
        conn: ConnArgs,

        #[command(flatten)]
        bench: BenchArgs,
    },
}

impl BackendCommand {
    pub fn bench(&self) -> &BenchArgs {
        match self {
            BackendCommand::Memory { bench, .. }
            | BackendCommand::Sqlite { bench, .. }
            | BackendCommand::Sled { bench, .. }
            | BackendCommand::Postgres { bench, .. }
            | BackendCommand::Cockroach { bench, .. }
            | BackendCommand::Mysql { bench, .. } => bench,
        }
    }

    pub fn backend_config(&self) -> BackendConfig {
        match self {
            BackendCommand::Memory { memory, .. } => BackendConfig::Memory(memory.config()),
            BackendCommand::Sqlite { path, .. } => BackendConfig::Sqlite { path: path.clone() },
            BackendCommand::Sled { path, .. } => BackendConfig::Sled { path: path.clone() },
            BackendCommand::Postgres { conn, .. } => BackendConfig::Postgres(conn.target()),
            BackendCommand::Cockroach { conn, .. } => BackendConfig::Cockroach(conn.target()),
            BackendCommand::Mysql { conn, .. } => BackendConfig::Mysql(conn.target()),
        }
    }
}

#[derive(Args, Clone)]
pub struct MemoryArgs {
    /// Latency added to every operation (e.g. 1ms)
    #[arg(long, value_parser = humantime::parse_duration)]
    pub latency: Option<Duration>,

    /// Fail every N-th operation
    #[arg(long, value_name = "N")]
    pub fail_every: Option<u64>,

    /// Injected failures are fatal instead of transient
    #[arg(long, requires = "fail_every")]
    pub fail_fatal: bool,
}

impl MemoryArgs {
    fn config(&self) -> MemoryConfig {
        MemoryConfig {
            latency: self.latency.unwrap_or(Duration::ZERO),
            fail_every: self.fail_every,
            fail_class: if self.fail_fatal {
                ErrorClass::Fatal
            } else {
                ErrorClass::Transient
            },
        }
    }
}

#[derive(Args, Clone)]
pub struct ConnArgs {
    /// Server host
    #[arg(long, default_value = "localhost")]
    pub host: String,

    /// Server port (0 selects the engine default)
    #[arg(long, default_value_t = 0)]
    pub port: u16,

    /// User name
    #[arg(long, default_value = "root")]
    pub user: String,

    /// Password
    #[arg(long, default_value = "root")]
    pub pass: String,

    /// Database to connect to
    #[arg(long)]
    pub dbname: Option<String>,

    /// Give up connecting after this long
    #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
    pub connect_timeout: Duration,
}

impl ConnArgs {
    fn target(&self) -> NetworkTarget {
        NetworkTarget {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.pass.clone(),
            dbname: self.dbname.clone(),
            connect_timeout: self.connect_timeout,
        }
    }
}

/// Flags shared by every backend. Unset values fall back to the profile,
/// then to the built-in defaults.
#[derive(Args, Clone)]
pub struct BenchArgs {
    /// Operations per benchmark [default: 1000]
    #[arg(long)]
    pub iter: Option<u64>,

    /// Concurrent workers, one connection each [default: 25]
    #[arg(long, visible_alias = "concurrency")]
    pub threads: Option<usize>,

    /// Run each benchmark for this long instead of a fixed number of operations
    #[arg(long, value_parser = humantime::parse_duration, conflicts_with = "iter")]
    pub duration: Option<Duration>,

    /// Run one mixed benchmark, e.g. insert=0.8,select=0.2
    #[arg(long, conflicts_with = "script")]
    pub mix: Option<OperationMix>,

    /// Seed of the operation stream
    #[arg(long)]
    pub seed: Option<u64>,

    /// Key selection: sequential or random
    #[arg(long)]
    pub key_pattern: Option<KeyPattern>,

    /// Table the CRUD benchmarks use
    #[arg(long)]
    pub table: Option<String>,

    /// Retries of transient failures per operation
    #[arg(long)]
    pub retries: Option<u32>,

    /// Delay before the first retry, doubled for each further one
    #[arg(long, value_parser = humantime::parse_duration)]
    pub retry_backoff: Option<Duration>,

    /// Pause between benchmarks
    #[arg(long, value_parser = humantime::parse_duration)]
    pub sleep: Option<Duration>,

    /// Benchmarks to run, e.g. "inserts deletes" (default: all)
    #[arg(long)]
    pub run: Option<String>,

    /// Benchmark script to run instead of the built-in suite
    #[arg(long)]
    pub script: Option<PathBuf>,

    /// Skip schema setup
    #[arg(long)]
    pub noinit: bool,

    /// Only remove what dbbench created, then exit
    #[arg(long, conflicts_with = "noclean")]
    pub clean: bool,

    /// Keep tables and files after the run
    #[arg(long)]
    pub noclean: bool,

    /// Report format: table, json or csv
    #[arg(long, default_value = "table")]
    pub format: OutputFormat,

    /// Write the report to FILE instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// How often progress is logged
    #[arg(long, value_parser = humantime::parse_duration)]
    pub progress_interval: Option<Duration>,
}

impl BenchArgs {
    /// Overlay the flags that were given onto `config`
    pub fn apply(&self, config: &mut BenchmarkConfig) {
        if let Some(n) = self.iter {
            config.stop = StopCondition::Iterations(n);
        }
        if let Some(d) = self.duration {
            config.stop = StopCondition::Duration(d);
        }
        if let Some(threads) = self.threads {
            config.concurrency = threads;
        }
        if let Some(mix) = self.mix {
            config.mix = Some(mix);
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
        if let Some(retries) = self.retries {
            config.retry.max_retries = retries;
        }
        if let Some(backoff) = self.retry_backoff {
            config.retry.backoff = backoff;
        }
        if let Some(sleep) = self.sleep {
            config.sleep = sleep;
        }
        if let Some(ref run) = self.run {
            config.run_filter = run
                .split(|c: char| c.is_whitespace() || c == ',')
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(interval) = self.progress_interval {
            config.progress_interval = interval;
        }
    }
}
