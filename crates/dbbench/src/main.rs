//! dbbench - database benchmarking CLI
//!
//! Runs the built-in CRUD suite, a benchmark script or a single operation
//! mix against one backend and reports latency percentiles and throughput.

mod cli;
mod output;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cli::Cli;
use libdbbench_core::{
    load_config_file, open_backend, parse_script, Backend, BenchError, Benchmark,
    BenchmarkConfig, StopCondition, Suite,
};

/// Some benchmark was aborted by a fatal execution error
const EXIT_ABORTED: i32 = 4;
/// Stopped with Ctrl-C
const EXIT_INTERRUPTED: i32 = 130;

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let code = match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            error!(code = e.error_code(), "{}", e);
            e.exit_code()
        }
    };

    std::process::exit(code);
}

fn run(cli: &Cli) -> Result<i32, BenchError> {
    let args = cli.backend.bench();

    let mut config = BenchmarkConfig::default();
    if let Some(path) = &cli.config {
        load_config_file(path)?.apply(&mut config);
        info!(path = %path.display(), "Loaded benchmark profile");
    }
    args.apply(&mut config);
    clamp_concurrency(&mut config);
    config.validate()?;

    let backend = open_backend(&cli.backend.backend_config(), &config)?;

    if args.clean {
        backend.cleanup()?;
        info!(backend = %backend.kind(), "Cleanup finished");
        return Ok(0);
    }

    let benchmarks = select_benchmarks(args, &config, backend.as_ref())?;

    let interrupt = Arc::new(AtomicBool::new(false));
    {
        let interrupt = Arc::clone(&interrupt);
        if let Err(e) = ctrlc::set_handler(move || {
            interrupt.store(true, Ordering::SeqCst);
        }) {
            warn!(error = %e, "Could not install Ctrl-C handler");
        }
    }

    let result = (|| {
        if !args.noinit {
            backend.setup()?;
        }
        Suite::new(backend.as_ref(), &config)
            .with_interrupt(Arc::clone(&interrupt))
            .run(&benchmarks)
    })();

    if !args.noclean {
        if let Err(e) = backend.cleanup() {
            warn!(error = %e, "Cleanup failed");
        }
    }

    let result = result?;
    output::write_reports(&result.reports, args.format, args.output.as_deref())?;

    if let Some(report) = result.aborted() {
        warn!(benchmark = %report.benchmark, outcome = %report.outcome, "Run aborted");
        Ok(EXIT_ABORTED)
    } else if result.interrupted {
        warn!("Interrupted, report covers the operations recorded so far");
        Ok(EXIT_INTERRUPTED)
    } else {
        Ok(0)
    }
}

/// Benchmarks to run: a script, a single mix, or the backend's built-in suite
fn select_benchmarks(
    args: &cli::BenchArgs,
    config: &BenchmarkConfig,
    backend: &dyn Backend,
) -> Result<Vec<Benchmark>, BenchError> {
    if let Some(path) = &args.script {
        let text = std::fs::read_to_string(path)?;
        let benchmarks = parse_script(&text)?;
        info!(path = %path.display(), benchmarks = benchmarks.len(), "Loaded benchmark script");
        return Ok(benchmarks);
    }
    if let Some(mix) = config.mix {
        return Ok(vec![Benchmark::mixed("mixed", mix)]);
    }
    Ok(backend.builtin_benchmarks())
}

/// Zero threads becomes one, and there are never more threads than
/// iterations
fn clamp_concurrency(config: &mut BenchmarkConfig) {
    if config.concurrency == 0 {
        warn!("Concurrency 0 is not allowed, using 1");
        config.concurrency = 1;
    }
    if let StopCondition::Iterations(n) = config.stop {
        if n > 0 && config.concurrency as u64 > n {
            warn!(
                threads = config.concurrency,
                iterations = n,
                "More threads than iterations, using {} threads",
                n
            );
            config.concurrency = n as usize;
        }
    }
}
