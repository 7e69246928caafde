//! concrete-worker: isolated worker process for concrete-exec
//!
//! Speaks the length-prefixed frame protocol on stdin/stdout and logs to
//! stderr. Started by `ProcessLauncher`; not meant to be run by hand.
//!
//! ## Usage
//!
//! ```bash
//! concrete-worker                          # serve with defaults
//! concrete-worker --log-format json        # JSON log lines on stderr
//! concrete-worker --config executor.json   # shared executor settings
//! concrete-worker --list-entries           # print class path entries
//! ```

mod error;
mod samples;

use clap::Parser;
use concrete_exec::execution::ExecutionContext;
use concrete_exec::logging::{self, LogFormat};
use concrete_exec::protocol::{serve, ServeExit};
use concrete_exec::ExecutorConfig;
use error::{WorkerError, WorkerResult};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Exit status when user code ignores the watchdog past its grace period
const EXIT_UNRESPONSIVE: i32 = 3;

/// How long pending blocking work may delay shutdown
const SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(200);

/// Isolated concrete execution worker
#[derive(Debug, Parser)]
#[command(name = "concrete-worker", version, about)]
struct Args {
    /// Log line format on stderr (text or json)
    #[arg(long, default_value = "text", env = "CONCRETE_WORKER_LOG_FORMAT")]
    log_format: LogFormat,

    /// Log filter directives, e.g. `concrete_exec=debug`
    #[arg(long, env = "CONCRETE_WORKER_LOG")]
    log_filter: Option<String>,

    /// Executor configuration as JSON; the frame limit and interrupt
    /// grace must match the client's
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the interrupt grace period
    #[arg(long)]
    interrupt_grace_ms: Option<u64>,

    /// Print the class path entries this worker can load and exit
    #[arg(long)]
    list_entries: bool,
}

fn main() -> ExitCode {
    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> WorkerResult<()> {
    let catalog = samples::catalog();
    if args.list_entries {
        for name in catalog.names() {
            println!("{name}");
        }
        return Ok(());
    }

    logging::init(args.log_format, args.log_filter.as_deref())?;
    let config = load_config(&args)?;
    let grace = args
        .interrupt_grace_ms
        .map_or_else(|| config.interrupt_grace(), Duration::from_millis);

    let context = ExecutionContext::new(Arc::new(catalog))
        .with_interrupt_grace(grace)
        .with_unresponsive_hook(exit_unresponsive);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    info!(pid = std::process::id(), "worker starting");
    let served = runtime.block_on(serve(
        tokio::io::stdin(),
        tokio::io::stdout(),
        context,
        config.max_frame_bytes,
    ));
    // stdin reads park a blocking thread that never returns on its own
    runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);

    match served? {
        ServeExit::Stopped => info!("worker stopped on request"),
        ServeExit::InputClosed => info!("client went away"),
    }
    Ok(())
}

fn load_config(args: &Args) -> WorkerResult<ExecutorConfig> {
    let Some(path) = &args.config else {
        return Ok(ExecutorConfig::default());
    };
    let json = std::fs::read_to_string(path)
        .map_err(|e| WorkerError::config(format!("cannot read {}: {e}", path.display())))?;
    Ok(ExecutorConfig::from_json_str(&json)?)
}

fn exit_unresponsive() {
    error!("user code ignored the interrupt, terminating worker");
    std::process::exit(EXIT_UNRESPONSIVE);
}
