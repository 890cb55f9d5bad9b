//! usage-flusher -- moves queued gateway usage logs into the usage database.
//!
//! This is the application entry point. It wires together:
//!   - Configuration loading
//!   - Database and queue initialization
//!   - The batch flusher, either once (`--once`) or on an interval
//!   - Graceful shutdown on SIGTERM / SIGINT

use std::path::PathBuf;
use std::sync::Arc;

use tokio::signal;
use tracing_subscriber::EnvFilter;

use usage_flusher::config::{Config, QueueBackend};
use usage_flusher::db::Database;
use usage_flusher::scheduler::{run_once, spawn_flush_loop};
use usage_flusher::{BatchFlusher, FlushOutcome, SqliteUsageStore, UsageQueue, queue};

// ---------------------------------------------------------------------------
// CLI argument parsing (minimal, no clap dependency)
// ---------------------------------------------------------------------------

struct CliArgs {
    config_path: PathBuf,
    once: bool,
    print_config: bool,
}

fn parse_args() -> CliArgs {
    let mut args = std::env::args().skip(1);
    let mut cli = CliArgs {
        config_path: PathBuf::from("usage-flusher.toml"),
        once: false,
        print_config: false,
    };

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                if let Some(path) = args.next() {
                    cli.config_path = PathBuf::from(path);
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--once" => cli.once = true,
            "--print-config" => cli.print_config = true,
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("usage-flusher {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                eprintln!("Run with --help for usage information.");
                std::process::exit(1);
            }
        }
    }

    cli
}

fn print_usage() {
    println!(
        "\
usage-flusher {version} -- Flush queued usage logs to the database

USAGE:
    usage-flusher [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file [default: usage-flusher.toml]
        --once             Run a single flush and exit (for cron / systemd timers)
        --print-config     Print the effective configuration and exit
    -h, --help             Print this help message
    -V, --version          Print version information

ENVIRONMENT:
    RUST_LOG               Override log level (e.g. RUST_LOG=debug)
    FLUSHER_CONFIG         Alternative to --config flag
    FLUSHER_QUEUE_URL      Redis URL for the redis queue backend
",
        version = env!("CARGO_PKG_VERSION")
    );
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Parse CLI arguments
    let cli = parse_args();

    let config_path = std::env::var("FLUSHER_CONFIG")
        .map(PathBuf::from)
        .unwrap_or(cli.config_path);

    // 2. Load configuration
    let config = Config::load(&config_path)?;

    if cli.print_config {
        print!("{}", config.render()?);
        return Ok(());
    }

    // 3. Initialize tracing/logging
    init_tracing(&config);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "Starting usage-flusher"
    );
    if config.loaded_from.is_none() {
        tracing::warn!(
            "Config file not found at {}, using defaults",
            config_path.display()
        );
    }

    // 4. Open the usage database
    let db = Database::open(&config.database.path)?;
    tracing::info!(path = %config.database.path.display(), "Database opened");
    let store = Arc::new(SqliteUsageStore::new(db));

    // 5. Connect the queue. Failure leaves the flusher inert rather than
    //    taking the process down.
    if config.queue.backend == QueueBackend::Memory {
        tracing::warn!("Memory queue selected; only producers in this process can feed it");
    }
    let queue = match queue::connect(&config.queue) {
        Ok(queue) => {
            tracing::info!(
                backend = queue.name(),
                key = %config.queue.key,
                pending = queue.len().unwrap_or_default(),
                "Usage queue connected"
            );
            Some(queue)
        }
        Err(err) => {
            tracing::error!(error = %err, "Usage queue unavailable, flusher will stay idle");
            None
        }
    };

    let flusher = Arc::new(BatchFlusher::new(queue, store, &config.flusher));

    // 6. Single pass for external schedulers
    if cli.once {
        if let Some(report) = run_once(&flusher).await {
            if let FlushOutcome::Failed { error } = &report.outcome {
                tracing::warn!(error = %error, "Usage flush failed");
            }
        }
        return Ok(());
    }

    // 7. Periodic loop until SIGINT / SIGTERM
    tracing::info!(
        interval_secs = config.flusher.interval_secs,
        batch_size = flusher.batch_size(),
        dead_letter = %config.flusher.dead_letter,
        "Usage flusher running"
    );
    let handle = spawn_flush_loop(flusher, config.flusher.interval(), shutdown_signal());
    handle.await?;

    tracing::info!("usage-flusher stopped");
    Ok(())
}

fn init_tracing(config: &Config) {
    // RUST_LOG env var takes precedence over config file
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.logging.level;
        EnvFilter::new(format!("usage_flusher={level},warn"))
    });

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if config.logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

// ---------------------------------------------------------------------------
// Graceful shutdown
// ---------------------------------------------------------------------------

/// Wait for a shutdown signal (SIGTERM or SIGINT / Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C)");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
