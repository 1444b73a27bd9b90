//! dingo: application entry point.
//!
//! Initializes tracing, loads configuration from a TOML file, then either serves
//! the ping endpoint or runs the race harness, depending on the subcommand.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dingo::config::{
    AppConfig, Backend, Isolation, RaceOverrides, DEFAULT_CONFIG_PATH, DEFAULT_LOG_FILTER,
};
use dingo::http::start_server;
use dingo::race::{store_from_config, Harness, RaceSettings};
use dingo::routes::create_router;

/// dingo: a ping service and a database race-condition harness
#[derive(Parser, Debug)]
#[command(name = "dingo", version, about)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Log level filter (e.g., "dingo=debug,tower_http=info")
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API
    Serve,

    /// Run the race-condition harness against the configured database
    Race {
        /// Database backend (overrides database.backend)
        #[arg(long, value_enum)]
        backend: Option<Backend>,

        /// Number of concurrent workers (overrides race.workers)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Transaction isolation for the write step (overrides race.isolation)
        #[arg(long, value_enum)]
        isolation: Option<Isolation>,

        /// Lock the selected ledger row before writing it
        #[arg(long)]
        lock_rows: bool,

        /// Drop both tables before setup so the counter starts at 0
        #[arg(long)]
        reset: bool,

        /// Exit with a failure status if any worker saw a violation or failed
        #[arg(long)]
        strict: bool,
    },
}

fn init_tracing(filter: &str, json: bool) {
    let registry = tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::new(filter));
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = AppConfig::load(&args.config)?;

    // Initialize tracing with priority: CLI > env > default
    let log_filter = args
        .log_level
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
    init_tracing(&log_filter, config.logging.is_json());

    tracing::info!(path = %args.config, "Loaded configuration");

    match args.command {
        Command::Serve => {
            let app = create_router();
            start_server(app, &config.http).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Race {
            backend,
            workers,
            isolation,
            lock_rows,
            reset,
            strict,
        } => {
            config.apply_race_overrides(RaceOverrides {
                backend,
                workers,
                isolation,
                lock_rows,
            })?;

            tracing::info!(backend = config.database.backend.as_str(), "Race store configured");

            let settings = RaceSettings {
                reset,
                ..RaceSettings::from_config(&config)
            };
            let harness = Harness::new(store_from_config(&config), settings);
            let summary = harness.run().await?;

            for violation in &summary.violations {
                println!("VIOLATION  {violation}");
            }
            for failure in &summary.failures {
                println!("FAILED     worker {}: {}", failure.worker, failure.error);
            }
            println!(
                "{} workers: {} ok, {} violations, {} failures; counter = {:?}, ledger rows = {}",
                summary.workers,
                summary.succeeded.len(),
                summary.violations.len(),
                summary.failures.len(),
                summary.snapshot.counter(),
                summary.snapshot.ledger.len(),
            );

            Ok(summary.exit_code(strict))
        }
    }
}
