//! CLI entry point for the live transit aggregation server.
//!
//! `run` loads the static agency directory, spins up the node hierarchy and
//! polls every agency until interrupted; `list-agencies` dumps the parsed
//! directory for inspection.

use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use transit_live::directory::load_agencies;
use transit_live::fetch::BasicClient;
use transit_live::node::router::TransitRouter;
use transit_live::source::{DEFAULT_ENDPOINT, NextBusSource};

#[derive(Parser)]
#[command(name = "transit_live")]
#[command(about = "Live hierarchical vehicle-location aggregation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll all agencies from the directory and serve live aggregates
    Run {
        /// Agency directory CSV (id,state,country per row)
        #[arg(short, long, default_value = "agencies.csv")]
        directory: String,

        /// Seconds between vehicle location polls per agency
        #[arg(short = 'i', long, default_value_t = 10)]
        poll_interval: u64,

        /// Feed endpoint base URL
        #[arg(long, default_value = DEFAULT_ENDPOINT)]
        endpoint: String,
    },
    /// Print the parsed agency directory as JSON
    ListAgencies {
        /// Agency directory CSV (id,state,country per row)
        #[arg(short, long, default_value = "agencies.csv")]
        directory: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/transit_live.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("transit_live.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse().unwrap()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse().unwrap()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            directory,
            poll_interval,
            endpoint,
        } => {
            run(&directory, Duration::from_secs(poll_interval), &endpoint).await?;
        }
        Commands::ListAgencies { directory } => {
            let agencies = load_agencies(Path::new(&directory))?;
            println!("{}", serde_json::to_string_pretty(&agencies)?);
            info!(total = agencies.len(), %directory, "agency directory loaded");
        }
    }

    Ok(())
}

async fn run(directory: &str, poll_interval: Duration, endpoint: &str) -> Result<()> {
    // an unreadable directory is fatal: without agencies nothing can run
    let agencies = load_agencies(Path::new(directory))?;
    info!(
        total = agencies.len(),
        directory,
        endpoint,
        poll_interval_secs = poll_interval.as_secs(),
        "starting aggregation hierarchy"
    );

    let source = Arc::new(NextBusSource::with_endpoint(BasicClient::new(), endpoint));
    let router = TransitRouter::new(source, poll_interval);

    for agency in agencies {
        router.agency(&agency.id).set_info(agency);
    }

    // periodic operator rollup of the top-level aggregates
    let rollup_router = router.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        ticker.tick().await; // skip the immediate first tick
        loop {
            ticker.tick().await;
            for (uri, handle) in rollup_router.countries() {
                let snapshot = handle.current();
                info!(
                    country = %uri,
                    vehicles = snapshot.count.current,
                    max_vehicles = snapshot.count.max,
                    avg_speed = snapshot.avg_speed,
                    states = snapshot.states.len(),
                    "country rollup"
                );
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, shutting down");
    Ok(())
}
