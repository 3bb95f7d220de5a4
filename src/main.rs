//! CLI entry point for the GTFS-RT vehicle position logger.
//!
//! Polls a GTFS-RT VehiclePositions feed for a set of routes, records new
//! positions, discovers new vehicles and derives the stops each vehicle
//! passed.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use gtfs_rt_logger::{
    catalog::load_stops,
    config::{Config, parse_routes},
    feed::{GtfsRtFeed, PositionFeed},
    fetch::{
        BasicClient, HttpClient,
        auth::{ApiKey, UrlParam},
    },
    matcher::make_vehicle_stop_times,
    registry::discover_new_vehicles,
    scheduler::Scheduler,
    store::{MemoryStore, SqliteStore, StopIndex, Store},
};
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    filter::LevelFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "gtfs_rt_logger")]
#[command(about = "Log GTFS-RT vehicle positions and derive stop times", long_about = None)]
struct Cli {
    #[command(flatten)]
    opts: Opts,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Opts {
    /// SQLite database to record into
    #[arg(long, env = "CMDATA_DATABASE_URL", default_value = "sqlite://gtfs_rt_logger.db", global = true)]
    database_url: String,

    /// Keep everything in memory instead of the database (dry run)
    #[arg(long, global = true)]
    memory: bool,

    /// GTFS-RT VehiclePositions URL
    #[arg(long, env = "CMDATA_FEED_URL", global = true)]
    feed_url: Option<String>,

    /// API key for the feed
    #[arg(long, env = "CMDATA_API_KEY", hide_env_values = true, global = true)]
    api_key: Option<String>,

    /// Send the API key in this header (default: Authorization: Bearer)
    #[arg(long, env = "CMDATA_API_KEY_HEADER", global = true, conflicts_with = "api_key_param")]
    api_key_header: Option<String>,

    /// Send the API key as this query parameter
    #[arg(long, env = "CMDATA_API_KEY_PARAM", global = true)]
    api_key_param: Option<String>,

    /// GTFS stops.txt used for stop matching
    #[arg(long, env = "CMDATA_STOPS_FILE", global = true)]
    stops_file: Option<String>,

    /// Comma-separated route ids to poll
    #[arg(long, env = "CMDATA_ROUTES", default_value = "803,801,550", global = true)]
    routes: String,

    /// Maximum distance in metres between a position and its matched stop
    #[arg(long, env = "CMDATA_MAX_DISTANCE", default_value_t = 100.0, global = true)]
    max_distance: f64,

    /// Consecutive empty responses every route must reach before backing off
    #[arg(long, env = "CMDATA_MAX_RETRIES", default_value_t = 3, global = true)]
    max_retries: u32,

    /// Seconds between polls while the feed is active
    #[arg(long, env = "CMDATA_NORMAL_SLEEP_SECS", default_value_t = 30, global = true)]
    normal_sleep_secs: u64,

    /// Seconds between polls once every route has gone quiet
    #[arg(long, env = "CMDATA_EXTENDED_SLEEP_SECS", default_value_t = 600, global = true)]
    extended_sleep_secs: u64,

    /// Seconds between checks for new vehicles
    #[arg(long, env = "CMDATA_DISCOVERY_INTERVAL_SECS", default_value_t = 14_400, global = true)]
    discovery_interval_secs: u64,

    /// Seconds the stop matcher stays behind the wall clock, so positions
    /// recorded by a poll running alongside it are not left behind a
    /// vehicle's watermark
    #[arg(long, env = "CMDATA_MATCH_LAG_SECS", default_value_t = 30, global = true)]
    match_lag_secs: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll, match and discover forever
    Run,
    /// Run a single iteration and exit
    PollOnce,
    /// Register vehicles seen in recorded positions and exit
    Discover,
    /// Run one stop matching pass and exit
    MatchStops,
}

impl Opts {
    fn config(&self) -> Config {
        Config {
            routes: parse_routes(&self.routes),
            max_distance_m: self.max_distance,
            max_retries: self.max_retries,
            normal_sleep: Duration::from_secs(self.normal_sleep_secs),
            extended_sleep: Duration::from_secs(self.extended_sleep_secs),
            discovery_interval: Duration::from_secs(self.discovery_interval_secs),
            match_lag: Duration::from_secs(self.match_lag_secs),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/gtfs_rt_logger.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("gtfs_rt_logger.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive(LevelFilter::INFO.into()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive(LevelFilter::DEBUG.into()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let config = cli.opts.config();
    config.validate()?;
    info!(?config, "Config");

    let store = open_store(&cli.opts).await?;

    match cli.command {
        Commands::Run => {
            let feed = build_feed(&cli.opts)?;
            Scheduler::new(config, feed, store)?.run_forever().await;
        }
        Commands::PollOnce => {
            let feed = build_feed(&cli.opts)?;
            let mut scheduler = Scheduler::new(config, feed, store)?;
            let report = scheduler.run_iteration(Utc::now()).await;
            info!(
                routes = report.routes.len(),
                stop_times = report.matched.map(|m| m.stop_times),
                discovered = report.discovered,
                sleep = ?report.sleep,
                "Iteration complete"
            );
        }
        Commands::Discover => {
            let added = discover_new_vehicles(store.as_ref(), Utc::now()).await?;
            info!(added, "Discovery complete");
        }
        Commands::MatchStops => {
            let summary = make_vehicle_stop_times(store.as_ref(), config.max_distance_m, Utc::now()).await?;
            info!(?summary, "Stop matching complete");
        }
    }

    Ok(())
}

/// Opens the store. Failing to connect is fatal: nothing can proceed without it.
#[tracing::instrument(skip_all)]
async fn open_store(opts: &Opts) -> Result<Arc<dyn Store>> {
    let stops = match &opts.stops_file {
        Some(path) => load_stops(path)?,
        None => {
            warn!("No stop catalog configured; stop matching will find no stops");
            Vec::new()
        }
    };
    let index = StopIndex::new(stops);

    if opts.memory {
        info!("Using in-memory store");
        return Ok(Arc::new(MemoryStore::new(index)));
    }

    let store = SqliteStore::connect(&opts.database_url, index)
        .await
        .context("opening position store")?;
    info!(database_url = %opts.database_url, "Established connection to store");
    Ok(Arc::new(store))
}

/// Builds the GTFS-RT feed reader, decorating the client for API-key auth.
fn build_feed(opts: &Opts) -> Result<Arc<dyn PositionFeed>> {
    let url = opts
        .feed_url
        .as_deref()
        .context("a feed URL is required to poll (--feed-url or CMDATA_FEED_URL)")?;
    let base = BasicClient::new()?;

    let client: Box<dyn HttpClient> = match (&opts.api_key, &opts.api_key_header, &opts.api_key_param) {
        (Some(key), Some(header), _) => Box::new(ApiKey::new(base, header, key)?),
        (Some(key), None, Some(param)) => Box::new(UrlParam {
            inner: base,
            param_name: param.clone(),
            key: key.clone(),
        }),
        (Some(key), None, None) => Box::new(ApiKey::bearer(base, key)?),
        (None, _, _) => Box::new(base),
    };

    Ok(Arc::new(GtfsRtFeed::new(client, url)))
}
