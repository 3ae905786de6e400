//! Application entry point for the `zonewatch` location pipeline.
//!
//! This binary orchestrates the full startup sequence for the headless
//! location agent, including:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Opening the SQLite zone store and creating its schema if needed
//! - Wiring the region monitor, classifier, submission client and
//!   notification dispatcher (EMBP: everything comes through the crate gateway)
//! - Feeding platform signals read as JSON lines from stdin
//!
//! # Input
//! One JSON object per line, either a platform signal such as
//! `{"signal":"region_entered","identifier":"home"}` or a one-shot location
//! request such as `{"request":"manual"}`.
//!
//! # Environment Variables
//! - `ZONE_DB_URL` (**required**) – SQLite connection string of the zone store
//! - `HA_BASE_URL` (optional) – server base URL
//! - `ZONEWATCH_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `ZONEWATCH_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! See `config.rs` for the full list.
use std::{env, str::FromStr, sync::Arc};

use anyhow::{Context, Result};
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use serde::Deserialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use zonewatch::platform::headless::{
    FixedBattery, HeadlessRegionPlatform, NotificationCenter, TimerLeaseProvider, TracingTelemetry,
};
use zonewatch::platform::{PlatformSignal, TelemetrySink};
use zonewatch::{
    config, schema, LocationPipeline, LocationRequester, LocationUpdateTrigger,
    NotificationDispatcher, PolicyTable, RegionMonitor, SqliteZoneStore, SubmissionClient,
    TriggerClassifier, ZoneRegistry,
};

/// Bound on platform signals waiting for the monitor.
const SIGNAL_QUEUE: usize = 64;

/// One line of stdin input.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InputLine {
    Signal(PlatformSignal),
    Request { request: LocationUpdateTrigger },
}

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    tracing::info!("Opening zone store: {}", cfg.zone_db_url);

    let options = SqliteConnectOptions::from_str(&cfg.zone_db_url)
        .with_context(|| format!("Invalid ZONE_DB_URL '{}'", cfg.zone_db_url))?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .connect_with(options)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open zone store '{}': {}", cfg.zone_db_url, e))?;

    schema::create_schema(&pool).await?;

    // Collaborators
    let telemetry: Arc<dyn TelemetrySink> = Arc::new(TracingTelemetry);
    let platform = Arc::new(HeadlessRegionPlatform::new());
    let leases = Arc::new(TimerLeaseProvider::new(cfg.lease_lifetime));
    let notifier = Arc::new(NotificationCenter::new());
    let battery = Arc::new(FixedBattery::unknown());

    // Pipeline
    let submission = Arc::new(SubmissionClient::new(
        cfg.server.clone(),
        cfg.device.clone(),
        vec!["location".to_string(), "notifications".to_string()],
        battery,
        telemetry.clone(),
    )?);
    let dispatcher = Arc::new(NotificationDispatcher::new(notifier, telemetry.clone()));
    let classifier = TriggerClassifier::new(PolicyTable::default(), cfg.notifications.clone());
    let pipeline = LocationPipeline::new(classifier, submission, dispatcher, telemetry.clone());

    let registry = ZoneRegistry::new(Arc::new(SqliteZoneStore::new(pool)));
    let (mut monitor, events) = RegionMonitor::new(registry, platform, leases, telemetry);

    // A store that cannot load yet is not fatal; the next change resyncs.
    if let Err(e) = monitor.start().await {
        tracing::warn!("Initial region sync failed: {}", e);
    }

    let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_QUEUE);
    tokio::spawn(read_input(signal_tx, monitor.requester()));
    let pipeline_task = tokio::spawn(pipeline.run(events));

    tracing::info!("Listening for platform signals on stdin");
    monitor.run(signal_rx).await;

    pipeline_task.await?;
    Ok(())
}

// ---

/// Read JSON lines from stdin and forward them to the monitor.
async fn read_input(signals: mpsc::Sender<PlatformSignal>, requester: LocationRequester) {
    // ---
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!("Failed to read stdin: {}", e);
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match serde_json::from_str::<InputLine>(line) {
            Ok(InputLine::Signal(signal)) => {
                if signals.send(signal).await.is_err() {
                    break;
                }
            }
            Ok(InputLine::Request { request }) => {
                let requester = requester.clone();
                tokio::spawn(async move {
                    match requester.get_and_send_location(Some(request)).await {
                        Ok(location) => tracing::info!(?location, "Location request answered"),
                        Err(e) => tracing::warn!("Location request failed: {}", e),
                    }
                });
            }
            Err(e) => tracing::warn!("Ignoring unreadable input line '{}': {}", line, e),
        }
    }

    tracing::info!("stdin closed");
}

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `ZONEWATCH_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by the `ZONEWATCH_LOG_LEVEL` env var
///
/// Logs go to stderr so stdin/stdout stay free for signal input. This should
/// be called once at application startup before any logging or tracing
/// macros are invoked.
fn init_tracing() {
    // ---
    let span_events = match env::var("ZONEWATCH_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    // Determine if we should use colors
    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stderr().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to ZONEWATCH_LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("ZONEWATCH_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn,hyper=info"))
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
