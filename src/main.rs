//! # Telemetry Uplink
//!
//! Reads telemetry samples from stdin (one JSON object per line) and hands
//! them to the uplink, which delivers them to the configured collector or
//! buffers them on disk until it can.
//!
//! Besides samples, three control lines are understood:
//! `:online`, `:offline` and `:status`.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use telemetry_uplink::config::{Config, LoggingConfig};
use telemetry_uplink::notifier::{LoggingNotifier, StateNotifier};
use telemetry_uplink::telemetry::TelemetrySample;
use telemetry_uplink::uplink::{Mode, UplinkController};

/// Used when no path is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// File name prefix for the rolling log
const LOG_FILE_NAME: &str = "telemetry-uplink.log";

/// One line of producer input
#[derive(Debug, PartialEq)]
enum Input {
    Sample(TelemetrySample),
    SetMode(Mode),
    Status,
}

/// Main entry point for the uplink service
///
/// # Control Flow
///
/// 1. Load configuration (first argument, or `config/default.toml`)
/// 2. Set up logging, optionally with a daily rolling file
/// 3. Start the uplink and feed it stdin until EOF or Ctrl+C
/// 4. Shut the uplink down; pending samples end up in the offline buffer
///
/// # Examples
///
/// ```bash
/// echo '{"timestamp_millis":1700000000000,"signal_level":-95,"location":{"latitude":55.75,"longitude":37.61,"accuracy":12.0},"device_model":"Pixel 7","platform_version":34}' \
///     | cargo run --release -- config/default.toml
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    let _log_guard = init_logging(&config.logging);

    info!("Telemetry Uplink v{} starting...", env!("CARGO_PKG_VERSION"));
    info!(
        "Mode: {}, buffer: {}",
        config.uplink.mode,
        config.buffer.primary_path.display()
    );

    let notifier: Arc<dyn StateNotifier> = Arc::new(LoggingNotifier);
    let uplink = UplinkController::from_config(&config, Arc::downgrade(&notifier));
    let max_accuracy_m = config.uplink.max_accuracy_m;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    info!("Reading samples from stdin, press Ctrl+C to exit");

    loop {
        tokio::select! {
            line = lines.next_line() => match line.context("Failed to read stdin")? {
                Some(line) => handle_line(&uplink, &line, max_accuracy_m).await?,
                None => {
                    info!("Input closed, shutting down...");
                    break;
                }
            },

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    uplink.shutdown().await;
    info!("Uplink stopped");

    Ok(())
}

/// Install the global subscriber
///
/// The returned guard flushes the file writer when dropped and must live
/// until `main` returns.
fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match &config.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
            None
        }
    }
}

async fn handle_line(uplink: &UplinkController, line: &str, max_accuracy_m: f32) -> Result<()> {
    match parse_line(line) {
        Ok(Some(Input::Sample(sample))) => {
            if sample.is_reportable(max_accuracy_m) {
                uplink.submit(sample)?;
            } else {
                debug!("Skipping sample at {} (no signal or poor fix)", sample.timestamp_millis);
            }
        }
        Ok(Some(Input::SetMode(mode))) => uplink.set_mode(mode)?,
        Ok(Some(Input::Status)) => {
            let status = uplink.status().await?;
            info!(
                "Status: mode={}, link={:?}, buffered={}",
                status.mode, status.link, status.buffered
            );
        }
        Ok(None) => {}
        Err(e) => warn!("Ignoring malformed input line: {}", e),
    }
    Ok(())
}

fn parse_line(line: &str) -> serde_json::Result<Option<Input>> {
    match line.trim() {
        "" => Ok(None),
        ":online" => Ok(Some(Input::SetMode(Mode::Online))),
        ":offline" => Ok(Some(Input::SetMode(Mode::Offline))),
        ":status" => Ok(Some(Input::Status)),
        json => serde_json::from_str(json).map(|sample| Some(Input::Sample(sample))),
    }
}
