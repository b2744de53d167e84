//! # Uplink Controller
//!
//! Handle used by the sensor producer and the control surface.
//!
//! The controller owns nothing that does I/O. Every call is handed to the
//! background worker over a channel, so producers never block on the
//! network and callers on any thread can submit samples.

use std::sync::{Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::liveness::LivenessMonitor;
use super::worker::{Command, UplinkWorker};
use super::{LinkState, Mode, UplinkStatus};
use crate::buffer::OfflineBuffer;
use crate::config::Config;
use crate::error::{Result, UplinkError};
use crate::notifier::StateNotifier;
use crate::telemetry::TelemetrySample;
use crate::transport::{self, TransportSession};

/// Behaviour knobs for a controller
#[derive(Debug, Clone)]
pub struct UplinkSettings {
    /// Mode in effect at start
    pub mode: Mode,
    /// Value of the `source` field in every record
    pub source: String,
    /// Time between liveness checks while connected
    pub probe_interval: Duration,
    /// Delay before reconnecting after a failure
    pub reconnect_delay: Duration,
    /// Cap for the reconnect delay
    pub max_reconnect_delay: Duration,
}

impl Default for UplinkSettings {
    fn default() -> Self {
        Self {
            mode: Mode::Online,
            source: "LocationTrackingService".to_string(),
            probe_interval: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(2),
            max_reconnect_delay: Duration::from_secs(2),
        }
    }
}

impl UplinkSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            mode: config.uplink.mode,
            source: config.uplink.source.clone(),
            probe_interval: Duration::from_millis(config.liveness.interval_ms),
            reconnect_delay: Duration::from_millis(config.liveness.cooldown_ms),
            max_reconnect_delay: Duration::from_millis(config.liveness.max_cooldown_ms),
        }
    }
}

/// Entry point of the uplink
///
/// Dropping the controller signals the worker to stop, but only
/// [`UplinkController::shutdown`] waits for it.
pub struct UplinkController {
    commands: mpsc::UnboundedSender<Command>,
    shutdown: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for UplinkController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UplinkController")
            .field("stopped", &*self.shutdown.borrow())
            .finish_non_exhaustive()
    }
}

impl UplinkController {
    /// Spawn the worker and begin connecting
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Arguments
    ///
    /// * `transport` - Session the worker owns for its whole lifetime
    /// * `buffer` - Offline buffer the worker owns for its whole lifetime
    /// * `notifier` - Status observer; only ever upgraded for callbacks
    /// * `settings` - Mode, record source and liveness pacing
    pub fn start(
        transport: Box<dyn TransportSession>,
        buffer: OfflineBuffer,
        notifier: Weak<dyn StateNotifier>,
        settings: UplinkSettings,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = UplinkWorker {
            transport,
            buffer,
            notifier,
            monitor: LivenessMonitor::new(
                settings.probe_interval,
                settings.reconnect_delay,
                settings.max_reconnect_delay,
            ),
            mode: settings.mode,
            source: settings.source,
            commands: command_rx,
            shutdown: shutdown_rx,
            link: LinkState::Idle,
        };

        Self {
            commands: command_tx,
            shutdown: shutdown_tx,
            worker: Mutex::new(Some(tokio::spawn(worker.run()))),
        }
    }

    /// Build transport and buffer from configuration, then [`start`](Self::start)
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::sync::Arc;
    /// use telemetry_uplink::config::Config;
    /// use telemetry_uplink::notifier::{LoggingNotifier, StateNotifier};
    /// use telemetry_uplink::uplink::UplinkController;
    ///
    /// #[tokio::main]
    /// async fn main() -> anyhow::Result<()> {
    ///     let config = Config::load("config/default.toml")?;
    ///     let notifier: Arc<dyn StateNotifier> = Arc::new(LoggingNotifier);
    ///     let uplink = UplinkController::from_config(&config, Arc::downgrade(&notifier));
    ///
    ///     // ... submit samples ...
    ///
    ///     uplink.shutdown().await;
    ///     Ok(())
    /// }
    /// ```
    pub fn from_config(config: &Config, notifier: Weak<dyn StateNotifier>) -> Self {
        let transport = transport::from_config(&config.transport);
        info!("Uplink target: {}", config.transport.url());

        let buffer = OfflineBuffer::new(&config.buffer.primary_path, &config.buffer.fallback_path);
        Self::start(transport, buffer, notifier, UplinkSettings::from_config(config))
    }

    /// Hand a sample to the worker
    ///
    /// Never blocks. The worker either delivers it or buffers it.
    ///
    /// # Errors
    ///
    /// Returns `Stopped` once the controller has been shut down; the
    /// sample was not accepted.
    pub fn submit(&self, sample: TelemetrySample) -> Result<()> {
        self.dispatch(Command::Submit(sample))
    }

    /// Switch between online and offline delivery
    pub fn set_mode(&self, mode: Mode) -> Result<()> {
        self.dispatch(Command::SetMode(mode))
    }

    /// Current mode, link state and buffered record count
    pub async fn status(&self) -> Result<UplinkStatus> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.dispatch(Command::Status(reply_tx))?;
        reply_rx.await.map_err(|_| UplinkError::Stopped)
    }

    /// Stop the worker and release the transport
    ///
    /// Samples already submitted are buffered before the worker exits; the
    /// buffer itself is left on disk. No status callbacks fire once this
    /// returns. Calling it again is a no-op.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = worker {
            if let Err(e) = handle.await {
                warn!("Uplink worker ended abnormally: {}", e);
            }
        }
    }

    fn dispatch(&self, command: Command) -> Result<()> {
        if *self.shutdown.borrow() {
            return Err(UplinkError::Stopped);
        }
        self.commands.send(command).map_err(|_| UplinkError::Stopped)
    }
}

impl Drop for UplinkController {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}
