//! Background worker owning the transport session and the offline buffer.
//!
//! All socket I/O, liveness checks and buffer flushes happen here, one at a
//! time, so events are handled (and reported) strictly in the order they
//! occur. A `connected` transition always finishes its drain before any
//! later `disconnected` can be observed.

use std::sync::Weak;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use super::liveness::{LivenessAction, LivenessMonitor};
use super::{LinkState, Mode, UplinkStatus};
use crate::buffer::OfflineBuffer;
use crate::notifier::StateNotifier;
use crate::telemetry::{TelemetryRecord, TelemetrySample};
use crate::transport::TransportSession;

/// Requests from the controller handle
#[derive(Debug)]
pub(crate) enum Command {
    Submit(TelemetrySample),
    SetMode(Mode),
    Status(oneshot::Sender<UplinkStatus>),
}

pub(crate) struct UplinkWorker {
    pub(crate) transport: Box<dyn TransportSession>,
    pub(crate) buffer: OfflineBuffer,
    pub(crate) notifier: Weak<dyn StateNotifier>,
    pub(crate) monitor: LivenessMonitor,
    pub(crate) mode: Mode,
    pub(crate) source: String,
    pub(crate) commands: mpsc::UnboundedReceiver<Command>,
    pub(crate) shutdown: watch::Receiver<bool>,
    pub(crate) link: LinkState,
}

impl UplinkWorker {
    pub(crate) async fn run(mut self) {
        info!(
            "Uplink worker started ({} transport, {} mode)",
            self.transport.kind(),
            self.mode
        );
        self.monitor.connect_now(Instant::now());

        let timer = sleep_until(Instant::now());
        tokio::pin!(timer);

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let deadline = self.monitor.deadline();
            if let Some(at) = deadline {
                timer.as_mut().reset(at);
            }

            tokio::select! {
                biased;

                _ = self.shutdown.changed() => break,

                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },

                _ = &mut timer, if deadline.is_some() => self.on_timer().await,
            }
        }

        self.finish().await;
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit(sample) => self.submit(sample).await,
            Command::SetMode(mode) => self.set_mode(mode).await,
            Command::Status(reply) => {
                let status = UplinkStatus {
                    mode: self.mode,
                    link: self.link,
                    buffered: self.buffer.count().await,
                };
                let _ = reply.send(status);
            }
        }
    }

    async fn submit(&mut self, sample: TelemetrySample) {
        let record = TelemetryRecord::from_sample(&sample, &self.source);

        if self.mode == Mode::Offline || !self.transport.is_connected() {
            self.store(record).await;
            // Link dropped underneath us (e.g. collector closed the socket)
            if self.link == LinkState::Connected && !self.transport.is_connected() {
                self.link_lost().await;
            }
            return;
        }

        let sent = match record.to_json() {
            Ok(payload) => self.transport.send(payload.as_bytes()).await,
            Err(e) => {
                warn!("Could not encode record: {}", e);
                false
            }
        };

        if !sent {
            self.store(record).await;
            if !self.transport.is_connected() {
                self.link_lost().await;
            }
        }
    }

    async fn set_mode(&mut self, mode: Mode) {
        if mode == self.mode {
            return;
        }
        info!("Uplink mode {} -> {}", self.mode, mode);
        self.mode = mode;

        // Already connected: no transition will come to trigger the drain
        if mode == Mode::Online && self.link == LinkState::Connected && self.transport.is_connected() {
            self.flush().await;
        }
    }

    async fn on_timer(&mut self) {
        match self.monitor.poll(Instant::now()) {
            Some(LivenessAction::Probe) => {
                let alive = tokio::select! {
                    alive = self.transport.probe() => alive,
                    _ = self.shutdown.changed() => return,
                };
                if alive {
                    debug!("Liveness check passed");
                    self.monitor.on_probe_ok(Instant::now());
                } else {
                    warn!("Liveness check failed");
                    self.link_lost().await;
                }
            }
            Some(LivenessAction::Reconnect) => self.connect().await,
            None => {}
        }
    }

    async fn connect(&mut self) {
        self.link = LinkState::Connecting;

        let outcome = tokio::select! {
            outcome = self.transport.connect() => outcome,
            _ = self.shutdown.changed() => return,
        };

        match outcome {
            Ok(()) => {
                self.link = LinkState::Connected;
                self.monitor.on_connected(Instant::now());
                self.notify(|n| n.on_connected());

                if self.mode == Mode::Online {
                    self.flush().await;
                }
            }
            Err(e) => {
                warn!("{}", e);
                self.mark_disconnected();
            }
        }
    }

    /// Drain the buffer through the transport and report the count
    async fn flush(&mut self) {
        match self.buffer.drain(self.transport.as_mut()).await {
            Ok(count) => self.notify(|n| n.on_flushed(count)),
            Err(e) => error!("Buffer flush failed: {}", e),
        }

        if !self.transport.is_connected() {
            self.link_lost().await;
        }
    }

    async fn link_lost(&mut self) {
        self.transport.close().await;
        self.mark_disconnected();
    }

    fn mark_disconnected(&mut self) {
        self.link = LinkState::Disconnected;
        self.monitor.on_disconnected(Instant::now());
        debug!("Next connect attempt in {:?}", self.monitor.reconnect_delay());
        self.notify(|n| n.on_disconnected());
    }

    async fn store(&mut self, record: TelemetryRecord) {
        if let Err(e) = self.buffer.append(record).await {
            error!("Record could not be buffered and is lost: {}", e);
        }
    }

    fn notify(&self, callback: impl FnOnce(&dyn StateNotifier)) {
        if let Some(notifier) = self.notifier.upgrade() {
            callback(notifier.as_ref());
        }
    }

    /// Buffer anything still queued, then release the transport
    ///
    /// Raises no callbacks.
    async fn finish(&mut self) {
        self.monitor.stop();
        self.commands.close();

        let mut pending = 0;
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Submit(sample) => {
                    pending += 1;
                    let record = TelemetryRecord::from_sample(&sample, &self.source);
                    self.store(record).await;
                }
                Command::SetMode(mode) => self.mode = mode,
                Command::Status(_) => {}
            }
        }
        if pending > 0 {
            info!("Buffered {} sample(s) queued at shutdown", pending);
        }

        self.transport.close().await;
        self.link = LinkState::Idle;
        info!("Uplink worker stopped");
    }
}
