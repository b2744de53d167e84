//! # State Notifier
//!
//! Narrow observer surface for whoever renders uplink status.
//!
//! The controller only ever holds a `Weak` reference to its notifier and
//! calls it from the worker task, in the order events happen. A notifier
//! that has been dropped is silently skipped.

use tokio::sync::mpsc;
use tracing::info;

/// Status callbacks raised by the uplink worker
pub trait StateNotifier: Send + Sync {
    fn on_connected(&self);
    fn on_disconnected(&self);
    /// `count` buffered records were delivered after a (re)connect
    fn on_flushed(&self, count: usize);
}

/// Status event as a value, for channel-based consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    Connected,
    Disconnected,
    Flushed(usize),
}

/// Logs every status change
#[derive(Debug, Default)]
pub struct LoggingNotifier;

impl StateNotifier for LoggingNotifier {
    fn on_connected(&self) {
        info!("Uplink connected");
    }

    fn on_disconnected(&self) {
        info!("Uplink disconnected");
    }

    fn on_flushed(&self, count: usize) {
        info!("Uplink flushed {} buffered record(s)", count);
    }
}

/// Forwards status changes into an unbounded channel
#[derive(Debug)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<StatusEvent>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StatusEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: StatusEvent) {
        // Receiver gone means nobody is watching any more
        let _ = self.tx.send(event);
    }
}

impl StateNotifier for ChannelNotifier {
    fn on_connected(&self) {
        self.emit(StatusEvent::Connected);
    }

    fn on_disconnected(&self) {
        self.emit(StatusEvent::Disconnected);
    }

    fn on_flushed(&self, count: usize) {
        self.emit(StatusEvent::Flushed(count));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_notifier_preserves_order() {
        let (notifier, mut rx) = ChannelNotifier::new();
        notifier.on_connected();
        notifier.on_flushed(3);
        notifier.on_disconnected();

        assert_eq!(rx.try_recv().unwrap(), StatusEvent::Connected);
        assert_eq!(rx.try_recv().unwrap(), StatusEvent::Flushed(3));
        assert_eq!(rx.try_recv().unwrap(), StatusEvent::Disconnected);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_channel_notifier_without_receiver() {
        let (notifier, rx) = ChannelNotifier::new();
        drop(rx);
        notifier.on_connected();
    }
}
