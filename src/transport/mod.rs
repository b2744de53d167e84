//! # Transport Module
//!
//! Outbound links to the remote collector.
//!
//! This module handles:
//! - The `TransportSession` contract shared by every wire protocol
//! - `DuplexSocketTransport`: persistent WebSocket (`ws://host:port/ws`)
//! - `PushSocketTransport`: one-way TCP push (`tcp://host:port`) with a
//!   request/acknowledge probe before first use
//! - Building the configured transport

pub mod duplex;
pub mod push;

use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;

use crate::config::TransportConfig;

pub use duplex::DuplexSocketTransport;
pub use push::PushSocketTransport;

#[cfg(test)]
use mockall::automock;

/// Wire protocol selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Duplex,
    Push,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Duplex => write!(f, "duplex"),
            TransportKind::Push => write!(f, "push"),
        }
    }
}

/// One outbound connection to the collector
///
/// All I/O is bounded by the timeouts the transport was built with, so no
/// call stalls the worker for longer than a few seconds.
///
/// Contract:
/// - `connect` replaces any previous link. `Ok` means the link is usable
///   (and, for push, that the collector acknowledged a probe).
/// - `send` and `probe` never fail loudly; they report `false`. A `false`
///   from either leaves `is_connected()` false until the next `connect`.
/// - `close` is idempotent and safe in any state.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TransportSession: Send {
    /// Establish the link
    async fn connect(&mut self) -> crate::error::Result<()>;

    /// Write one record payload
    async fn send(&mut self, payload: &[u8]) -> bool;

    /// Lightweight liveness check; never counts as a delivered record
    async fn probe(&mut self) -> bool;

    /// Last-known liveness (may be stale between probes)
    fn is_connected(&self) -> bool;

    /// Release the link
    async fn close(&mut self);

    /// Which wire protocol this session speaks
    fn kind(&self) -> TransportKind;
}

/// Build the transport selected by `config.kind`
pub fn from_config(config: &TransportConfig) -> Box<dyn TransportSession> {
    match config.kind {
        TransportKind::Duplex => Box::new(DuplexSocketTransport::new(
            config.url(),
            config.connect_timeout(),
            config.send_timeout(),
            config.probe_timeout(),
        )),
        TransportKind::Push => Box::new(PushSocketTransport::new(
            config.address(),
            config.connect_timeout(),
            config.send_timeout(),
            config.probe_timeout(),
        )),
    }
}
