//! # Uplink Module
//!
//! Orchestrates delivery of telemetry samples.
//!
//! This module handles:
//! - `UplinkController`: the handle producers and the control surface use
//! - The background worker that owns the transport and the offline buffer
//! - `LivenessMonitor`: probe and reconnect pacing
//!
//! Every submitted sample ends in exactly one place: delivered by the
//! transport, or appended to the offline buffer. Buffered records are
//! flushed in order whenever the link (re)connects while online.

pub mod controller;
pub mod liveness;
mod worker;

use serde::Deserialize;
use std::fmt;

pub use controller::{UplinkController, UplinkSettings};
pub use liveness::{LivenessAction, LivenessMonitor};

/// Delivery mode chosen by the control surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Send directly when connected, buffer otherwise
    Online,
    /// Always buffer; never touch the transport for records
    Offline,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Online => write!(f, "online"),
            Mode::Offline => write!(f, "offline"),
        }
    }
}

/// Transport session lifecycle as seen by the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
}

/// Snapshot for status rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UplinkStatus {
    pub mode: Mode,
    pub link: LinkState,
    /// Records waiting in the offline buffer
    pub buffered: usize,
}
