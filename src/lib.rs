//! # Telemetry Uplink Library
//!
//! Deliver location and signal telemetry to a remote collector.
//!
//! Samples are sent over a persistent link while it is healthy and kept in a
//! durable on-disk buffer while it is not. The buffer is flushed in order on
//! every reconnect, so no accepted sample is dropped on the floor.

pub mod buffer;
pub mod config;
pub mod error;
pub mod notifier;
pub mod telemetry;
pub mod transport;
pub mod uplink;
