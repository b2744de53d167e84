//! # Offline Buffer Module
//!
//! Durable FIFO of records that could not be delivered yet.
//!
//! This module handles:
//! - Appending records while the link is down (or the uplink is offline)
//! - Draining records in order once the link is back
//! - Falling back to a secondary store when the primary is unusable, and
//!   keeping new records behind that backlog until it has drained
//!
//! `append`, `drain` and `count` serialize on one async lock held for the
//! whole read-modify-write cycle, so a drain never interleaves with an
//! append. A record leaves the buffer only after the sink accepted it. File
//! work runs on the blocking pool, never on the worker's runtime thread.

pub mod store;

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::telemetry::TelemetryRecord;
use crate::transport::TransportSession;

pub use store::BufferStore;

/// Destination for drained records
///
/// Returns `true` only when the record was handed off; `false` stops the
/// drain so later records are never delivered ahead of an earlier one.
#[async_trait]
pub trait RecordSink: Send {
    async fn deliver(&mut self, payload: &str) -> bool;
}

#[async_trait]
impl<T: TransportSession + ?Sized> RecordSink for T {
    async fn deliver(&mut self, payload: &str) -> bool {
        self.send(payload.as_bytes()).await
    }
}

/// Primary + fallback record stores behind one lock
#[derive(Debug)]
pub struct OfflineBuffer {
    primary: BufferStore,
    fallback: BufferStore,
    lock: Mutex<()>,
}

impl OfflineBuffer {
    pub fn new(primary: impl Into<PathBuf>, fallback: impl Into<PathBuf>) -> Self {
        Self {
            primary: BufferStore::new(primary),
            fallback: BufferStore::new(fallback),
            lock: Mutex::new(()),
        }
    }

    pub fn primary(&self) -> &BufferStore {
        &self.primary
    }

    pub fn fallback(&self) -> &BufferStore {
        &self.fallback
    }

    /// Append one record at the tail
    ///
    /// Records go to the primary store unless the fallback still holds
    /// records from an earlier primary failure; those must drain first, so
    /// newer records queue behind them in the fallback. If the chosen store
    /// fails, the other one is tried.
    ///
    /// # Errors
    ///
    /// Returns `BufferIo` only when both stores failed.
    pub async fn append(&self, record: TelemetryRecord) -> Result<()> {
        let _guard = self.lock.lock().await;

        let backlog = self.fallback.load_async().await.map(|r| r.len()).unwrap_or(0);
        let (first, second) = if backlog > 0 {
            (&self.fallback, &self.primary)
        } else {
            (&self.primary, &self.fallback)
        };

        match first.append_async(record.clone()).await {
            Ok(len) => {
                debug!("Buffered record ({} pending in {})", len, first.path().display());
                Ok(())
            }
            Err(e) => {
                warn!(
                    "Buffer {} unusable, trying {}: {}",
                    first.path().display(),
                    second.path().display(),
                    e
                );
                match second.append_async(record).await {
                    Ok(len) => {
                        debug!("Buffered record ({} pending in {})", len, second.path().display());
                        Ok(())
                    }
                    Err(e) => {
                        error!("No buffer usable, record not stored: {}", e);
                        Err(e)
                    }
                }
            }
        }
    }

    /// Deliver buffered records in FIFO order
    ///
    /// The primary store is drained first, then the fallback store. Delivery
    /// stops at the first record the sink refuses; that record and everything
    /// after it stay buffered in their original order.
    ///
    /// # Returns
    ///
    /// * `Result<usize>` - Number of records removed from the buffer
    pub async fn drain<S>(&self, sink: &mut S) -> Result<usize>
    where
        S: RecordSink + ?Sized,
    {
        let _guard = self.lock.lock().await;
        let mut drained = 0;

        for store in [&self.primary, &self.fallback] {
            match drain_store(store, sink).await {
                Ok(Drained { sent, stalled }) => {
                    drained += sent;
                    if stalled {
                        break;
                    }
                }
                Err(e) => warn!("Skipping buffer {}: {}", store.path().display(), e),
            }
        }

        if drained > 0 {
            info!("Flushed {} buffered record(s)", drained);
        }
        Ok(drained)
    }

    /// Number of records waiting in both stores
    pub async fn count(&self) -> usize {
        let _guard = self.lock.lock().await;
        let mut total = 0;
        for store in [&self.primary, &self.fallback] {
            total += store.load_async().await.map(|records| records.len()).unwrap_or(0);
        }
        total
    }
}

struct Drained {
    sent: usize,
    stalled: bool,
}

async fn drain_store<S>(store: &BufferStore, sink: &mut S) -> Result<Drained>
where
    S: RecordSink + ?Sized,
{
    let mut records = store.load_async().await?;
    if records.is_empty() {
        return Ok(Drained { sent: 0, stalled: false });
    }

    let mut sent = 0;
    for record in &records {
        let payload = record.to_json()?;
        if !sink.deliver(&payload).await {
            break;
        }
        sent += 1;
    }

    let stalled = sent < records.len();
    if sent > 0 {
        // Delivered records that fail to leave the file are sent again on the
        // next drain, which at-least-once delivery permits
        let remaining = records.split_off(sent);
        if let Err(e) = store.persist_async(remaining).await {
            error!("Could not rewrite {} after flush: {}", store.path().display(), e);
        }
    }

    Ok(Drained { sent, stalled })
}
