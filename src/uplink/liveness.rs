//! # Liveness Monitor
//!
//! Timer state machine behind probing and reconnecting.
//!
//! The monitor never sleeps or does I/O itself. It only tracks which single
//! deadline is pending and what should happen when it passes; the worker
//! owns the one timer and performs the probe or reconnect. That keeps
//! cancellation trivial (drop the timer) and makes the pacing testable with
//! plain `Instant` arithmetic.
//!
//! ```text
//!            connect_now            on_connected
//!   Idle ──────────────▶ Cooldown ─(due)─▶ Connecting ─────────▶ Watching
//!                          ▲                   │                   │ (due)
//!                          │   on_disconnected │                   ▼
//!                          └───────────────────┴────────────── Probing
//!                                                 on_probe_ok ──▶ Watching
//! ```

use std::time::Duration;
use tokio::time::Instant;

/// What the worker must do now that the pending deadline has passed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessAction {
    /// Run a liveness check against the connected session
    Probe,
    /// Call `connect()` again
    Reconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Watching { next_probe: Instant },
    Probing,
    Cooldown { retry_at: Instant },
    Connecting,
}

/// Probe/reconnect pacing for one transport session
#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    interval: Duration,
    cooldown: Duration,
    max_cooldown: Duration,
    /// Consecutive failed connects since the last good one
    failures: u32,
    phase: Phase,
}

impl LivenessMonitor {
    /// # Arguments
    ///
    /// * `interval` - Time between liveness checks while connected
    /// * `cooldown` - Delay before the first reconnect attempt
    /// * `max_cooldown` - Cap for the doubling delay; equal to `cooldown`
    ///   keeps the delay fixed
    pub fn new(interval: Duration, cooldown: Duration, max_cooldown: Duration) -> Self {
        Self {
            interval,
            cooldown,
            max_cooldown: max_cooldown.max(cooldown),
            failures: 0,
            phase: Phase::Idle,
        }
    }

    /// Schedule an immediate connect attempt
    pub fn connect_now(&mut self, now: Instant) {
        self.phase = Phase::Cooldown { retry_at: now };
    }

    /// The session reached Connected (or a re-check succeeded)
    pub fn on_connected(&mut self, now: Instant) {
        self.failures = 0;
        self.phase = Phase::Watching { next_probe: now + self.interval };
    }

    /// The last liveness check passed
    pub fn on_probe_ok(&mut self, now: Instant) {
        self.phase = Phase::Watching { next_probe: now + self.interval };
    }

    /// The session is down; schedule the next connect after the cooldown
    pub fn on_disconnected(&mut self, now: Instant) {
        let delay = self.reconnect_delay();
        self.failures = self.failures.saturating_add(1);
        self.phase = Phase::Cooldown { retry_at: now + delay };
    }

    /// Cancel whatever is pending
    pub fn stop(&mut self) {
        self.phase = Phase::Idle;
    }

    /// The single pending deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        match self.phase {
            Phase::Watching { next_probe } => Some(next_probe),
            Phase::Cooldown { retry_at } => Some(retry_at),
            Phase::Idle | Phase::Probing | Phase::Connecting => None,
        }
    }

    /// Consume the deadline if it has passed
    ///
    /// The monitor then waits for the worker to report the outcome through
    /// `on_probe_ok`, `on_connected` or `on_disconnected`.
    pub fn poll(&mut self, now: Instant) -> Option<LivenessAction> {
        match self.phase {
            Phase::Watching { next_probe } if next_probe <= now => {
                self.phase = Phase::Probing;
                Some(LivenessAction::Probe)
            }
            Phase::Cooldown { retry_at } if retry_at <= now => {
                self.phase = Phase::Connecting;
                Some(LivenessAction::Reconnect)
            }
            _ => None,
        }
    }

    /// Delay the next `on_disconnected` will schedule
    pub fn reconnect_delay(&self) -> Duration {
        let factor = 1u32.checked_shl(self.failures.min(16)).unwrap_or(u32::MAX);
        self.cooldown.saturating_mul(factor).min(self.max_cooldown)
    }
}
