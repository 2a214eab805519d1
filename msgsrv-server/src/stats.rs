//! # Server Counters
//!
//! Provide lightweight counters describing connection and relay activity,
//! reported by `SHOW USERS` and logged after each liveness sweep.
//!
//! ## Design Principles
//! 1. **Accumulator Pattern**: Use atomic counters to aggregate events cheaply.
//! 2. **Lock-Free**: Counters never touch the registry lock, so they can be
//!    bumped while it is held.
//! 3. **Plain Snapshots**: Readers get a copyable struct, not live atomics.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of all counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Connections accepted on either port.
    pub accepted: u64,
    /// TLS connections dropped during certificate load or handshake.
    pub tls_failures: u64,
    /// Frames read from clients.
    pub frames: u64,
    /// Lines queued to recipients.
    pub deliveries: u64,
    /// Lines dropped because a recipient's outbox was full or gone.
    pub drops: u64,
    /// Sessions evicted by the liveness sweeper.
    pub swept: u64,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "accepted={} tls_failures={} frames={} deliveries={} drops={} swept={}",
            self.accepted, self.tls_failures, self.frames, self.deliveries, self.drops, self.swept
        )
    }
}

/// Thread-safe counters shared by every task.
///
/// `Ordering::Relaxed` is sufficient: no counter is used to order other
/// memory accesses.
#[derive(Debug, Default)]
pub struct Stats {
    accepted: AtomicU64,
    tls_failures: AtomicU64,
    frames: AtomicU64,
    deliveries: AtomicU64,
    drops: AtomicU64,
    swept: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accept(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tls_failure(&self) {
        self.tls_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame(&self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery(&self) {
        self.deliveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drop(&self) {
        self.drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_swept(&self, count: u64) {
        self.swept.fetch_add(count, Ordering::Relaxed);
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            tls_failures: self.tls_failures.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            drops: self.drops.load(Ordering::Relaxed),
            swept: self.swept.load(Ordering::Relaxed),
        }
    }
}
