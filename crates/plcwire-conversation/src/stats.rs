// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Engine counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

// =============================================================================
// EngineStats
// =============================================================================

/// Counters for one conversation engine.
#[derive(Debug, Default)]
pub struct EngineStats {
    /// Exchanges written to the transport.
    exchanges_sent: AtomicU64,
    /// Exchanges resolved by a matching frame.
    exchanges_completed: AtomicU64,
    /// Exchanges resolved by a protocol abort.
    exchanges_aborted: AtomicU64,
    /// Exchanges whose deadline passed.
    timeouts: AtomicU64,
    /// Failed transport writes.
    transport_failures: AtomicU64,
    /// Frames that could not be decoded.
    decode_failures: AtomicU64,
    /// Frames dropped as late duplicates.
    duplicate_frames: AtomicU64,
    /// Unsolicited frames delivered to at least one subscriber.
    routed_notifications: AtomicU64,
    /// Frames nothing wanted.
    unmatched_frames: AtomicU64,
    /// Total round-trip time of completed exchanges in microseconds.
    total_round_trip_us: AtomicU64,
}

impl EngineStats {
    /// Creates zeroed statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an exchange written to the transport.
    pub fn record_sent(&self) {
        self.exchanges_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a completed exchange.
    pub fn record_completed(&self, round_trip: Duration) {
        self.exchanges_completed.fetch_add(1, Ordering::Relaxed);
        self.total_round_trip_us
            .fetch_add(round_trip.as_micros() as u64, Ordering::Relaxed);
    }

    /// Records an aborted exchange.
    pub fn record_aborted(&self) {
        self.exchanges_aborted.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a timeout.
    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a transport write failure.
    pub fn record_transport_failure(&self) {
        self.transport_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an undecodable frame.
    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a dropped duplicate.
    pub fn record_duplicate(&self) {
        self.duplicate_frames.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a routed unsolicited notification.
    pub fn record_routed(&self) {
        self.routed_notifications.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a frame nothing wanted.
    pub fn record_unmatched(&self) {
        self.unmatched_frames.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the average round-trip time of completed exchanges.
    pub fn average_round_trip(&self) -> Duration {
        let completed = self.exchanges_completed.load(Ordering::Relaxed);
        if completed == 0 {
            return Duration::ZERO;
        }
        let total = self.total_round_trip_us.load(Ordering::Relaxed);
        Duration::from_micros(total / completed)
    }

    /// Takes a consistent-enough copy of all counters.
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            exchanges_sent: self.exchanges_sent.load(Ordering::Relaxed),
            exchanges_completed: self.exchanges_completed.load(Ordering::Relaxed),
            exchanges_aborted: self.exchanges_aborted.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            transport_failures: self.transport_failures.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            duplicate_frames: self.duplicate_frames.load(Ordering::Relaxed),
            routed_notifications: self.routed_notifications.load(Ordering::Relaxed),
            unmatched_frames: self.unmatched_frames.load(Ordering::Relaxed),
            average_round_trip_us: self.average_round_trip().as_micros() as u64,
        }
    }

    /// Resets all counters.
    pub fn reset(&self) {
        for counter in [
            &self.exchanges_sent,
            &self.exchanges_completed,
            &self.exchanges_aborted,
            &self.timeouts,
            &self.transport_failures,
            &self.decode_failures,
            &self.duplicate_frames,
            &self.routed_notifications,
            &self.unmatched_frames,
            &self.total_round_trip_us,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Point-in-time copy of [`EngineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStatsSnapshot {
    /// Exchanges written to the transport.
    pub exchanges_sent: u64,
    /// Exchanges resolved by a matching frame.
    pub exchanges_completed: u64,
    /// Exchanges resolved by a protocol abort.
    pub exchanges_aborted: u64,
    /// Exchanges whose deadline passed.
    pub timeouts: u64,
    /// Failed transport writes.
    pub transport_failures: u64,
    /// Frames that could not be decoded.
    pub decode_failures: u64,
    /// Frames dropped as late duplicates.
    pub duplicate_frames: u64,
    /// Unsolicited frames delivered to at least one subscriber.
    pub routed_notifications: u64,
    /// Frames nothing wanted.
    pub unmatched_frames: u64,
    /// Average round-trip time in microseconds.
    pub average_round_trip_us: u64,
}
