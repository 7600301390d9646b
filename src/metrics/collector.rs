//! Publish counters and the Prometheus registry that mirrors them.

use crate::publish::{DropReason, PublishOutcome};
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use thiserror::Error;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Registration or encoding failed.
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// Lock-free counters written from the driver's callback thread.
#[derive(Debug, Default)]
pub struct PublishStats {
    frames_received: AtomicU64,
    frames_published: AtomicU64,
    dropped_deadline: AtomicU64,
    dropped_terminal: AtomicU64,
    dropped_cancelled: AtomicU64,
    offer_attempts: AtomicU64,
    last_timestamp_ns: AtomicI64,
}

impl PublishStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a frame entering the pipeline.
    #[inline]
    pub fn record_received(&self, timestamp_ns: i64) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.last_timestamp_ns.store(timestamp_ns, Ordering::Relaxed);
    }

    /// Records the outcome of one publish.
    #[inline]
    pub fn record_outcome(&self, outcome: &PublishOutcome) {
        self.offer_attempts
            .fetch_add(u64::from(outcome.attempts()), Ordering::Relaxed);

        let counter = match outcome {
            PublishOutcome::Published { .. } => &self.frames_published,
            PublishOutcome::Dropped { reason, .. } => match reason {
                DropReason::DeadlineExpired(_) => &self.dropped_deadline,
                DropReason::Closed | DropReason::Terminal(_) | DropReason::Overlapping => {
                    &self.dropped_terminal
                }
                DropReason::Cancelled => &self.dropped_cancelled,
            },
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a point-in-time copy of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_published: self.frames_published.load(Ordering::Relaxed),
            dropped_deadline: self.dropped_deadline.load(Ordering::Relaxed),
            dropped_terminal: self.dropped_terminal.load(Ordering::Relaxed),
            dropped_cancelled: self.dropped_cancelled.load(Ordering::Relaxed),
            offer_attempts: self.offer_attempts.load(Ordering::Relaxed),
            last_timestamp_ns: self.last_timestamp_ns.load(Ordering::Relaxed),
        }
    }
}

/// A snapshot of publish counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Frames delivered by the driver.
    pub frames_received: u64,
    /// Frames accepted by the transport.
    pub frames_published: u64,
    /// Frames dropped after the publish deadline expired.
    pub dropped_deadline: u64,
    /// Frames dropped on a terminal transport result.
    pub dropped_terminal: u64,
    /// Frames dropped because shutdown was requested.
    pub dropped_cancelled: u64,
    /// Total offers made.
    pub offer_attempts: u64,
    /// Timestamp of the most recent frame.
    pub last_timestamp_ns: i64,
}

impl MetricsSnapshot {
    /// Total frames dropped for any reason.
    pub fn frames_dropped(&self) -> u64 {
        self.dropped_deadline + self.dropped_terminal + self.dropped_cancelled
    }
}

/// Prometheus metrics registry for the frame publisher.
pub struct MetricsRegistry {
    registry: Registry,

    frames_received: IntCounter,
    frames_published: IntCounter,
    dropped_deadline: IntCounter,
    dropped_terminal: IntCounter,
    dropped_cancelled: IntCounter,
    offer_attempts: IntCounter,
    last_timestamp: IntGauge,
}

impl MetricsRegistry {
    /// Creates a new registry with all publisher metrics registered.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let frames_received = IntCounter::new(
            "flicam_frames_received_total",
            "Frames delivered by the camera driver",
        )?;
        let frames_published = IntCounter::new(
            "flicam_frames_published_total",
            "Frames accepted by the transport",
        )?;
        let dropped_deadline = IntCounter::new(
            "flicam_frames_dropped_deadline_total",
            "Frames dropped after the publish deadline expired",
        )?;
        let dropped_terminal = IntCounter::new(
            "flicam_frames_dropped_terminal_total",
            "Frames dropped on a terminal transport result",
        )?;
        let dropped_cancelled = IntCounter::new(
            "flicam_frames_dropped_cancelled_total",
            "Frames dropped because shutdown was requested",
        )?;
        let offer_attempts = IntCounter::new(
            "flicam_offer_attempts_total",
            "Offers made to the transport",
        )?;
        let last_timestamp = IntGauge::new(
            "flicam_last_frame_timestamp_ns",
            "Capture timestamp of the most recent frame",
        )?;

        registry.register(Box::new(frames_received.clone()))?;
        registry.register(Box::new(frames_published.clone()))?;
        registry.register(Box::new(dropped_deadline.clone()))?;
        registry.register(Box::new(dropped_terminal.clone()))?;
        registry.register(Box::new(dropped_cancelled.clone()))?;
        registry.register(Box::new(offer_attempts.clone()))?;
        registry.register(Box::new(last_timestamp.clone()))?;

        Ok(Self {
            registry,
            frames_received,
            frames_published,
            dropped_deadline,
            dropped_terminal,
            dropped_cancelled,
            offer_attempts,
            last_timestamp,
        })
    }

    /// Brings every metric up to the values in `snapshot`.
    pub fn update(&self, snapshot: &MetricsSnapshot) {
        // Counters only move forward, so increment by the difference
        advance(&self.frames_received, snapshot.frames_received);
        advance(&self.frames_published, snapshot.frames_published);
        advance(&self.dropped_deadline, snapshot.dropped_deadline);
        advance(&self.dropped_terminal, snapshot.dropped_terminal);
        advance(&self.dropped_cancelled, snapshot.dropped_cancelled);
        advance(&self.offer_attempts, snapshot.offer_attempts);
        self.last_timestamp.set(snapshot.last_timestamp_ns);
    }

    /// Returns the underlying Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

fn advance(counter: &IntCounter, target: u64) {
    let current = counter.get();
    if target > current {
        counter.inc_by(target - current);
    }
}
