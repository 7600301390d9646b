//! Publish statistics and Prometheus export.
//!
//! Dropped frames are never surfaced as errors; they are only visible
//! through these counters and the log.
//!
//! # Metrics Exposed
//!
//! - `flicam_frames_received_total` - Frames delivered by the driver
//! - `flicam_frames_published_total` - Frames accepted by the transport
//! - `flicam_frames_dropped_deadline_total` - Drops after the publish deadline
//! - `flicam_frames_dropped_terminal_total` - Drops on closed/unrecognized results
//! - `flicam_frames_dropped_cancelled_total` - Drops during shutdown
//! - `flicam_offer_attempts_total` - Offers made to the transport
//! - `flicam_last_frame_timestamp_ns` - Timestamp of the latest frame
//!
//! # Example
//!
//! ```
//! use flicam_publisher::metrics::{MetricsRegistry, PublishStats};
//!
//! let stats = PublishStats::new();
//! stats.record_received(1_000);
//!
//! let registry = MetricsRegistry::new().expect("Failed to create registry");
//! registry.update(&stats.snapshot());
//! assert!(registry.encode().unwrap().contains("flicam_frames_received_total 1"));
//! ```

mod collector;

pub use collector::{MetricsError, MetricsRegistry, MetricsSnapshot, PublishStats};
