//! FLI Camera Frame Publisher
//!
//! Captures frames from a First Light Imaging camera and publishes each
//! one, prefixed by a self-describing binary header, to a low-latency
//! message transport.
//!
//! # Architecture
//!
//! ```text
//! camera (driver thread) → bridge → publisher → transport
//!     ↑                       ↓
//! controller (lifecycle)   metrics
//! ```
//!
//! # Design Principles
//!
//! - **Zero-copy**: pixel memory is offered straight from the driver buffer
//! - **Bounded latency**: each frame gets a fixed publish budget, then is dropped
//! - **Header built once**: only the timestamp changes per frame
//! - **Drops are counted, not raised**: the capture thread never fails
//!
//! # Example
//!
//! ```
//! use flicam_publisher::{
//!     camera::{CameraConfig, CameraController, SimulatedDriver},
//!     publish::IpcPublication,
//! };
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! let transport = Arc::new(IpcPublication::new("aeron:ipc", 1001, 8));
//! let subscription = transport.subscribe();
//!
//! let mut controller = CameraController::new(
//!     CameraConfig::default(),
//!     SimulatedDriver::default(),
//!     Arc::clone(&transport),
//!     CancellationToken::new(),
//! )
//! .unwrap();
//! controller.initialize().unwrap();
//! controller.start().unwrap();
//!
//! controller.driver_mut().emit_frame();
//! assert_eq!(subscription.pending(), 1);
//!
//! controller.shutdown();
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod camera;
pub mod header;
pub mod metrics;
pub mod publish;

// Re-export commonly used types at crate root
pub use camera::{CameraConfig, CameraController, CameraError, DriverHandle, SimulatedDriver};
pub use header::{ByteOrder, FrameHeader, PixelFormat};
pub use metrics::{MetricsRegistry, PublishStats};
pub use publish::{FramePublisher, IpcPublication, OfferResult, PublishOutcome, Transport};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
