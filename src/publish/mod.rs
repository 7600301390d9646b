//! Frame publication pipeline.
//!
//! ```text
//! driver thread ─▶ image_available ─▶ FrameCallbackBridge ─▶ FramePublisher ─▶ Transport
//!                  (extern "C")       (stamp header,         (offer until
//!                                      wrap pixels)           deadline)
//! ```
//!
//! Everything here runs synchronously on the driver's capture thread.
//! The bridge takes no locks and nothing is queued for later: the pixel memory
//! belongs to the driver and is recycled as soon as the callback returns.

#[cfg(feature = "aeron")]
mod aeron;
mod bridge;
pub mod ipc;
mod publisher;
mod transport;

#[cfg(feature = "aeron")]
pub use aeron::{AeronPublication, AeronTransportError};
pub use bridge::{image_available, wall_clock_ns, FrameCallbackBridge, FrameView};
pub use ipc::{publication, IpcPublication, IpcSubscription};
pub use publisher::{DropReason, FramePublisher, PublishOutcome, DEFAULT_PUBLISH_DEADLINE};
pub use transport::{
    OfferResult, Transport, ADMIN_ACTION, BACK_PRESSURED, MAX_POSITION_EXCEEDED, NOT_CONNECTED,
    PUBLICATION_CLOSED,
};
