//! In-process publication over a bounded lock-free queue.
//!
//! Behaves like a messaging publication as far as the publisher can
//! tell: offers never block, report `NotConnected` until a subscription
//! exists, `BackPressured` while the queue is full and `Closed` after
//! [`IpcPublication::close`]. Message buffers are recycled, so a warmed-up
//! stream does not allocate.

use super::transport::{OfferResult, Transport};
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

struct Shared {
    channel: String,
    stream_id: i32,
    messages: ArrayQueue<Vec<u8>>,
    free: ArrayQueue<Vec<u8>>,
    subscribers: AtomicUsize,
    closed: AtomicBool,
    position: AtomicI64,
}

/// Creates a stream and attaches its first subscription.
pub fn publication(
    channel: impl Into<String>,
    stream_id: i32,
    depth: usize,
) -> (IpcPublication, IpcSubscription) {
    let publication = IpcPublication::new(channel, stream_id, depth);
    let subscription = publication.subscribe();
    (publication, subscription)
}

/// Publishing end of an in-process stream.
#[derive(Clone)]
pub struct IpcPublication {
    shared: Arc<Shared>,
}

impl IpcPublication {
    /// Creates a stream holding at most `depth` undelivered messages.
    pub fn new(channel: impl Into<String>, stream_id: i32, depth: usize) -> Self {
        let depth = depth.max(1);
        Self {
            shared: Arc::new(Shared {
                channel: channel.into(),
                stream_id,
                messages: ArrayQueue::new(depth),
                free: ArrayQueue::new(depth),
                subscribers: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                position: AtomicI64::new(0),
            }),
        }
    }

    /// Attaches a subscription. The publication is connected while at
    /// least one subscription is alive.
    pub fn subscribe(&self) -> IpcSubscription {
        self.shared.subscribers.fetch_add(1, Ordering::AcqRel);
        tracing::debug!(
            channel = %self.shared.channel,
            stream_id = self.shared.stream_id,
            "Subscription attached"
        );
        IpcSubscription {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Closes the stream. Later offers return `Closed`.
    pub fn close(&self) {
        if !self.shared.closed.swap(true, Ordering::AcqRel) {
            tracing::info!(
                channel = %self.shared.channel,
                stream_id = self.shared.stream_id,
                "Publication closed"
            );
        }
    }

    /// True once the publication has been closed.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// True while at least one subscription is attached.
    pub fn is_connected(&self) -> bool {
        self.shared.subscribers.load(Ordering::Acquire) > 0
    }

    /// Channel name given at construction.
    pub fn channel(&self) -> &str {
        &self.shared.channel
    }

    /// Stream id given at construction.
    pub fn stream_id(&self) -> i32 {
        self.shared.stream_id
    }

    /// Bytes accepted so far.
    pub fn position(&self) -> i64 {
        self.shared.position.load(Ordering::Acquire)
    }
}

impl Transport for IpcPublication {
    fn offer(&self, header: &[u8], payload: &[u8]) -> OfferResult {
        let shared = &*self.shared;

        if shared.closed.load(Ordering::Acquire) {
            return OfferResult::Closed;
        }
        if shared.subscribers.load(Ordering::Acquire) == 0 {
            return OfferResult::NotConnected;
        }
        if shared.messages.is_full() {
            return OfferResult::BackPressured;
        }

        let mut message = shared.free.pop().unwrap_or_default();
        message.clear();
        message.extend_from_slice(header);
        message.extend_from_slice(payload);
        let length = message.len() as i64;

        if let Err(message) = shared.messages.push(message) {
            // Lost a race with another publisher for the last slot
            let _ = shared.free.push(message);
            return OfferResult::BackPressured;
        }

        OfferResult::Success(shared.position.fetch_add(length, Ordering::AcqRel) + length)
    }
}

impl std::fmt::Debug for IpcPublication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcPublication")
            .field("channel", &self.shared.channel)
            .field("stream_id", &self.shared.stream_id)
            .field("pending", &self.shared.messages.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Receiving end of an in-process stream.
pub struct IpcSubscription {
    shared: Arc<Shared>,
}

impl IpcSubscription {
    /// Hands up to `limit` pending messages to `handler`, oldest first.
    ///
    /// Each message is the header immediately followed by the payload.
    /// Returns the number of messages delivered.
    pub fn poll<F>(&self, mut handler: F, limit: usize) -> usize
    where
        F: FnMut(&[u8]),
    {
        let mut delivered = 0;
        while delivered < limit {
            let Some(message) = self.shared.messages.pop() else {
                break;
            };
            handler(&message);
            let _ = self.shared.free.push(message);
            delivered += 1;
        }
        delivered
    }

    /// Messages waiting to be polled.
    pub fn pending(&self) -> usize {
        self.shared.messages.len()
    }

    /// True once the publication has been closed.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

impl Drop for IpcSubscription {
    fn drop(&mut self) {
        self.shared.subscribers.fetch_sub(1, Ordering::AcqRel);
    }
}
