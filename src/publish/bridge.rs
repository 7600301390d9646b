//! The function the camera driver calls for every captured frame.
//!
//! The driver owns the thread and the pixel memory. The pixel pointer is
//! only valid until the callback returns, so the bridge wraps it in a
//! borrowed [`FrameView`] and publishes synchronously. Nothing it
//! receives outlives the call.

use super::publisher::{DropReason, FramePublisher, PublishOutcome};
use super::transport::Transport;
use crate::camera::FrameCallback;
use crate::header::{ByteOrder, CodecError, FrameHeader, HeaderBuffer};
use crate::metrics::PublishStats;
use std::cell::UnsafeCell;
use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A borrowed, non-owning view over one frame's pixel bytes.
#[derive(Clone, Copy)]
pub struct FrameView<'a> {
    bytes: &'a [u8],
}

impl<'a> FrameView<'a> {
    /// Wraps a slice.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    /// Wraps a raw driver pointer. Returns `None` for a null pointer.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads of `len` bytes for the whole of `'a`,
    /// and the memory must not be written while the view exists.
    pub unsafe fn from_raw(ptr: *const u8, len: usize) -> Option<Self> {
        if ptr.is_null() {
            return None;
        }
        // SAFETY: upheld by the caller.
        let bytes = unsafe { std::slice::from_raw_parts(ptr, len) };
        Some(Self { bytes })
    }

    /// Returns the pixel bytes.
    #[inline]
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Returns the payload length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true for an empty view.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for FrameView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameView")
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// Current wall-clock time in nanoseconds since the Unix epoch.
pub fn wall_clock_ns() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

/// Joins a driver callback to a [`FramePublisher`].
///
/// The encoded header is reused for every frame, with only its timestamp
/// rewritten. A driver with a single-image ring buffer never overlaps
/// callbacks. If one does, the later call finds the header claimed and
/// drops its frame as [`DropReason::Overlapping`].
pub struct FrameCallbackBridge<T> {
    header: FrameHeader,
    busy: AtomicBool,
    wire: UnsafeCell<HeaderBuffer>,
    publisher: FramePublisher<T>,
    stats: Arc<PublishStats>,
    cancel: CancellationToken,
    clock: fn() -> i64,
}

impl<T: Transport> FrameCallbackBridge<T> {
    /// Freezes `header` into its wire form and builds the bridge.
    pub fn new(
        header: FrameHeader,
        order: ByteOrder,
        publisher: FramePublisher<T>,
        stats: Arc<PublishStats>,
        cancel: CancellationToken,
    ) -> Result<Self, CodecError> {
        let wire = HeaderBuffer::new(&header, order)?;
        Ok(Self {
            header,
            busy: AtomicBool::new(false),
            wire: UnsafeCell::new(wire),
            publisher,
            stats,
            cancel,
            clock: wall_clock_ns,
        })
    }

    /// Replaces the timestamp source.
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    /// The static header description.
    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    /// Bytes in one frame, as negotiated with the driver.
    pub fn image_len(&self) -> usize {
        usize::try_from(self.header.image_buffer_length).unwrap_or(0)
    }

    /// Shared publish counters.
    pub fn stats(&self) -> &Arc<PublishStats> {
        &self.stats
    }

    /// Stamps the header and publishes one frame.
    pub fn on_frame(&self, frame: FrameView<'_>) -> PublishOutcome {
        let timestamp_ns = (self.clock)();
        self.stats.record_received(timestamp_ns);

        let outcome = if self.cancel.is_cancelled() {
            PublishOutcome::Dropped {
                reason: DropReason::Cancelled,
                attempts: 0,
            }
        } else {
            match self.claim() {
                Some(_claim) => {
                    // SAFETY: the claim grants this call sole access to `wire`
                    // until it is dropped at the end of this arm.
                    let wire = unsafe { &mut *self.wire.get() };
                    wire.set_timestamp(timestamp_ns);
                    self.publisher.publish(wire.as_bytes(), frame.as_bytes())
                }
                None => {
                    tracing::error!("Overlapping frame callbacks; header buffer busy");
                    PublishOutcome::Dropped {
                        reason: DropReason::Overlapping,
                        attempts: 0,
                    }
                }
            }
        };

        self.stats.record_outcome(&outcome);
        tracing::trace!(timestamp_ns, ?outcome, "Frame handled");
        outcome
    }

    fn claim(&self) -> Option<HeaderClaim<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| HeaderClaim { busy: &self.busy })
    }

    /// The `extern "C"` entry point to register with the driver.
    pub fn callback() -> FrameCallback {
        image_available::<T>
    }

    /// Opaque context pointer to register alongside [`Self::callback`].
    pub fn context(&self) -> *mut c_void {
        self as *const Self as *mut c_void
    }
}

// SAFETY: `wire` is the only field without shared-access synchronization.
// It is written only while `busy` is held, and `busy` is taken with an
// acquire exchange and released with a release store, so at most one
// thread touches it at a time and each sees the previous writer's bytes.
// Every other field is `Sync` on its own given `T: Transport`.
unsafe impl<T: Transport> Sync for FrameCallbackBridge<T> {}

/// Exclusive hold on the bridge's header buffer. Released on drop, so a
/// panicking publish still frees it.
struct HeaderClaim<'a> {
    busy: &'a AtomicBool,
}

impl Drop for HeaderClaim<'_> {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Driver callback trampoline.
///
/// Panics are caught here; nothing unwinds into the driver.
///
/// # Safety
///
/// `context` must come from [`FrameCallbackBridge::context`] on a bridge
/// that outlives the registration. `image` must be null or valid for
/// reads of the bridge's image length until this function returns.
/// Overlapping calls are allowed; all but one drop their frame.
pub unsafe extern "C" fn image_available<T: Transport>(image: *const u8, context: *mut c_void) {
    if context.is_null() {
        return;
    }

    // SAFETY: the controller registers a pointer to a boxed bridge and
    // unregisters before dropping it.
    let bridge = unsafe { &*(context as *const FrameCallbackBridge<T>) };

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        // SAFETY: the driver guarantees `image` spans one negotiated frame
        // until we return.
        match unsafe { FrameView::from_raw(image, bridge.image_len()) } {
            Some(frame) => {
                bridge.on_frame(frame);
            }
            None => tracing::warn!("Driver delivered a null frame"),
        }
    }));

    if result.is_err() {
        tracing::error!("Panic absorbed at the frame callback boundary");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::publisher::tests::ScriptedTransport;
    use crate::publish::OfferResult;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    fn fixed_clock() -> i64 {
        1_234_567_890
    }

    fn bridge_with(
        transport: ScriptedTransport,
        cancel: CancellationToken,
    ) -> FrameCallbackBridge<ScriptedTransport> {
        let header = FrameHeader {
            size_x: 4,
            size_y: 2,
            image_buffer_length: 16,
            ..Default::default()
        };
        FrameCallbackBridge::new(
            header,
            ByteOrder::Little,
            FramePublisher::with_deadline(transport, Duration::from_micros(100)),
            Arc::new(PublishStats::new()),
            cancel,
        )
        .unwrap()
        .with_clock(fixed_clock)
    }

    #[test]
    fn test_frame_is_stamped_and_published() {
        let bridge = bridge_with(
            ScriptedTransport::always(OfferResult::Success(1)),
            CancellationToken::new(),
        );
        let pixels: Vec<u8> = (0..16).collect();

        let outcome = bridge.on_frame(FrameView::new(&pixels));
        assert!(outcome.is_published());

        let message = bridge.publisher.transport().last_message();
        let (header, consumed) = FrameHeader::decode(&message, ByteOrder::Little).unwrap();
        assert_eq!(header.timestamp_ns, 1_234_567_890);
        assert_eq!(header.size_x, 4);
        assert_eq!(&message[consumed..], pixels.as_slice());

        let snapshot = bridge.stats().snapshot();
        assert_eq!(snapshot.frames_received, 1);
        assert_eq!(snapshot.frames_published, 1);
    }

    #[test]
    fn test_cancelled_bridge_skips_offer() {
        let cancel = CancellationToken::new();
        let bridge = bridge_with(ScriptedTransport::always(OfferResult::Success(1)), cancel.clone());
        cancel.cancel();

        let outcome = bridge.on_frame(FrameView::new(&[0u8; 16]));
        assert_eq!(
            outcome,
            PublishOutcome::Dropped {
                reason: DropReason::Cancelled,
                attempts: 0
            }
        );
        assert_eq!(bridge.publisher.transport().calls(), 0);
        assert_eq!(bridge.stats().snapshot().dropped_cancelled, 1);
    }

    #[test]
    fn test_trampoline_reads_raw_frame() {
        let bridge = bridge_with(
            ScriptedTransport::always(OfferResult::Success(1)),
            CancellationToken::new(),
        );
        let pixels = [7u8; 16];

        unsafe {
            image_available::<ScriptedTransport>(pixels.as_ptr(), bridge.context());
        }

        let message = bridge.publisher.transport().last_message();
        assert_eq!(message.len(), 52 + 16);
        assert_eq!(&message[52..], &pixels);
    }

    #[test]
    fn test_trampoline_tolerates_null_pointers() {
        let bridge = bridge_with(
            ScriptedTransport::always(OfferResult::Success(1)),
            CancellationToken::new(),
        );

        unsafe {
            image_available::<ScriptedTransport>(std::ptr::null(), bridge.context());
            image_available::<ScriptedTransport>([0u8; 16].as_ptr(), std::ptr::null_mut());
        }

        assert_eq!(bridge.publisher.transport().calls(), 0);
        assert_eq!(bridge.stats().snapshot().frames_received, 0);
    }

    /// Accepts every offer after holding it for `hold`, tracking how many
    /// offers were in flight at once.
    struct SlowTransport {
        hold: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl Transport for SlowTransport {
        fn offer(&self, _header: &[u8], _payload: &[u8]) -> OfferResult {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            let start = Instant::now();
            while start.elapsed() < self.hold {
                std::hint::spin_loop();
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            OfferResult::Success(0)
        }
    }

    #[test]
    fn test_bridge_is_sync() {
        fn assert_sync<T: Sync>() {}
        assert_sync::<FrameCallbackBridge<ScriptedTransport>>();
    }

    #[test]
    fn test_overlapping_callbacks_never_share_header() {
        const THREADS: usize = 4;
        const FRAMES: usize = 500;

        let transport = SlowTransport {
            hold: Duration::from_micros(50),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        };
        let header = FrameHeader {
            size_x: 4,
            size_y: 2,
            image_buffer_length: 16,
            ..Default::default()
        };
        let bridge = FrameCallbackBridge::new(
            header,
            ByteOrder::Little,
            FramePublisher::with_deadline(transport, Duration::from_micros(100)),
            Arc::new(PublishStats::new()),
            CancellationToken::new(),
        )
        .unwrap();

        let published = AtomicUsize::new(0);
        let overlapping = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for _ in 0..THREADS {
                scope.spawn(|| {
                    let pixels = [0u8; 16];
                    for _ in 0..FRAMES {
                        match bridge.on_frame(FrameView::new(&pixels)) {
                            PublishOutcome::Published { .. } => {
                                published.fetch_add(1, Ordering::Relaxed);
                            }
                            PublishOutcome::Dropped {
                                reason: DropReason::Overlapping,
                                ..
                            } => {
                                overlapping.fetch_add(1, Ordering::Relaxed);
                            }
                            other => panic!("unexpected outcome {other:?}"),
                        }
                    }
                });
            }
        });

        let published = published.load(Ordering::Relaxed);
        let overlapping = overlapping.load(Ordering::Relaxed);
        assert_eq!(bridge.publisher.transport().max_in_flight.load(Ordering::SeqCst), 1);
        assert!(published >= 1);
        assert_eq!(published + overlapping, THREADS * FRAMES);

        let snapshot = bridge.stats().snapshot();
        assert_eq!(snapshot.frames_received, (THREADS * FRAMES) as u64);
        assert_eq!(snapshot.frames_published, published as u64);
        assert!(!bridge.busy.load(Ordering::SeqCst));
    }

    #[test]
    fn test_terminal_drop_is_absorbed() {
        let bridge = bridge_with(
            ScriptedTransport::always(OfferResult::Closed),
            CancellationToken::new(),
        );

        for _ in 0..3 {
            let outcome = bridge.on_frame(FrameView::new(&[0u8; 16]));
            assert!(!outcome.is_published());
        }
        assert_eq!(bridge.stats().snapshot().dropped_terminal, 3);
    }
}
