//! Camera lifecycle.
//!
//! ```text
//! Uninitialized ─open─▶ Detecting ─configure─▶ Configured ─start─▶ Started
//!                                                   ▲                │ stop
//!                                                   └──── start ── Stopped
//! any ─shutdown─▶ ShutDown (terminal)
//! ```

use super::config::{CameraConfig, ConfigError};
use super::driver::{CameraMode, CropRegion, DriverError, DriverHandle};
use crate::header::{
    ByteOrder, CodecError, FrameHeader, HEADER_VERSION, PAYLOAD_TYPE_IMAGE,
};
use crate::metrics::PublishStats;
use crate::publish::{FrameCallbackBridge, FramePublisher, Transport, DEFAULT_PUBLISH_DEADLINE};
use std::ptr::NonNull;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Lifecycle state of a [`CameraController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// No SDK session yet.
    Uninitialized,
    /// Session open; no camera selected.
    Detecting,
    /// Camera selected and configured; header frozen.
    Configured,
    /// Capturing and publishing.
    Started,
    /// Capture halted; can be restarted.
    Stopped,
    /// Session released. Terminal.
    ShutDown,
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Errors surfaced by the controller.
///
/// Everything up to `Configured` is fatal; start and stop failures are
/// left to the caller.
#[derive(Debug, Error)]
pub enum CameraError {
    /// The configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
    /// The SDK session could not be opened.
    #[error("failed to open camera SDK: {0}")]
    DriverInitFailure(DriverError),
    /// No enumerated camera contains the configured serial number.
    #[error("no camera matches serial number {serial:?}; found {available:?}")]
    CameraNotFound {
        /// Configured serial number.
        serial: String,
        /// Identifiers the driver reported.
        available: Vec<String>,
    },
    /// The driver rejected the crop.
    #[error("camera rejected ROI {0:?}")]
    InvalidRoi(CropRegion),
    /// The readout mode could not be applied.
    #[error("failed to set camera mode: {0}")]
    ModeSetFailure(DriverError),
    /// Any other failure while configuring.
    #[error("camera configuration failed: {0}")]
    Configuration(String),
    /// Capture could not be started.
    #[error("failed to start capture: {0}")]
    StartFailure(String),
    /// Capture could not be stopped.
    #[error("failed to stop capture: {0}")]
    StopFailure(DriverError),
    /// The operation is not valid in the current state.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        /// Operation attempted.
        operation: &'static str,
        /// State at the time.
        state: ControllerState,
    },
}

impl From<CodecError> for CameraError {
    fn from(err: CodecError) -> Self {
        CameraError::Configuration(err.to_string())
    }
}

/// Returns the first identifier containing `serial`, in reported order.
pub fn select_camera<'a>(cameras: &'a [String], serial: &str) -> Option<&'a str> {
    cameras
        .iter()
        .find(|id| id.contains(serial))
        .map(String::as_str)
}

/// Owns the driver session and drives it through its lifecycle.
///
/// The transport is shared: the controller publishes through it but
/// never closes it.
pub struct CameraController<D: DriverHandle, T: Transport> {
    config: CameraConfig,
    byte_order: ByteOrder,
    deadline: Duration,
    driver: D,
    transport: Arc<T>,
    cancel: CancellationToken,
    stats: Arc<PublishStats>,
    state: ControllerState,
    selected_camera: Option<String>,
    callback_registered: bool,
    // Heap address handed to the driver as callback context. Owned here,
    // freed in Drop after the driver has released it.
    bridge: Option<NonNull<FrameCallbackBridge<Arc<T>>>>,
}

impl<D: DriverHandle, T: Transport> CameraController<D, T> {
    /// Validates `config` and takes ownership of `driver`.
    pub fn new(
        config: CameraConfig,
        driver: D,
        transport: Arc<T>,
        cancel: CancellationToken,
    ) -> Result<Self, CameraError> {
        config.validate()?;
        Ok(Self {
            config,
            byte_order: ByteOrder::default(),
            deadline: DEFAULT_PUBLISH_DEADLINE,
            driver,
            transport,
            cancel,
            stats: Arc::new(PublishStats::new()),
            state: ControllerState::Uninitialized,
            selected_camera: None,
            callback_registered: false,
            bridge: None,
        })
    }

    /// Sets the header byte order. Takes effect at `configure`.
    pub fn with_byte_order(mut self, order: ByteOrder) -> Self {
        self.byte_order = order;
        self
    }

    /// Sets the per-frame publish deadline. Takes effect at `configure`.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// The validated camera configuration.
    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    /// Identifier of the camera chosen during `configure`.
    pub fn selected_camera(&self) -> Option<&str> {
        self.selected_camera.as_deref()
    }

    /// The frozen frame header, once configured.
    pub fn header(&self) -> Option<&FrameHeader> {
        self.bridge().map(FrameCallbackBridge::header)
    }

    /// Publish counters shared with the callback thread.
    pub fn stats(&self) -> Arc<PublishStats> {
        Arc::clone(&self.stats)
    }

    /// The driver session.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// The driver session, mutably.
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    fn bridge(&self) -> Option<&FrameCallbackBridge<Arc<T>>> {
        // SAFETY: the pointer comes from Box::leak and is only freed in
        // Drop. The bridge is Sync; this thread only reads frozen fields.
        self.bridge.map(|ptr| unsafe { &*ptr.as_ptr() })
    }

    fn expect_state(
        &self,
        operation: &'static str,
        allowed: &[ControllerState],
    ) -> Result<(), CameraError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(CameraError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    /// Opens the SDK session.
    pub fn open(&mut self) -> Result<(), CameraError> {
        self.expect_state("open", &[ControllerState::Uninitialized])?;
        self.driver.open().map_err(CameraError::DriverInitFailure)?;
        self.state = ControllerState::Detecting;
        tracing::debug!("Camera SDK session opened");
        Ok(())
    }

    /// Selects the camera, applies mode, crop and buffering, and freezes
    /// the frame header from the negotiated settings.
    pub fn configure(&mut self) -> Result<(), CameraError> {
        self.expect_state("configure", &[ControllerState::Detecting])?;

        let cameras = self
            .driver
            .detect_cameras()
            .map_err(|e| CameraError::Configuration(e.to_string()))?;
        let camera = select_camera(&cameras, &self.config.serial_number)
            .ok_or_else(|| CameraError::CameraNotFound {
                serial: self.config.serial_number.clone(),
                available: cameras.clone(),
            })?
            .to_string();
        self.driver
            .select_camera(&camera)
            .map_err(|e| CameraError::Configuration(e.to_string()))?;

        self.driver
            .set_mode(CameraMode::Full)
            .map_err(CameraError::ModeSetFailure)?;

        let crop = self.config.crop_region();
        if !self.driver.is_crop_valid(crop) {
            return Err(CameraError::InvalidRoi(crop));
        }
        self.driver.set_crop(crop).map_err(configuration)?;
        self.driver
            .set_unsigned_pixels(self.config.unsigned_pixels)
            .map_err(configuration)?;

        // Size the ring buffer, then (normally) switch it off so each
        // buffer holds exactly one image.
        let ring = self.config.ring_buffer;
        self.driver.enable_ring_buffer(true).map_err(configuration)?;
        self.driver
            .set_buffer_depth(ring.depth)
            .map_err(configuration)?;
        self.driver
            .enable_ring_buffer(ring.enabled)
            .map_err(configuration)?;
        self.driver.set_images_per_buffer(1).map_err(configuration)?;

        let header = self.negotiated_header()?;
        let publisher = FramePublisher::with_deadline(Arc::clone(&self.transport), self.deadline);
        let bridge = FrameCallbackBridge::new(
            header,
            self.byte_order,
            publisher,
            Arc::clone(&self.stats),
            self.cancel.clone(),
        )?;
        self.bridge = Some(NonNull::from(Box::leak(Box::new(bridge))));

        tracing::info!(
            camera = %camera,
            width = self.config.width,
            height = self.config.height,
            offset_x = self.config.offset_x,
            offset_y = self.config.offset_y,
            ring_depth = ring.effective_depth(),
            "Camera configured"
        );
        self.selected_camera = Some(camera);
        self.state = ControllerState::Configured;
        Ok(())
    }

    /// `open` followed by `configure`.
    pub fn initialize(&mut self) -> Result<(), CameraError> {
        self.open()?;
        self.configure()
    }

    fn negotiated_header(&self) -> Result<FrameHeader, CameraError> {
        let (width, height) = self.driver.frame_dimensions();
        let byte_size = self.driver.frame_byte_size();
        let format = self.driver.pixel_format();

        if let Some(bpp) = format.bytes_per_pixel() {
            let expected = width as usize * height as usize * bpp;
            if expected != byte_size {
                tracing::warn!(
                    width,
                    height,
                    bpp,
                    byte_size,
                    "Driver frame size differs from dimensions; using driver size"
                );
            }
        }

        Ok(FrameHeader {
            version: HEADER_VERSION,
            payload_type: PAYLOAD_TYPE_IMAGE,
            timestamp_ns: 0,
            format,
            size_x: wire_i32("width", width as u64)?,
            size_y: wire_i32("height", height as u64)?,
            offset_x: wire_i32("offset_x", self.config.offset_x as u64)?,
            offset_y: wire_i32("offset_y", self.config.offset_y as u64)?,
            padding_x: 0,
            padding_y: 0,
            metadata: Vec::new(),
            image_buffer_length: wire_i32("image buffer length", byte_size as u64)?,
        })
    }

    /// Registers the frame callback (once) and starts capture.
    pub fn start(&mut self) -> Result<(), CameraError> {
        self.expect_state(
            "start",
            &[ControllerState::Configured, ControllerState::Stopped],
        )?;
        if self.cancel.is_cancelled() {
            return Err(CameraError::StartFailure("shutdown requested".to_string()));
        }

        if !self.callback_registered {
            let context = self
                .bridge()
                .map(FrameCallbackBridge::context)
                .ok_or_else(|| CameraError::StartFailure("not configured".to_string()))?;
            let callback = FrameCallbackBridge::<Arc<T>>::callback();
            // SAFETY: the bridge lives until Drop, which runs shutdown (and
            // so unregisters) first.
            unsafe { self.driver.register_frame_callback(callback, context) }
                .map_err(|e| CameraError::StartFailure(e.to_string()))?;
            self.callback_registered = true;
        }

        self.driver
            .start()
            .map_err(|e| CameraError::StartFailure(e.to_string()))?;
        self.state = ControllerState::Started;
        tracing::info!("Camera capture started");
        Ok(())
    }

    /// Halts capture. A no-op unless capture is running.
    pub fn stop(&mut self) -> Result<(), CameraError> {
        match self.state {
            ControllerState::Started => {
                self.driver.stop().map_err(CameraError::StopFailure)?;
                self.state = ControllerState::Stopped;
                tracing::info!("Camera capture stopped");
                Ok(())
            }
            ControllerState::Stopped | ControllerState::ShutDown => Ok(()),
            state => Err(CameraError::InvalidState {
                operation: "stop",
                state,
            }),
        }
    }

    /// Stops capture if needed, unregisters the callback and releases the
    /// session. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.state == ControllerState::ShutDown {
            return;
        }

        if self.state == ControllerState::Started {
            if let Err(e) = self.driver.stop() {
                tracing::warn!(error = %e, "Stop failed during shutdown");
            }
        }
        if self.callback_registered {
            if let Err(e) = self.driver.unregister_frame_callback() {
                tracing::warn!(error = %e, "Failed to unregister frame callback");
            }
            self.callback_registered = false;
        }
        if self.state != ControllerState::Uninitialized {
            self.driver.shutdown();
        }

        self.state = ControllerState::ShutDown;
        let snapshot = self.stats.snapshot();
        tracing::info!(
            received = snapshot.frames_received,
            published = snapshot.frames_published,
            dropped = snapshot.frames_dropped(),
            "Camera shut down"
        );
    }
}

impl<D: DriverHandle, T: Transport> Drop for CameraController<D, T> {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(ptr) = self.bridge.take() {
            // SAFETY: allocated by Box in configure; the driver no longer
            // holds the pointer after shutdown.
            drop(unsafe { Box::from_raw(ptr.as_ptr()) });
        }
    }
}

fn configuration(err: DriverError) -> CameraError {
    CameraError::Configuration(err.to_string())
}

fn wire_i32(field: &str, value: u64) -> Result<i32, CameraError> {
    i32::try_from(value).map_err(|_| {
        CameraError::Configuration(format!("{field} {value} does not fit the frame header"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{SdkCall, SimulatedDriver};
    use crate::header::PixelFormat;
    use crate::publish::IpcPublication;

    fn cameras() -> Vec<String> {
        vec!["01-00001bb0cef0-left".to_string(), "02-other".to_string()]
    }

    fn config() -> CameraConfig {
        CameraConfig {
            serial_number: "00001bb0cef0".to_string(),
            ..CameraConfig::with_dimensions(640, 512)
        }
    }

    fn controller_with(
        config: CameraConfig,
        driver: SimulatedDriver,
    ) -> CameraController<SimulatedDriver, IpcPublication> {
        let transport = Arc::new(IpcPublication::new("ipc:test", 1001, 8));
        CameraController::new(config, driver, transport, CancellationToken::new()).unwrap()
    }

    fn controller() -> CameraController<SimulatedDriver, IpcPublication> {
        controller_with(config(), SimulatedDriver::new(cameras(), 640, 512))
    }

    #[test]
    fn test_serial_match_first_wins() {
        let list = vec![
            "01-00001bb0cef0-left".to_string(),
            "02-00001bb0cef0-right".to_string(),
        ];
        assert_eq!(select_camera(&list, "00001bb0cef0"), Some("01-00001bb0cef0-left"));
        assert_eq!(select_camera(&list, "right"), Some("02-00001bb0cef0-right"));
        assert_eq!(select_camera(&list, "ffff"), None);
    }

    #[test]
    fn test_configure_selects_matching_camera() {
        let mut controller = controller();
        controller.initialize().unwrap();

        assert_eq!(controller.state(), ControllerState::Configured);
        assert_eq!(controller.selected_camera(), Some("01-00001bb0cef0-left"));
        assert_eq!(
            controller.driver().selected_camera(),
            Some("01-00001bb0cef0-left")
        );
    }

    #[test]
    fn test_absent_serial_is_camera_not_found() {
        let mut config = config();
        config.serial_number = "deadbeef".to_string();
        let mut controller = controller_with(config, SimulatedDriver::new(cameras(), 640, 512));

        controller.open().unwrap();
        let err = controller.configure().unwrap_err();
        assert!(matches!(err, CameraError::CameraNotFound { ref serial, .. } if serial == "deadbeef"));
        assert_eq!(controller.state(), ControllerState::Detecting);
        assert!(matches!(
            controller.start(),
            Err(CameraError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_header_frozen_from_negotiated_settings() {
        let mut controller = controller();
        assert!(controller.header().is_none());
        controller.initialize().unwrap();

        let header = controller.header().unwrap();
        assert_eq!(header.size_x, 640);
        assert_eq!(header.size_y, 512);
        assert_eq!(header.offset_x, 0);
        assert_eq!(header.offset_y, 0);
        assert_eq!(header.format, PixelFormat::Mono16);
        assert_eq!(header.image_buffer_length, 640 * 512 * 2);
        assert_eq!(header.version, 0);
        assert!(header.metadata.is_empty());
    }

    #[test]
    fn test_ring_buffer_sized_then_disabled() {
        let mut controller = controller();
        controller.initialize().unwrap();

        let driver = controller.driver();
        assert_eq!(driver.buffer_depth(), 4);
        assert!(!driver.ring_buffer_enabled());
        assert_eq!(driver.images_per_buffer(), 1);
        assert_eq!(driver.effective_depth(), 1);

        let ring_calls: Vec<SdkCall> = driver
            .calls()
            .iter()
            .copied()
            .filter(|c| {
                matches!(
                    c,
                    SdkCall::EnableRingBuffer | SdkCall::SetBufferDepth | SdkCall::SetImagesPerBuffer
                )
            })
            .collect();
        assert_eq!(
            ring_calls,
            vec![
                SdkCall::EnableRingBuffer,
                SdkCall::SetBufferDepth,
                SdkCall::EnableRingBuffer,
                SdkCall::SetImagesPerBuffer,
            ]
        );
    }

    #[test]
    fn test_out_of_bounds_roi_never_constructs() {
        let mut config = config();
        config.offset_x = 1;
        let transport = Arc::new(IpcPublication::new("ipc:test", 1001, 8));
        let result = CameraController::new(
            config,
            SimulatedDriver::new(cameras(), 640, 512),
            transport,
            CancellationToken::new(),
        );
        assert!(matches!(
            result,
            Err(CameraError::InvalidConfig(ConfigError::InvalidRoi { .. }))
        ));
    }

    #[test]
    fn test_driver_rejected_roi() {
        // Configured sensor bounds are larger than what the camera accepts
        let mut config = config();
        config.sensor_width = 1280;
        config.width = 1280;
        let mut controller = controller_with(config, SimulatedDriver::new(cameras(), 640, 512));

        controller.open().unwrap();
        assert!(matches!(
            controller.configure(),
            Err(CameraError::InvalidRoi(CropRegion { col2: 1279, .. }))
        ));
    }

    #[test]
    fn test_mode_failure() {
        let driver = SimulatedDriver::new(cameras(), 640, 512).failing(SdkCall::SetMode);
        let mut controller = controller_with(config(), driver);

        assert!(matches!(
            controller.initialize(),
            Err(CameraError::ModeSetFailure(_))
        ));
    }

    #[test]
    fn test_open_failure() {
        let driver = SimulatedDriver::new(cameras(), 640, 512).failing(SdkCall::Open);
        let mut controller = controller_with(config(), driver);

        assert!(matches!(
            controller.initialize(),
            Err(CameraError::DriverInitFailure(_))
        ));
        assert_eq!(controller.state(), ControllerState::Uninitialized);
    }

    #[test]
    fn test_start_failure_keeps_configured() {
        let driver = SimulatedDriver::new(cameras(), 640, 512).failing(SdkCall::Start);
        let mut controller = controller_with(config(), driver);
        controller.initialize().unwrap();

        assert!(matches!(
            controller.start(),
            Err(CameraError::StartFailure(_))
        ));
        assert_eq!(controller.state(), ControllerState::Configured);
    }

    #[test]
    fn test_start_requires_configuration() {
        let mut controller = controller();
        assert!(matches!(
            controller.start(),
            Err(CameraError::InvalidState {
                operation: "start",
                state: ControllerState::Uninitialized
            })
        ));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut controller = controller();
        controller.initialize().unwrap();
        controller.start().unwrap();

        controller.stop().unwrap();
        controller.stop().unwrap();
        assert_eq!(controller.state(), ControllerState::Stopped);
        let stops = controller
            .driver()
            .calls()
            .iter()
            .filter(|c| **c == SdkCall::Stop)
            .count();
        assert_eq!(stops, 1);
    }

    #[test]
    fn test_shutdown_twice_releases_once() {
        let mut controller = controller();
        controller.initialize().unwrap();
        controller.start().unwrap();
        controller.stop().unwrap();

        controller.shutdown();
        controller.shutdown();

        assert_eq!(controller.state(), ControllerState::ShutDown);
        assert_eq!(controller.driver().shutdown_count(), 1);
        assert!(!controller.driver().has_callback());
    }

    #[test]
    fn test_shutdown_from_started_unregisters_before_release() {
        let mut controller = controller();
        controller.initialize().unwrap();
        controller.start().unwrap();
        controller.shutdown();

        let calls = controller.driver().calls();
        let tail = &calls[calls.len() - 3..];
        assert_eq!(
            tail,
            &[SdkCall::Stop, SdkCall::UnregisterCallback, SdkCall::Shutdown]
        );
    }

    #[test]
    fn test_restart_registers_callback_once() {
        let mut controller = controller();
        controller.initialize().unwrap();
        controller.start().unwrap();
        controller.stop().unwrap();
        controller.start().unwrap();

        let registrations = controller
            .driver()
            .calls()
            .iter()
            .filter(|c| **c == SdkCall::RegisterCallback)
            .count();
        assert_eq!(registrations, 1);
        assert_eq!(controller.state(), ControllerState::Started);
    }

    #[test]
    fn test_frames_reach_subscriber() {
        let transport = Arc::new(IpcPublication::new("ipc:test", 1001, 8));
        let subscription = transport.subscribe();
        let mut controller = CameraController::new(
            config(),
            SimulatedDriver::new(cameras(), 640, 512),
            Arc::clone(&transport),
            CancellationToken::new(),
        )
        .unwrap();
        controller.initialize().unwrap();
        controller.start().unwrap();

        for _ in 0..3 {
            assert!(controller.driver_mut().emit_frame());
        }

        let mut headers = Vec::new();
        subscription.poll(
            |message| {
                let (header, consumed) = FrameHeader::decode(message, ByteOrder::Little).unwrap();
                assert_eq!(message.len() - consumed, 640 * 512 * 2);
                headers.push(header);
            },
            10,
        );

        assert_eq!(headers.len(), 3);
        assert!(headers.iter().all(|h| h.size_x == 640 && h.size_y == 512));
        assert!(headers.windows(2).all(|w| w[0].timestamp_ns <= w[1].timestamp_ns));

        let snapshot = controller.stats().snapshot();
        assert_eq!(snapshot.frames_received, 3);
        assert_eq!(snapshot.frames_published, 3);
    }

    #[test]
    fn test_capture_thread_frames_reach_subscriber() {
        let transport = Arc::new(IpcPublication::new("ipc:test", 1001, 256));
        let subscription = transport.subscribe();
        let config = CameraConfig {
            serial_number: "00001bb0cef0".to_string(),
            ..CameraConfig::with_dimensions(64, 32)
        };
        let driver = SimulatedDriver::new(cameras(), 640, 512).with_frame_rate(500.0);
        let mut controller =
            CameraController::new(config, driver, Arc::clone(&transport), CancellationToken::new())
                .unwrap();
        controller.initialize().unwrap();
        controller.start().unwrap();

        std::thread::sleep(std::time::Duration::from_millis(60));
        controller.stop().unwrap();
        controller.shutdown();
        controller.shutdown();
        assert_eq!(controller.state(), ControllerState::ShutDown);
        assert!(!controller.driver().is_streaming());
        assert!(!controller.driver().has_callback());

        let mut timestamps = Vec::new();
        while subscription.poll(
            |message| {
                let (header, consumed) = FrameHeader::decode(message, ByteOrder::Little).unwrap();
                assert_eq!((header.size_x, header.size_y), (64, 32));
                assert_eq!(message.len() - consumed, 64 * 32 * 2);
                timestamps.push(header.timestamp_ns);
            },
            64,
        ) > 0
        {}

        let emitted = controller.driver().frames_emitted();
        let snapshot = controller.stats().snapshot();
        assert!(emitted > 0);
        assert_eq!(snapshot.frames_received, emitted);
        assert_eq!(snapshot.frames_published + snapshot.frames_dropped(), emitted);
        assert_eq!(timestamps.len() as u64, snapshot.frames_published);
        assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_frames_without_subscriber_are_dropped() {
        let mut controller = controller();
        controller.initialize().unwrap();
        controller.start().unwrap();

        assert!(controller.driver_mut().emit_frame());

        let snapshot = controller.stats().snapshot();
        assert_eq!(snapshot.frames_published, 0);
        assert_eq!(snapshot.dropped_deadline, 1);
    }

    #[test]
    fn test_cancellation_blocks_restart() {
        let cancel = CancellationToken::new();
        let transport = Arc::new(IpcPublication::new("ipc:test", 1001, 8));
        let _subscription = transport.subscribe();
        let mut controller = CameraController::new(
            config(),
            SimulatedDriver::new(cameras(), 640, 512),
            transport,
            cancel.clone(),
        )
        .unwrap();
        controller.initialize().unwrap();
        controller.start().unwrap();
        controller.stop().unwrap();

        cancel.cancel();
        assert!(matches!(
            controller.start(),
            Err(CameraError::StartFailure(_))
        ));
        assert_eq!(controller.state(), ControllerState::Stopped);
    }

    #[test]
    fn test_big_endian_header() {
        let transport = Arc::new(IpcPublication::new("ipc:test", 1001, 8));
        let subscription = transport.subscribe();
        let mut controller = CameraController::new(
            config(),
            SimulatedDriver::new(cameras(), 640, 512),
            Arc::clone(&transport),
            CancellationToken::new(),
        )
        .unwrap()
        .with_byte_order(ByteOrder::Big);
        controller.initialize().unwrap();
        controller.start().unwrap();
        controller.driver_mut().emit_frame();

        let mut sizes = Vec::new();
        subscription.poll(
            |message| {
                let (header, _) = FrameHeader::decode(message, ByteOrder::Big).unwrap();
                sizes.push((header.size_x, header.size_y));
            },
            1,
        );
        assert_eq!(sizes, vec![(640, 512)]);
    }
}
