//! Simulated camera SDK.
//!
//! Enumerates a fixed list of cameras, enforces sensor bounds on crops,
//! records every SDK call and can be told to fail any of them. Frames
//! are delivered through the registered callback exactly as the vendor
//! SDK does it: a raw pointer into a driver-owned ring slot that is
//! rewritten for a later capture.

use super::driver::{CameraMode, CropRegion, DriverError, DriverHandle, FrameCallback};
use crate::header::PixelFormat;
use std::collections::HashSet;
use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// SDK operations the simulated driver records and can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SdkCall {
    /// Opening the session.
    Open,
    /// Listing attached cameras.
    DetectCameras,
    /// Choosing the active camera.
    SelectCamera,
    /// Setting the readout mode.
    SetMode,
    /// Checking a crop against the sensor.
    ValidateCrop,
    /// Applying a crop.
    SetCrop,
    /// Choosing pixel signedness.
    SetUnsignedPixels,
    /// Toggling the ring buffer.
    EnableRingBuffer,
    /// Sizing the ring buffer.
    SetBufferDepth,
    /// Setting images per ring slot.
    SetImagesPerBuffer,
    /// Registering the frame callback.
    RegisterCallback,
    /// Removing the frame callback.
    UnregisterCallback,
    /// Starting acquisition.
    Start,
    /// Stopping acquisition.
    Stop,
    /// Releasing the session.
    Shutdown,
}

#[derive(Clone, Copy)]
struct ContextPtr(*mut c_void);

// SAFETY: the registration contract makes the context valid, and safe to
// hand to the callback from the capture thread, until the thread is joined.
unsafe impl Send for ContextPtr {}

impl ContextPtr {
    fn get(&self) -> *mut c_void {
        self.0
    }
}

#[derive(Clone, Copy)]
struct Registration {
    callback: FrameCallback,
    context: ContextPtr,
}

struct CaptureThread {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<u64>,
}

/// In-process stand-in for the vendor camera SDK.
pub struct SimulatedDriver {
    cameras: Vec<String>,
    sensor_width: u32,
    sensor_height: u32,
    format: PixelFormat,
    frame_interval: Option<Duration>,
    failures: HashSet<SdkCall>,
    calls: Vec<SdkCall>,

    open: bool,
    selected: Option<String>,
    mode: Option<CameraMode>,
    crop: Option<CropRegion>,
    unsigned_pixels: bool,
    ring_buffer_enabled: bool,
    buffer_depth: u32,
    images_per_buffer: u32,
    streaming: bool,
    shutdown_count: u32,

    registration: Option<Registration>,
    capture: Option<CaptureThread>,
    ring: Vec<Vec<u8>>,
    sequence: u64,
}

impl SimulatedDriver {
    /// Creates a driver that enumerates `cameras` on a sensor of the
    /// given size.
    pub fn new(cameras: Vec<String>, sensor_width: u32, sensor_height: u32) -> Self {
        Self {
            cameras,
            sensor_width,
            sensor_height,
            format: PixelFormat::Mono16,
            frame_interval: None,
            failures: HashSet::new(),
            calls: Vec::new(),
            open: false,
            selected: None,
            mode: None,
            crop: None,
            unsigned_pixels: false,
            ring_buffer_enabled: true,
            buffer_depth: 1,
            images_per_buffer: 1,
            streaming: false,
            shutdown_count: 0,
            registration: None,
            capture: None,
            ring: Vec::new(),
            sequence: 0,
        }
    }

    /// Produces frames on a capture thread at `fps` once started.
    ///
    /// Without a frame rate, frames are only delivered by
    /// [`SimulatedDriver::emit_frame`].
    pub fn with_frame_rate(mut self, fps: f64) -> Self {
        self.frame_interval = (fps > 0.0).then(|| Duration::from_secs_f64(1.0 / fps));
        self
    }

    /// Sets the pixel format the camera reports.
    pub fn with_pixel_format(mut self, format: PixelFormat) -> Self {
        self.format = format;
        self
    }

    /// Makes every later `call` report an SDK failure.
    pub fn failing(mut self, call: SdkCall) -> Self {
        self.failures.insert(call);
        self
    }

    /// SDK calls made so far, in order.
    pub fn calls(&self) -> &[SdkCall] {
        &self.calls
    }

    /// True between `open` and `shutdown`.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// True while acquisition is running.
    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// True while a frame callback is registered.
    pub fn has_callback(&self) -> bool {
        self.registration.is_some()
    }

    /// Camera chosen by `select_camera`.
    pub fn selected_camera(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// Last readout mode applied.
    pub fn mode(&self) -> Option<CameraMode> {
        self.mode
    }

    /// Last crop applied.
    pub fn crop(&self) -> Option<CropRegion> {
        self.crop
    }

    /// Pixel signedness last applied.
    pub fn unsigned_pixels(&self) -> bool {
        self.unsigned_pixels
    }

    /// Ring buffer state last applied.
    pub fn ring_buffer_enabled(&self) -> bool {
        self.ring_buffer_enabled
    }

    /// Ring buffer depth in images.
    pub fn buffer_depth(&self) -> u32 {
        self.buffer_depth
    }

    /// Images per ring slot.
    pub fn images_per_buffer(&self) -> u32 {
        self.images_per_buffer
    }

    /// Number of times the session was released.
    pub fn shutdown_count(&self) -> u32 {
        self.shutdown_count
    }

    /// Frames delivered so far.
    pub fn frames_emitted(&self) -> u64 {
        self.sequence
    }

    /// Slots the driver cycles through.
    pub fn effective_depth(&self) -> u32 {
        if self.ring_buffer_enabled {
            self.buffer_depth.max(1)
        } else {
            1
        }
    }

    /// Delivers one frame synchronously through the registered callback.
    ///
    /// Returns false if capture is not running, a capture thread owns
    /// delivery, or no callback is registered.
    pub fn emit_frame(&mut self) -> bool {
        if !self.streaming || self.capture.is_some() {
            return false;
        }
        let Some(registration) = self.registration else {
            return false;
        };

        let depth = self.effective_depth() as usize;
        let frame_len = self.frame_byte_size();
        if self.ring.len() != depth || self.ring.iter().any(|slot| slot.len() != frame_len) {
            self.ring = (0..depth).map(|_| vec![0u8; frame_len]).collect();
        }

        let slot = &mut self.ring[(self.sequence % depth as u64) as usize];
        fill_pattern(slot, self.sequence);
        // SAFETY: the registration contract keeps the context valid while
        // registered, and `slot` outlives the call.
        unsafe { (registration.callback)(slot.as_ptr(), registration.context.get()) };
        self.sequence += 1;
        true
    }

    fn check(&mut self, call: SdkCall) -> Result<(), DriverError> {
        self.calls.push(call);
        if self.failures.contains(&call) {
            return Err(DriverError::sdk(sdk_name(call), "simulated failure"));
        }
        Ok(())
    }

    fn require_open(&self) -> Result<(), DriverError> {
        if self.open {
            Ok(())
        } else {
            Err(DriverError::NotOpen)
        }
    }

    fn spawn_capture(&mut self) -> Result<(), DriverError> {
        let (Some(registration), Some(interval)) = (self.registration, self.frame_interval) else {
            return Ok(());
        };

        let depth = self.effective_depth() as usize;
        let frame_len = self.frame_byte_size();
        let first_sequence = self.sequence;
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let Registration { callback, context } = registration;

        let handle = thread::Builder::new()
            .name("sim-capture".to_string())
            .spawn(move || {
                let mut ring: Vec<Vec<u8>> = (0..depth).map(|_| vec![0u8; frame_len]).collect();
                let mut sequence = first_sequence;
                let mut next = Instant::now();

                while !flag.load(Ordering::Acquire) {
                    let slot = &mut ring[(sequence % depth as u64) as usize];
                    fill_pattern(slot, sequence);
                    // SAFETY: stop/unregister join this thread before the
                    // context is released.
                    unsafe { callback(slot.as_ptr(), context.get()) };
                    sequence += 1;

                    next += interval;
                    let now = Instant::now();
                    if next > now {
                        thread::sleep(next - now);
                    } else {
                        next = now;
                    }
                }
                sequence
            })
            .map_err(|e| DriverError::sdk("start", e.to_string()))?;

        tracing::debug!(?interval, depth, frame_len, "Simulated capture thread started");
        self.capture = Some(CaptureThread { stop, handle });
        Ok(())
    }

    fn join_capture(&mut self) {
        if let Some(capture) = self.capture.take() {
            capture.stop.store(true, Ordering::Release);
            match capture.handle.join() {
                Ok(sequence) => {
                    tracing::debug!(
                        frames = sequence - self.sequence,
                        "Simulated capture thread stopped"
                    );
                    self.sequence = sequence;
                }
                Err(_) => tracing::error!("Simulated capture thread panicked"),
            }
        }
    }
}

impl Default for SimulatedDriver {
    fn default() -> Self {
        Self::new(vec!["01-00001bb0cef0-simulated".to_string()], 640, 512)
    }
}

impl DriverHandle for SimulatedDriver {
    fn open(&mut self) -> Result<(), DriverError> {
        self.check(SdkCall::Open)?;
        self.open = true;
        tracing::info!(cameras = self.cameras.len(), "Simulated SDK opened");
        Ok(())
    }

    fn detect_cameras(&mut self) -> Result<Vec<String>, DriverError> {
        self.check(SdkCall::DetectCameras)?;
        self.require_open()?;
        Ok(self.cameras.clone())
    }

    fn select_camera(&mut self, id: &str) -> Result<(), DriverError> {
        self.check(SdkCall::SelectCamera)?;
        self.require_open()?;
        if !self.cameras.iter().any(|c| c == id) {
            return Err(DriverError::sdk("setCamera", format!("unknown camera {id}")));
        }
        self.selected = Some(id.to_string());
        Ok(())
    }

    fn set_mode(&mut self, mode: CameraMode) -> Result<(), DriverError> {
        self.check(SdkCall::SetMode)?;
        self.require_open()?;
        self.mode = Some(mode);
        Ok(())
    }

    fn is_crop_valid(&mut self, crop: CropRegion) -> bool {
        self.calls.push(SdkCall::ValidateCrop);
        !self.failures.contains(&SdkCall::ValidateCrop)
            && crop.col1 <= crop.col2
            && crop.row1 <= crop.row2
            && crop.col2 < self.sensor_width
            && crop.row2 < self.sensor_height
    }

    fn set_crop(&mut self, crop: CropRegion) -> Result<(), DriverError> {
        self.check(SdkCall::SetCrop)?;
        self.require_open()?;
        self.crop = Some(crop);
        Ok(())
    }

    fn set_unsigned_pixels(&mut self, unsigned: bool) -> Result<(), DriverError> {
        self.check(SdkCall::SetUnsignedPixels)?;
        self.unsigned_pixels = unsigned;
        Ok(())
    }

    fn enable_ring_buffer(&mut self, enabled: bool) -> Result<(), DriverError> {
        self.check(SdkCall::EnableRingBuffer)?;
        self.ring_buffer_enabled = enabled;
        Ok(())
    }

    fn set_buffer_depth(&mut self, images: u32) -> Result<(), DriverError> {
        self.check(SdkCall::SetBufferDepth)?;
        self.buffer_depth = images;
        Ok(())
    }

    fn set_images_per_buffer(&mut self, images: u32) -> Result<(), DriverError> {
        self.check(SdkCall::SetImagesPerBuffer)?;
        self.images_per_buffer = images;
        Ok(())
    }

    fn frame_dimensions(&self) -> (u32, u32) {
        match self.crop {
            Some(crop) => (crop.width(), crop.height()),
            None => (self.sensor_width, self.sensor_height),
        }
    }

    fn frame_byte_size(&self) -> usize {
        let (width, height) = self.frame_dimensions();
        width as usize * height as usize * self.format.bytes_per_pixel().unwrap_or(2)
    }

    fn pixel_format(&self) -> PixelFormat {
        self.format
    }

    unsafe fn register_frame_callback(
        &mut self,
        callback: FrameCallback,
        context: *mut c_void,
    ) -> Result<(), DriverError> {
        self.check(SdkCall::RegisterCallback)?;
        self.require_open()?;
        self.registration = Some(Registration {
            callback,
            context: ContextPtr(context),
        });
        Ok(())
    }

    fn unregister_frame_callback(&mut self) -> Result<(), DriverError> {
        self.check(SdkCall::UnregisterCallback)?;
        self.join_capture();
        self.registration = None;
        Ok(())
    }

    fn start(&mut self) -> Result<(), DriverError> {
        self.check(SdkCall::Start)?;
        self.require_open()?;
        if self.selected.is_none() {
            return Err(DriverError::sdk("start", "no camera selected"));
        }
        if self.streaming {
            return Ok(());
        }
        self.spawn_capture()?;
        self.streaming = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DriverError> {
        self.check(SdkCall::Stop)?;
        self.join_capture();
        self.streaming = false;
        Ok(())
    }

    fn shutdown(&mut self) {
        self.calls.push(SdkCall::Shutdown);
        self.join_capture();
        self.registration = None;
        self.streaming = false;
        self.open = false;
        self.shutdown_count += 1;
        tracing::info!("Simulated SDK closed");
    }
}

impl Drop for SimulatedDriver {
    fn drop(&mut self) {
        self.join_capture();
    }
}

fn sdk_name(call: SdkCall) -> &'static str {
    match call {
        SdkCall::Open => "init",
        SdkCall::DetectCameras => "detectCameras",
        SdkCall::SelectCamera => "setCamera",
        SdkCall::SetMode => "setMode",
        SdkCall::ValidateCrop => "isCroppingDataValid",
        SdkCall::SetCrop => "setCroppingState",
        SdkCall::SetUnsignedPixels => "setUnsignedPixel",
        SdkCall::EnableRingBuffer => "enableRingBuffer",
        SdkCall::SetBufferDepth => "setBufferSizeInImages",
        SdkCall::SetImagesPerBuffer => "setNbImagesPerBuffer",
        SdkCall::RegisterCallback => "addCallbackNewImage",
        SdkCall::UnregisterCallback => "removeCallbackNewImage",
        SdkCall::Start => "start",
        SdkCall::Stop => "stop",
        SdkCall::Shutdown => "exit",
    }
}

/// Writes a deterministic ramp that shifts with every frame.
fn fill_pattern(buf: &mut [u8], sequence: u64) {
    let shift = sequence as u8;
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte = (i as u8).wrapping_add(shift);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    unsafe extern "C" fn count_frames(image: *const u8, context: *mut c_void) {
        assert!(!image.is_null());
        let counter = unsafe { &*(context as *const AtomicU64) };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn opened() -> SimulatedDriver {
        let mut driver = SimulatedDriver::default();
        driver.open().unwrap();
        let id = driver.detect_cameras().unwrap().remove(0);
        driver.select_camera(&id).unwrap();
        driver
    }

    #[test]
    fn test_crop_bounds() {
        let mut driver = opened();
        let inside = CropRegion {
            col1: 0,
            col2: 639,
            row1: 0,
            row2: 511,
        };
        assert!(driver.is_crop_valid(inside));
        assert!(!driver.is_crop_valid(CropRegion { col2: 640, ..inside }));
        assert!(!driver.is_crop_valid(CropRegion { row1: 600, ..inside }));
    }

    #[test]
    fn test_frame_size_follows_crop() {
        let mut driver = opened();
        assert_eq!(driver.frame_byte_size(), 640 * 512 * 2);

        driver
            .set_crop(CropRegion {
                col1: 10,
                col2: 109,
                row1: 0,
                row2: 49,
            })
            .unwrap();
        assert_eq!(driver.frame_dimensions(), (100, 50));
        assert_eq!(driver.frame_byte_size(), 100 * 50 * 2);
    }

    #[test]
    fn test_injected_failure() {
        let mut driver = SimulatedDriver::default().failing(SdkCall::Open);
        assert!(matches!(
            driver.open(),
            Err(DriverError::Sdk { operation: "init", .. })
        ));
        assert!(!driver.is_open());
    }

    #[test]
    fn test_emit_requires_streaming_and_callback() {
        let counter = AtomicU64::new(0);
        let mut driver = opened();
        assert!(!driver.emit_frame());

        unsafe {
            driver
                .register_frame_callback(count_frames, &counter as *const _ as *mut c_void)
                .unwrap();
        }
        assert!(!driver.emit_frame());

        driver.start().unwrap();
        assert!(driver.emit_frame());
        assert!(driver.emit_frame());
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        driver.stop().unwrap();
        assert!(!driver.emit_frame());
        driver.shutdown();
    }

    #[test]
    fn test_capture_thread_stops_before_returning() {
        let counter = AtomicU64::new(0);
        let mut driver = opened().with_frame_rate(1000.0);

        unsafe {
            driver
                .register_frame_callback(count_frames, &counter as *const _ as *mut c_void)
                .unwrap();
        }
        driver.start().unwrap();
        thread::sleep(Duration::from_millis(30));
        driver.stop().unwrap();

        let after_stop = counter.load(Ordering::SeqCst);
        assert!(after_stop > 0);
        assert_eq!(driver.frames_emitted(), after_stop);

        thread::sleep(Duration::from_millis(10));
        assert_eq!(counter.load(Ordering::SeqCst), after_stop);
        driver.shutdown();
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let mut driver = opened();
        driver.start().unwrap();
        driver.shutdown();

        assert!(!driver.is_open());
        assert!(!driver.is_streaming());
        assert!(!driver.has_callback());
        assert_eq!(driver.shutdown_count(), 1);
        assert_eq!(driver.calls().last(), Some(&SdkCall::Shutdown));
    }
}
