//! Vendor camera SDK boundary.
//!
//! [`DriverHandle`] is the slice of the SDK the controller needs. The
//! real binding lives behind the `flisdk` feature; [`SimulatedDriver`]
//! stands in for it everywhere else.
//!
//! [`SimulatedDriver`]: super::SimulatedDriver

use crate::header::PixelFormat;
use std::ffi::c_void;
use thiserror::Error;

/// Signature of the new-frame callback the SDK invokes.
///
/// `image` points at one frame's pixels and is only valid for the
/// duration of the call. `context` is the pointer given at registration.
pub type FrameCallback = unsafe extern "C" fn(image: *const u8, context: *mut c_void);

/// Errors reported by the SDK.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// An SDK call reported failure.
    #[error("{operation} failed: {detail}")]
    Sdk {
        /// SDK operation that failed.
        operation: &'static str,
        /// What the SDK reported.
        detail: String,
    },
    /// A call needed an open session.
    #[error("driver session is not open")]
    NotOpen,
}

impl DriverError {
    /// Builds an [`DriverError::Sdk`].
    pub fn sdk(operation: &'static str, detail: impl Into<String>) -> Self {
        DriverError::Sdk {
            operation,
            detail: detail.into(),
        }
    }
}

/// Readout mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CameraMode {
    /// Full well readout.
    #[default]
    Full,
}

/// Inclusive sensor crop, in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    /// First column.
    pub col1: u32,
    /// Last column.
    pub col2: u32,
    /// First row.
    pub row1: u32,
    /// Last row.
    pub row2: u32,
}

impl CropRegion {
    /// Columns covered.
    pub fn width(&self) -> u32 {
        self.col2.saturating_sub(self.col1) + 1
    }

    /// Rows covered.
    pub fn height(&self) -> u32 {
        self.row2.saturating_sub(self.row1) + 1
    }
}

/// A vendor SDK session.
///
/// Calls arrive in lifecycle order from the controller: open, detect,
/// select, configure, register, start, stop, unregister, shutdown.
pub trait DriverHandle {
    /// Opens the SDK session.
    fn open(&mut self) -> Result<(), DriverError>;

    /// Lists camera identifiers in the order the SDK reports them.
    fn detect_cameras(&mut self) -> Result<Vec<String>, DriverError>;

    /// Makes `id` the active camera.
    fn select_camera(&mut self, id: &str) -> Result<(), DriverError>;

    /// Sets the readout mode and commits pending settings.
    fn set_mode(&mut self, mode: CameraMode) -> Result<(), DriverError>;

    /// Asks the SDK whether `crop` is acceptable for the active camera.
    fn is_crop_valid(&mut self, crop: CropRegion) -> bool;

    /// Applies a sensor crop.
    fn set_crop(&mut self, crop: CropRegion) -> Result<(), DriverError>;

    /// Selects unsigned or signed pixel values.
    fn set_unsigned_pixels(&mut self, unsigned: bool) -> Result<(), DriverError>;

    /// Turns the driver's ring buffer on or off.
    fn enable_ring_buffer(&mut self, enabled: bool) -> Result<(), DriverError>;

    /// Sizes the ring buffer in images.
    fn set_buffer_depth(&mut self, images: u32) -> Result<(), DriverError>;

    /// Sets how many images each buffer holds.
    fn set_images_per_buffer(&mut self, images: u32) -> Result<(), DriverError>;

    /// Negotiated frame size in pixels.
    fn frame_dimensions(&self) -> (u32, u32);

    /// Negotiated size of one frame in bytes.
    fn frame_byte_size(&self) -> usize;

    /// Negotiated pixel format.
    fn pixel_format(&self) -> PixelFormat;

    /// Installs the new-frame callback.
    ///
    /// # Safety
    ///
    /// `context` must remain valid, and safe to pass to `callback`, until
    /// [`DriverHandle::unregister_frame_callback`] or
    /// [`DriverHandle::shutdown`] returns.
    unsafe fn register_frame_callback(
        &mut self,
        callback: FrameCallback,
        context: *mut c_void,
    ) -> Result<(), DriverError>;

    /// Removes the callback. No invocation is in flight once this returns.
    fn unregister_frame_callback(&mut self) -> Result<(), DriverError>;

    /// Begins capture.
    fn start(&mut self) -> Result<(), DriverError>;

    /// Halts capture. No invocation is in flight once this returns.
    fn stop(&mut self) -> Result<(), DriverError>;

    /// Releases the session.
    fn shutdown(&mut self);
}
