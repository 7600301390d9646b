//! Binding to the First Light Imaging SDK (C API, `FliSdk_*_V2`).
//!
//! Linked against `libFliSdk`; see `build.rs` for the search path.

use super::driver::{CameraMode, CropRegion, DriverError, DriverHandle, FrameCallback};
use crate::header::PixelFormat;
use std::ffi::{c_void, CStr, CString};
use std::os::raw::{c_char, c_int};

type FliContext = *mut c_void;
type CallbackHandler = *mut c_void;

/// `FliSdk_C_V2.h` readout mode for full well.
const MODE_FULL: c_int = 0;

/// Capacity of the `;`-separated name lists the SDK writes.
const LIST_CAPACITY: usize = 512;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct CroppingData {
    col1: u16,
    col2: u16,
    row1: u16,
    row2: u16,
}

extern "C" {
    fn FliSdk_init_V2() -> FliContext;
    fn FliSdk_exit_V2(context: FliContext);
    fn FliSdk_detectGrabbers_V2(context: FliContext, list: *mut c_char, size: c_int);
    fn FliSdk_detectCameras_V2(context: FliContext, list: *mut c_char, size: c_int);
    fn FliSdk_setGrabber_V2(context: FliContext, name: *const c_char) -> bool;
    fn FliSdk_setCamera_V2(context: FliContext, name: *const c_char) -> bool;
    fn FliSdk_setMode_V2(context: FliContext, mode: c_int);
    fn FliSdk_update_V2(context: FliContext) -> bool;
    fn FliSdk_isCroppingDataValid_V2(context: FliContext, crop: CroppingData) -> bool;
    fn FliSdk_setCroppingState_V2(context: FliContext, enabled: bool, crop: CroppingData) -> bool;
    fn FliSdk_setUnsignedPixel_V2(context: FliContext, unsigned: bool);
    fn FliSdk_enableRingBuffer_V2(context: FliContext, enabled: bool);
    fn FliSdk_setBufferSizeInImages_V2(context: FliContext, images: u64);
    fn FliSdk_setNbImagesPerBuffer_V2(context: FliContext, images: c_int);
    fn FliSdk_getCurrentImageDimension_V2(context: FliContext, width: *mut u16, height: *mut u16);
    fn FliSdk_isMono8Pixel_V2(context: FliContext) -> bool;
    fn FliSdk_addCallbackNewImage_V2(
        context: FliContext,
        callback: FrameCallback,
        fps_trigger: u16,
        before_copy: bool,
        user: *mut c_void,
    ) -> CallbackHandler;
    fn FliSdk_removeCallbackNewImage_V2(context: FliContext, handler: CallbackHandler);
    fn FliSdk_start_V2(context: FliContext) -> bool;
    fn FliSdk_stop_V2(context: FliContext) -> bool;
}

/// A session with the vendor SDK.
///
/// Cameras are only visible behind a grabber, so detection lists grabbers
/// first and remembers the first one for camera selection.
pub struct FliSdkDriver {
    context: FliContext,
    callback: Option<CallbackHandler>,
    grabber: Option<String>,
}

impl FliSdkDriver {
    /// Creates an unopened session.
    pub fn new() -> Self {
        Self {
            context: std::ptr::null_mut(),
            callback: None,
            grabber: None,
        }
    }

    fn context(&self) -> Result<FliContext, DriverError> {
        if self.context.is_null() {
            Err(DriverError::NotOpen)
        } else {
            Ok(self.context)
        }
    }

    fn read_list(
        &self,
        detect: unsafe extern "C" fn(FliContext, *mut c_char, c_int),
    ) -> Result<Vec<String>, DriverError> {
        let context = self.context()?;
        let mut text = vec![0 as c_char; LIST_CAPACITY];
        // SAFETY: the SDK writes at most `size` bytes; the last byte stays NUL.
        let list = unsafe {
            detect(context, text.as_mut_ptr(), (LIST_CAPACITY - 1) as c_int);
            CStr::from_ptr(text.as_ptr())
        };
        Ok(split_names(&list.to_string_lossy()))
    }

    fn check(operation: &'static str, ok: bool) -> Result<(), DriverError> {
        if ok {
            Ok(())
        } else {
            Err(DriverError::sdk(operation, "SDK returned false"))
        }
    }
}

impl Default for FliSdkDriver {
    fn default() -> Self {
        Self::new()
    }
}

fn cropping_data(crop: CropRegion) -> Option<CroppingData> {
    Some(CroppingData {
        col1: u16::try_from(crop.col1).ok()?,
        col2: u16::try_from(crop.col2).ok()?,
        row1: u16::try_from(crop.row1).ok()?,
        row2: u16::try_from(crop.row2).ok()?,
    })
}

fn split_names(list: &str) -> Vec<String> {
    list.split(';')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Lists grabbers, then the cameras behind them. Returns the first grabber
/// with the camera list.
fn detect_in_order(
    grabbers: impl FnOnce() -> Result<Vec<String>, DriverError>,
    cameras: impl FnOnce() -> Result<Vec<String>, DriverError>,
) -> Result<(String, Vec<String>), DriverError> {
    let grabber = grabbers()?
        .into_iter()
        .next()
        .ok_or_else(|| DriverError::sdk("detectGrabbers", "no grabbers found"))?;
    Ok((grabber, cameras()?))
}

fn c_string(operation: &'static str, value: &str) -> Result<CString, DriverError> {
    CString::new(value).map_err(|e| DriverError::sdk(operation, e.to_string()))
}

impl DriverHandle for FliSdkDriver {
    fn open(&mut self) -> Result<(), DriverError> {
        if !self.context.is_null() {
            return Ok(());
        }
        // SAFETY: no preconditions.
        let context = unsafe { FliSdk_init_V2() };
        if context.is_null() {
            return Err(DriverError::sdk("init", "no SDK context"));
        }
        self.context = context;
        tracing::info!("FLI SDK opened");
        Ok(())
    }

    fn detect_cameras(&mut self) -> Result<Vec<String>, DriverError> {
        let (grabber, cameras) = detect_in_order(
            || self.read_list(FliSdk_detectGrabbers_V2),
            || self.read_list(FliSdk_detectCameras_V2),
        )?;
        tracing::debug!(grabber = %grabber, cameras = cameras.len(), "Detected cameras");
        self.grabber = Some(grabber);
        Ok(cameras)
    }

    fn select_camera(&mut self, id: &str) -> Result<(), DriverError> {
        let context = self.context()?;
        let grabber = self
            .grabber
            .as_deref()
            .ok_or_else(|| DriverError::sdk("setGrabber", "cameras not detected"))?;
        tracing::debug!(grabber = %grabber, camera = %id, "Selecting grabber and camera");

        let grabber = c_string("setGrabber", grabber)?;
        let camera = c_string("setCamera", id)?;
        // SAFETY: both strings are NUL-terminated and outlive the calls.
        unsafe {
            Self::check("setGrabber", FliSdk_setGrabber_V2(context, grabber.as_ptr()))?;
            Self::check("setCamera", FliSdk_setCamera_V2(context, camera.as_ptr()))
        }
    }

    fn set_mode(&mut self, mode: CameraMode) -> Result<(), DriverError> {
        let context = self.context()?;
        let mode = match mode {
            CameraMode::Full => MODE_FULL,
        };
        // SAFETY: `context` is a live session.
        unsafe {
            FliSdk_setMode_V2(context, mode);
            Self::check("update", FliSdk_update_V2(context))
        }
    }

    fn is_crop_valid(&mut self, crop: CropRegion) -> bool {
        match (self.context(), cropping_data(crop)) {
            // SAFETY: `context` is a live session.
            (Ok(context), Some(data)) => unsafe { FliSdk_isCroppingDataValid_V2(context, data) },
            _ => false,
        }
    }

    fn set_crop(&mut self, crop: CropRegion) -> Result<(), DriverError> {
        let context = self.context()?;
        let data = cropping_data(crop)
            .ok_or_else(|| DriverError::sdk("setCroppingState", format!("{crop:?} out of range")))?;
        // SAFETY: `context` is a live session.
        Self::check("setCroppingState", unsafe {
            FliSdk_setCroppingState_V2(context, true, data)
        })
    }

    fn set_unsigned_pixels(&mut self, unsigned: bool) -> Result<(), DriverError> {
        let context = self.context()?;
        // SAFETY: `context` is a live session.
        unsafe { FliSdk_setUnsignedPixel_V2(context, unsigned) };
        Ok(())
    }

    fn enable_ring_buffer(&mut self, enabled: bool) -> Result<(), DriverError> {
        let context = self.context()?;
        // SAFETY: `context` is a live session.
        unsafe { FliSdk_enableRingBuffer_V2(context, enabled) };
        Ok(())
    }

    fn set_buffer_depth(&mut self, images: u32) -> Result<(), DriverError> {
        let context = self.context()?;
        // SAFETY: `context` is a live session.
        unsafe { FliSdk_setBufferSizeInImages_V2(context, u64::from(images)) };
        Ok(())
    }

    fn set_images_per_buffer(&mut self, images: u32) -> Result<(), DriverError> {
        let context = self.context()?;
        let images = c_int::try_from(images)
            .map_err(|e| DriverError::sdk("setNbImagesPerBuffer", e.to_string()))?;
        // SAFETY: `context` is a live session.
        unsafe { FliSdk_setNbImagesPerBuffer_V2(context, images) };
        Ok(())
    }

    fn frame_dimensions(&self) -> (u32, u32) {
        let Ok(context) = self.context() else {
            return (0, 0);
        };
        let (mut width, mut height) = (0u16, 0u16);
        // SAFETY: both out-pointers are valid for the call.
        unsafe { FliSdk_getCurrentImageDimension_V2(context, &mut width, &mut height) };
        (u32::from(width), u32::from(height))
    }

    fn frame_byte_size(&self) -> usize {
        let (width, height) = self.frame_dimensions();
        let bpp = self.pixel_format().bytes_per_pixel().unwrap_or(2);
        width as usize * height as usize * bpp
    }

    fn pixel_format(&self) -> PixelFormat {
        match self.context() {
            // SAFETY: `context` is a live session.
            Ok(context) if unsafe { FliSdk_isMono8Pixel_V2(context) } => PixelFormat::Mono8,
            _ => PixelFormat::Mono16,
        }
    }

    unsafe fn register_frame_callback(
        &mut self,
        callback: FrameCallback,
        context: *mut c_void,
    ) -> Result<(), DriverError> {
        let session = self.context()?;
        if self.callback.is_some() {
            return Err(DriverError::sdk("addCallbackNewImage", "already registered"));
        }
        // SAFETY: the caller keeps `context` valid until unregistered.
        let handler = unsafe { FliSdk_addCallbackNewImage_V2(session, callback, 0, true, context) };
        if handler.is_null() {
            return Err(DriverError::sdk("addCallbackNewImage", "no handler returned"));
        }
        self.callback = Some(handler);
        Ok(())
    }

    fn unregister_frame_callback(&mut self) -> Result<(), DriverError> {
        let context = self.context()?;
        if let Some(handler) = self.callback.take() {
            // SAFETY: `handler` was returned by addCallbackNewImage on this session.
            unsafe { FliSdk_removeCallbackNewImage_V2(context, handler) };
        }
        Ok(())
    }

    fn start(&mut self) -> Result<(), DriverError> {
        let context = self.context()?;
        // SAFETY: `context` is a live session.
        Self::check("start", unsafe { FliSdk_start_V2(context) })
    }

    fn stop(&mut self) -> Result<(), DriverError> {
        let context = self.context()?;
        // SAFETY: `context` is a live session.
        Self::check("stop", unsafe { FliSdk_stop_V2(context) })
    }

    fn shutdown(&mut self) {
        if self.context.is_null() {
            return;
        }
        // SAFETY: `context` came from init and is released exactly once.
        unsafe { FliSdk_exit_V2(self.context) };
        self.context = std::ptr::null_mut();
        self.callback = None;
        self.grabber = None;
        tracing::info!("FLI SDK closed");
    }
}

impl Drop for FliSdkDriver {
    fn drop(&mut self) {
        self.shutdown();
    }
}
