//! Camera configuration, SDK drivers and the lifecycle controller.

mod config;
mod controller;
mod driver;
#[cfg(feature = "flisdk")]
mod flisdk;
mod simulated;

pub use config::{
    CameraConfig, ConfigError, FileConfig, PublisherConfig, RingBufferConfig, SimulationConfig,
    TransportConfig,
};
pub use controller::{select_camera, CameraController, CameraError, ControllerState};
pub use driver::{CameraMode, CropRegion, DriverError, DriverHandle, FrameCallback};
#[cfg(feature = "flisdk")]
pub use flisdk::FliSdkDriver;
pub use simulated::{SdkCall, SimulatedDriver};
