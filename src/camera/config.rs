//! Camera and pipeline configuration.
//!
//! Configuration is read once at startup and never changes afterwards.
//! An ROI that falls outside the sensor is a configuration error: the
//! pipeline refuses to start rather than run misconfigured.

use super::driver::CropRegion;
use crate::header::ByteOrder;
use crate::publish::DEFAULT_PUBLISH_DEADLINE;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Ring buffer settings applied to the driver.
///
/// The depth is sized first, then the ring buffer is normally disabled
/// so the driver delivers exactly one image per buffer. Leaving it
/// enabled with more than one slot would let callbacks overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingBufferConfig {
    /// Number of images the ring buffer is sized for.
    pub depth: u32,
    /// Keep the ring buffer enabled after sizing it.
    pub enabled: bool,
}

impl Default for RingBufferConfig {
    fn default() -> Self {
        Self {
            depth: 4,
            enabled: false,
        }
    }
}

impl RingBufferConfig {
    /// Slots the driver actually cycles through.
    pub fn effective_depth(&self) -> u32 {
        if self.enabled {
            self.depth
        } else {
            1
        }
    }
}

/// Configuration for the camera.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// ROI width in pixels.
    pub width: u32,
    /// ROI height in pixels.
    pub height: u32,
    /// ROI origin column.
    pub offset_x: u32,
    /// ROI origin row.
    pub offset_y: u32,
    /// Substring matched against enumerated camera identifiers.
    pub serial_number: String,
    /// Sensor width in pixels.
    pub sensor_width: u32,
    /// Sensor height in pixels.
    pub sensor_height: u32,
    /// Deliver pixels as unsigned values.
    pub unsigned_pixels: bool,
    /// Ring buffer sizing.
    pub ring_buffer: RingBufferConfig,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 512,
            offset_x: 0,
            offset_y: 0,
            serial_number: String::new(),
            sensor_width: 640,
            sensor_height: 512,
            unsigned_pixels: true,
            ring_buffer: RingBufferConfig::default(),
        }
    }
}

impl CameraConfig {
    /// Creates a configuration with the given ROI size at the origin.
    pub fn with_dimensions(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }

    /// The inclusive sensor crop this ROI describes.
    pub fn crop_region(&self) -> CropRegion {
        CropRegion {
            col1: self.offset_x,
            col2: self.offset_x.saturating_add(self.width).saturating_sub(1),
            row1: self.offset_y,
            row2: self.offset_y.saturating_add(self.height).saturating_sub(1),
        }
    }

    /// Validates the configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::InvalidDimensions);
        }

        let x_end = self.offset_x.checked_add(self.width);
        let y_end = self.offset_y.checked_add(self.height);
        let inside = matches!(
            (x_end, y_end),
            (Some(x), Some(y)) if x <= self.sensor_width && y <= self.sensor_height
        );
        if !inside {
            return Err(ConfigError::InvalidRoi {
                offset_x: self.offset_x,
                offset_y: self.offset_y,
                width: self.width,
                height: self.height,
                sensor_width: self.sensor_width,
                sensor_height: self.sensor_height,
            });
        }

        if self.ring_buffer.depth == 0 {
            return Err(ConfigError::InvalidRingBufferDepth);
        }
        if self.ring_buffer.enabled && self.ring_buffer.depth > 1 {
            return Err(ConfigError::RingBufferOverlap(self.ring_buffer.depth));
        }

        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Width or height is zero.
    #[error("invalid frame dimensions")]
    InvalidDimensions,
    /// The ROI extends past the sensor.
    #[error(
        "ROI {width}x{height} at ({offset_x}, {offset_y}) exceeds sensor {sensor_width}x{sensor_height}"
    )]
    InvalidRoi {
        /// ROI origin column.
        offset_x: u32,
        /// ROI origin row.
        offset_y: u32,
        /// ROI width.
        width: u32,
        /// ROI height.
        height: u32,
        /// Sensor width.
        sensor_width: u32,
        /// Sensor height.
        sensor_height: u32,
    },
    /// Ring buffer depth is zero.
    #[error("ring buffer depth must be at least 1")]
    InvalidRingBufferDepth,
    /// Ring buffer left enabled with room for overlapping frames.
    #[error("ring buffer enabled with depth {0}; overlapping callbacks would share one header")]
    RingBufferOverlap(u32),
    /// The config file could not be read.
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    /// The config file is not valid TOML for this schema.
    #[error("failed to parse config file: {0}")]
    ParseError(String),
}

/// Transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Destination channel URI.
    pub endpoint: String,
    /// Logical stream within the channel.
    pub stream_id: i32,
    /// Byte order of the frame header.
    pub byte_order: ByteOrder,
    /// Undelivered messages held by the in-process publication.
    pub queue_depth: usize,
    /// Media driver directory for Aeron endpoints. Client default when unset.
    pub aeron_dir: Option<String>,
    /// How long to wait for an Aeron publication to register, in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: "aeron:ipc".to_string(),
            stream_id: 1001,
            byte_order: ByteOrder::Little,
            queue_depth: 8,
            aeron_dir: None,
            connect_timeout_ms: 10_000,
        }
    }
}

impl TransportConfig {
    /// True when `endpoint` names an Aeron channel.
    pub fn is_aeron(&self) -> bool {
        self.endpoint.starts_with("aeron:")
    }

    /// The registration timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Publish loop settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Time budget per frame, in microseconds.
    pub deadline_us: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            deadline_us: DEFAULT_PUBLISH_DEADLINE.as_micros() as u64,
        }
    }
}

impl PublisherConfig {
    /// The deadline as a [`Duration`].
    pub fn deadline(&self) -> Duration {
        Duration::from_micros(self.deadline_us)
    }
}

/// Settings for the simulated driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Frames per second produced after start.
    pub frame_rate: f64,
    /// Camera identifiers the simulated SDK enumerates.
    pub cameras: Vec<String>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            frame_rate: 100.0,
            cameras: vec!["01-00001bb0cef0-simulated".to_string()],
        }
    }
}

/// Full configuration file format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FileConfig {
    /// `[camera]`
    #[serde(default)]
    pub camera: CameraConfig,
    /// `[transport]`
    #[serde(default)]
    pub transport: TransportConfig,
    /// `[publisher]`
    #[serde(default)]
    pub publisher: PublisherConfig,
    /// `[simulation]`
    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl FileConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: FileConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.camera.validate()?;
        Ok(config)
    }
}
