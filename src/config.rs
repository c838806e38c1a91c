//! Capture configuration.
//!
//! Loading is done by the caller; this module only defines the shape and
//! defaults so a deserializer can fill it.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::buffers::MIN_BUFFERS;
use crate::controls::{parse_params, Param};
use crate::traits::Selection;
use crate::watchdog::ReconnectPolicy;

/// Which backend drives the camera.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backend {
    /// Kernel video node, e.g. `/dev/video0`.
    V4l2 {
        /// Filesystem path of the node.
        device: PathBuf,
    },
    /// Camera-stack slot, e.g. `camera0`.
    Libcamera {
        /// Logical camera slot identifier.
        device: String,
    },
}

impl Backend {
    /// Identifier used as the registry key.
    pub fn key(&self) -> String {
        match self {
            Self::V4l2 { device } => device.display().to_string(),
            Self::Libcamera { device } => device.clone(),
        }
    }
}

impl Default for Backend {
    fn default() -> Self {
        Self::V4l2 {
            device: PathBuf::from("/dev/video0"),
        }
    }
}

/// Auto-brightness feedback target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoBrightness {
    /// No feedback.
    #[default]
    Off,
    /// Drive the brightness control.
    Brightness,
    /// Drive the exposure control.
    Exposure,
    /// Drive the absolute exposure control.
    ExposureAbsolute,
}

/// Settings for one logical camera.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Backend and device identifier.
    pub backend: Backend,
    /// Requested width; rounded up to a multiple of 8.
    pub width: u32,
    /// Requested height; rounded up to a multiple of 8.
    pub height: u32,
    /// Requested frames per second.
    pub framerate: u32,
    /// Preferred palette index into the pixel-format table.
    pub palette: usize,
    /// Video input to select, if the device has several.
    pub input: Option<u32>,
    /// Buffers requested from the backend.
    pub buffer_count: u32,
    /// Smallest pool that still allows double-buffering; raised to 2 on load.
    #[serde(deserialize_with = "pool_minimum")]
    pub min_buffers: u32,
    /// Control directives, `name=value` separated by commas.
    pub params: String,
    /// Auto-brightness feedback target.
    pub auto_brightness: AutoBrightness,
    /// Frames a consumer captures per turn on a shared device.
    pub roundrobin_frames: u32,
    /// Frames skipped after a consumer switches input.
    pub roundrobin_skip: u32,
    /// Watchdog ticks without a frame before the device counts as lost.
    pub watchdog_timeout: u32,
    /// Completion-queue polls per capture call.
    pub poll_attempts: u32,
    /// Sleep between completion-queue polls.
    #[serde(with = "millis")]
    pub poll_interval: Duration,
    /// Reconnect backoff tiers.
    pub reconnect: ReconnectPolicy,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            width: 640,
            height: 480,
            framerate: 15,
            palette: crate::palette::DEFAULT_PALETTE,
            input: None,
            buffer_count: 4,
            min_buffers: 2,
            params: String::new(),
            auto_brightness: AutoBrightness::Off,
            roundrobin_frames: 1,
            roundrobin_skip: 1,
            watchdog_timeout: 30,
            poll_attempts: 50,
            poll_interval: Duration::from_millis(2),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl CaptureConfig {
    /// Parsed control directives.
    pub fn control_params(&self) -> Vec<Param> {
        parse_params(&self.params)
    }

    /// Settings this consumer applies whenever it takes a device turn.
    pub fn selection(&self) -> Selection {
        Selection {
            input: self.input,
            params: self.control_params(),
            auto_brightness: self.auto_brightness,
        }
    }
}

fn pool_minimum<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    u32::deserialize(deserializer).map(|minimum| minimum.max(MIN_BUFFERS))
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
