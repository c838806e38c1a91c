//! Cam-Capture: camera capture layer for a motion-detection daemon
//!
//! Frames come from either a kernel video node (synchronous polling driver)
//! or a camera-stack service (asynchronous completion driver) and are always
//! delivered as planar YUV 4:2:0. Devices are shared between consumers in
//! round-robin turns, and a watchdog brings lost devices back with tiered
//! backoff.

pub mod buffers;
pub mod camera;
pub mod config;
pub mod controls;
pub mod convert;
pub mod error;
pub mod libcam;
pub mod negotiate;
pub mod palette;
pub mod polling;
pub mod registry;
pub mod signals;
pub mod traits;
pub mod v4l2;
pub mod validation;
pub mod watchdog;

#[cfg(test)]
pub mod mock;

pub use camera::CameraSource;
pub use config::{AutoBrightness, Backend, CaptureConfig};
pub use error::{CaptureError, Result};
pub use libcam::CompletionDriver;
#[cfg(feature = "libcamera")]
pub use libcam::LibcameraService;
pub use polling::PollingDriver;
pub use registry::{DeviceHandle, DeviceRegistry};
pub use traits::{
    CameraService, CaptureDriver, CaptureStatus, DeviceCapabilities, Format, FourCC, FrameMetadata, Geometry,
    VideoNode,
};
pub use v4l2::V4l2Node;
pub use watchdog::{ReconnectPolicy, Watchdog};
