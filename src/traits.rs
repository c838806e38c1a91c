//! Core traits and types shared by both capture backends.

use std::fmt;
use std::time::Duration;

use crate::controls::LibcamControl;
use crate::error::Result;

/// Pixel format representation (e.g., YUYV, MJPG, YU12).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// Little-endian numeric code as used by kernel and camera-stack headers.
    #[must_use]
    pub const fn to_u32(self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    /// Build from a little-endian numeric code.
    #[must_use]
    pub const fn from_u32(code: u32) -> Self {
        Self(code.to_le_bytes())
    }

    /// Planar YUV 4:2:0, the normalized output encoding.
    pub const YU12: Self = Self::new(b"YU12");
    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");
    /// UYVY pixel format (4:2:2 packed).
    pub const UYVY: Self = Self::new(b"UYVY");
    /// Planar YUV 4:2:2.
    pub const YUV422P: Self = Self::new(b"422P");
    /// MJPEG pixel format (Motion JPEG).
    pub const MJPG: Self = Self::new(b"MJPG");
    /// Baseline JPEG.
    pub const JPEG: Self = Self::new(b"JPEG");
    /// Pixart JPEG variant.
    pub const PJPG: Self = Self::new(b"PJPG");
    /// RGB3 pixel format (24-bit RGB).
    pub const RGB3: Self = Self::new(b"RGB3");
    /// 8-bit greyscale.
    pub const GREY: Self = Self::new(b"GREY");
    /// 10-bit greyscale, little-endian in 16-bit words.
    pub const Y10: Self = Self::new(b"Y10 ");
    /// 12-bit greyscale, little-endian in 16-bit words.
    pub const Y12: Self = Self::new(b"Y12 ");
    /// 8-bit Bayer BGGR.
    pub const SBGGR8: Self = Self::new(b"BA81");
    /// 8-bit Bayer GBRG.
    pub const SGBRG8: Self = Self::new(b"GBRG");
    /// 8-bit Bayer GRBG.
    pub const SGRBG8: Self = Self::new(b"GRBG");
    /// 16-bit Bayer BGGR.
    pub const SBGGR16: Self = Self::new(b"BYR2");
    /// Sonix SN9C10x compressed Bayer.
    pub const SN9C10X: Self = Self::new(b"S910");
    /// Sunplus SPCA561 compressed Bayer.
    pub const SPCA561: Self = Self::new(b"S561");
    /// Pixart PAC207 compressed Bayer.
    pub const PAC207: Self = Self::new(b"P207");
    /// Sunplus SPCA501 YUYV variant.
    pub const SPCA501: Self = Self::new(b"S501");
    /// Sunplus SPCA505 YYUV variant.
    pub const SPCA505: Self = Self::new(b"S505");
    /// Sunplus SPCA508 YUVY variant.
    pub const SPCA508: Self = Self::new(b"S508");
    /// H.264 elementary stream.
    pub const H264: Self = Self::new(b"H264");
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            let ch = if byte.is_ascii_graphic() || byte == b' ' {
                char::from(byte)
            } else {
                '.'
            };
            write!(f, "{ch}")?;
        }
        Ok(())
    }
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

/// Video format specification exchanged with a kernel node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub fourcc: FourCC,
    /// Bytes per line (stride), filled in by the driver.
    pub stride: u32,
    /// Total frame size in bytes, filled in by the driver.
    pub size: u32,
}

impl Format {
    /// Create a format request; stride and size are left for the driver.
    #[must_use]
    pub const fn new(width: u32, height: u32, fourcc: FourCC) -> Self {
        Self {
            width,
            height,
            fourcc,
            stride: 0,
            size: 0,
        }
    }
}

/// Negotiated image geometry shared with the rest of the application.
///
/// Consumers must re-read it after every (re)configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Geometry {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
}

impl Geometry {
    /// Geometry for a `width` x `height` frame.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Size of a normalized planar 4:2:0 frame.
    #[must_use]
    pub const fn size_norm(&self) -> usize {
        self.motion_size() * 3 / 2
    }

    /// Size of the luma plane used by motion detection.
    #[must_use]
    pub const fn motion_size(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Device capability flags.
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Whether the device can capture video.
    pub can_capture: bool,
    /// Whether the device supports streaming.
    pub can_stream: bool,
}

/// Metadata for a buffer handed back by the kernel.
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    /// Index of the buffer in the pool.
    pub index: u32,
    /// Frame sequence number.
    pub sequence: u32,
    /// Capture timestamp.
    pub timestamp: Duration,
    /// Actual bytes used in the frame buffer.
    pub bytes_used: u32,
}

/// Kind of a kernel control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    /// Signed integer with a range.
    Integer,
    /// On/off switch.
    Boolean,
    /// Enumerated menu indexed by integer.
    Menu,
    /// Anything this layer does not write (buttons, strings, classes).
    Other,
}

/// A control as enumerated from the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlInfo {
    /// Kernel control identifier.
    pub id: u32,
    /// Human-readable name.
    pub name: String,
    /// Control type.
    pub kind: ControlKind,
    /// Lowest legal value.
    pub minimum: i64,
    /// Highest legal value.
    pub maximum: i64,
    /// Default value.
    pub default: i64,
    /// Value currently set on the device.
    pub current: i64,
}

/// Result of one capture call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStatus {
    /// The output buffer holds a full normalized frame.
    Success,
    /// No frame was ready; retry on the next tick.
    RetryableMiss,
    /// The driver failed; the device should be treated as lost.
    Fatal,
}

/// Per-consumer settings applied whenever a consumer takes a device turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    /// Input index to select, if any.
    pub input: Option<u32>,
    /// Control directives as `(name, value)` pairs.
    pub params: Vec<crate::controls::Param>,
    /// Auto-brightness feedback target.
    pub auto_brightness: crate::config::AutoBrightness,
}

/// One capture backend behind the frame-acquisition contract.
pub trait CaptureDriver {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Acquire the native handle.
    fn open(&mut self) -> Result<()>;

    /// Negotiate the format, set up buffers and start streaming.
    ///
    /// Returns the negotiated geometry.
    fn configure(&mut self) -> Result<Geometry>;

    /// Copy one normalized frame into `dst`.
    fn capture(&mut self, dst: &mut [u8]) -> CaptureStatus;

    /// Stop streaming and release every resource. Safe to call in any state.
    fn stop(&mut self);

    /// Geometry from the last successful configure.
    fn geometry(&self) -> Geometry;

    /// Number of buffers in flight while streaming.
    fn buffer_count(&self) -> u32;

    /// Apply a consumer's settings before it captures.
    ///
    /// Returns `true` when the input changed and stale frames must be flushed.
    fn select(&mut self, selection: &Selection) -> Result<bool> {
        let _ = selection;
        Ok(false)
    }
}

/// Abstraction over a kernel video capture node.
pub trait VideoNode: Send {
    /// A mapped buffer; unmapped on drop.
    type Mapping: AsRef<[u8]> + Send;

    /// Get device capabilities.
    fn capabilities(&self) -> &DeviceCapabilities;

    /// Pixel formats the device offers for capture.
    fn enum_formats(&self) -> Result<Vec<FourCC>>;

    /// Ask the driver what it would do with `format` without applying it.
    fn try_format(&mut self, format: &Format) -> Result<Format>;

    /// Set capture format. Returns the actual format set by the driver.
    fn set_format(&mut self, format: &Format) -> Result<Format>;

    /// Request a frame rate. Returns the rate granted.
    fn set_frame_rate(&mut self, fps: u32) -> Result<u32>;

    /// Select a video input.
    fn select_input(&mut self, index: u32) -> Result<()>;

    /// Enumerate controls with their current values.
    fn query_controls(&self) -> Result<Vec<ControlInfo>>;

    /// Write one control value.
    fn set_control(&mut self, id: u32, value: i64) -> Result<()>;

    /// Request `count` memory-mapped buffers. Returns the number granted.
    fn request_buffers(&mut self, count: u32) -> Result<u32>;

    /// Map buffer `index` read/write into the process.
    fn map_buffer(&mut self, index: u32) -> Result<Self::Mapping>;

    /// Free the driver-side buffer allocation.
    fn release_buffers(&mut self) -> Result<()>;

    /// Hand buffer `index` to the driver.
    fn queue_buffer(&mut self, index: u32) -> Result<()>;

    /// Block until the driver hands back a filled buffer.
    fn dequeue_buffer(&mut self) -> Result<FrameMetadata>;

    /// Start the hardware stream.
    fn stream_on(&mut self) -> Result<()>;

    /// Stop the hardware stream; every queued buffer returns to the application.
    fn stream_off(&mut self) -> Result<()>;
}

/// Outcome of validating a stream configuration with the camera stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigStatus {
    /// Accepted as requested.
    Valid,
    /// Accepted after the stack changed some fields.
    Adjusted,
    /// Rejected.
    Invalid,
}

/// Single-stream configuration requested from the camera stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    /// Requested width.
    pub width: u32,
    /// Requested height.
    pub height: u32,
    /// Requested pixel format.
    pub fourcc: FourCC,
    /// Number of buffers (and in-flight requests).
    pub buffer_count: u32,
}

/// Stream configuration after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Validation outcome.
    pub status: ConfigStatus,
    /// Granted width.
    pub width: u32,
    /// Granted height.
    pub height: u32,
    /// Granted pixel format.
    pub fourcc: FourCC,
    /// Bytes per line of the first plane.
    pub stride: u32,
}

/// Callback invoked by the camera stack's dispatcher with a finished request.
pub type CompletionHandler<R> = Box<dyn Fn(R) + Send + Sync + 'static>;

/// Abstraction over an asynchronous camera-stack service.
///
/// Methods are called in start order: manager, acquire, configure,
/// allocate, requests, connect, start, then queue/recycle while streaming.
pub trait CameraService: Send {
    /// An in-flight capture request owning one buffer.
    type Request: Send + 'static;

    /// Start the manager and list camera identifiers.
    fn start_manager(&mut self) -> Result<Vec<String>>;

    /// Acquire the camera at `index` in the manager's list.
    fn acquire(&mut self, index: usize) -> Result<()>;

    /// Validate and apply a single-stream configuration.
    fn configure(&mut self, request: &StreamRequest) -> Result<StreamConfig>;

    /// Allocate and map one buffer per slot (read-only).
    ///
    /// Returns the first-plane length of every slot.
    fn allocate(&mut self) -> Result<Vec<usize>>;

    /// Build one request per allocated buffer.
    fn create_requests(&mut self) -> Result<Vec<Self::Request>>;

    /// Register the completion callback.
    fn connect(&mut self, handler: CompletionHandler<Self::Request>) -> Result<()>;

    /// Start streaming with initial controls.
    fn start(&mut self, controls: &[LibcamControl]) -> Result<()>;

    /// Submit a fresh request.
    fn queue(&mut self, request: Self::Request) -> Result<()>;

    /// Whether the stack completed `request` as cancelled.
    fn is_cancelled(request: &Self::Request) -> bool;

    /// Copy the mapped frame of `request` into `dst`. Returns bytes copied.
    fn read(&self, request: &Self::Request, dst: &mut [u8]) -> Result<usize>;

    /// Mark the request's buffers reusable and resubmit it.
    fn recycle(&mut self, request: Self::Request) -> Result<()>;

    /// Stop streaming; outstanding requests complete as cancelled.
    fn stop(&mut self) -> Result<()>;

    /// Drop the completion callback.
    fn disconnect(&mut self);

    /// Free requests and buffers.
    fn free(&mut self);

    /// Release the acquired camera.
    fn release(&mut self);

    /// Stop the manager.
    fn stop_manager(&mut self);
}
