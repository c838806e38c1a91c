//! Kernel video node implementation using the v4l crate.
//!
//! Format, parameter and control calls go through the v4l safe API. The
//! buffer lifecycle uses raw ioctls so that queue and dequeue stay under the
//! driver's control instead of v4l's own stream type.
#![allow(unsafe_code)]

use std::io;
use std::mem;
use std::os::raw::{c_int, c_void};
use std::path::Path;
use std::ptr::{self, NonNull};
use std::slice;
use std::time::Duration;

use log::debug;
use v4l::buffer::Type;
use v4l::control::{self, Control};
use v4l::memory::Memory;
use v4l::v4l2::{self as sys, vidioc};
use v4l::v4l_sys::{v4l2_buffer, v4l2_format, v4l2_requestbuffers};
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::Device;

use crate::error::{CaptureError, Result};
use crate::traits::{
    ControlInfo, ControlKind, DeviceCapabilities, Format, FourCC, FrameMetadata, VideoNode,
};

const CAPTURE: u32 = Type::VideoCapture as u32;
const MMAP: u32 = Memory::Mmap as u32;

/// A buffer mapped from the driver; unmapped on drop.
pub struct MappedRegion {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the region is plain shared memory owned by this value alone.
unsafe impl Send for MappedRegion {}

impl AsRef<[u8]> for MappedRegion {
    fn as_ref(&self) -> &[u8] {
        // SAFETY: ptr/len describe a live mapping for the lifetime of self.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        // SAFETY: the region was returned by mmap with this length.
        if let Err(err) = unsafe { sys::munmap(self.ptr.as_ptr().cast::<c_void>(), self.len) } {
            debug!("munmap failed: {err}");
        }
    }
}

/// Kernel capture node opened by path.
pub struct V4l2Node {
    device: Device,
    capabilities: DeviceCapabilities,
}

impl V4l2Node {
    /// Open the node at `path` and check it can stream video.
    pub fn open(path: &Path) -> Result<Self> {
        let device = Device::with_path(path)
            .map_err(|err| CaptureError::InvalidDevice(format!("{}: {err}", path.display())))?;

        let caps = device.query_caps()?;
        let capabilities = DeviceCapabilities {
            driver: caps.driver,
            card: caps.card,
            bus_info: caps.bus,
            can_capture: caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE),
            can_stream: caps.capabilities.contains(v4l::capability::Flags::STREAMING),
        };
        if !capabilities.can_capture || !capabilities.can_stream {
            return Err(CaptureError::InvalidDevice(format!(
                "{} cannot stream video capture",
                path.display()
            )));
        }

        Ok(Self {
            device,
            capabilities,
        })
    }

    fn fd(&self) -> c_int {
        self.device.handle().fd()
    }

    fn ioctl<T>(&self, request: vidioc::_IOC_TYPE, arg: &mut T) -> io::Result<()> {
        // SAFETY: arg is a valid, exclusively borrowed argument struct of the
        // type the request expects.
        unsafe { sys::ioctl(self.fd(), request, ptr::from_mut(arg).cast::<c_void>()) }
    }

    fn buffer(index: u32) -> v4l2_buffer {
        // SAFETY: v4l2_buffer is plain data; all-zero is a valid value.
        let mut buf: v4l2_buffer = unsafe { mem::zeroed() };
        buf.index = index;
        buf.type_ = CAPTURE;
        buf.memory = MMAP;
        buf
    }

    fn wait_readable(&self) -> io::Result<()> {
        let mut pollfd = libc::pollfd {
            fd: self.fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        // SAFETY: pollfd is a single valid entry.
        match unsafe { libc::poll(&mut pollfd, 1, -1) } {
            -1 => Err(io::Error::last_os_error()),
            _ => Ok(()),
        }
    }
}

fn format_from_v4l(fmt: &v4l::Format) -> Format {
    Format {
        width: fmt.width,
        height: fmt.height,
        fourcc: FourCC::from(fmt.fourcc),
        stride: fmt.stride,
        size: fmt.size,
    }
}

fn control_kind(description: &control::Description) -> ControlKind {
    let unusable = control::Flags::DISABLED | control::Flags::READ_ONLY;
    if description.flags.intersects(unusable) {
        return ControlKind::Other;
    }
    match description.typ {
        control::Type::Integer => ControlKind::Integer,
        control::Type::Boolean => ControlKind::Boolean,
        control::Type::Menu | control::Type::IntegerMenu => ControlKind::Menu,
        _ => ControlKind::Other,
    }
}

impl VideoNode for V4l2Node {
    type Mapping = MappedRegion;

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn enum_formats(&self) -> Result<Vec<FourCC>> {
        Ok(self
            .device
            .enum_formats()?
            .into_iter()
            .map(|description| FourCC::from(description.fourcc))
            .collect())
    }

    fn try_format(&mut self, format: &Format) -> Result<Format> {
        // SAFETY: v4l2_format is plain data; all-zero is a valid value.
        let mut raw: v4l2_format = unsafe { mem::zeroed() };
        raw.type_ = CAPTURE;
        // SAFETY: `pix` is the active union member for capture formats.
        unsafe {
            raw.fmt.pix.width = format.width;
            raw.fmt.pix.height = format.height;
            raw.fmt.pix.pixelformat = format.fourcc.to_u32();
        }
        self.ioctl(vidioc::VIDIOC_TRY_FMT, &mut raw)?;
        // SAFETY: as above, the driver filled `pix`.
        let pix = unsafe { raw.fmt.pix };
        Ok(Format {
            width: pix.width,
            height: pix.height,
            fourcc: FourCC::from_u32(pix.pixelformat),
            stride: pix.bytesperline,
            size: pix.sizeimage,
        })
    }

    fn set_format(&mut self, format: &Format) -> Result<Format> {
        let mut fmt = self.device.format()?;
        fmt.width = format.width;
        fmt.height = format.height;
        fmt.fourcc = format.fourcc.into();
        let fmt = self.device.set_format(&fmt)?;
        Ok(format_from_v4l(&fmt))
    }

    fn set_frame_rate(&mut self, fps: u32) -> Result<u32> {
        let params = self.device.set_params(&Parameters::with_fps(fps))?;
        let interval = params.interval;
        Ok(if interval.numerator == 0 {
            fps
        } else {
            interval.denominator / interval.numerator
        })
    }

    fn select_input(&mut self, index: u32) -> Result<()> {
        let mut input = c_int::try_from(index)
            .map_err(|_| CaptureError::Config(format!("input {index} out of range")))?;
        self.ioctl(vidioc::VIDIOC_S_INPUT, &mut input)?;
        Ok(())
    }

    fn query_controls(&self) -> Result<Vec<ControlInfo>> {
        let descriptions = self.device.query_controls()?;
        Ok(descriptions
            .into_iter()
            .map(|description| {
                let kind = control_kind(&description);
                let current = match kind {
                    ControlKind::Other => description.default,
                    _ => match self.device.control(description.id).map(|c| c.value) {
                        Ok(control::Value::Integer(value)) => value,
                        Ok(control::Value::Boolean(value)) => i64::from(value),
                        _ => description.default,
                    },
                };
                ControlInfo {
                    id: description.id,
                    name: description.name,
                    kind,
                    minimum: description.minimum,
                    maximum: description.maximum,
                    default: description.default,
                    current,
                }
            })
            .collect())
    }

    fn set_control(&mut self, id: u32, value: i64) -> Result<()> {
        self.device.set_control(Control {
            id,
            value: control::Value::Integer(value),
        })?;
        Ok(())
    }

    fn request_buffers(&mut self, count: u32) -> Result<u32> {
        // SAFETY: plain data; all-zero is a valid value.
        let mut request: v4l2_requestbuffers = unsafe { mem::zeroed() };
        request.count = count;
        request.type_ = CAPTURE;
        request.memory = MMAP;
        self.ioctl(vidioc::VIDIOC_REQBUFS, &mut request)?;
        Ok(request.count)
    }

    fn map_buffer(&mut self, index: u32) -> Result<MappedRegion> {
        let mut buf = Self::buffer(index);
        self.ioctl(vidioc::VIDIOC_QUERYBUF, &mut buf)?;
        let len = buf.length as usize;
        // SAFETY: `offset` is the active member for MMAP buffers.
        let offset = unsafe { buf.m.offset };
        let offset = libc::off_t::try_from(offset)
            .map_err(|_| CaptureError::Device(format!("buffer {index} offset out of range")))?;

        // SAFETY: maps a driver buffer described by QUERYBUF; the result is
        // checked before use.
        let ptr = unsafe {
            sys::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.fd(),
                offset,
            )
        }?;
        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| CaptureError::Device(format!("buffer {index} mapped at null")))?;
        Ok(MappedRegion { ptr, len })
    }

    fn release_buffers(&mut self) -> Result<()> {
        self.request_buffers(0).map(|_| ())
    }

    fn queue_buffer(&mut self, index: u32) -> Result<()> {
        let mut buf = Self::buffer(index);
        self.ioctl(vidioc::VIDIOC_QBUF, &mut buf)?;
        Ok(())
    }

    fn dequeue_buffer(&mut self) -> Result<FrameMetadata> {
        self.wait_readable().map_err(|err| match err.kind() {
            io::ErrorKind::Interrupted => CaptureError::NotReady,
            _ => CaptureError::Io(err),
        })?;
        let mut buf = Self::buffer(0);
        self.ioctl(vidioc::VIDIOC_DQBUF, &mut buf)?;

        let secs = u64::try_from(buf.timestamp.tv_sec).unwrap_or(0);
        let nanos = u32::try_from(buf.timestamp.tv_usec)
            .unwrap_or(0)
            .saturating_mul(1000);
        Ok(FrameMetadata {
            index: buf.index,
            sequence: buf.sequence,
            timestamp: Duration::new(secs, nanos.min(999_999_999)),
            bytes_used: buf.bytesused,
        })
    }

    fn stream_on(&mut self) -> Result<()> {
        let mut typ = c_int::try_from(CAPTURE).unwrap_or_default();
        self.ioctl(vidioc::VIDIOC_STREAMON, &mut typ)?;
        Ok(())
    }

    fn stream_off(&mut self) -> Result<()> {
        let mut typ = c_int::try_from(CAPTURE).unwrap_or_default();
        self.ioctl(vidioc::VIDIOC_STREAMOFF, &mut typ)?;
        Ok(())
    }
}
