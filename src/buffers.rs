//! Pool of driver buffers mapped into the process.
//!
//! Each buffer is owned either by the driver (queued for a hardware write)
//! or by the application (holding a completed frame). The pool refuses to
//! hand out a queued buffer and refuses to requeue one twice.

use std::time::Duration;

use log::{info, warn};

use crate::error::{CaptureError, Result};
use crate::traits::{FrameMetadata, Geometry, VideoNode};

/// Smallest pool that still allows double-buffering.
pub const MIN_BUFFERS: u32 = 2;

/// Which side currently owns a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferOwner {
    /// Queued to the driver; the application must not read it.
    Driver,
    /// Dequeued; the application may read it until it is requeued.
    Application,
}

impl BufferOwner {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Driver => "queued",
            Self::Application => "dequeued",
        }
    }
}

/// One mapped buffer with the bookkeeping of its last frame.
#[derive(Debug)]
pub struct Buffer<M> {
    mapping: M,
    owner: BufferOwner,
    bytes_used: usize,
    timestamp: Duration,
}

impl<M: AsRef<[u8]>> Buffer<M> {
    /// Total mapped size.
    pub fn len(&self) -> usize {
        self.mapping.as_ref().len()
    }

    /// Whether the mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current owner.
    pub const fn owner(&self) -> BufferOwner {
        self.owner
    }

    /// Bytes written by the driver for the most recent frame.
    pub const fn bytes_used(&self) -> usize {
        self.bytes_used
    }

    /// Capture timestamp of the most recent frame.
    pub const fn timestamp(&self) -> Duration {
        self.timestamp
    }
}

/// Mapped buffers of one streaming session.
///
/// Dropping the pool unmaps every buffer; [`BufferPool::release`] also
/// frees the driver-side allocation.
#[derive(Debug)]
pub struct BufferPool<M> {
    buffers: Vec<Buffer<M>>,
}

impl<M: AsRef<[u8]>> BufferPool<M> {
    /// Request `requested` buffers and map every one granted.
    ///
    /// Fails without mapping anything when fewer than `minimum` are granted.
    /// A `minimum` below [`MIN_BUFFERS`] is raised to it.
    pub fn allocate<N>(node: &mut N, requested: u32, minimum: u32) -> Result<Self>
    where
        N: VideoNode<Mapping = M>,
    {
        let minimum = minimum.max(MIN_BUFFERS);
        let granted = node.request_buffers(requested)?;
        if granted < minimum {
            if let Err(err) = node.release_buffers() {
                warn!("Releasing a short buffer grant failed: {err}");
            }
            return Err(CaptureError::InsufficientBuffers { granted, minimum });
        }
        info!("Using {granted} buffers (requested {requested})");

        let mut buffers = Vec::with_capacity(granted as usize);
        for index in 0..granted {
            match node.map_buffer(index) {
                Ok(mapping) => buffers.push(Buffer {
                    mapping,
                    owner: BufferOwner::Application,
                    bytes_used: 0,
                    timestamp: Duration::ZERO,
                }),
                Err(err) => {
                    drop(buffers);
                    if let Err(release_err) = node.release_buffers() {
                        warn!("Releasing buffers after a failed map failed: {release_err}");
                    }
                    return Err(err);
                }
            }
        }
        Ok(Self { buffers })
    }

    /// Number of buffers in the pool.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Buffer at `index`.
    pub fn get(&self, index: u32) -> Option<&Buffer<M>> {
        self.buffers.get(index as usize)
    }

    fn get_mut(&mut self, index: u32) -> Result<&mut Buffer<M>> {
        self.buffers
            .get_mut(index as usize)
            .ok_or_else(|| CaptureError::Device(format!("buffer index {index} outside the pool")))
    }

    /// Hand buffer `index` back to the driver.
    pub fn queue<N>(&mut self, node: &mut N, index: u32) -> Result<()>
    where
        N: VideoNode<Mapping = M>,
    {
        let buffer = self.get_mut(index)?;
        if buffer.owner != BufferOwner::Application {
            return Err(CaptureError::State {
                expected: BufferOwner::Application.as_str(),
                actual: buffer.owner.as_str(),
            });
        }
        node.queue_buffer(index)?;
        buffer.owner = BufferOwner::Driver;
        Ok(())
    }

    /// Queue every buffer the application holds.
    pub fn queue_all<N>(&mut self, node: &mut N) -> Result<()>
    where
        N: VideoNode<Mapping = M>,
    {
        for index in 0..self.buffers.len() {
            let index = u32::try_from(index)
                .map_err(|_| CaptureError::Device("buffer pool too large".to_owned()))?;
            if self.get(index).is_some_and(|b| b.owner == BufferOwner::Application) {
                self.queue(node, index)?;
            }
        }
        Ok(())
    }

    /// Record a buffer the driver handed back and return its frame bytes.
    pub fn complete(&mut self, meta: &FrameMetadata) -> Result<&[u8]> {
        let buffer = self.get_mut(meta.index)?;
        if buffer.owner != BufferOwner::Driver {
            return Err(CaptureError::State {
                expected: BufferOwner::Driver.as_str(),
                actual: buffer.owner.as_str(),
            });
        }
        buffer.owner = BufferOwner::Application;
        buffer.timestamp = meta.timestamp;
        let mapped = buffer.mapping.as_ref();
        buffer.bytes_used = (meta.bytes_used as usize).min(mapped.len());
        Ok(mapped.get(..buffer.bytes_used).unwrap_or_default())
    }

    /// Mark every buffer application-owned after the stream stopped.
    pub fn reclaim_all(&mut self) {
        for buffer in &mut self.buffers {
            buffer.owner = BufferOwner::Application;
        }
    }

    /// Unmap every buffer, then free the driver-side allocation.
    pub fn release<N>(self, node: &mut N) -> Result<()>
    where
        N: VideoNode<Mapping = M>,
    {
        drop(self);
        node.release_buffers()
    }
}

/// Adopts a wider row pitch reported by the hardware, once per open.
#[derive(Debug, Default, Clone, Copy)]
pub struct WidthReconciler {
    done: bool,
}

impl WidthReconciler {
    /// Whether a reconcile already ran for this open.
    pub const fn is_done(&self) -> bool {
        self.done
    }

    /// Recompute `geometry.width` from the observed luma plane length.
    ///
    /// Only the first call per open has any effect, and only when the plane
    /// is larger than the geometry implies. Returns `true` when the width
    /// changed.
    pub fn reconcile(&mut self, geometry: &mut Geometry, plane_len: usize) -> bool {
        if self.done {
            return false;
        }
        self.done = true;

        let rows = geometry.height as usize;
        if rows == 0 || plane_len <= geometry.motion_size() {
            return false;
        }
        let Ok(width) = u32::try_from(plane_len / rows) else {
            warn!("Plane of {plane_len} bytes implies an impossible width");
            return false;
        };
        let before = *geometry;
        geometry.width = width;
        info!("Frame rows are wider than negotiated, adjusting {before} to {geometry}");
        if plane_len % rows != 0 {
            warn!(
                "Plane of {plane_len} bytes is not a whole number of {rows} rows; \
                 normalized size {} may not match",
                geometry.size_norm()
            );
        }
        true
    }
}
