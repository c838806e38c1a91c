//! Asynchronous capture driver over a camera-stack service.
//!
//! A fixed pool of requests is kept in flight. The stack's dispatcher hands
//! finished requests to a callback that only enqueues them; `capture` polls
//! that queue with a bounded number of short sleeps.

#[cfg(feature = "libcamera")]
mod service;

#[cfg(feature = "libcamera")]
pub use service::LibcameraService;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_queue::ArrayQueue;
use log::{debug, error, info, warn};

use crate::buffers::{WidthReconciler, MIN_BUFFERS};
use crate::config::CaptureConfig;
use crate::controls::parse_libcam_controls;
use crate::error::{CaptureError, Result};
use crate::negotiate::aligned_geometry;
use crate::traits::{
    CameraService, CaptureDriver, CaptureStatus, CompletionHandler, ConfigStatus, FourCC, Geometry,
    StreamRequest,
};

/// The only slot identifier this backend accepts.
pub const CAMERA_SLOT: &str = "camera0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum State {
    Closed,
    ManagerStarted,
    Acquired,
    Streaming,
}

impl State {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::ManagerStarted => "manager started",
            Self::Acquired => "acquired",
            Self::Streaming => "streaming",
        }
    }
}

/// Callback run on the stack's dispatcher: enqueue only.
///
/// Requests completed as cancelled, or finishing after a stop, are dropped.
fn completion_handler<S: CameraService + 'static>(
    completed: Arc<ArrayQueue<S::Request>>,
    cancelled: Arc<AtomicBool>,
) -> CompletionHandler<S::Request> {
    Box::new(move |request| {
        if S::is_cancelled(&request) || cancelled.load(Ordering::Acquire) {
            return;
        }
        if completed.push(request).is_err() {
            warn!("Completion queue full, dropping a finished request");
        }
    })
}

/// Completion driver for one camera-stack slot.
pub struct CompletionDriver<S: CameraService + 'static> {
    service: S,
    device: String,
    settings: CaptureConfig,
    state: State,
    geometry: Geometry,
    slots: u32,
    completed: Arc<ArrayQueue<S::Request>>,
    cancelled: Arc<AtomicBool>,
    reconciler: WidthReconciler,
}

impl<S: CameraService + 'static> CompletionDriver<S> {
    /// Driver for the slot named in `settings`.
    pub fn new(service: S, settings: &CaptureConfig) -> Self {
        Self {
            service,
            device: settings.backend.key(),
            settings: settings.clone(),
            state: State::Closed,
            geometry: Geometry::new(settings.width, settings.height),
            slots: 0,
            completed: Arc::new(ArrayQueue::new(1)),
            cancelled: Arc::new(AtomicBool::new(false)),
            reconciler: WidthReconciler::default(),
        }
    }

    /// The wrapped service.
    pub const fn service(&self) -> &S {
        &self.service
    }

    fn expect_state(&self, expected: State) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(CaptureError::State {
                expected: expected.as_str(),
                actual: self.state.as_str(),
            })
        }
    }

    fn negotiate_stream(&mut self) -> Result<Geometry> {
        let requested = aligned_geometry(self.settings.width, self.settings.height);
        let request = StreamRequest {
            width: requested.width,
            height: requested.height,
            fourcc: FourCC::YU12,
            buffer_count: self.settings.buffer_count,
        };
        let config = self.service.configure(&request)?;
        match config.status {
            ConfigStatus::Invalid => {
                return Err(CaptureError::Negotiation(format!(
                    "camera rejected {requested} {}",
                    request.fourcc
                )));
            }
            ConfigStatus::Adjusted if config.fourcc != request.fourcc => {
                return Err(CaptureError::FormatAdjusted {
                    requested: request.fourcc.to_string(),
                    actual: config.fourcc.to_string(),
                });
            }
            ConfigStatus::Adjusted | ConfigStatus::Valid => {}
        }

        let granted = Geometry::new(config.width, config.height);
        if granted != requested {
            info!("Camera adjusted resolution from {requested} to {granted}");
        }
        debug!("Stream stride {} bytes", config.stride);
        Ok(granted)
    }

    fn start_stream(&mut self) -> Result<Geometry> {
        let mut geometry = self.negotiate_stream()?;

        let planes = self.service.allocate()?;
        let granted = u32::try_from(planes.len()).unwrap_or(u32::MAX);
        let minimum = self.settings.min_buffers.max(MIN_BUFFERS);
        if granted < minimum {
            return Err(CaptureError::InsufficientBuffers { granted, minimum });
        }
        info!("Using {granted} buffers (requested {})", self.settings.buffer_count);
        if let Some(&plane_len) = planes.first() {
            self.reconciler.reconcile(&mut geometry, plane_len);
        }

        let requests = self.service.create_requests()?;
        self.completed = Arc::new(ArrayQueue::new(requests.len().max(1)));
        self.cancelled = Arc::new(AtomicBool::new(false));

        self.service.connect(completion_handler::<S>(
            Arc::clone(&self.completed),
            Arc::clone(&self.cancelled),
        ))?;

        let controls = parse_libcam_controls(&self.settings.control_params());
        self.service.start(&controls)?;
        self.state = State::Streaming;
        for request in requests {
            self.service.queue(request)?;
        }

        self.geometry = geometry;
        self.slots = granted;
        Ok(geometry)
    }

    fn deliver(&mut self, request: S::Request, dst: &mut [u8]) -> Result<CaptureStatus> {
        let read = self.service.read(&request, dst);
        self.service.recycle(request)?;
        let copied = read?;
        let needed = self.geometry.size_norm();
        if copied < needed {
            debug!("{}: short frame of {copied} bytes, need {needed}", self.device);
            return Ok(CaptureStatus::RetryableMiss);
        }
        Ok(CaptureStatus::Success)
    }
}

impl<S: CameraService + 'static> CaptureDriver for CompletionDriver<S> {
    fn name(&self) -> &str {
        "libcamera"
    }

    fn open(&mut self) -> Result<()> {
        self.expect_state(State::Closed)?;
        if self.device != CAMERA_SLOT {
            return Err(CaptureError::InvalidDevice(self.device.clone()));
        }

        let cameras = self.service.start_manager()?;
        self.state = State::ManagerStarted;
        let Some(first) = cameras.first() else {
            self.stop();
            return Err(CaptureError::Device("camera manager reports no cameras".to_owned()));
        };
        info!("{}: using camera {first} of {}", self.device, cameras.len());

        if let Err(err) = self.service.acquire(0) {
            self.stop();
            return Err(err);
        }
        self.reconciler = WidthReconciler::default();
        self.state = State::Acquired;
        Ok(())
    }

    fn configure(&mut self) -> Result<Geometry> {
        self.expect_state(State::Acquired)?;
        self.start_stream().inspect_err(|_| self.stop())
    }

    fn capture(&mut self, dst: &mut [u8]) -> CaptureStatus {
        if let Err(err) = self.expect_state(State::Streaming) {
            error!("{}: capture failed: {err}", self.device);
            return CaptureStatus::Fatal;
        }

        for _ in 0..self.settings.poll_attempts.max(1) {
            if let Some(request) = self.completed.pop() {
                return match self.deliver(request, dst) {
                    Ok(status) => status,
                    Err(err) => {
                        error!("{}: capture failed: {err}", self.device);
                        CaptureStatus::Fatal
                    }
                };
            }
            thread::sleep(self.settings.poll_interval);
        }
        debug!("{}: no completed request within the poll budget", self.device);
        CaptureStatus::RetryableMiss
    }

    fn stop(&mut self) {
        self.cancelled.store(true, Ordering::Release);
        if self.state == State::Streaming {
            if let Err(err) = self.service.stop() {
                warn!("{}: stopping the camera failed: {err}", self.device);
            }
        }
        if self.state >= State::Acquired {
            self.service.disconnect();
            while self.completed.pop().is_some() {}
            self.service.free();
            self.service.release();
        }
        if self.state >= State::ManagerStarted {
            self.service.stop_manager();
            info!("{}: closed", self.device);
        }
        self.state = State::Closed;
    }

    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn buffer_count(&self) -> u32 {
        if self.slots == 0 {
            self.settings.buffer_count
        } else {
            self.slots
        }
    }
}

impl<S: CameraService + 'static> Drop for CompletionDriver<S> {
    fn drop(&mut self) {
        if self.state != State::Closed {
            self.stop();
        }
    }
}
