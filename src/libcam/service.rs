//! Camera-stack service backed by libcamera.
//!
//! libcamera objects borrow each other (manager, camera, active camera), so
//! they all live on one worker thread that serves commands over a channel.
//! Completed requests and frame reads cross to the caller's thread.

#![allow(unsafe_code)]

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use libcamera::{
    camera::{ActiveCamera, Camera, CameraConfiguration, CameraConfigurationStatus},
    camera_manager::CameraManager,
    control::ControlList,
    control_value::ControlValue,
    controls::ControlId,
    framebuffer_allocator::{FrameBuffer, FrameBufferAllocator},
    framebuffer_map::MemoryMappedFrameBuffer,
    geometry::{Rectangle, Size},
    pixel_format::PixelFormat,
    request::{Request, RequestStatus, ReuseFlag},
    stream::{Stream, StreamRole},
};
use log::{debug, info, warn};

use crate::controls::{LibcamControl, LibcamValue};
use crate::error::{CaptureError, Result};
use crate::traits::{CameraService, CompletionHandler, ConfigStatus, FourCC, StreamConfig, StreamRequest};

type Frame = MemoryMappedFrameBuffer<FrameBuffer>;

/// Stream handle read from the caller's thread.
///
/// The handle is an identifier for buffer lookup on a request; the stream
/// itself stays owned by the worker's configuration.
struct StreamHandle(Stream);

// SAFETY: a stream handle is only used as a lookup key on requests the
// caller owns, never to mutate the stream.
unsafe impl Send for StreamHandle {}

enum Command {
    Acquire(usize, Sender<Result<()>>),
    Configure(StreamRequest, Sender<Result<(StreamConfig, Option<StreamHandle>)>>),
    Allocate(Sender<Result<Vec<usize>>>),
    CreateRequests(Sender<Result<Vec<Request>>>),
    Connect(CompletionHandler<Request>, Sender<()>),
    Start(Vec<LibcamControl>, Sender<Result<()>>),
    Queue(Request, Sender<Result<()>>),
    Recycle(Request, Sender<Result<()>>),
    Stop(Sender<Result<()>>),
    Disconnect(Sender<()>),
    Free(Sender<()>),
    Release(Sender<()>),
}

impl Command {
    const fn name(&self) -> &'static str {
        match self {
            Self::Acquire(..) => "acquire",
            Self::Configure(..) => "configure",
            Self::Allocate(..) => "allocate",
            Self::CreateRequests(..) => "create requests",
            Self::Connect(..) => "connect",
            Self::Start(..) => "start",
            Self::Queue(..) => "queue",
            Self::Recycle(..) => "recycle",
            Self::Stop(..) => "stop",
            Self::Disconnect(..) => "disconnect",
            Self::Free(..) => "free",
            Self::Release(..) => "release",
        }
    }

    /// Answer a command that makes no sense in the worker's current state.
    fn reject(self, state: &'static str) {
        let name = self.name();
        let err = || CaptureError::State {
            expected: name,
            actual: state,
        };
        debug!("Camera worker ignoring {name} while {state}");
        match self {
            Self::Acquire(_, reply)
            | Self::Start(_, reply)
            | Self::Stop(reply)
            | Self::Queue(_, reply)
            | Self::Recycle(_, reply) => {
                let _ = reply.send(Err(err()));
            }
            Self::Configure(_, reply) => {
                let _ = reply.send(Err(err()));
            }
            Self::Allocate(reply) => {
                let _ = reply.send(Err(err()));
            }
            Self::CreateRequests(reply) => {
                let _ = reply.send(Err(err()));
            }
            Self::Connect(_, reply) | Self::Disconnect(reply) | Self::Free(reply) | Self::Release(reply) => {
                let _ = reply.send(());
            }
        }
    }
}

fn device_error<E: std::fmt::Debug>(context: &str, err: E) -> CaptureError {
    CaptureError::Device(format!("{context}: {err:?}"))
}

/// Service that drives libcamera from a dedicated worker thread.
#[derive(Default)]
pub struct LibcameraService {
    commands: Option<Sender<Command>>,
    worker: Option<JoinHandle<()>>,
    stream: Option<StreamHandle>,
}

impl LibcameraService {
    /// Service with no manager running yet.
    pub fn new() -> Self {
        Self::default()
    }

    fn call<T, F: FnOnce(Sender<T>) -> Command>(&self, make: F) -> Result<T> {
        let Some(commands) = &self.commands else {
            return Err(CaptureError::State {
                expected: "manager started",
                actual: "closed",
            });
        };
        let (reply, answer) = mpsc::channel();
        commands
            .send(make(reply))
            .map_err(|_| CaptureError::Device("camera worker exited".to_owned()))?;
        answer
            .recv()
            .map_err(|_| CaptureError::Device("camera worker exited".to_owned()))
    }

    fn notify<F: FnOnce(Sender<()>) -> Command>(&self, make: F) {
        if let Err(err) = self.call(make) {
            debug!("Camera worker unavailable: {err}");
        }
    }
}

impl CameraService for LibcameraService {
    type Request = Request;

    fn start_manager(&mut self) -> Result<Vec<String>> {
        let (commands, inbox) = mpsc::channel();
        let (ready, started) = mpsc::channel();
        let worker = thread::Builder::new()
            .name("libcamera".to_owned())
            .spawn(move || run_manager(&inbox, &ready))?;
        self.commands = Some(commands);
        self.worker = Some(worker);
        started
            .recv()
            .map_err(|_| CaptureError::Device("camera worker exited".to_owned()))?
    }

    fn acquire(&mut self, index: usize) -> Result<()> {
        self.call(|reply| Command::Acquire(index, reply))?
    }

    fn configure(&mut self, request: &StreamRequest) -> Result<StreamConfig> {
        let (config, stream) = self.call(|reply| Command::Configure(request.clone(), reply))??;
        self.stream = stream;
        Ok(config)
    }

    fn allocate(&mut self) -> Result<Vec<usize>> {
        self.call(Command::Allocate)?
    }

    fn create_requests(&mut self) -> Result<Vec<Request>> {
        self.call(Command::CreateRequests)?
    }

    fn connect(&mut self, handler: CompletionHandler<Request>) -> Result<()> {
        self.call(|reply| Command::Connect(handler, reply))
    }

    fn start(&mut self, controls: &[LibcamControl]) -> Result<()> {
        self.call(|reply| Command::Start(controls.to_vec(), reply))?
    }

    fn queue(&mut self, request: Request) -> Result<()> {
        self.call(|reply| Command::Queue(request, reply))?
    }

    fn is_cancelled(request: &Request) -> bool {
        matches!(request.status(), RequestStatus::Cancelled)
    }

    fn read(&self, request: &Request, dst: &mut [u8]) -> Result<usize> {
        let Some(stream) = &self.stream else {
            return Err(CaptureError::State {
                expected: "configured",
                actual: "unconfigured",
            });
        };
        let Some(frame) = request.buffer::<Frame>(&stream.0) else {
            return Err(CaptureError::Device("completed request has no buffer".to_owned()));
        };

        let mut copied = 0;
        for plane in frame.data() {
            let Some(rest) = dst.get_mut(copied..) else { break };
            let n = plane.len().min(rest.len());
            if let (Some(to), Some(from)) = (rest.get_mut(..n), plane.get(..n)) {
                to.copy_from_slice(from);
            }
            copied += n;
        }
        Ok(copied)
    }

    fn recycle(&mut self, request: Request) -> Result<()> {
        self.call(|reply| Command::Recycle(request, reply))?
    }

    fn stop(&mut self) -> Result<()> {
        self.call(Command::Stop)?
    }

    fn disconnect(&mut self) {
        self.notify(Command::Disconnect);
    }

    fn free(&mut self) {
        self.stream = None;
        self.notify(Command::Free);
    }

    fn release(&mut self) {
        self.notify(Command::Release);
    }

    fn stop_manager(&mut self) {
        self.stream = None;
        self.commands = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Camera worker panicked");
            }
        }
    }
}

impl Drop for LibcameraService {
    fn drop(&mut self) {
        self.stop_manager();
    }
}

fn run_manager(inbox: &Receiver<Command>, ready: &Sender<Result<Vec<String>>>) {
    let manager = match CameraManager::new() {
        Ok(manager) => manager,
        Err(err) => {
            let _ = ready.send(Err(device_error("camera manager failed to start", err)));
            return;
        }
    };
    let cameras = manager.cameras();
    let ids = (0..cameras.len())
        .filter_map(|index| cameras.get(index))
        .map(|camera| camera.id().to_owned())
        .collect();
    if ready.send(Ok(ids)).is_err() {
        return;
    }

    while let Ok(command) = inbox.recv() {
        match command {
            Command::Acquire(index, reply) => {
                let Some(camera) = cameras.get(index) else {
                    let _ = reply.send(Err(CaptureError::InvalidDevice(format!("camera{index}"))));
                    continue;
                };
                match camera.acquire() {
                    Ok(active) => {
                        info!("Acquired camera {}", camera.id());
                        let _ = reply.send(Ok(()));
                        if !serve_camera(inbox, &camera, active) {
                            return;
                        }
                    }
                    Err(err) => {
                        let _ = reply.send(Err(device_error("camera is busy", err)));
                    }
                }
            }
            other => other.reject("manager started"),
        }
    }
}

#[derive(Default)]
struct Session {
    configuration: Option<CameraConfiguration>,
    stream: Option<Stream>,
    allocator: Option<FrameBufferAllocator>,
    frames: Vec<Frame>,
}

/// Serve one acquired camera. Returns `false` once the caller hung up.
fn serve_camera(inbox: &Receiver<Command>, camera: &Camera<'_>, mut active: ActiveCamera<'_>) -> bool {
    let mut session = Session::default();
    while let Ok(command) = inbox.recv() {
        match command {
            Command::Configure(request, reply) => {
                let _ = reply.send(configure(camera, &mut active, &mut session, &request));
            }
            Command::Allocate(reply) => {
                let _ = reply.send(allocate(camera, &mut session));
            }
            Command::CreateRequests(reply) => {
                let _ = reply.send(create_requests(&active, &mut session));
            }
            Command::Connect(handler, reply) => {
                active.on_request_completed(move |request| handler(request));
                let _ = reply.send(());
            }
            Command::Start(controls, reply) => {
                let list = control_list(&controls);
                let result = active.start(Some(&list)).map_err(|err| device_error("start failed", err));
                let _ = reply.send(result);
            }
            Command::Queue(request, reply) => {
                let _ = reply.send(queue(&active, request));
            }
            Command::Recycle(mut request, reply) => {
                request.reuse(ReuseFlag::REUSE_BUFFERS);
                let _ = reply.send(queue(&active, request));
            }
            Command::Stop(reply) => {
                let _ = reply.send(active.stop().map_err(|err| device_error("stop failed", err)));
            }
            Command::Disconnect(reply) => {
                active.on_request_completed(|_| {});
                let _ = reply.send(());
            }
            Command::Free(reply) => {
                session = Session::default();
                let _ = reply.send(());
            }
            Command::Release(reply) => {
                drop(session);
                drop(active);
                let _ = reply.send(());
                return true;
            }
            other @ Command::Acquire(..) => other.reject("acquired"),
        }
    }
    false
}

fn configure(
    camera: &Camera<'_>,
    active: &mut ActiveCamera<'_>,
    session: &mut Session,
    request: &StreamRequest,
) -> Result<(StreamConfig, Option<StreamHandle>)> {
    let mut configuration = camera
        .generate_configuration(&[StreamRole::ViewFinder])
        .ok_or_else(|| CaptureError::Negotiation("camera offers no viewfinder stream".to_owned()))?;
    {
        let Some(mut stream) = configuration.get_mut(0) else {
            return Err(CaptureError::Negotiation("configuration has no stream".to_owned()));
        };
        stream.set_pixel_format(PixelFormat::new(request.fourcc.to_u32(), 0));
        stream.set_size(Size {
            width: request.width,
            height: request.height,
        });
        stream.set_buffer_count(request.buffer_count);
    }

    let status = match configuration.validate() {
        CameraConfigurationStatus::Valid => ConfigStatus::Valid,
        CameraConfigurationStatus::Adjusted => ConfigStatus::Adjusted,
        CameraConfigurationStatus::Invalid => ConfigStatus::Invalid,
    };
    let Some(granted) = configuration.get(0) else {
        return Err(CaptureError::Negotiation("configuration has no stream".to_owned()));
    };
    let size = granted.get_size();
    let config = StreamConfig {
        status,
        width: size.width,
        height: size.height,
        fourcc: FourCC::from_u32(granted.get_pixel_format().fourcc()),
        stride: granted.get_stride(),
    };
    drop(granted);
    if status == ConfigStatus::Invalid || (status == ConfigStatus::Adjusted && config.fourcc != request.fourcc) {
        return Ok((config, None));
    }

    active
        .configure(&mut configuration)
        .map_err(|err| device_error("configure failed", err))?;
    let streams = configuration.get(0).and_then(|cfg| cfg.stream().zip(cfg.stream()));
    let Some((ours, theirs)) = streams else {
        return Err(CaptureError::Negotiation("configured stream is missing".to_owned()));
    };
    session.stream = Some(ours);
    session.configuration = Some(configuration);
    Ok((config, Some(StreamHandle(theirs))))
}

fn allocate(camera: &Camera<'_>, session: &mut Session) -> Result<Vec<usize>> {
    let Some(stream) = &session.stream else {
        return Err(CaptureError::State {
            expected: "configured",
            actual: "unconfigured",
        });
    };
    let mut allocator = FrameBufferAllocator::new(camera);
    let buffers = allocator
        .alloc(stream)
        .map_err(|err| device_error("buffer allocation failed", err))?;
    let frames = buffers
        .into_iter()
        .map(|buffer| MemoryMappedFrameBuffer::new(buffer).map_err(|err| device_error("buffer mapping failed", err)))
        .collect::<Result<Vec<_>>>()?;
    let planes = frames
        .iter()
        .map(|frame| frame.data().first().map_or(0, |plane| plane.len()))
        .collect();
    session.frames = frames;
    session.allocator = Some(allocator);
    Ok(planes)
}

fn create_requests(active: &ActiveCamera<'_>, session: &mut Session) -> Result<Vec<Request>> {
    let Some(stream) = &session.stream else {
        return Err(CaptureError::State {
            expected: "allocated",
            actual: "unconfigured",
        });
    };
    session
        .frames
        .drain(..)
        .enumerate()
        .map(|(cookie, frame)| {
            let mut request = active
                .create_request(Some(cookie as u64))
                .ok_or_else(|| CaptureError::Device("camera refused to create a request".to_owned()))?;
            request
                .add_buffer(stream, frame)
                .map_err(|err| device_error("attaching a buffer failed", err))?;
            Ok(request)
        })
        .collect()
}

fn queue(active: &ActiveCamera<'_>, request: Request) -> Result<()> {
    active
        .queue_request(request)
        .map_err(|err| device_error("queueing a request failed", err))
}

fn control_id(name: &str) -> Option<ControlId> {
    let id = match name {
        "AeEnable" => ControlId::AeEnable,
        "AeLocked" => ControlId::AeLocked,
        "AeMeteringMode" => ControlId::AeMeteringMode,
        "AeConstraintMode" => ControlId::AeConstraintMode,
        "AeExposureMode" => ControlId::AeExposureMode,
        "ExposureValue" => ControlId::ExposureValue,
        "ExposureTime" => ControlId::ExposureTime,
        "AnalogueGain" => ControlId::AnalogueGain,
        "Brightness" => ControlId::Brightness,
        "Contrast" => ControlId::Contrast,
        "Lux" => ControlId::Lux,
        "AwbEnable" => ControlId::AwbEnable,
        "AwbMode" => ControlId::AwbMode,
        "AwbLocked" => ControlId::AwbLocked,
        "ColourGains" => ControlId::ColourGains,
        "ColourTemperature" => ControlId::ColourTemperature,
        "Saturation" => ControlId::Saturation,
        "SensorBlackLevels" => ControlId::SensorBlackLevels,
        "Sharpness" => ControlId::Sharpness,
        "FocusFoM" => ControlId::FocusFoM,
        "ColourCorrectionMatrix" => ControlId::ColourCorrectionMatrix,
        "ScalerCrop" => ControlId::ScalerCrop,
        "DigitalGain" => ControlId::DigitalGain,
        "FrameDuration" => ControlId::FrameDuration,
        "FrameDurationLimits" => ControlId::FrameDurationLimits,
        "SensorTemperature" => ControlId::SensorTemperature,
        "SensorTimestamp" => ControlId::SensorTimestamp,
        "AfMode" => ControlId::AfMode,
        "AfRange" => ControlId::AfRange,
        "AfSpeed" => ControlId::AfSpeed,
        "AfMetering" => ControlId::AfMetering,
        "AfWindows" => ControlId::AfWindows,
        "AfTrigger" => ControlId::AfTrigger,
        "AfPause" => ControlId::AfPause,
        "LensPosition" => ControlId::LensPosition,
        "AfState" => ControlId::AfState,
        "AfPauseState" => ControlId::AfPauseState,
        _ => return None,
    };
    Some(id)
}

fn control_value(value: &LibcamValue) -> ControlValue {
    match value {
        LibcamValue::Bool(v) => ControlValue::from(*v),
        LibcamValue::Int(v) => ControlValue::from(*v),
        LibcamValue::Int64(v) => ControlValue::from(*v),
        LibcamValue::Float(v) => ControlValue::from(*v),
        LibcamValue::Floats(v) => ControlValue::from(v.clone()),
        LibcamValue::Ints(v) => ControlValue::from(v.clone()),
        LibcamValue::Int64s(v) => ControlValue::from(v.clone()),
        LibcamValue::Rect { x, y, width, height } => ControlValue::from(Rectangle {
            x: *x,
            y: *y,
            width: *width,
            height: *height,
        }),
    }
}

fn control_list(controls: &[LibcamControl]) -> ControlList {
    let mut list = ControlList::new();
    for control in controls {
        let Some(id) = control_id(control.name).filter(|_| !control.draft) else {
            warn!("Control {} is not supported by this camera stack, skipping", control.name);
            continue;
        };
        match list.set_raw(id as u32, control_value(&control.value)) {
            Ok(()) => info!("Set control {} = {:?}", control.name, control.value),
            Err(err) => warn!("Control {} rejected: {err:?}", control.name),
        }
    }
    list
}
