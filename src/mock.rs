//! Mock kernel node and camera-stack service for testing without hardware.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{LevelFilter, Log, Metadata, Record};

use crate::controls::{LibcamControl, CID_BRIGHTNESS};
use crate::error::{CaptureError, Result};
use crate::traits::{
    CameraService, CompletionHandler, ConfigStatus, ControlInfo, ControlKind, DeviceCapabilities, Format, FourCC,
    FrameMetadata, Geometry, StreamConfig, StreamRequest, VideoNode,
};

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// SMPTE color bars pattern.
    ColorBars,
    /// Horizontal gradient from dark to light.
    Gradient,
    /// Solid color with specified Y, U, V values.
    Solid(u8, u8, u8),
}

/// Y, U, V of the eight color bars: White, Yellow, Cyan, Green, Magenta, Red, Blue, Black.
pub const COLOR_BARS: [(u8, u8, u8); 8] = [
    (235, 128, 128),
    (210, 16, 146),
    (170, 166, 16),
    (145, 54, 34),
    (106, 202, 222),
    (81, 90, 240),
    (41, 240, 110),
    (16, 128, 128),
];

impl TestPattern {
    /// Y, U, V at column `x` of a `width`-wide frame.
    pub fn yuv_at(self, x: u32, width: u32) -> (u8, u8, u8) {
        match self {
            Self::ColorBars => {
                let bar = (x / (width / 8).max(1)).min(7) as usize;
                COLOR_BARS.get(bar).copied().unwrap_or((16, 128, 128))
            }
            Self::Gradient => {
                let luma = u64::from(x) * 255 / u64::from(width.saturating_sub(1).max(1));
                (u8::try_from(luma).unwrap_or(u8::MAX), 128, 128)
            }
            Self::Solid(y, u, v) => (y, u, v),
        }
    }
}

/// Bytes a `width` x `height` frame of `fourcc` occupies.
pub fn frame_len(fourcc: FourCC, width: u32, height: u32) -> usize {
    let pixels = width as usize * height as usize;
    match fourcc {
        FourCC::YU12 => pixels * 3 / 2,
        FourCC::GREY => pixels,
        _ => pixels * 2,
    }
}

/// Render `pattern` as a `fourcc` frame.
///
/// Planar 4:2:0, packed YUYV/UYVY and greyscale are drawn; every other
/// format gets a zeroed buffer of the right size.
pub fn generate_frame(pattern: TestPattern, fourcc: FourCC, width: u32, height: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity(frame_len(fourcc, width, height));
    match fourcc {
        FourCC::YU12 => {
            for _ in 0..height {
                data.extend((0..width).map(|x| pattern.yuv_at(x, width).0));
            }
            for _ in 0..height / 2 {
                data.extend((0..width / 2).map(|cx| pattern.yuv_at(cx * 2, width).1));
            }
            for _ in 0..height / 2 {
                data.extend((0..width / 2).map(|cx| pattern.yuv_at(cx * 2, width).2));
            }
        }
        FourCC::YUYV | FourCC::UYVY => {
            for _ in 0..height {
                for x in (0..width).step_by(2) {
                    let (y0, u, v) = pattern.yuv_at(x, width);
                    let (y1, _, _) = pattern.yuv_at(x + 1, width);
                    if fourcc == FourCC::YUYV {
                        data.extend([y0, u, y1, v]);
                    } else {
                        data.extend([u, y0, v, y1]);
                    }
                }
            }
        }
        FourCC::GREY => {
            for _ in 0..height {
                data.extend((0..width).map(|x| pattern.yuv_at(x, width).0));
            }
        }
        _ => data.resize(frame_len(fourcc, width, height), 0),
    }
    data
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One call made on a [`MockNode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeCall {
    /// `try_format` with the requested code.
    TryFormat(FourCC),
    /// `set_format` with the requested code.
    SetFormat(FourCC),
    /// `set_frame_rate`.
    SetFrameRate(u32),
    /// `select_input`.
    SelectInput(u32),
    /// `set_control` with id and value.
    SetControl(u32, i64),
    /// `request_buffers` with the requested count.
    RequestBuffers(u32),
    /// `map_buffer`.
    Map(u32),
    /// `release_buffers`.
    ReleaseBuffers,
    /// `queue_buffer`.
    Queue(u32),
    /// A successful `dequeue_buffer`.
    Dequeue(u32),
    /// `stream_on`.
    StreamOn,
    /// `stream_off`.
    StreamOff,
}

/// Scriptable kernel node.
///
/// Clones share the call log, so a test can keep one copy while a driver
/// opens another.
#[derive(Debug, Clone)]
pub struct MockNode {
    capabilities: DeviceCapabilities,
    formats: Vec<FourCC>,
    format_swap: Option<FourCC>,
    served_size: Option<(u32, u32)>,
    frame_size: Option<(u32, u32)>,
    granted_buffers: Option<u32>,
    dequeue_errors: VecDeque<i32>,
    queue_errors: Arc<Mutex<VecDeque<i32>>>,
    pattern: TestPattern,
    controls: Vec<ControlInfo>,
    format: Format,
    queued: VecDeque<u32>,
    sequence: u32,
    calls: Arc<Mutex<Vec<NodeCall>>>,
}

impl Default for MockNode {
    fn default() -> Self {
        Self::new()
    }
}

impl MockNode {
    /// Node offering planar 4:2:0 and YUYV at 640x480 with a brightness control.
    #[must_use]
    pub fn new() -> Self {
        Self {
            capabilities: DeviceCapabilities {
                driver: "mock".to_owned(),
                card: "Mock Camera".to_owned(),
                bus_info: "mock:0".to_owned(),
                can_capture: true,
                can_stream: true,
            },
            formats: vec![FourCC::YU12, FourCC::YUYV],
            format_swap: None,
            served_size: None,
            frame_size: None,
            granted_buffers: None,
            dequeue_errors: VecDeque::new(),
            queue_errors: Arc::new(Mutex::new(VecDeque::new())),
            pattern: TestPattern::ColorBars,
            controls: vec![ControlInfo {
                id: CID_BRIGHTNESS,
                name: "Brightness".to_owned(),
                kind: ControlKind::Integer,
                minimum: 0,
                maximum: 255,
                default: 128,
                current: 128,
            }],
            format: Format::new(640, 480, FourCC::YU12),
            queued: VecDeque::new(),
            sequence: 0,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Formats the node enumerates and accepts.
    #[must_use]
    pub fn with_formats(mut self, formats: &[FourCC]) -> Self {
        self.formats = formats.to_vec();
        self
    }

    /// Accept every format on trial, then apply `fourcc` instead.
    #[must_use]
    pub const fn with_format_swap(mut self, fourcc: FourCC) -> Self {
        self.format_swap = Some(fourcc);
        self
    }

    /// Answer every format request with this resolution.
    #[must_use]
    pub const fn with_served_size(mut self, width: u32, height: u32) -> Self {
        self.served_size = Some((width, height));
        self
    }

    /// Deliver frames of this resolution regardless of the format set.
    #[must_use]
    pub const fn with_frame_size(mut self, width: u32, height: u32) -> Self {
        self.frame_size = Some((width, height));
        self
    }

    /// Grant this many buffers whatever is requested.
    #[must_use]
    pub const fn with_granted_buffers(mut self, count: u32) -> Self {
        self.granted_buffers = Some(count);
        self
    }

    /// Fail the next dequeues with these errno values, in order.
    #[must_use]
    pub fn with_dequeue_errors(mut self, errnos: &[i32]) -> Self {
        self.dequeue_errors = errnos.iter().copied().collect();
        self
    }

    /// Fail the next queue call with `errno`, on every clone.
    pub fn fail_next_queue(&self, errno: i32) {
        lock(&self.queue_errors).push_back(errno);
    }

    /// Draw frames with `pattern`.
    #[must_use]
    pub const fn with_pattern(mut self, pattern: TestPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Replace the enumerated controls.
    #[must_use]
    pub fn with_controls(mut self, controls: Vec<ControlInfo>) -> Self {
        self.controls = controls;
        self
    }

    /// Calls made so far by every clone.
    pub fn calls(&self) -> Vec<NodeCall> {
        lock(&self.calls).clone()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    fn record(&self, call: NodeCall) {
        lock(&self.calls).push(call);
    }

    fn frame_dims(&self) -> (u32, u32) {
        self.frame_size.unwrap_or((self.format.width, self.format.height))
    }

    fn answer(&self, request: &Format, fourcc: FourCC) -> Format {
        let (width, height) = self.served_size.unwrap_or((request.width, request.height));
        let bytes_per_line = match fourcc {
            FourCC::YU12 | FourCC::GREY => width,
            _ => width * 2,
        };
        Format {
            width,
            height,
            fourcc,
            stride: bytes_per_line,
            size: u32::try_from(frame_len(fourcc, width, height)).unwrap_or(u32::MAX),
        }
    }
}

impl VideoNode for MockNode {
    type Mapping = Vec<u8>;

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn enum_formats(&self) -> Result<Vec<FourCC>> {
        Ok(self.formats.clone())
    }

    fn try_format(&mut self, format: &Format) -> Result<Format> {
        self.record(NodeCall::TryFormat(format.fourcc));
        let fourcc = if self.formats.contains(&format.fourcc) {
            format.fourcc
        } else {
            self.formats.first().copied().unwrap_or(FourCC::YUYV)
        };
        Ok(self.answer(format, fourcc))
    }

    fn set_format(&mut self, format: &Format) -> Result<Format> {
        self.record(NodeCall::SetFormat(format.fourcc));
        let fourcc = self.format_swap.unwrap_or(format.fourcc);
        self.format = self.answer(format, fourcc);
        Ok(self.format.clone())
    }

    fn set_frame_rate(&mut self, fps: u32) -> Result<u32> {
        self.record(NodeCall::SetFrameRate(fps));
        Ok(fps)
    }

    fn select_input(&mut self, index: u32) -> Result<()> {
        self.record(NodeCall::SelectInput(index));
        Ok(())
    }

    fn query_controls(&self) -> Result<Vec<ControlInfo>> {
        Ok(self.controls.clone())
    }

    fn set_control(&mut self, id: u32, value: i64) -> Result<()> {
        self.record(NodeCall::SetControl(id, value));
        let Some(control) = self.controls.iter_mut().find(|c| c.id == id) else {
            return Err(CaptureError::Io(io::Error::from_raw_os_error(libc::EINVAL)));
        };
        control.current = value;
        Ok(())
    }

    fn request_buffers(&mut self, count: u32) -> Result<u32> {
        self.record(NodeCall::RequestBuffers(count));
        Ok(self.granted_buffers.unwrap_or(count))
    }

    fn map_buffer(&mut self, index: u32) -> Result<Vec<u8>> {
        self.record(NodeCall::Map(index));
        let (width, height) = self.frame_dims();
        Ok(generate_frame(self.pattern, self.format.fourcc, width, height))
    }

    fn release_buffers(&mut self) -> Result<()> {
        self.record(NodeCall::ReleaseBuffers);
        self.queued.clear();
        Ok(())
    }

    fn queue_buffer(&mut self, index: u32) -> Result<()> {
        if let Some(errno) = lock(&self.queue_errors).pop_front() {
            return Err(CaptureError::Io(io::Error::from_raw_os_error(errno)));
        }
        self.record(NodeCall::Queue(index));
        self.queued.push_back(index);
        Ok(())
    }

    fn dequeue_buffer(&mut self) -> Result<FrameMetadata> {
        if let Some(errno) = self.dequeue_errors.pop_front() {
            return Err(CaptureError::Io(io::Error::from_raw_os_error(errno)));
        }
        let Some(index) = self.queued.pop_front() else {
            return Err(CaptureError::NotReady);
        };
        self.record(NodeCall::Dequeue(index));

        let (width, height) = self.frame_dims();
        let sequence = self.sequence;
        self.sequence += 1;
        Ok(FrameMetadata {
            index,
            sequence,
            timestamp: Duration::from_millis(u64::from(sequence) * 33),
            bytes_used: u32::try_from(frame_len(self.format.fourcc, width, height)).unwrap_or(u32::MAX),
        })
    }

    fn stream_on(&mut self) -> Result<()> {
        self.record(NodeCall::StreamOn);
        Ok(())
    }

    fn stream_off(&mut self) -> Result<()> {
        self.record(NodeCall::StreamOff);
        self.queued.clear();
        Ok(())
    }
}

/// One call made on a [`MockService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCall {
    /// `start_manager`.
    StartManager,
    /// `acquire` with the camera index.
    Acquire(usize),
    /// `configure`.
    Configure,
    /// `allocate`.
    Allocate,
    /// `create_requests`.
    CreateRequests,
    /// `connect`.
    Connect,
    /// `start` with the number of controls passed.
    Start(usize),
    /// `queue` with the request cookie.
    Queue(u32),
    /// `recycle` with the request cookie.
    Recycle(u32),
    /// `stop`.
    Stop,
    /// `disconnect`.
    Disconnect,
    /// `free`.
    Free,
    /// `release`.
    Release,
    /// `stop_manager`.
    StopManager,
}

/// Request handed out by [`MockService`].
#[derive(Debug)]
pub struct MockRequest {
    cookie: u32,
    cancelled: bool,
}

impl MockRequest {
    /// Fresh, uncancelled request.
    pub const fn new(cookie: u32) -> Self {
        Self {
            cookie,
            cancelled: false,
        }
    }

    /// Cookie the request was created with.
    pub const fn cookie(&self) -> u32 {
        self.cookie
    }
}

struct ServiceState {
    cameras: usize,
    status: ConfigStatus,
    fourcc: FourCC,
    granted_size: Option<(u32, u32)>,
    slots: Option<u32>,
    plane_len: Option<usize>,
    fill: u8,
    geometry: Geometry,
    buffer_count: u32,
    handler: Option<CompletionHandler<MockRequest>>,
    in_flight: Vec<MockRequest>,
    calls: Vec<ServiceCall>,
}

impl ServiceState {
    fn plane_len(&self) -> usize {
        self.plane_len.unwrap_or_else(|| self.geometry.motion_size())
    }

    fn deliver(&mut self, cookie: u32, cancelled: bool) {
        let Some(position) = self.in_flight.iter().position(|r| r.cookie == cookie) else {
            return;
        };
        let mut request = self.in_flight.remove(position);
        request.cancelled = cancelled;
        if let Some(handler) = &self.handler {
            handler(request);
        }
    }
}

/// Scriptable camera-stack service.
///
/// Requests complete only when a test calls [`MockService::complete`],
/// from any thread.
#[derive(Clone)]
pub struct MockService {
    state: Arc<Mutex<ServiceState>>,
}

impl Default for MockService {
    fn default() -> Self {
        Self::new()
    }
}

impl MockService {
    /// One camera that accepts any configuration as requested.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ServiceState {
                cameras: 1,
                status: ConfigStatus::Valid,
                fourcc: FourCC::YU12,
                granted_size: None,
                slots: None,
                plane_len: None,
                fill: 0,
                geometry: Geometry::default(),
                buffer_count: 0,
                handler: None,
                in_flight: Vec::new(),
                calls: Vec::new(),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, ServiceState> {
        lock(&self.state)
    }

    /// Number of cameras the manager reports.
    #[must_use]
    pub fn with_cameras(self, count: usize) -> Self {
        self.state().cameras = count;
        self
    }

    /// Validation outcome and the pixel format it grants.
    #[must_use]
    pub fn with_status(self, status: ConfigStatus, fourcc: FourCC) -> Self {
        {
            let mut state = self.state();
            state.status = status;
            state.fourcc = fourcc;
        }
        self
    }

    /// Resolution granted by validation.
    #[must_use]
    pub fn with_granted_size(self, width: u32, height: u32) -> Self {
        self.state().granted_size = Some((width, height));
        self
    }

    /// Number of buffers allocated whatever is requested.
    #[must_use]
    pub fn with_slots(self, count: u32) -> Self {
        self.state().slots = Some(count);
        self
    }

    /// First-plane length reported by allocation.
    #[must_use]
    pub fn with_plane_len(self, len: usize) -> Self {
        self.state().plane_len = Some(len);
        self
    }

    /// Byte every delivered frame is filled with.
    #[must_use]
    pub fn with_fill(self, value: u8) -> Self {
        self.state().fill = value;
        self
    }

    /// Complete the in-flight request with `cookie`.
    pub fn complete(&self, cookie: u32) {
        self.state().deliver(cookie, false);
    }

    /// Complete the in-flight request with `cookie` as cancelled.
    pub fn cancel(&self, cookie: u32) {
        self.state().deliver(cookie, true);
    }

    /// Calls made so far.
    pub fn calls(&self) -> Vec<ServiceCall> {
        self.state().calls.clone()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }
}

impl CameraService for MockService {
    type Request = MockRequest;

    fn start_manager(&mut self) -> Result<Vec<String>> {
        let mut state = self.state();
        state.calls.push(ServiceCall::StartManager);
        Ok((0..state.cameras).map(|i| format!("/base/mock/camera@{i}")).collect())
    }

    fn acquire(&mut self, index: usize) -> Result<()> {
        let mut state = self.state();
        state.calls.push(ServiceCall::Acquire(index));
        if index >= state.cameras {
            return Err(CaptureError::InvalidDevice(format!("camera{index}")));
        }
        Ok(())
    }

    fn configure(&mut self, request: &StreamRequest) -> Result<StreamConfig> {
        let mut state = self.state();
        state.calls.push(ServiceCall::Configure);
        let (width, height) = state.granted_size.unwrap_or((request.width, request.height));
        state.geometry = Geometry::new(width, height);
        state.buffer_count = request.buffer_count;
        Ok(StreamConfig {
            status: state.status,
            width,
            height,
            fourcc: state.fourcc,
            stride: width,
        })
    }

    fn allocate(&mut self) -> Result<Vec<usize>> {
        let mut state = self.state();
        state.calls.push(ServiceCall::Allocate);
        let slots = state.slots.unwrap_or(state.buffer_count);
        Ok(vec![state.plane_len(); slots as usize])
    }

    fn create_requests(&mut self) -> Result<Vec<MockRequest>> {
        let mut state = self.state();
        state.calls.push(ServiceCall::CreateRequests);
        let slots = state.slots.unwrap_or(state.buffer_count);
        Ok((0..slots)
            .map(|cookie| MockRequest {
                cookie,
                cancelled: false,
            })
            .collect())
    }

    fn connect(&mut self, handler: CompletionHandler<MockRequest>) -> Result<()> {
        let mut state = self.state();
        state.calls.push(ServiceCall::Connect);
        state.handler = Some(handler);
        Ok(())
    }

    fn start(&mut self, controls: &[LibcamControl]) -> Result<()> {
        self.state().calls.push(ServiceCall::Start(controls.len()));
        Ok(())
    }

    fn queue(&mut self, request: MockRequest) -> Result<()> {
        let mut state = self.state();
        state.calls.push(ServiceCall::Queue(request.cookie));
        state.in_flight.push(request);
        Ok(())
    }

    fn is_cancelled(request: &MockRequest) -> bool {
        request.cancelled
    }

    fn read(&self, _request: &MockRequest, dst: &mut [u8]) -> Result<usize> {
        let state = self.state();
        let len = (state.plane_len() * 3 / 2).min(dst.len());
        if let Some(frame) = dst.get_mut(..len) {
            frame.fill(state.fill);
        }
        Ok(len)
    }

    fn recycle(&mut self, mut request: MockRequest) -> Result<()> {
        let mut state = self.state();
        state.calls.push(ServiceCall::Recycle(request.cookie));
        request.cancelled = false;
        state.in_flight.push(request);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut state = self.state();
        state.calls.push(ServiceCall::Stop);
        let cookies: Vec<u32> = state.in_flight.iter().map(|r| r.cookie).collect();
        for cookie in cookies {
            state.deliver(cookie, true);
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        let mut state = self.state();
        state.calls.push(ServiceCall::Disconnect);
        state.handler = None;
    }

    fn free(&mut self) {
        let mut state = self.state();
        state.calls.push(ServiceCall::Free);
        state.in_flight.clear();
    }

    fn release(&mut self) {
        self.state().calls.push(ServiceCall::Release);
    }

    fn stop_manager(&mut self) {
        self.state().calls.push(ServiceCall::StopManager);
    }
}

thread_local! {
    static CAPTURED: RefCell<Option<Vec<String>>> = const { RefCell::new(None) };
}

struct ThreadLogger;

impl Log for ThreadLogger {
    fn enabled(&self, _metadata: &Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &Record<'_>) {
        CAPTURED.with(|captured| {
            if let Some(lines) = captured.borrow_mut().as_mut() {
                lines.push(record.args().to_string());
            }
        });
    }

    fn flush(&self) {}
}

static LOGGER: ThreadLogger = ThreadLogger;

/// Log messages emitted on the installing thread since [`LogCapture::install`].
pub struct LogCapture(());

impl LogCapture {
    /// Start capturing on the current thread, discarding earlier captures.
    pub fn install() -> Self {
        // Another test may have installed it already.
        let _ = log::set_logger(&LOGGER);
        log::set_max_level(LevelFilter::Trace);
        CAPTURED.with(|captured| *captured.borrow_mut() = Some(Vec::new()));
        Self(())
    }

    /// Number of captured messages containing `needle`.
    pub fn count_containing(&self, needle: &str) -> usize {
        CAPTURED.with(|captured| {
            captured
                .borrow()
                .as_ref()
                .map_or(0, |lines| lines.iter().filter(|line| line.contains(needle)).count())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_bars_pattern() {
        let data = generate_frame(TestPattern::ColorBars, FourCC::YUYV, 640, 480);
        assert_eq!(data.len(), 640 * 480 * 2);
        // First bar is white
        assert_eq!(data[0], 235);
    }

    #[test]
    fn test_gradient_pattern() {
        let data = generate_frame(TestPattern::Gradient, FourCC::YU12, 640, 480);
        assert_eq!(data.len(), 640 * 480 * 3 / 2);
        assert!(data[0] < 10);
        assert!(data[479 * 640 + 639] > 200);
    }

    #[test]
    fn test_solid_pattern_planes() {
        let data = generate_frame(TestPattern::Solid(128, 64, 192), FourCC::YU12, 64, 64);
        assert_eq!(data[0], 128);
        assert_eq!(data[64 * 64], 64);
        assert_eq!(data[64 * 64 * 3 / 2 - 1], 192);

        let packed = generate_frame(TestPattern::Solid(128, 64, 192), FourCC::UYVY, 64, 64);
        assert_eq!(&packed[..4], &[64, 128, 192, 128]);
    }

    #[test]
    fn test_dequeue_is_fifo_and_not_ready_when_empty() {
        let mut node = MockNode::new();
        assert!(matches!(node.dequeue_buffer(), Err(CaptureError::NotReady)));
        node.queue_buffer(2).expect("queue should succeed");
        node.queue_buffer(0).expect("queue should succeed");
        assert_eq!(node.dequeue_buffer().expect("dequeue should succeed").index, 2);
        assert_eq!(node.dequeue_buffer().expect("dequeue should succeed").index, 0);
    }

    #[test]
    fn test_unsupported_format_trial_answers_substitute() {
        let mut node = MockNode::new().with_formats(&[FourCC::YUYV]);
        let answer = node
            .try_format(&Format::new(640, 480, FourCC::RGB3))
            .expect("trial should succeed");
        assert_eq!(answer.fourcc, FourCC::YUYV);
    }

    #[test]
    fn test_log_capture_is_per_thread() {
        let logs = LogCapture::install();
        log::info!("captured here");
        std::thread::spawn(|| log::info!("captured here"))
            .join()
            .expect("logging thread should finish");
        assert_eq!(logs.count_containing("captured here"), 1);
    }
}
