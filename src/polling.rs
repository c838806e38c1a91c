//! Synchronous capture driver over a kernel video node.
//!
//! Buffers are dequeued with a blocking call while the coordination signals
//! are deferred. The buffer handed to the application on one call is
//! requeued at the start of the next, so one buffer is always readable and
//! the rest stay in flight.

use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};

use crate::buffers::{BufferPool, WidthReconciler};
use crate::config::CaptureConfig;
use crate::controls::{sample_average, ControlSet};
use crate::convert::normalize;
use crate::error::{CaptureError, Result};
use crate::negotiate::negotiate;
use crate::palette::{self, Conversion, Palette};
use crate::signals::SignalGuard;
use crate::traits::{CaptureDriver, CaptureStatus, Geometry, Selection, VideoNode};
use crate::v4l2::V4l2Node;

/// Opens a node for a path; called on every (re)open.
pub type NodeFactory<N> = Box<dyn Fn(&Path) -> Result<N> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Opened,
    Streaming,
}

impl State {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Opened => "opened",
            Self::Streaming => "streaming",
        }
    }
}

/// Polling driver for one kernel node.
pub struct PollingDriver<N: VideoNode> {
    path: PathBuf,
    settings: CaptureConfig,
    factory: NodeFactory<N>,
    state: State,
    node: Option<N>,
    pool: Option<BufferPool<N::Mapping>>,
    palette: &'static Palette,
    geometry: Geometry,
    controls: ControlSet,
    selection: Selection,
    requeue: Option<u32>,
    reconciler: WidthReconciler,
}

impl PollingDriver<V4l2Node> {
    /// Driver for the kernel node at `path`.
    pub fn v4l2(path: PathBuf, settings: &CaptureConfig) -> Self {
        Self::new(path, settings, Box::new(|path: &Path| V4l2Node::open(path)))
    }
}

impl<N: VideoNode> PollingDriver<N> {
    /// Driver that opens its node through `factory`.
    pub fn new(path: PathBuf, settings: &CaptureConfig, factory: NodeFactory<N>) -> Self {
        Self {
            path,
            selection: settings.selection(),
            settings: settings.clone(),
            factory,
            state: State::Closed,
            node: None,
            pool: None,
            palette: palette::configured(settings.palette),
            geometry: Geometry::new(settings.width, settings.height),
            controls: ControlSet::default(),
            requeue: None,
            reconciler: WidthReconciler::default(),
        }
    }

    /// Controls enumerated on the last configure.
    pub const fn controls(&self) -> &ControlSet {
        &self.controls
    }

    /// Palette negotiated on the last configure.
    pub const fn palette(&self) -> &'static Palette {
        self.palette
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

    fn node_mut(&mut self) -> Result<&mut N> {
        let actual = self.state.as_str();
        self.node.as_mut().ok_or(CaptureError::State {
            expected: State::Opened.as_str(),
            actual,
        })
    }

    /// Reset pending values, apply the current directives and commit.
    fn apply_controls(&mut self) -> Result<()> {
        let held = self.selection.auto_brightness.control_id();
        self.controls.apply_params(&self.selection.params, held);
        let node = self.node.as_mut().ok_or(CaptureError::NotReady)?;
        let report = self.controls.commit(|id, value| node.set_control(id, value));
        if report.failed > 0 {
            warn!("{}: {} control writes failed", self.path.display(), report.failed);
        }
        Ok(())
    }

    fn auto_brightness(&mut self, luma_average: i64) {
        let mode = self.selection.auto_brightness;
        if self
            .controls
            .auto_brightness(mode, &self.selection.params, luma_average)
            .is_none()
        {
            return;
        }
        if let Some(node) = self.node.as_mut() {
            self.controls.commit(|id, value| node.set_control(id, value));
        }
    }

    fn configure_stream(&mut self) -> Result<Geometry> {
        let settings = self.settings.clone();
        let node = self.node_mut()?;

        if let Some(input) = settings.input {
            node.select_input(input)?;
        }

        let negotiated = negotiate(node, settings.width, settings.height, settings.palette)?;

        match node.set_frame_rate(settings.framerate) {
            Ok(granted) if granted != settings.framerate => {
                info!("Requested {} fps, driver granted {granted}", settings.framerate);
            }
            Ok(_) => debug!("Frame rate set to {} fps", settings.framerate),
            Err(err) => warn!("Setting frame rate failed: {err}"),
        }

        let controls = match node.query_controls() {
            Ok(infos) => ControlSet::from_infos(infos),
            Err(err) => {
                warn!("Enumerating controls failed: {err}");
                ControlSet::default()
            }
        };

        self.palette = negotiated.palette;
        self.geometry = negotiated.geometry;
        self.controls = controls;
        self.controls.log_controls();
        self.apply_controls()?;

        let node = self.node_mut()?;
        let mut pool = BufferPool::allocate(node, settings.buffer_count, settings.min_buffers)?;
        if let Err(err) = pool.queue_all(node).and_then(|()| node.stream_on()) {
            if let Err(release_err) = pool.release(node) {
                warn!("Releasing buffers failed: {release_err}");
            }
            return Err(err);
        }
        self.pool = Some(pool);
        self.requeue = None;
        self.state = State::Streaming;
        Ok(self.geometry)
    }

    fn read_frame(&mut self, dst: &mut [u8]) -> Result<CaptureStatus> {
        self.expect_state(State::Streaming)?;
        let (Some(node), Some(pool)) = (self.node.as_mut(), self.pool.as_mut()) else {
            return Err(CaptureError::NotReady);
        };

        let meta = {
            let _deferred = SignalGuard::block()?;
            if let Some(index) = self.requeue {
                pool.queue(node, index)?;
                self.requeue = None;
            }
            node.dequeue_buffer()?
        };
        let frame = pool.complete(&meta)?;
        self.requeue = Some(meta.index);

        if !self.reconciler.is_done() {
            let plane_len = match self.palette.conversion {
                Conversion::Identity if frame.len() > self.geometry.size_norm() => frame.len() * 2 / 3,
                _ => 0,
            };
            if self.reconciler.reconcile(&mut self.geometry, plane_len) && dst.len() < self.geometry.size_norm() {
                info!("{}: dropping one frame while consumers resize", self.path.display());
                return Ok(CaptureStatus::RetryableMiss);
            }
        }

        normalize(self.palette.conversion, frame, dst, self.geometry)?;
        let average = dst.get(..self.geometry.motion_size()).and_then(sample_average);
        if let Some(average) = average {
            self.auto_brightness(average);
        }
        Ok(CaptureStatus::Success)
    }
}

impl<N: VideoNode> CaptureDriver for PollingDriver<N> {
    fn name(&self) -> &str {
        "v4l2"
    }

    fn open(&mut self) -> Result<()> {
        self.expect_state(State::Closed)?;
        let node = (self.factory)(&self.path)?;
        let caps = node.capabilities();
        info!(
            "{}: opened {} ({}, {})",
            self.path.display(),
            caps.card,
            caps.driver,
            caps.bus_info
        );
        self.node = Some(node);
        self.reconciler = WidthReconciler::default();
        self.state = State::Opened;
        Ok(())
    }

    fn configure(&mut self) -> Result<Geometry> {
        self.expect_state(State::Opened)?;
        self.configure_stream()
    }

    fn capture(&mut self, dst: &mut [u8]) -> CaptureStatus {
        match self.read_frame(dst) {
            Ok(status) => status,
            Err(err @ CaptureError::CorruptFrame(_)) => {
                warn!("{}: dropping frame: {err}", self.path.display());
                CaptureStatus::RetryableMiss
            }
            Err(err) if err.is_retryable() => {
                debug!("{}: no frame ready: {err}", self.path.display());
                CaptureStatus::RetryableMiss
            }
            Err(err) => {
                error!("{}: capture failed: {err}", self.path.display());
                CaptureStatus::Fatal
            }
        }
    }

    fn stop(&mut self) {
        if let Some(node) = self.node.as_mut() {
            if self.state == State::Streaming {
                if let Err(err) = node.stream_off() {
                    warn!("{}: stream off failed: {err}", self.path.display());
                }
            }
            if let Some(mut pool) = self.pool.take() {
                pool.reclaim_all();
                if let Err(err) = pool.release(node) {
                    warn!("{}: releasing buffers failed: {err}", self.path.display());
                }
            }
        }
        if self.node.take().is_some() {
            info!("{}: closed", self.path.display());
        }
        self.requeue = None;
        self.state = State::Closed;
    }

    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn buffer_count(&self) -> u32 {
        self.pool
            .as_ref()
            .and_then(|pool| u32::try_from(pool.len()).ok())
            .unwrap_or(self.settings.buffer_count)
    }

    fn select(&mut self, selection: &Selection) -> Result<bool> {
        let input_changed = selection.input.is_some() && selection.input != self.selection.input;
        if input_changed {
            if let Some(input) = selection.input {
                self.node_mut()?.select_input(input)?;
                debug!("{}: switched to input {input}", self.path.display());
            }
        }
        if *selection != self.selection {
            self.selection = selection.clone();
            self.apply_controls()?;
        }
        Ok(input_changed)
    }
}

impl<N: VideoNode> Drop for PollingDriver<N> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AutoBrightness;
    use crate::controls::{parse_params, CID_BRIGHTNESS};
    use crate::mock::{LogCapture, MockNode, NodeCall, TestPattern};
    use crate::traits::FourCC;
    use serial_test::serial;

    fn driver_for(node: &MockNode, settings: &CaptureConfig) -> PollingDriver<MockNode> {
        let template = node.clone();
        PollingDriver::new(
            PathBuf::from("/dev/video9"),
            settings,
            Box::new(move |_: &Path| Ok(template.clone())),
        )
    }

    fn started(node: &MockNode, settings: &CaptureConfig) -> PollingDriver<MockNode> {
        let mut driver = driver_for(node, settings);
        driver.open().expect("open should succeed");
        driver.configure().expect("configure should succeed");
        driver
    }

    #[test]
    fn test_configure_streams_with_all_buffers_queued() {
        let node = MockNode::new();
        let driver = started(&node, &CaptureConfig::default());
        assert_eq!(driver.buffer_count(), 4);
        assert_eq!(driver.geometry(), Geometry::new(640, 480));

        let calls = node.calls();
        let queued = calls.iter().filter(|c| matches!(c, NodeCall::Queue(_))).count();
        assert_eq!(queued, 4);
        assert_eq!(calls.last(), Some(&NodeCall::StreamOn));
    }

    #[test]
    fn test_short_grant_never_starts_stream() {
        let node = MockNode::new().with_granted_buffers(1);
        let mut driver = driver_for(&node, &CaptureConfig::default());
        driver.open().expect("open should succeed");
        let err = driver.configure().expect_err("one buffer is not enough");
        assert!(matches!(err, CaptureError::InsufficientBuffers { .. }));
        assert!(!node.calls().contains(&NodeCall::StreamOn));
    }

    #[test]
    fn test_requeue_happens_one_call_later() {
        let node = MockNode::new();
        let mut driver = started(&node, &CaptureConfig::default());
        node.clear_calls();

        let mut frame = vec![0u8; driver.geometry().size_norm()];
        assert_eq!(driver.capture(&mut frame), CaptureStatus::Success);
        assert_eq!(driver.capture(&mut frame), CaptureStatus::Success);

        let buffer_calls: Vec<NodeCall> = node
            .calls()
            .into_iter()
            .filter(|c| matches!(c, NodeCall::Queue(_) | NodeCall::Dequeue(_)))
            .collect();
        assert_eq!(
            buffer_calls,
            vec![NodeCall::Dequeue(0), NodeCall::Queue(0), NodeCall::Dequeue(1)]
        );
    }

    #[test]
    fn test_frames_are_normalized() {
        let node = MockNode::new()
            .with_formats(&[FourCC::YUYV])
            .with_pattern(TestPattern::Solid(100, 90, 160));
        let mut driver = started(&node, &CaptureConfig::default());
        assert_eq!(driver.palette().fourcc, FourCC::YUYV);

        let geometry = driver.geometry();
        let mut frame = vec![0u8; geometry.size_norm()];
        assert_eq!(driver.capture(&mut frame), CaptureStatus::Success);
        assert_eq!(frame[0], 100);
        assert_eq!(frame[geometry.motion_size()], 90);
        assert_eq!(frame[geometry.size_norm() - 1], 160);
    }

    #[test]
    fn test_soft_errors_are_retryable() {
        let node = MockNode::new().with_dequeue_errors(&[libc::EIO, libc::EAGAIN]);
        let mut driver = started(&node, &CaptureConfig::default());
        let mut frame = vec![0u8; driver.geometry().size_norm()];

        assert_eq!(driver.capture(&mut frame), CaptureStatus::RetryableMiss);
        assert_eq!(driver.capture(&mut frame), CaptureStatus::RetryableMiss);
        assert_eq!(driver.capture(&mut frame), CaptureStatus::Success);
    }

    #[test]
    fn test_other_errors_are_fatal() {
        let node = MockNode::new().with_dequeue_errors(&[libc::ENODEV]);
        let mut driver = started(&node, &CaptureConfig::default());
        let mut frame = vec![0u8; driver.geometry().size_norm()];
        assert_eq!(driver.capture(&mut frame), CaptureStatus::Fatal);
    }

    #[test]
    #[serial]
    fn test_corrupt_jpeg_frame_is_a_miss() {
        let logs = LogCapture::install();
        let node = MockNode::new().with_formats(&[FourCC::MJPG]);
        let settings = CaptureConfig {
            palette: 8,
            ..CaptureConfig::default()
        };
        let mut driver = started(&node, &settings);
        assert_eq!(driver.palette().fourcc, FourCC::MJPG);
        node.clear_calls();

        let mut frame = vec![0u8; driver.geometry().size_norm()];
        assert_eq!(driver.capture(&mut frame), CaptureStatus::RetryableMiss);
        assert_eq!(driver.capture(&mut frame), CaptureStatus::RetryableMiss);

        let calls = node.calls();
        assert!(calls.contains(&NodeCall::Queue(0)));
        assert!(!calls.contains(&NodeCall::StreamOff));
        assert_eq!(logs.count_containing("dropping frame"), 2);
    }

    #[test]
    fn test_failed_requeue_is_retried() {
        let node = MockNode::new();
        let mut driver = started(&node, &CaptureConfig::default());
        let mut frame = vec![0u8; driver.geometry().size_norm()];
        assert_eq!(driver.capture(&mut frame), CaptureStatus::Success);

        node.fail_next_queue(libc::EIO);
        assert_eq!(driver.capture(&mut frame), CaptureStatus::RetryableMiss);

        node.clear_calls();
        assert_eq!(driver.capture(&mut frame), CaptureStatus::Success);
        let buffer_calls: Vec<NodeCall> = node
            .calls()
            .into_iter()
            .filter(|c| matches!(c, NodeCall::Queue(_) | NodeCall::Dequeue(_)))
            .collect();
        assert_eq!(buffer_calls, vec![NodeCall::Queue(0), NodeCall::Dequeue(1)]);
    }

    #[test]
    fn test_capture_before_configure_is_fatal() {
        let node = MockNode::new();
        let mut driver = driver_for(&node, &CaptureConfig::default());
        driver.open().expect("open should succeed");
        let mut frame = vec![0u8; 16];
        assert_eq!(driver.capture(&mut frame), CaptureStatus::Fatal);
    }

    #[test]
    fn test_stop_stream_off_before_release() {
        let node = MockNode::new();
        let mut driver = started(&node, &CaptureConfig::default());
        node.clear_calls();
        driver.stop();
        assert_eq!(node.calls(), vec![NodeCall::StreamOff, NodeCall::ReleaseBuffers]);

        driver.stop();
        assert_eq!(node.calls().len(), 2);
    }

    #[test]
    #[serial]
    fn test_served_resolution_is_adopted() {
        let logs = LogCapture::install();
        let node = MockNode::new().with_served_size(648, 480);
        let mut driver = started(&node, &CaptureConfig::default());

        let geometry = driver.geometry();
        assert_eq!(geometry, Geometry::new(648, 480));
        assert_eq!(geometry.size_norm(), 648 * 480 * 3 / 2);

        let mut frame = vec![0u8; geometry.size_norm()];
        assert_eq!(driver.capture(&mut frame), CaptureStatus::Success);
        assert_eq!(driver.capture(&mut frame), CaptureStatus::Success);
        assert_eq!(logs.count_containing("adjusted resolution from 640x480 to 648x480"), 1);
    }

    #[test]
    #[serial]
    fn test_silently_widened_rows_are_reconciled_once() {
        let logs = LogCapture::install();
        let node = MockNode::new().with_frame_size(656, 480);
        let mut driver = started(&node, &CaptureConfig::default());
        assert_eq!(driver.geometry(), Geometry::new(640, 480));

        let mut frame = vec![0u8; 656 * 480 * 3 / 2];
        assert_eq!(driver.capture(&mut frame), CaptureStatus::Success);
        assert_eq!(driver.geometry(), Geometry::new(656, 480));
        assert_eq!(driver.capture(&mut frame), CaptureStatus::Success);
        assert_eq!(logs.count_containing("adjusting 640x480 to 656x480"), 1);
    }

    #[test]
    fn test_widened_rows_with_small_output_drop_one_frame() {
        let node = MockNode::new().with_frame_size(656, 480);
        let mut driver = started(&node, &CaptureConfig::default());
        let mut frame = vec![0u8; 640 * 480 * 3 / 2];
        assert_eq!(driver.capture(&mut frame), CaptureStatus::RetryableMiss);

        frame.resize(driver.geometry().size_norm(), 0);
        assert_eq!(driver.capture(&mut frame), CaptureStatus::Success);
    }

    #[test]
    fn test_initial_controls_are_committed() {
        let node = MockNode::new();
        let settings = CaptureConfig {
            params: "brightness=300".to_owned(),
            ..CaptureConfig::default()
        };
        let _driver = started(&node, &settings);
        assert!(node.calls().contains(&NodeCall::SetControl(CID_BRIGHTNESS, 255)));
    }

    #[test]
    fn test_auto_brightness_steps_dark_scene() {
        let node = MockNode::new().with_pattern(TestPattern::Solid(16, 128, 128));
        let settings = CaptureConfig {
            auto_brightness: AutoBrightness::Brightness,
            ..CaptureConfig::default()
        };
        let mut driver = started(&node, &settings);
        node.clear_calls();

        let mut frame = vec![0u8; driver.geometry().size_norm()];
        assert_eq!(driver.capture(&mut frame), CaptureStatus::Success);
        // target 127, average 16: (127 - 16) / 20 + 1 = 6
        assert!(node.calls().contains(&NodeCall::SetControl(CID_BRIGHTNESS, 134)));
    }

    #[test]
    fn test_select_switches_input_and_reapplies_controls() {
        let node = MockNode::new();
        let mut driver = started(&node, &CaptureConfig::default());
        node.clear_calls();

        let selection = Selection {
            input: Some(1),
            params: parse_params("brightness=10"),
            auto_brightness: AutoBrightness::Off,
        };
        assert!(driver.select(&selection).expect("select should succeed"));
        assert!(node.calls().contains(&NodeCall::SelectInput(1)));
        assert!(node.calls().contains(&NodeCall::SetControl(CID_BRIGHTNESS, 10)));

        node.clear_calls();
        assert!(!driver.select(&selection).expect("select should succeed"));
        assert!(node.calls().is_empty());
    }

    #[test]
    fn test_reopen_after_stop() {
        let node = MockNode::new();
        let mut driver = started(&node, &CaptureConfig::default());
        driver.stop();
        driver.open().expect("reopen should succeed");
        driver.configure().expect("reconfigure should succeed");
        let mut frame = vec![0u8; driver.geometry().size_norm()];
        assert_eq!(driver.capture(&mut frame), CaptureStatus::Success);
    }
}
