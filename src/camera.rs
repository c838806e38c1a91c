//! Consumer-facing frame source for one logical camera.

use std::sync::Arc;
use std::time::Duration;

use log::debug;

use crate::config::CaptureConfig;
use crate::error::Result;
use crate::registry::{DeviceHandle, DeviceRegistry};
use crate::traits::{CaptureStatus, Geometry};
use crate::watchdog::Watchdog;

/// Frames from a shared device, with watchdog-driven recovery.
pub struct CameraSource {
    handle: DeviceHandle,
    geometry: Geometry,
}

impl CameraSource {
    /// Open the device `config` names in the process-wide registry.
    pub fn open(config: &CaptureConfig) -> Result<Self> {
        DeviceRegistry::global().open(config).map(Self::new)
    }

    /// Wrap an already opened handle.
    pub fn new(handle: DeviceHandle) -> Self {
        let geometry = handle.geometry();
        Self { handle, geometry }
    }

    /// Countdown for an external monitor to tick. Shared by every source
    /// on the same device.
    pub fn watchdog(&self) -> Arc<Watchdog> {
        self.handle.device().watchdog()
    }

    /// Current frame geometry; re-read after every [`CameraSource::next`].
    pub const fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Consecutive failed reconnects of the underlying device.
    pub fn failures(&self) -> u32 {
        self.handle.device().failures()
    }

    /// Whether the underlying device is lost.
    pub fn is_lost(&self) -> bool {
        self.handle.device().is_lost()
    }

    /// Next frame into `dst`, resized to the current geometry.
    pub fn next(&mut self, dst: &mut Vec<u8>) -> CaptureStatus {
        self.next_with(dst, std::thread::sleep)
    }

    /// Like [`CameraSource::next`] with an injectable sleep for reconnect waits.
    pub fn next_with<S: FnOnce(Duration)>(&mut self, dst: &mut Vec<u8>, sleep: S) -> CaptureStatus {
        if self.handle.device().needs_recovery() {
            let Some(geometry) = self.handle.recover(sleep) else {
                return CaptureStatus::Fatal;
            };
            self.geometry = geometry;
        }

        self.geometry = self.handle.geometry();
        dst.resize(self.geometry.size_norm(), 0);
        let status = self.handle.capture(dst);
        match status {
            CaptureStatus::Success => {
                self.handle.device().frame_delivered();
                self.geometry = self.handle.geometry();
            }
            CaptureStatus::RetryableMiss => debug!("{}: frame missed", self.handle.device().key()),
            CaptureStatus::Fatal => self.handle.device().mark_lost(),
        }
        status
    }
}
