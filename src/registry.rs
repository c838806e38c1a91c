//! Process-wide table of open devices shared by consumer threads.
//!
//! The first consumer of a device identifier opens and configures the
//! driver; later consumers share it. Capture turns rotate between consumers,
//! each keeping the device for a quota of frames. Staleness and reconnect
//! state belong to the device, so one lost camera is brought back once no
//! matter how many consumers read from it. The driver is stopped when the
//! last handle is dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use log::{debug, info, trace, warn};

use crate::config::{Backend, CaptureConfig};
use crate::error::Result;
use crate::polling::PollingDriver;
use crate::traits::{CaptureDriver, CaptureStatus, Geometry, Selection};
use crate::watchdog::{Reconnector, Watchdog};

/// Identifies one consumer of a shared device.
pub type ConsumerId = u64;

/// A driver shared between threads.
pub type BoxedDriver = Box<dyn CaptureDriver + Send>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct Ownership {
    owner: Option<ConsumerId>,
    last_owner: Option<ConsumerId>,
    frames_left: u32,
    waiting: usize,
}

#[derive(Debug)]
struct Recovery {
    reconnector: Reconnector,
    lost: bool,
    recovering: bool,
}

/// One open device with its turn-taking and recovery state.
pub struct SharedDevice {
    key: String,
    driver: Mutex<BoxedDriver>,
    ownership: Mutex<Ownership>,
    turn: Condvar,
    watchdog: Arc<Watchdog>,
    timeout: i64,
    recovery: Mutex<Recovery>,
}

impl SharedDevice {
    fn start<F>(key: &str, config: &CaptureConfig, make: F) -> Result<Self>
    where
        F: FnOnce() -> Result<BoxedDriver>,
    {
        let mut driver = make()?;
        driver.open()?;
        let geometry = match driver.configure() {
            Ok(geometry) => geometry,
            Err(err) => {
                driver.stop();
                return Err(err);
            }
        };
        info!("{key}: started {} capture at {geometry}", driver.name());

        let reconnector = Reconnector::new(config.reconnect.clone(), config.watchdog_timeout);
        Ok(Self {
            key: key.to_owned(),
            driver: Mutex::new(driver),
            ownership: Mutex::new(Ownership::default()),
            turn: Condvar::new(),
            watchdog: Arc::new(Watchdog::new(reconnector.initial_ticks())),
            timeout: i64::from(config.watchdog_timeout),
            recovery: Mutex::new(Recovery {
                reconnector,
                lost: false,
                recovering: false,
            }),
        })
    }

    /// Registry key of this device.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Consumer currently holding the device, if any.
    pub fn owner(&self) -> Option<ConsumerId> {
        lock(&self.ownership).owner
    }

    /// Countdown for an external monitor to tick.
    pub fn watchdog(&self) -> Arc<Watchdog> {
        Arc::clone(&self.watchdog)
    }

    /// Whether the device is lost and not yet reconnected.
    pub fn is_lost(&self) -> bool {
        lock(&self.recovery).lost
    }

    /// Consecutive failed reconnects.
    pub fn failures(&self) -> u32 {
        lock(&self.recovery).reconnector.failures()
    }

    /// Whether the next capture must be preceded by a reconnect.
    pub fn needs_recovery(&self) -> bool {
        self.is_lost() || self.watchdog.expired()
    }

    /// Record a fatal capture.
    pub fn mark_lost(&self) {
        lock(&self.recovery).lost = true;
    }

    /// Restart the watchdog after a delivered frame.
    pub fn frame_delivered(&self) {
        self.watchdog.reset(self.timeout);
    }
}

struct Entry {
    device: Arc<SharedDevice>,
    refs: usize,
}

enum Slot {
    Opening,
    Open(Entry),
}

#[derive(Default)]
struct Inner {
    devices: Mutex<HashMap<String, Slot>>,
    opened: Condvar,
    next_consumer: AtomicU64,
}

/// Keyed table of open devices.
#[derive(Clone, Default)]
pub struct DeviceRegistry {
    inner: Arc<Inner>,
}

impl DeviceRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> &'static Self {
        static GLOBAL: OnceLock<DeviceRegistry> = OnceLock::new();
        GLOBAL.get_or_init(Self::new)
    }

    /// Open the device `config` names, building the driver for its backend.
    pub fn open(&self, config: &CaptureConfig) -> Result<DeviceHandle> {
        self.open_with(&config.backend.key(), config, || driver_for(config))
    }

    /// Share the device at `key`, creating it with `make` on first use.
    ///
    /// A new driver is opened and configured before it is published; if
    /// either fails nothing is registered. The table is not locked while a
    /// driver starts, so other devices open meanwhile; consumers of the same
    /// key wait for the outcome.
    pub fn open_with<F>(&self, key: &str, config: &CaptureConfig, make: F) -> Result<DeviceHandle>
    where
        F: FnOnce() -> Result<BoxedDriver>,
    {
        let mut devices = self
            .inner
            .opened
            .wait_while(lock(&self.inner.devices), |devices| {
                matches!(devices.get(key), Some(Slot::Opening))
            })
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(Slot::Open(entry)) = devices.get_mut(key) {
            entry.refs += 1;
            debug!("{key}: shared by {} consumers", entry.refs);
            let device = Arc::clone(&entry.device);
            drop(devices);
            return Ok(self.handle(device, config));
        }
        devices.insert(key.to_owned(), Slot::Opening);
        drop(devices);

        let started = SharedDevice::start(key, config, make).map(Arc::new);
        let mut devices = lock(&self.inner.devices);
        match &started {
            Ok(device) => {
                devices.insert(
                    key.to_owned(),
                    Slot::Open(Entry {
                        device: Arc::clone(device),
                        refs: 1,
                    }),
                );
            }
            Err(_) => {
                devices.remove(key);
            }
        }
        drop(devices);
        self.inner.opened.notify_all();

        started.map(|device| self.handle(device, config))
    }

    fn handle(&self, device: Arc<SharedDevice>, config: &CaptureConfig) -> DeviceHandle {
        DeviceHandle {
            registry: self.clone(),
            device,
            consumer: self.inner.next_consumer.fetch_add(1, Ordering::Relaxed) + 1,
            selection: config.selection(),
            quota: config.roundrobin_frames.max(1),
            skip: config.roundrobin_skip,
            scratch: Vec::new(),
        }
    }

    /// Number of handles on the device at `key`.
    pub fn refcount(&self, key: &str) -> usize {
        match lock(&self.inner.devices).get(key) {
            Some(Slot::Open(entry)) => entry.refs,
            _ => 0,
        }
    }

    /// Number of open devices.
    pub fn len(&self) -> usize {
        lock(&self.inner.devices)
            .values()
            .filter(|slot| matches!(slot, Slot::Open(_)))
            .count()
    }

    /// Whether no device is open.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, key: &str) {
        let mut devices = lock(&self.inner.devices);
        let Some(Slot::Open(entry)) = devices.get_mut(key) else {
            return;
        };
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs > 0 {
            return;
        }
        let removed = devices.remove(key);
        drop(devices);
        if let Some(Slot::Open(entry)) = removed {
            lock(&entry.device.driver).stop();
            info!("{key}: last consumer gone, device closed");
        }
    }
}

/// Build the driver for `config`'s backend.
pub fn driver_for(config: &CaptureConfig) -> Result<BoxedDriver> {
    match &config.backend {
        Backend::V4l2 { device } => Ok(Box::new(PollingDriver::v4l2(device.clone(), config))),
        #[cfg(feature = "libcamera")]
        Backend::Libcamera { .. } => Ok(Box::new(crate::libcam::CompletionDriver::new(
            crate::libcam::LibcameraService::new(),
            config,
        ))),
        #[cfg(not(feature = "libcamera"))]
        Backend::Libcamera { device } => Err(crate::error::CaptureError::Unsupported(format!(
            "{device}: built without libcamera support"
        ))),
    }
}

/// One consumer's reference to a shared device.
pub struct DeviceHandle {
    registry: DeviceRegistry,
    device: Arc<SharedDevice>,
    consumer: ConsumerId,
    selection: Selection,
    quota: u32,
    skip: u32,
    scratch: Vec<u8>,
}

impl DeviceHandle {
    /// The shared device.
    pub fn device(&self) -> &SharedDevice {
        &self.device
    }

    /// This consumer's id.
    pub const fn consumer(&self) -> ConsumerId {
        self.consumer
    }

    /// Geometry of the device's last configuration.
    pub fn geometry(&self) -> Geometry {
        lock(&self.device.driver).geometry()
    }

    /// Wait for this consumer's turn. Returns `true` when the device was
    /// last used by another consumer.
    fn acquire_turn(&self) -> bool {
        let me = self.consumer;
        let mut ownership = lock(&self.device.ownership);
        ownership.waiting += 1;
        let mut ownership = self
            .device
            .turn
            .wait_while(ownership, |o| match o.owner {
                Some(owner) => owner != me,
                None => o.last_owner == Some(me) && o.waiting > 1,
            })
            .unwrap_or_else(PoisonError::into_inner);
        ownership.waiting -= 1;

        if ownership.owner == Some(me) {
            return false;
        }
        let handoff = ownership.last_owner.is_some_and(|last| last != me);
        ownership.owner = Some(me);
        ownership.last_owner = Some(me);
        ownership.frames_left = self.quota;
        trace!("{}: consumer {me} takes its turn", self.device.key);
        handoff
    }

    fn finish_frame(&self, status: CaptureStatus) {
        let mut ownership = lock(&self.device.ownership);
        if ownership.owner != Some(self.consumer) {
            return;
        }
        if status == CaptureStatus::Success {
            ownership.frames_left = ownership.frames_left.saturating_sub(1);
        }
        if ownership.frames_left == 0 || status == CaptureStatus::Fatal {
            ownership.owner = None;
            drop(ownership);
            self.device.turn.notify_all();
        }
    }

    fn flush(&mut self, driver: &mut dyn CaptureDriver) {
        let frames = driver.buffer_count() + self.skip.saturating_sub(1);
        self.scratch.resize(driver.geometry().size_norm(), 0);
        debug!("{}: input changed, discarding {frames} frames", self.device.key);
        for _ in 0..frames {
            if driver.capture(&mut self.scratch) == CaptureStatus::Fatal {
                break;
            }
        }
    }

    /// Capture one normalized frame into `dst` during this consumer's turn.
    ///
    /// Blocks while another consumer holds the device.
    pub fn capture(&mut self, dst: &mut [u8]) -> CaptureStatus {
        let handoff = self.acquire_turn();
        let device = Arc::clone(&self.device);
        let mut driver = lock(&device.driver);
        if handoff {
            match driver.select(&self.selection) {
                Ok(true) => self.flush(driver.as_mut()),
                Ok(false) => {}
                Err(err) => warn!("{}: applying consumer settings failed: {err}", device.key),
            }
        }
        let status = driver.capture(dst);
        drop(driver);
        self.finish_frame(status);
        status
    }

    /// Bring a lost or stale device back, waiting through `sleep` first.
    ///
    /// Only one consumer reconnects a device at a time; the others get
    /// `None` until it is back. The wait happens outside every lock, and the
    /// driver is restarted during this consumer's turn.
    pub fn recover<S: FnOnce(Duration)>(&self, sleep: S) -> Option<Geometry> {
        self.yield_turn();
        let device = &self.device;
        let wait = {
            let mut recovery = lock(&device.recovery);
            if recovery.recovering {
                return None;
            }
            if recovery.lost || device.watchdog.expired() {
                if !recovery.lost {
                    warn!("{}: no frame before the watchdog expired", device.key);
                    recovery.lost = true;
                }
                recovery.recovering = true;
                Some(recovery.reconnector.begin(&device.key, &device.watchdog))
            } else {
                None
            }
        };
        let Some(wait) = wait else {
            return Some(self.geometry());
        };

        sleep(wait);

        self.acquire_turn();
        let result = Reconnector::reopen(lock(&device.driver).as_mut());
        self.yield_turn();

        let mut recovery = lock(&device.recovery);
        recovery.recovering = false;
        let geometry = recovery.reconnector.finish(&device.key, result, &device.watchdog);
        recovery.lost = geometry.is_none();
        geometry
    }

    /// Give up the current turn early.
    pub fn yield_turn(&self) {
        let mut ownership = lock(&self.device.ownership);
        if ownership.owner == Some(self.consumer) {
            ownership.owner = None;
            drop(ownership);
            self.device.turn.notify_all();
        }
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        self.yield_turn();
        self.registry.release(&self.device.key);
    }
}
