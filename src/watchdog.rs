//! Staleness detection and tiered reconnect.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use log::{info, warn};
use serde::Deserialize;

use crate::error::Result;
use crate::traits::{CaptureDriver, Geometry};

/// Per-device countdown, decremented by an external monitor once per tick.
#[derive(Debug, Default)]
pub struct Watchdog {
    remaining: AtomicI64,
}

impl Watchdog {
    /// Countdown starting at `ticks`.
    pub const fn new(ticks: i64) -> Self {
        Self {
            remaining: AtomicI64::new(ticks),
        }
    }

    /// Restart the countdown after a successful frame.
    pub fn reset(&self, ticks: i64) {
        self.remaining.store(ticks, Ordering::Release);
    }

    /// One monitor tick. Returns `true` when the countdown just reached zero.
    pub fn tick(&self) -> bool {
        self.remaining.fetch_sub(1, Ordering::AcqRel) == 1
    }

    /// Whether the countdown has run out.
    pub fn expired(&self) -> bool {
        self.remaining.load(Ordering::Acquire) <= 0
    }

    /// Ticks left.
    pub fn remaining(&self) -> i64 {
        self.remaining.load(Ordering::Acquire)
    }
}

/// Backoff tiers for consecutive reconnect failures.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Failures below this count use the short wait.
    pub low_threshold: u32,
    /// Failures below this count use the medium wait.
    pub high_threshold: u32,
    /// Wait in the first tier.
    #[serde(with = "seconds")]
    pub short_wait: Duration,
    /// Wait in the second tier.
    #[serde(with = "seconds")]
    pub medium_wait: Duration,
    /// Wait beyond the high threshold.
    #[serde(with = "seconds")]
    pub long_wait: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            low_threshold: 200,
            high_threshold: 500,
            short_wait: Duration::from_secs(30),
            medium_wait: Duration::from_secs(600),
            long_wait: Duration::from_secs(7200),
        }
    }
}

impl ReconnectPolicy {
    /// Tier (1-based) for a consecutive failure count.
    pub const fn tier(&self, failures: u32) -> u8 {
        if failures < self.low_threshold {
            1
        } else if failures < self.high_threshold {
            2
        } else {
            3
        }
    }

    /// Wait before the next attempt after `failures` consecutive failures.
    pub const fn wait(&self, failures: u32) -> Duration {
        match self.tier(failures) {
            1 => self.short_wait,
            2 => self.medium_wait,
            _ => self.long_wait,
        }
    }
}

mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// Tears a lost driver down and brings it back with tiered backoff.
///
/// Never gives up on its own; the caller decides when to stop calling.
#[derive(Debug)]
pub struct Reconnector {
    policy: ReconnectPolicy,
    timeout: i64,
    failures: u32,
}

impl Reconnector {
    /// Reconnector for a device whose watchdog runs `timeout` ticks.
    pub fn new(policy: ReconnectPolicy, timeout: u32) -> Self {
        Self {
            policy,
            timeout: i64::from(timeout),
            failures: 0,
        }
    }

    /// Consecutive failed attempts since the last success.
    pub const fn failures(&self) -> u32 {
        self.failures
    }

    /// Countdown a freshly started driver gets.
    pub const fn initial_ticks(&self) -> i64 {
        self.timeout * 3
    }

    /// Count one more failure and return the wait before reopening.
    ///
    /// The watchdog is re-armed to cover the wait so the monitor does not
    /// fire again while the caller sleeps.
    pub fn begin(&mut self, name: &str, watchdog: &Watchdog) -> Duration {
        let previous_tier = self.policy.tier(self.failures);
        self.failures = self.failures.saturating_add(1);
        let tier = self.policy.tier(self.failures);
        let wait = self.policy.wait(self.failures);
        if tier != previous_tier || self.failures == 1 {
            warn!(
                "{name}: device lost, retrying every {}s (tier {tier}, {} failures)",
                wait.as_secs(),
                self.failures
            );
        }

        let wait_ticks = i64::try_from(wait.as_secs()).unwrap_or(i64::MAX);
        watchdog.reset(wait_ticks.saturating_add(self.initial_ticks()));
        wait
    }

    /// Tear `driver` down and start it again. A driver that fails to come
    /// back is left stopped.
    pub fn reopen<D: CaptureDriver + ?Sized>(driver: &mut D) -> Result<Geometry> {
        driver.stop();
        let result = driver.open().and_then(|()| driver.configure());
        if result.is_err() {
            driver.stop();
        }
        result
    }

    /// Settle the attempt [`Reconnector::begin`] started. Returns the new
    /// geometry on success.
    pub fn finish(&mut self, name: &str, result: Result<Geometry>, watchdog: &Watchdog) -> Option<Geometry> {
        match result {
            Ok(geometry) => {
                info!("{name}: reconnected at {geometry} after {} attempts", self.failures);
                self.failures = 0;
                watchdog.reset(self.initial_ticks());
                Some(geometry)
            }
            Err(err) => {
                warn!("{name}: reconnect attempt {} failed: {err}", self.failures);
                None
            }
        }
    }

    /// One full reconnect attempt on a driver the caller holds exclusively.
    pub fn attempt_with<D, S>(&mut self, driver: &mut D, watchdog: &Watchdog, sleep: S) -> Option<Geometry>
    where
        D: CaptureDriver + ?Sized,
        S: FnOnce(Duration),
    {
        let name = driver.name().to_owned();
        sleep(self.begin(&name, watchdog));
        let result = Self::reopen(driver);
        self.finish(&name, result, watchdog)
    }
}
