//! Auto-brightness feedback on one exposure-like control.

use log::debug;

use super::{ControlSet, Param, CID_BRIGHTNESS, CID_EXPOSURE, CID_EXPOSURE_ABSOLUTE};
use crate::config::AutoBrightness;

/// Half-width of the band around the target where nothing changes.
pub const HYSTERESIS: i64 = 20;

/// Divisor applied to the deviation before stepping.
pub const DAMPER: i64 = 20;

impl AutoBrightness {
    /// Kernel id of the control this mode drives.
    pub const fn control_id(self) -> Option<u32> {
        match self {
            Self::Off => None,
            Self::Brightness => Some(CID_BRIGHTNESS),
            Self::Exposure => Some(CID_EXPOSURE),
            Self::ExposureAbsolute => Some(CID_EXPOSURE_ABSOLUTE),
        }
    }
}

/// Mean of every 10th sample of a luma plane.
pub fn sample_average(luma: &[u8]) -> Option<i64> {
    let (sum, count) = luma
        .iter()
        .step_by(10)
        .fold((0i64, 0i64), |(sum, count), &y| (sum + i64::from(y), count + 1));
    (count > 0).then(|| sum / count)
}

/// Next control value for a rescaled `average`, or `None` when it is inside
/// the hysteresis band around `target` or the control is already at its limit.
pub fn step_toward(value: i64, minimum: i64, maximum: i64, target: i64, average: i64) -> Option<i64> {
    let window_high = (target + HYSTERESIS).min(maximum);
    let window_low = (target - HYSTERESIS).max(minimum);

    let next = if average > window_high {
        let step = ((average - target) / DAMPER + 1).min(value - minimum);
        (value - step).max(minimum)
    } else if average < window_low {
        let step = ((target - average) / DAMPER + 1).min(maximum - value);
        (value + step).min(maximum)
    } else {
        return None;
    };
    (next != value).then_some(next)
}

impl ControlSet {
    /// Run one feedback step for `mode` from the latest luma average.
    ///
    /// The target is the user's explicit value for the control, or the
    /// midpoint of its range. Returns the new pending value when a step was
    /// computed.
    pub fn auto_brightness(&mut self, mode: AutoBrightness, params: &[Param], luma_average: i64) -> Option<i64> {
        let id = mode.control_id()?;
        let target = self.user_value(params, id);
        let descriptor = self.get_mut(id)?;
        let (minimum, maximum) = (descriptor.minimum, descriptor.maximum);
        let target = target.unwrap_or((maximum - minimum) / 2);
        let average = luma_average * (maximum - minimum) / 255;

        let next = step_toward(descriptor.current, minimum, maximum, target, average)?;
        debug!(
            "Auto-brightness: average {average} target {target}, {} {} -> {next}",
            descriptor.name, descriptor.current
        );
        descriptor.pending = next;
        Some(next)
    }
}
