//! Mapping of user control directives onto device controls.
//!
//! Kernel controls are enumerated once per open into a [`ControlSet`];
//! every configuration pass resets pending values, applies the user's
//! directives with clamping, and commits only what changed.

mod autobright;
mod libcam;
mod params;

use std::collections::HashMap;

use log::{debug, info, warn};

use crate::error::Result;
use crate::traits::{ControlInfo, ControlKind};

pub use autobright::{sample_average, step_toward, DAMPER, HYSTERESIS};
pub use libcam::{parse_libcam_controls, LibcamControl, LibcamValue, ValueShape, LIBCAM_CONTROLS};
pub use params::{parse_params, Param};

/// Kernel id of the brightness control.
pub const CID_BRIGHTNESS: u32 = 0x0098_0900;
/// Kernel id of the exposure control.
pub const CID_EXPOSURE: u32 = 0x0098_0911;
/// Kernel id of the absolute exposure control.
pub const CID_EXPOSURE_ABSOLUTE: u32 = 0x009a_0902;

/// Generated identifier a control also answers to, e.g. `ID09963776`.
pub fn generated_id(id: u32) -> String {
    format!("ID{id:08}")
}

/// A typed, range-bounded device control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlDescriptor {
    /// Kernel control identifier.
    pub id: u32,
    /// Human-readable name.
    pub name: String,
    /// Control type.
    pub kind: ControlKind,
    /// Lowest legal value.
    pub minimum: i64,
    /// Highest legal value.
    pub maximum: i64,
    /// Device default.
    pub default: i64,
    /// Value last written to (or read from) the device.
    pub current: i64,
    /// Value to write on the next commit.
    pub pending: i64,
}

impl ControlDescriptor {
    /// Build from an enumerated control; pending starts equal to current.
    pub fn from_info(info: ControlInfo) -> Self {
        Self {
            id: info.id,
            name: info.name,
            kind: info.kind,
            minimum: info.minimum,
            maximum: info.maximum,
            default: info.default,
            current: info.current,
            pending: info.current,
        }
    }

    /// Clamp `value` into this control's legal range.
    ///
    /// Booleans coerce any nonzero value to 1.
    pub fn clamp(&self, value: i64) -> i64 {
        match self.kind {
            ControlKind::Boolean => i64::from(value != 0),
            _ => value.clamp(self.minimum, self.maximum.max(self.minimum)),
        }
    }

    /// Set the pending value, warning when it had to be clamped.
    pub fn set_pending(&mut self, value: i64) {
        let clamped = self.clamp(value);
        if self.kind != ControlKind::Boolean && clamped != value {
            let bound = if value < self.minimum { "minimum" } else { "maximum" };
            warn!(
                "{} control value {value} is outside {}..={}, using {bound} {clamped}",
                self.name, self.minimum, self.maximum
            );
        }
        self.pending = clamped;
    }

    /// Whether this directive name refers to this control.
    pub fn matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name) || generated_id(self.id).eq_ignore_ascii_case(name)
    }

    /// Whether a commit would write this control.
    pub const fn is_dirty(&self) -> bool {
        self.pending != self.current
    }
}

/// Outcome of one commit pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitReport {
    /// Controls written successfully.
    pub written: usize,
    /// Controls whose write failed.
    pub failed: usize,
}

/// Owned sequence of control descriptors, indexed by id.
#[derive(Debug, Clone, Default)]
pub struct ControlSet {
    descriptors: Vec<ControlDescriptor>,
    by_id: HashMap<u32, usize>,
}

impl ControlSet {
    /// Build from enumerated controls, keeping only writable kinds.
    pub fn from_infos(infos: Vec<ControlInfo>) -> Self {
        let descriptors: Vec<ControlDescriptor> = infos
            .into_iter()
            .filter(|info| info.kind != ControlKind::Other)
            .map(ControlDescriptor::from_info)
            .collect();
        let by_id = descriptors
            .iter()
            .enumerate()
            .map(|(position, descriptor)| (descriptor.id, position))
            .collect();
        Self { descriptors, by_id }
    }

    /// Number of descriptors.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Whether the device exposes no writable controls.
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Descriptor by kernel id.
    pub fn get(&self, id: u32) -> Option<&ControlDescriptor> {
        self.by_id.get(&id).and_then(|&position| self.descriptors.get(position))
    }

    /// Mutable descriptor by kernel id.
    pub fn get_mut(&mut self, id: u32) -> Option<&mut ControlDescriptor> {
        let position = *self.by_id.get(&id)?;
        self.descriptors.get_mut(position)
    }

    /// Iterate over all descriptors.
    pub fn iter(&self) -> impl Iterator<Item = &ControlDescriptor> {
        self.descriptors.iter()
    }

    /// Reset every pending value to its default, then apply `params`.
    ///
    /// The control with id `held` keeps its current value unless a
    /// directive names it; auto-brightness owns it between passes.
    /// Unknown names are ignored.
    pub fn apply_params(&mut self, params: &[Param], held: Option<u32>) {
        for descriptor in &mut self.descriptors {
            descriptor.pending = if Some(descriptor.id) == held {
                descriptor.current
            } else {
                descriptor.default
            };
        }

        for param in params {
            let Some(descriptor) = self.descriptors.iter_mut().find(|d| d.matches(&param.name)) else {
                debug!("No device control named {}", param.name);
                continue;
            };
            let Some(value) = param.int_value() else {
                warn!("Control {} has non-numeric value '{}'", param.name, param.value);
                continue;
            };
            descriptor.set_pending(value);
        }
    }

    /// The user's explicit value for a control, if any directive names it.
    pub fn user_value(&self, params: &[Param], id: u32) -> Option<i64> {
        let descriptor = self.get(id)?;
        params
            .iter()
            .rev()
            .find(|param| descriptor.matches(&param.name))
            .and_then(Param::int_value)
            .map(|value| descriptor.clamp(value))
    }

    /// Write every dirty control through `write`.
    ///
    /// Each write is independent; failures are logged and the control stays
    /// dirty for the next pass.
    pub fn commit<F>(&mut self, mut write: F) -> CommitReport
    where
        F: FnMut(u32, i64) -> Result<()>,
    {
        let mut report = CommitReport::default();
        for descriptor in self.descriptors.iter_mut().filter(|d| d.is_dirty()) {
            match write(descriptor.id, descriptor.pending) {
                Ok(()) => {
                    debug!("Set control \"{}\" to {}", descriptor.name, descriptor.pending);
                    descriptor.current = descriptor.pending;
                    report.written += 1;
                }
                Err(err) => {
                    warn!(
                        "Setting control {} \"{}\" to {} failed: {err}",
                        generated_id(descriptor.id),
                        descriptor.name,
                        descriptor.pending
                    );
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Log every control with its range.
    pub fn log_controls(&self) {
        if self.is_empty() {
            return;
        }
        info!("Device controls:");
        for descriptor in &self.descriptors {
            info!(
                "  {} {}, {} to {} (default {}, current {})",
                generated_id(descriptor.id),
                descriptor.name,
                descriptor.minimum,
                descriptor.maximum,
                descriptor.default,
                descriptor.current
            );
        }
    }
}
