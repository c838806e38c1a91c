//! Typed controls for the camera-stack backend.
//!
//! Values are parsed up front so a malformed directive is rejected before
//! anything reaches the camera.

use log::{debug, warn};

use super::Param;
use crate::error::{CaptureError, Result};

/// Expected value layout of a camera-stack control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueShape {
    /// Single boolean.
    Bool,
    /// Single 32-bit integer (also used for enumerations).
    Int,
    /// Single 64-bit integer.
    Int64,
    /// Single float.
    Float,
    /// Fixed number of floats.
    Floats(usize),
    /// Fixed number of 32-bit integers.
    Ints(usize),
    /// Fixed number of 64-bit integers.
    Int64s(usize),
    /// Rectangle as `x|y|width|height`.
    Rect,
}

impl ValueShape {
    /// Number of pipe-delimited tokens this shape consumes.
    pub const fn tokens(self) -> usize {
        match self {
            Self::Bool | Self::Int | Self::Int64 | Self::Float => 1,
            Self::Floats(count) | Self::Ints(count) | Self::Int64s(count) => count,
            Self::Rect => 4,
        }
    }
}

/// A parsed control value.
#[derive(Debug, Clone, PartialEq)]
pub enum LibcamValue {
    /// Boolean.
    Bool(bool),
    /// 32-bit integer.
    Int(i32),
    /// 64-bit integer.
    Int64(i64),
    /// Float.
    Float(f32),
    /// Float array.
    Floats(Vec<f32>),
    /// 32-bit integer array.
    Ints(Vec<i32>),
    /// 64-bit integer array.
    Int64s(Vec<i64>),
    /// Rectangle.
    Rect {
        /// Left edge.
        x: i32,
        /// Top edge.
        y: i32,
        /// Width.
        width: u32,
        /// Height.
        height: u32,
    },
}

/// A named control ready to hand to the camera stack.
#[derive(Debug, Clone, PartialEq)]
pub struct LibcamControl {
    /// Canonical control name.
    pub name: &'static str,
    /// Whether the control lives in the draft namespace.
    pub draft: bool,
    /// Parsed value.
    pub value: LibcamValue,
}

/// Catalog of supported controls: name, value shape, draft flag.
pub static LIBCAM_CONTROLS: [(&str, ValueShape, bool); 47] = [
    ("AeEnable", ValueShape::Bool, false),
    ("AeLocked", ValueShape::Bool, false),
    ("AeMeteringMode", ValueShape::Int, false),
    ("AeConstraintMode", ValueShape::Int, false),
    ("AeExposureMode", ValueShape::Int, false),
    ("ExposureValue", ValueShape::Float, false),
    ("ExposureTime", ValueShape::Int, false),
    ("AnalogueGain", ValueShape::Float, false),
    ("Brightness", ValueShape::Float, false),
    ("Contrast", ValueShape::Float, false),
    ("Lux", ValueShape::Float, false),
    ("AwbEnable", ValueShape::Bool, false),
    ("AwbMode", ValueShape::Int, false),
    ("AwbLocked", ValueShape::Bool, false),
    ("ColourGains", ValueShape::Floats(2), false),
    ("ColourTemperature", ValueShape::Int, false),
    ("Saturation", ValueShape::Float, false),
    ("SensorBlackLevels", ValueShape::Ints(4), false),
    ("Sharpness", ValueShape::Float, false),
    ("FocusFoM", ValueShape::Int, false),
    ("ColourCorrectionMatrix", ValueShape::Floats(9), false),
    ("ScalerCrop", ValueShape::Rect, false),
    ("DigitalGain", ValueShape::Float, false),
    ("FrameDuration", ValueShape::Int64, false),
    ("FrameDurationLimits", ValueShape::Int64s(2), false),
    ("SensorTemperature", ValueShape::Float, false),
    ("SensorTimestamp", ValueShape::Int64, false),
    ("AfMode", ValueShape::Int, false),
    ("AfRange", ValueShape::Int, false),
    ("AfSpeed", ValueShape::Int, false),
    ("AfMetering", ValueShape::Int, false),
    ("AfWindows", ValueShape::Rect, false),
    ("AfTrigger", ValueShape::Int, false),
    ("AfPause", ValueShape::Int, false),
    ("LensPosition", ValueShape::Float, false),
    ("AfState", ValueShape::Int, false),
    ("AfPauseState", ValueShape::Int, false),
    ("AePrecaptureTrigger", ValueShape::Int, true),
    ("NoiseReductionMode", ValueShape::Int, true),
    ("ColorCorrectionAberrationMode", ValueShape::Int, true),
    ("AeState", ValueShape::Int, true),
    ("AwbState", ValueShape::Int, true),
    ("SensorRollingShutterSkew", ValueShape::Int, true),
    ("LensShadingMapMode", ValueShape::Int, true),
    ("PipelineDepth", ValueShape::Int, true),
    ("MaxLatency", ValueShape::Int, true),
    ("TestPatternMode", ValueShape::Int, true),
];

fn parse_token<T: std::str::FromStr>(name: &str, token: &str) -> Result<T> {
    token
        .trim()
        .parse()
        .map_err(|_| CaptureError::control(name, format!("cannot parse '{}'", token.trim())))
}

fn parse_bool(name: &str, token: &str) -> Result<bool> {
    match token.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => Err(CaptureError::control(name, format!("'{other}' is not a boolean"))),
    }
}

/// Parse `value` for a control of `shape`.
///
/// Tokens are consumed left to right; fewer than the shape requires rejects
/// the whole control, extra tokens are ignored.
pub fn parse_value(name: &str, shape: ValueShape, value: &str) -> Result<LibcamValue> {
    let needed = shape.tokens();
    let tokens: Vec<&str> = value.split('|').take(needed).collect();
    if tokens.len() < needed || tokens.iter().any(|token| token.trim().is_empty()) {
        return Err(CaptureError::control(
            name,
            format!("needs {needed} values separated by '|', got '{value}'"),
        ));
    }

    let first = tokens.first().copied().unwrap_or_default();
    let value = match shape {
        ValueShape::Bool => LibcamValue::Bool(parse_bool(name, first)?),
        ValueShape::Int => LibcamValue::Int(parse_token(name, first)?),
        ValueShape::Int64 => LibcamValue::Int64(parse_token(name, first)?),
        ValueShape::Float => LibcamValue::Float(parse_token(name, first)?),
        ValueShape::Floats(_) => LibcamValue::Floats(
            tokens.iter().map(|t| parse_token(name, t)).collect::<Result<_>>()?,
        ),
        ValueShape::Ints(_) => LibcamValue::Ints(
            tokens.iter().map(|t| parse_token(name, t)).collect::<Result<_>>()?,
        ),
        ValueShape::Int64s(_) => LibcamValue::Int64s(
            tokens.iter().map(|t| parse_token(name, t)).collect::<Result<_>>()?,
        ),
        ValueShape::Rect => {
            let ints: Vec<i64> = tokens.iter().map(|t| parse_token(name, t)).collect::<Result<_>>()?;
            let &[x, y, width, height] = ints.as_slice() else {
                return Err(CaptureError::control(name, "rectangle needs 4 values"));
            };
            let narrow = |v: i64| i32::try_from(v).map_err(|_| CaptureError::control(name, "value out of range"));
            let size = |v: i64| u32::try_from(v).map_err(|_| CaptureError::control(name, "size must be positive"));
            LibcamValue::Rect {
                x: narrow(x)?,
                y: narrow(y)?,
                width: size(width)?,
                height: size(height)?,
            }
        }
    };
    Ok(value)
}

/// Parse one directive against the catalog.
///
/// Returns `Ok(None)` for names the catalog does not know.
pub fn parse_libcam_control(param: &Param) -> Result<Option<LibcamControl>> {
    let Some(&(name, shape, draft)) = LIBCAM_CONTROLS
        .iter()
        .find(|(name, _, _)| name.eq_ignore_ascii_case(param.name.trim()))
    else {
        return Ok(None);
    };
    let value = parse_value(name, shape, &param.value)?;
    Ok(Some(LibcamControl { name, draft, value }))
}

/// Parse every directive, skipping unknown names and rejecting malformed ones.
pub fn parse_libcam_controls(params: &[Param]) -> Vec<LibcamControl> {
    params
        .iter()
        .filter_map(|param| match parse_libcam_control(param) {
            Ok(Some(control)) => Some(control),
            Ok(None) => {
                debug!("No camera control named {}", param.name);
                None
            }
            Err(err) => {
                warn!("Skipping control: {err}");
                None
            }
        })
        .collect()
}
