//! Frame validation utilities for test pattern verification.
//!
//! Frames are checked in the normalized planar 4:2:0 layout the drivers
//! produce, so the same checks work for every source palette. Useful for
//! integration testing with virtual cameras.

use crate::error::{CaptureError, Result};
use crate::traits::{FrameMetadata, Geometry};

/// Expected RGB values for SMPTE color bars (8 bars).
///
/// Colors in order: White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
const SMPTE_COLOR_BARS: [(u8, u8, u8); 8] = [
    (235, 235, 235), // White
    (235, 235, 11),  // Yellow
    (12, 236, 237),  // Cyan
    (13, 237, 13),   // Green
    (237, 13, 237),  // Magenta
    (238, 14, 13),   // Red
    (15, 15, 239),   // Blue
    (16, 16, 16),    // Black
];

/// Tolerance for RGB color matching (accounts for chroma subsampling and rounding).
const COLOR_TOLERANCE: u32 = 15;

/// RGB value of the pixel at (`x`, `y`) in a normalized frame.
///
/// Returns `None` when the coordinates or the frame size do not fit `geometry`.
#[must_use]
pub fn pixel_at(frame: &[u8], geometry: Geometry, x: u32, y: u32) -> Option<(u8, u8, u8)> {
    if x >= geometry.width || y >= geometry.height || frame.len() < geometry.size_norm() {
        return None;
    }
    let width = geometry.width as usize;
    let luma = geometry.motion_size();
    let chroma = luma / 4;
    let chroma_offset = (y as usize / 2) * (width / 2) + x as usize / 2;

    let y_val = *frame.get(y as usize * width + x as usize)?;
    let u = *frame.get(luma + chroma_offset)?;
    let v = *frame.get(luma + chroma + chroma_offset)?;
    Some(yuv_to_rgb(y_val, u, v))
}

/// Convert YUV values to RGB.
///
/// Uses the ITU-R BT.601 conversion formula.
#[must_use]
#[allow(clippy::many_single_char_names)]
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let y_f = f32::from(y);
    let u_f = f32::from(u) - 128.0;
    let v_f = f32::from(v) - 128.0;

    let r = 1.402f32.mul_add(v_f, y_f);
    let g = 0.714_14f32.mul_add(-v_f, 0.344_14f32.mul_add(-u_f, y_f));
    let b = 1.772f32.mul_add(u_f, y_f);

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let clamp = |val: f32| -> u8 { val.clamp(0.0, 255.0) as u8 };

    (clamp(r), clamp(g), clamp(b))
}

/// Validates that a frame contains the SMPTE color bar pattern.
///
/// Samples the center of each of the 8 vertical stripes on the middle row.
///
/// # Errors
///
/// Returns `Validation` if the frame is too small for `geometry` or any
/// bar does not match its expected color within tolerance.
pub fn validate_color_bars(frame: &[u8], geometry: Geometry) -> Result<()> {
    let bar_width = geometry.width / 8;
    let center_y = geometry.height / 2;

    for (bar_idx, expected_rgb) in (0u32..).zip(SMPTE_COLOR_BARS.iter()) {
        let sample_x = bar_idx * bar_width + bar_width / 2;
        let actual_rgb = pixel_at(frame, geometry, sample_x, center_y).ok_or_else(|| {
            CaptureError::Validation(format!("Failed to get pixel at ({sample_x}, {center_y})"))
        })?;

        if !colors_match(actual_rgb, *expected_rgb, COLOR_TOLERANCE) {
            return Err(CaptureError::Validation(format!(
                "Color bar {bar_idx} mismatch at ({sample_x}, {center_y}): \
                 expected RGB{expected_rgb:?}, got RGB{actual_rgb:?}"
            )));
        }
    }

    Ok(())
}

/// Validates that a frame contains a horizontal gradient pattern.
///
/// Luma along the middle row must not drop by more than one step between
/// samples and must rise by at least 50 across the frame.
///
/// # Errors
///
/// Returns `Validation` if the frame is too small, the luma decreases or
/// the total change is too small (solid color).
pub fn validate_gradient(frame: &[u8], geometry: Geometry) -> Result<()> {
    let width = geometry.width as usize;
    let center_y = geometry.height as usize / 2;
    let row = frame
        .get(center_y * width..(center_y + 1) * width)
        .filter(|_| frame.len() >= geometry.size_norm())
        .ok_or_else(|| CaptureError::Validation(format!("Frame too small for {geometry}")))?;

    let samples: Vec<(usize, u8)> = row.iter().copied().enumerate().step_by(10).collect();
    for pair in samples.windows(2) {
        let &[(_, prev), (x, luma)] = pair else { continue };
        if u16::from(luma) + 1 < u16::from(prev) {
            return Err(CaptureError::Validation(format!(
                "Gradient not monotonically increasing at x={x}: luma {luma} < previous {prev}"
            )));
        }
    }

    let first = samples.first().map_or(0, |&(_, luma)| luma);
    let last = samples.last().map_or(0, |&(_, luma)| luma);
    let change = last.saturating_sub(first);
    if change < 50 {
        return Err(CaptureError::Validation(format!(
            "Insufficient luma change for gradient: {change} (expected at least 50)"
        )));
    }

    Ok(())
}

/// Validates that frame sequence numbers increment by 1 with no gaps.
///
/// # Errors
///
/// Returns `Validation` if `frames` is empty or any sequence number does
/// not follow its predecessor.
pub fn validate_frame_sequence(frames: &[FrameMetadata]) -> Result<()> {
    if frames.is_empty() {
        return Err(CaptureError::Validation(
            "Cannot validate empty frame sequence".to_owned(),
        ));
    }

    for (i, pair) in frames.windows(2).enumerate() {
        let [prev, curr] = pair else { continue };
        if curr.sequence != prev.sequence.wrapping_add(1) {
            return Err(CaptureError::Validation(format!(
                "Frame sequence gap at index {}: expected {}, got {}",
                i + 1,
                prev.sequence.wrapping_add(1),
                curr.sequence
            )));
        }
    }

    Ok(())
}

/// Whether all three channels are within `tolerance`.
fn colors_match(actual: (u8, u8, u8), expected: (u8, u8, u8), tolerance: u32) -> bool {
    let (ar, ag, ab) = actual;
    let (er, eg, eb) = expected;

    u32::from(ar.abs_diff(er)) <= tolerance
        && u32::from(ag.abs_diff(eg)) <= tolerance
        && u32::from(ab.abs_diff(eb)) <= tolerance
}
