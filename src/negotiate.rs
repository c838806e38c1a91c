//! Pixel format and resolution negotiation with a kernel node.

use log::{debug, info, warn};

use crate::error::{CaptureError, Result};
use crate::palette::{self, Palette};
use crate::traits::{Format, Geometry, VideoNode};

/// Outcome of a successful negotiation.
#[derive(Debug, Clone)]
pub struct Negotiated {
    /// Format the driver accepted.
    pub format: Format,
    /// Palette the format belongs to.
    pub palette: &'static Palette,
    /// Geometry frames will have.
    pub geometry: Geometry,
}

/// Round `value` up to the next multiple of 8.
pub const fn align8(value: u32) -> u32 {
    value.div_ceil(8) * 8
}

/// Requested geometry with both sides rounded up to a multiple of 8.
///
/// Logs when rounding changed anything.
pub fn aligned_geometry(width: u32, height: u32) -> Geometry {
    let aligned = Geometry::new(align8(width), align8(height));
    if aligned.width != width || aligned.height != height {
        warn!("Resolution {width}x{height} is not a multiple of 8, using {aligned}");
    }
    aligned
}

/// Try one palette; `Ok(None)` means the driver does not accept it.
fn try_palette<N: VideoNode>(node: &mut N, request: &Format, palette: &'static Palette) -> Result<Option<Format>> {
    let answer = match node.try_format(request) {
        Ok(answer) => answer,
        Err(err) => {
            debug!("Palette {} rejected: {err}", palette.name);
            return Ok(None);
        }
    };
    if answer.fourcc != palette.fourcc {
        debug!("Palette {} not supported, driver offered {}", palette.name, answer.fourcc);
        return Ok(None);
    }

    let actual = node.set_format(request)?;
    if actual.fourcc != palette.fourcc {
        return Err(CaptureError::FormatAdjusted {
            requested: palette.fourcc.to_string(),
            actual: actual.fourcc.to_string(),
        });
    }
    Ok(Some(actual))
}

fn accept(requested: Geometry, format: Format, palette: &'static Palette) -> Result<Negotiated> {
    let geometry = Geometry::new(format.width, format.height);
    if geometry != requested {
        if geometry.width % 8 != 0 || geometry.height % 8 != 0 {
            return Err(CaptureError::Negotiation(format!(
                "driver adjusted {requested} to {geometry}, which is not a multiple of 8"
            )));
        }
        info!("Driver adjusted resolution from {requested} to {geometry}");
    }
    info!("Using palette {} ({}) at {geometry}", palette.name, palette.fourcc);
    Ok(Negotiated {
        format,
        palette,
        geometry,
    })
}

/// Agree on a format for a `width` x `height` capture.
///
/// The configured palette is tried first when the device offers it;
/// otherwise the formats it enumerates are tried from the latest table
/// entry down. A driver that swaps the pixel format after accepting it
/// fails the negotiation outright.
pub fn negotiate<N: VideoNode>(node: &mut N, width: u32, height: u32, palette_index: usize) -> Result<Negotiated> {
    let requested = aligned_geometry(width, height);
    let preferred = palette::configured(palette_index);

    if palette::palette_valid(node, preferred.index)? {
        let request = Format::new(requested.width, requested.height, preferred.fourcc);
        if let Some(format) = try_palette(node, &request, preferred)? {
            return accept(requested, format, preferred);
        }
    } else {
        info!("Device does not offer palette {} ({})", preferred.name, preferred.fourcc);
    }

    let mut remaining = node.enum_formats()?;
    debug!(
        "Device offers: {}",
        remaining.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
    );
    remaining.retain(|&fourcc| fourcc != preferred.fourcc);
    while let Some(candidate) = palette::best_supported(&remaining) {
        remaining.retain(|&fourcc| fourcc != candidate.fourcc);
        let request = Format::new(requested.width, requested.height, candidate.fourcc);
        if let Some(format) = try_palette(node, &request, candidate)? {
            info!("Palette {} unavailable, falling back to {}", preferred.name, candidate.name);
            return accept(requested, format, candidate);
        }
    }

    Err(CaptureError::Negotiation(format!(
        "no usable palette for {requested}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{LogCapture, MockNode, NodeCall};
    use crate::traits::FourCC;
    use serial_test::serial;

    #[test]
    fn test_align8() {
        assert_eq!(align8(640), 640);
        assert_eq!(align8(641), 648);
        assert_eq!(align8(1), 8);
        assert_eq!(align8(0), 0);
    }

    #[test]
    #[serial]
    fn test_rounding_is_logged_once() {
        let logs = LogCapture::install();
        let geometry = aligned_geometry(642, 478);
        assert_eq!(geometry, Geometry::new(648, 480));
        assert_eq!(logs.count_containing("642x478 is not a multiple of 8"), 1);

        let logs = LogCapture::install();
        let _ = aligned_geometry(640, 480);
        assert_eq!(logs.count_containing("not a multiple of 8"), 0);
    }

    #[test]
    fn test_configured_palette_accepted() {
        let mut node = MockNode::new().with_formats(&[FourCC::YU12, FourCC::YUYV]);
        let negotiated = negotiate(&mut node, 640, 480, 17).expect("negotiation should succeed");
        assert_eq!(negotiated.palette.index, 17);
        assert_eq!(negotiated.geometry, Geometry::new(640, 480));
    }

    #[test]
    fn test_fallback_prefers_later_entries_and_skips_h264() {
        let mut node = MockNode::new().with_formats(&[FourCC::MJPG, FourCC::YUYV, FourCC::H264]);
        let negotiated = negotiate(&mut node, 640, 480, 17).expect("negotiation should succeed");
        assert_eq!(negotiated.format.fourcc, FourCC::YUYV);
    }

    #[test]
    fn test_unoffered_palette_is_not_tried() {
        let mut node = MockNode::new().with_formats(&[FourCC::GREY, FourCC::YUYV]);
        let negotiated = negotiate(&mut node, 640, 480, 17).expect("negotiation should succeed");
        assert_eq!(negotiated.palette.index, 20);

        let calls = node.calls();
        assert!(!calls.contains(&NodeCall::TryFormat(FourCC::YU12)));
        assert_eq!(calls.first(), Some(&NodeCall::TryFormat(FourCC::GREY)));
    }

    #[test]
    fn test_no_usable_palette_fails() {
        let mut node = MockNode::new().with_formats(&[FourCC::H264, FourCC::SPCA561]);
        let err = negotiate(&mut node, 640, 480, 17).expect_err("nothing usable");
        assert!(matches!(err, CaptureError::Negotiation(_)));
    }

    #[test]
    fn test_pixel_format_swap_is_fatal() {
        let mut node = MockNode::new().with_format_swap(FourCC::YUYV);
        let err = negotiate(&mut node, 640, 480, 17).expect_err("swap must fail");
        assert!(matches!(err, CaptureError::FormatAdjusted { .. }));
    }

    #[test]
    #[serial]
    fn test_driver_resolution_rewrite_is_adopted_and_logged_once() {
        let logs = LogCapture::install();
        let mut node = MockNode::new().with_served_size(648, 480);
        let negotiated = negotiate(&mut node, 640, 480, 17).expect("negotiation should succeed");
        assert_eq!(negotiated.geometry, Geometry::new(648, 480));
        assert_eq!(negotiated.geometry.size_norm(), 648 * 480 * 3 / 2);
        assert_eq!(logs.count_containing("adjusted resolution from 640x480 to 648x480"), 1);
    }

    #[test]
    fn test_unaligned_driver_rewrite_fails() {
        let mut node = MockNode::new().with_served_size(642, 480);
        let err = negotiate(&mut node, 640, 480, 17).expect_err("unaligned rewrite");
        assert!(matches!(err, CaptureError::Negotiation(_)));
    }
}
