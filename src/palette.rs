//! Static table of device-native pixel formats.
//!
//! Each entry ties a configuration index to a 4-character code and the
//! routine that turns a frame in that encoding into planar YUV 4:2:0.

use log::warn;

use crate::error::Result;
use crate::traits::{FourCC, VideoNode};

/// Index of planar YUV 4:2:0, the normalized output encoding.
pub const DEFAULT_PALETTE: usize = 17;

/// Index of H.264, which this pipeline never consumes compressed.
pub const H264_PALETTE: usize = 21;

/// Bayer mosaic layout, named by the first two rows' colours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BayerOrder {
    /// B G / G R
    Bggr,
    /// G B / R G
    Gbrg,
    /// G R / B G
    Grbg,
}

/// How a frame is normalized into planar 4:2:0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    /// Already planar 4:2:0.
    Identity,
    /// Packed 24-bit RGB.
    Rgb24,
    /// Packed U Y V Y.
    Uyvy,
    /// Packed Y U Y V.
    Yuyv,
    /// Planar 4:2:2.
    Yuv422p,
    /// 8-bit luma only.
    Grey,
    /// Luma stored in 16-bit words, shifted down by the given bit count.
    Wide(u8),
    /// 8-bit Bayer mosaic.
    Bayer8(BayerOrder),
    /// 16-bit Bayer mosaic (BGGR).
    Bayer16,
    /// JPEG-compressed frame.
    Jpeg,
    /// No routine in this pipeline; never auto-selected.
    Unsupported,
}

/// One row of the pixel-format table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    /// Configuration index.
    pub index: usize,
    /// Device-native 4-character code.
    pub fourcc: FourCC,
    /// Short name for logs.
    pub name: &'static str,
    /// Normalization routine.
    pub conversion: Conversion,
}

impl Palette {
    const fn new(index: usize, fourcc: FourCC, name: &'static str, conversion: Conversion) -> Self {
        Self {
            index,
            fourcc,
            name,
            conversion,
        }
    }

    /// Whether enumeration fallback may pick this entry.
    pub fn auto_selectable(&self) -> bool {
        self.index != H264_PALETTE && self.conversion != Conversion::Unsupported
    }
}

const PLANAR_420: Palette = Palette::new(DEFAULT_PALETTE, FourCC::YU12, "YUV420", Conversion::Identity);

/// Every palette in configuration-index order.
pub static PALETTES: [Palette; 22] = [
    Palette::new(0, FourCC::SN9C10X, "SN9C10X", Conversion::Unsupported),
    Palette::new(1, FourCC::SBGGR16, "SBGGR16", Conversion::Bayer16),
    Palette::new(2, FourCC::SBGGR8, "SBGGR8", Conversion::Bayer8(BayerOrder::Bggr)),
    Palette::new(3, FourCC::SPCA561, "SPCA561", Conversion::Unsupported),
    Palette::new(4, FourCC::SGBRG8, "SGBRG8", Conversion::Bayer8(BayerOrder::Gbrg)),
    Palette::new(5, FourCC::SGRBG8, "SGRBG8", Conversion::Bayer8(BayerOrder::Grbg)),
    Palette::new(6, FourCC::PAC207, "PAC207", Conversion::Unsupported),
    Palette::new(7, FourCC::PJPG, "PJPG", Conversion::Jpeg),
    Palette::new(8, FourCC::MJPG, "MJPEG", Conversion::Jpeg),
    Palette::new(9, FourCC::JPEG, "JPEG", Conversion::Jpeg),
    Palette::new(10, FourCC::RGB3, "RGB24", Conversion::Rgb24),
    Palette::new(11, FourCC::SPCA501, "SPCA501", Conversion::Unsupported),
    Palette::new(12, FourCC::SPCA505, "SPCA505", Conversion::Unsupported),
    Palette::new(13, FourCC::SPCA508, "SPCA508", Conversion::Unsupported),
    Palette::new(14, FourCC::UYVY, "UYVY", Conversion::Uyvy),
    Palette::new(15, FourCC::YUYV, "YUYV", Conversion::Yuyv),
    Palette::new(16, FourCC::YUV422P, "YUV422P", Conversion::Yuv422p),
    PLANAR_420,
    Palette::new(18, FourCC::Y10, "Y10", Conversion::Wide(2)),
    Palette::new(19, FourCC::Y12, "Y12", Conversion::Wide(4)),
    Palette::new(20, FourCC::GREY, "GREY", Conversion::Grey),
    Palette::new(21, FourCC::H264, "H264", Conversion::Unsupported),
];

/// Look up a palette by configuration index.
pub fn by_index(index: usize) -> Option<&'static Palette> {
    PALETTES.get(index)
}

/// Look up a palette by its 4-character code.
pub fn by_fourcc(fourcc: FourCC) -> Option<&'static Palette> {
    PALETTES.iter().find(|palette| palette.fourcc == fourcc)
}

/// The palette to try first for a configured index.
///
/// Out-of-range indices and H.264 fall back to planar 4:2:0.
pub fn configured(index: usize) -> &'static Palette {
    match by_index(index) {
        Some(palette) if palette.index != H264_PALETTE => palette,
        _ => {
            warn!(
                "Palette {index} is not usable for capture, using {}",
                DEFAULT_PALETTE
            );
            by_index(DEFAULT_PALETTE).unwrap_or(&PLANAR_420)
        }
    }
}

/// The preferred auto-selectable palette among `supported`.
///
/// Later table entries win.
pub fn best_supported(supported: &[FourCC]) -> Option<&'static Palette> {
    PALETTES
        .iter()
        .rev()
        .filter(|palette| palette.auto_selectable())
        .find(|palette| supported.contains(&palette.fourcc))
}

/// Whether the device behind `node` offers the palette at `index`.
pub fn palette_valid<N: VideoNode>(node: &N, index: usize) -> Result<bool> {
    let Some(palette) = by_index(index) else {
        return Ok(false);
    };
    Ok(node.enum_formats()?.contains(&palette.fourcc))
}
