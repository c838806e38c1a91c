//! Normalization of device-native frames into planar YUV 4:2:0.
//!
//! Every routine writes a full `width * height * 3 / 2` frame: the luma
//! plane, then the quarter-size U and V planes.

use zune_core::bytestream::ZCursor;
use zune_jpeg::JpegDecoder;

use crate::error::{CaptureError, Result};
use crate::palette::{BayerOrder, Conversion};
use crate::traits::Geometry;

/// Neutral chroma value.
const NEUTRAL: u8 = 128;

/// Convert one captured frame into `dst`.
pub fn normalize(
    conversion: Conversion,
    src: &[u8],
    dst: &mut [u8],
    geometry: Geometry,
) -> Result<()> {
    let width = geometry.width as usize;
    let height = geometry.height as usize;
    let size_norm = geometry.size_norm();
    if dst.len() < size_norm {
        return Err(CaptureError::Device(format!(
            "output buffer holds {} bytes, frame needs {size_norm}",
            dst.len()
        )));
    }
    let dst = dst.get_mut(..size_norm).unwrap_or_default();
    let pixels = geometry.motion_size();

    match conversion {
        Conversion::Identity => {
            let src = expect_len(src, size_norm)?;
            dst.copy_from_slice(src);
        }
        Conversion::Rgb24 => rgb24_to_yuv420(expect_len(src, pixels * 3)?, dst, width),
        Conversion::Yuyv => packed422_to_yuv420(expect_len(src, pixels * 2)?, dst, width, PACKED_YUYV),
        Conversion::Uyvy => packed422_to_yuv420(expect_len(src, pixels * 2)?, dst, width, PACKED_UYVY),
        Conversion::Yuv422p => planar422_to_yuv420(expect_len(src, pixels * 2)?, dst, width, height),
        Conversion::Grey => grey_to_yuv420(expect_len(src, pixels)?, dst),
        Conversion::Wide(shift) => wide_to_yuv420(expect_len(src, pixels * 2)?, dst, shift),
        Conversion::Bayer8(order) => {
            let rgb = demosaic(expect_len(src, pixels)?, width, height, order);
            rgb24_to_yuv420(&rgb, dst, width);
        }
        Conversion::Bayer16 => {
            let narrowed: Vec<u8> = expect_len(src, pixels * 2)?
                .chunks_exact(2)
                .map(|word| word.get(1).copied().unwrap_or_default())
                .collect();
            let rgb = demosaic(&narrowed, width, height, BayerOrder::Bggr);
            rgb24_to_yuv420(&rgb, dst, width);
        }
        Conversion::Jpeg => {
            let rgb = decode_jpeg(src, geometry)?;
            rgb24_to_yuv420(&rgb, dst, width);
        }
        Conversion::Unsupported => {
            return Err(CaptureError::Unsupported(
                "no conversion routine for this palette".to_owned(),
            ));
        }
    }
    Ok(())
}

fn expect_len(src: &[u8], needed: usize) -> Result<&[u8]> {
    src.get(..needed).ok_or_else(|| {
        CaptureError::CorruptFrame(format!(
            "short frame: got {} bytes, need {needed}",
            src.len()
        ))
    })
}

/// Split a normalized frame into its Y, U and V planes.
fn planes(dst: &mut [u8], pixels: usize) -> (&mut [u8], &mut [u8], &mut [u8]) {
    let (luma, chroma) = dst.split_at_mut(pixels);
    let (u_plane, v_plane) = chroma.split_at_mut(pixels / 4);
    (luma, u_plane, v_plane)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
const fn clamp_u8(value: i32) -> u8 {
    if value < 0 {
        0
    } else if value > 255 {
        255
    } else {
        value as u8
    }
}

/// Full-range BT.601 luma.
const fn luma(r: i32, g: i32, b: i32) -> u8 {
    clamp_u8((77 * r + 150 * g + 29 * b + 128) >> 8)
}

const fn chroma_u(r: i32, g: i32, b: i32) -> u8 {
    clamp_u8(((-43 * r - 85 * g + 128 * b + 128) >> 8) + 128)
}

const fn chroma_v(r: i32, g: i32, b: i32) -> u8 {
    clamp_u8(((128 * r - 107 * g - 21 * b + 128) >> 8) + 128)
}

fn rgb_of(px: &[u8]) -> (i32, i32, i32) {
    match *px {
        [r, g, b, ..] => (i32::from(r), i32::from(g), i32::from(b)),
        _ => (0, 0, 0),
    }
}

fn rgb24_to_yuv420(rgb: &[u8], dst: &mut [u8], width: usize) {
    let pixels = dst.len() * 2 / 3;
    let (luma_plane, u_plane, v_plane) = planes(dst, pixels);

    for (src_row, y_row) in rgb.chunks_exact(width * 3).zip(luma_plane.chunks_exact_mut(width)) {
        for (px, y) in src_row.chunks_exact(3).zip(y_row.iter_mut()) {
            let (r, g, b) = rgb_of(px);
            *y = luma(r, g, b);
        }
    }

    let half = width / 2;
    let rows = rgb
        .chunks_exact(width * 6)
        .zip(u_plane.chunks_exact_mut(half))
        .zip(v_plane.chunks_exact_mut(half));
    for ((pair, u_row), v_row) in rows {
        let (top, bottom) = pair.split_at(width * 3);
        let blocks = top
            .chunks_exact(6)
            .zip(bottom.chunks_exact(6))
            .zip(u_row.iter_mut().zip(v_row.iter_mut()));
        for ((upper, lower), (u, v)) in blocks {
            let (mut r, mut g, mut b) = (0, 0, 0);
            for px in upper.chunks_exact(3).chain(lower.chunks_exact(3)) {
                let (pr, pg, pb) = rgb_of(px);
                r += pr;
                g += pg;
                b += pb;
            }
            *u = chroma_u(r / 4, g / 4, b / 4);
            *v = chroma_v(r / 4, g / 4, b / 4);
        }
    }
}

/// Byte offsets of Y0, U, Y1, V inside one packed 4:2:2 macropixel.
#[derive(Clone, Copy)]
struct Packed422 {
    y0: usize,
    u: usize,
    y1: usize,
    v: usize,
}

const PACKED_YUYV: Packed422 = Packed422 {
    y0: 0,
    u: 1,
    y1: 2,
    v: 3,
};

const PACKED_UYVY: Packed422 = Packed422 {
    y0: 1,
    u: 0,
    y1: 3,
    v: 2,
};

fn average(a: u8, b: u8) -> u8 {
    let sum = u16::from(a) + u16::from(b) + 1;
    u8::try_from(sum / 2).unwrap_or(u8::MAX)
}

fn byte_at(chunk: &[u8], offset: usize) -> u8 {
    chunk.get(offset).copied().unwrap_or(NEUTRAL)
}

fn packed422_to_yuv420(src: &[u8], dst: &mut [u8], width: usize, layout: Packed422) {
    let pixels = dst.len() * 2 / 3;
    let (luma_plane, u_plane, v_plane) = planes(dst, pixels);

    for (src_row, y_row) in src.chunks_exact(width * 2).zip(luma_plane.chunks_exact_mut(width)) {
        for (macro_px, out) in src_row.chunks_exact(4).zip(y_row.chunks_exact_mut(2)) {
            if let [y0, y1] = out {
                *y0 = byte_at(macro_px, layout.y0);
                *y1 = byte_at(macro_px, layout.y1);
            }
        }
    }

    let half = width / 2;
    let rows = src
        .chunks_exact(width * 4)
        .zip(u_plane.chunks_exact_mut(half))
        .zip(v_plane.chunks_exact_mut(half));
    for ((pair, u_row), v_row) in rows {
        let (top, bottom) = pair.split_at(width * 2);
        let blocks = top
            .chunks_exact(4)
            .zip(bottom.chunks_exact(4))
            .zip(u_row.iter_mut().zip(v_row.iter_mut()));
        for ((upper, lower), (u, v)) in blocks {
            *u = average(byte_at(upper, layout.u), byte_at(lower, layout.u));
            *v = average(byte_at(upper, layout.v), byte_at(lower, layout.v));
        }
    }
}

fn planar422_to_yuv420(src: &[u8], dst: &mut [u8], width: usize, height: usize) {
    let pixels = width * height;
    let (src_luma, src_chroma) = src.split_at(pixels);
    let (src_u, src_v) = src_chroma.split_at(pixels / 2);
    let (luma_plane, u_plane, v_plane) = planes(dst, pixels);

    luma_plane.copy_from_slice(src_luma);
    let half = width / 2;
    for (src_plane, out_plane) in [(src_u, u_plane), (src_v, v_plane)] {
        for (pair, out_row) in src_plane.chunks_exact(width).zip(out_plane.chunks_exact_mut(half)) {
            let (top, bottom) = pair.split_at(half);
            for ((a, b), out) in top.iter().zip(bottom).zip(out_row.iter_mut()) {
                *out = average(*a, *b);
            }
        }
    }
}

fn grey_to_yuv420(src: &[u8], dst: &mut [u8]) {
    let (luma_plane, chroma) = dst.split_at_mut(src.len());
    luma_plane.copy_from_slice(src);
    chroma.fill(NEUTRAL);
}

fn wide_to_yuv420(src: &[u8], dst: &mut [u8], shift: u8) {
    let pixels = src.len() / 2;
    let (luma_plane, chroma) = dst.split_at_mut(pixels);
    for (word, y) in src.chunks_exact(2).zip(luma_plane.iter_mut()) {
        let value = u16::from_le_bytes([byte_at(word, 0), byte_at(word, 1)]) >> shift;
        *y = u8::try_from(value).unwrap_or(u8::MAX);
    }
    chroma.fill(NEUTRAL);
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Channel {
    Red,
    Green,
    Blue,
}

const fn channel_at(order: BayerOrder, x: usize, y: usize) -> Channel {
    let (even_row, odd_row) = match order {
        BayerOrder::Bggr => ([Channel::Blue, Channel::Green], [Channel::Green, Channel::Red]),
        BayerOrder::Gbrg => ([Channel::Green, Channel::Blue], [Channel::Red, Channel::Green]),
        BayerOrder::Grbg => ([Channel::Green, Channel::Red], [Channel::Blue, Channel::Green]),
    };
    let row = if y % 2 == 0 { even_row } else { odd_row };
    if x % 2 == 0 {
        row[0]
    } else {
        row[1]
    }
}

/// Bilinear demosaic into packed RGB24 by averaging each colour over the
/// 3x3 neighbourhood.
fn demosaic(raw: &[u8], width: usize, height: usize, order: BayerOrder) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(width * height * 3);
    for y in 0..height {
        for x in 0..width {
            let mut sums = [0u32; 3];
            let mut counts = [0u32; 3];
            for ny in y.saturating_sub(1)..=(y + 1).min(height - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(width - 1) {
                    let slot = channel_at(order, nx, ny) as usize;
                    let sample = raw.get(ny * width + nx).copied().unwrap_or_default();
                    if let (Some(sum), Some(count)) = (sums.get_mut(slot), counts.get_mut(slot)) {
                        *sum += u32::from(sample);
                        *count += 1;
                    }
                }
            }
            for (sum, count) in sums.iter().zip(counts) {
                rgb.push(u8::try_from(sum / count.max(1)).unwrap_or(u8::MAX));
            }
        }
    }
    rgb
}

fn decode_jpeg(src: &[u8], geometry: Geometry) -> Result<Vec<u8>> {
    let mut decoder = JpegDecoder::new(ZCursor::new(src));
    let pixels = decoder
        .decode()
        .map_err(|err| CaptureError::CorruptFrame(format!("jpeg decode failed: {err}")))?;
    let info = decoder
        .info()
        .ok_or_else(|| CaptureError::CorruptFrame("jpeg missing info".to_owned()))?;

    let decoded = (u32::try_from(info.width).ok(), u32::try_from(info.height).ok());
    if decoded != (Some(geometry.width), Some(geometry.height)) {
        return Err(CaptureError::CorruptFrame(format!(
            "jpeg frame is {}x{}, expected {geometry}",
            info.width, info.height
        )));
    }
    if pixels.len() < geometry.motion_size() * 3 {
        return Err(CaptureError::CorruptFrame("jpeg decoded to a short frame".to_owned()));
    }
    Ok(pixels)
}
