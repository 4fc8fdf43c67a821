//! Raw sensor buffer to interleaved RGB conversion.

use bytes::Bytes;

use super::frame::{Image, PixelFormat, RawFrame};
use crate::error::DecodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cfa {
    R,
    G,
    B,
}

/// Decode a raw frame into an owned RGB image.
///
/// Every format produces 3 interleaved channels; Mono8 is expanded so that
/// each channel carries the grey value. Bytes past `width * height * bpp`
/// (driver padding) are ignored. The result never borrows from `raw`.
pub fn decode(raw: &RawFrame<'_>) -> Result<Image, DecodeError> {
    let format = PixelFormat::from_code(raw.pixel_format).ok_or(
        DecodeError::UnsupportedPixelFormat {
            code: raw.pixel_format,
        },
    )?;

    let invalid = DecodeError::InvalidDimensions {
        width: raw.width,
        height: raw.height,
    };
    let (width, height) = (raw.width as usize, raw.height as usize);
    let odd_packed = matches!(format, PixelFormat::Yuv422Uyvy | PixelFormat::Yuv422Yuyv)
        && width % 2 != 0;
    if width == 0 || height == 0 || odd_packed {
        return Err(invalid);
    }

    // The RGB output is the largest buffer; it must fit in usize.
    let expected = width
        .checked_mul(height)
        .filter(|pixels| pixels.checked_mul(Image::CHANNELS).is_some())
        .map(|pixels| pixels * format.bytes_per_pixel())
        .ok_or(invalid)?;
    let src = raw
        .data
        .get(..expected)
        .ok_or(DecodeError::BufferTooShort {
            expected,
            actual: raw.data.len(),
        })?;

    use Cfa::{B, G, R};
    let rgb: Vec<u8> = match format {
        PixelFormat::Mono8 => src.iter().flat_map(|&v| [v, v, v]).collect(),
        PixelFormat::Rgb8 => src.to_vec(),
        PixelFormat::Bgr8 => src
            .chunks_exact(3)
            .flat_map(|px| [px[2], px[1], px[0]])
            .collect(),
        PixelFormat::Yuv422Uyvy => yuv422_to_rgb(src, [1, 0, 3, 2]),
        PixelFormat::Yuv422Yuyv => yuv422_to_rgb(src, [0, 1, 2, 3]),
        PixelFormat::BayerRg8 => demosaic(src, width, height, [R, G, G, B]),
        PixelFormat::BayerGb8 => demosaic(src, width, height, [G, B, R, G]),
        PixelFormat::BayerGr8 => demosaic(src, width, height, [G, R, B, G]),
        PixelFormat::BayerBg8 => demosaic(src, width, height, [B, G, G, R]),
    };

    Ok(Image {
        width: raw.width,
        height: raw.height,
        data: Bytes::from(rgb),
    })
}

/// Convert packed 4:2:2 macropixels. `order` gives the byte index of
/// `[Y0, U, Y1, V]` inside each 4-byte group.
fn yuv422_to_rgb(src: &[u8], order: [usize; 4]) -> Vec<u8> {
    let mut out = Vec::with_capacity(src.len() / 2 * 3);
    for group in src.chunks_exact(4) {
        let (y0, u, y1, v) = (
            group[order[0]],
            group[order[1]],
            group[order[2]],
            group[order[3]],
        );
        out.extend_from_slice(&yuv_to_rgb(y0, u, v));
        out.extend_from_slice(&yuv_to_rgb(y1, u, v));
    }
    out
}

/// ITU-R BT.601 conversion.
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y_f = f32::from(y);
    let u_f = f32::from(u) - 128.0;
    let v_f = f32::from(v) - 128.0;

    let r = 1.402f32.mul_add(v_f, y_f);
    let g = 0.714_14f32.mul_add(-v_f, 0.344_14f32.mul_add(-u_f, y_f));
    let b = 1.772f32.mul_add(u_f, y_f);

    let clamp = |val: f32| val.round().clamp(0.0, 255.0) as u8;
    [clamp(r), clamp(g), clamp(b)]
}

/// Bilinear demosaic. `tile` is the 2x2 colour filter layout in row-major
/// order starting at (0, 0).
fn demosaic(src: &[u8], width: usize, height: usize, tile: [Cfa; 4]) -> Vec<u8> {
    let color_at = |x: usize, y: usize| tile[(y % 2) * 2 + (x % 2)];
    let mut out = Vec::with_capacity(width * height * 3);

    for y in 0..height {
        for x in 0..width {
            let own = color_at(x, y);
            let mut sums = [0u32; 3];
            let mut counts = [0u32; 3];

            for ny in y.saturating_sub(1)..=(y + 1).min(height - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(width - 1) {
                    let c = color_at(nx, ny) as usize;
                    sums[c] += u32::from(src[ny * width + nx]);
                    counts[c] += 1;
                }
            }

            for c in [Cfa::R, Cfa::G, Cfa::B] {
                let value = if c == own {
                    src[y * width + x]
                } else if counts[c as usize] == 0 {
                    0
                } else {
                    let n = counts[c as usize];
                    ((sums[c as usize] + n / 2) / n) as u8
                };
                out.push(value);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(format: PixelFormat, width: u32, height: u32, data: &[u8]) -> RawFrame<'_> {
        RawFrame {
            width,
            height,
            pixel_format: format.code(),
            frame_num: 0,
            data,
        }
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 37 % 251) as u8).collect()
    }

    #[test]
    fn mono_is_expanded_to_three_channels() {
        let data = [10u8, 20, 30, 40];
        let img = decode(&raw(PixelFormat::Mono8, 2, 2, &data)).unwrap();
        assert_eq!((img.width, img.height), (2, 2));
        assert_eq!(img.data.len(), 12);
        assert_eq!(img.pixel(0, 0), Some([10, 10, 10]));
        assert_eq!(img.pixel(1, 1), Some([40, 40, 40]));
    }

    #[test]
    fn every_format_keeps_dimensions_and_is_deterministic() {
        for format in PixelFormat::ALL {
            let (w, h) = (6u32, 4u32);
            let data = pattern(w as usize * h as usize * format.bytes_per_pixel());
            let first = decode(&raw(format, w, h, &data)).unwrap();
            let second = decode(&raw(format, w, h, &data)).unwrap();
            assert_eq!((first.width, first.height), (w, h), "{format:?}");
            assert_eq!(first.data.len(), (w * h * 3) as usize, "{format:?}");
            assert_eq!(first, second, "{format:?}");
        }
    }

    #[test]
    fn unknown_code_is_reported() {
        let data = [0u8; 4];
        let frame = RawFrame {
            width: 2,
            height: 2,
            pixel_format: 0x0110_0003,
            frame_num: 0,
            data: &data,
        };
        assert_eq!(
            decode(&frame),
            Err(DecodeError::UnsupportedPixelFormat { code: 0x0110_0003 })
        );
    }

    #[test]
    fn short_buffer_is_rejected() {
        let data = [0u8; 10];
        assert_eq!(
            decode(&raw(PixelFormat::Rgb8, 2, 2, &data)),
            Err(DecodeError::BufferTooShort {
                expected: 12,
                actual: 10
            })
        );
    }

    #[test]
    fn padding_past_the_image_is_ignored() {
        let data = [1u8, 2, 3, 4, 99, 99];
        let img = decode(&raw(PixelFormat::Mono8, 2, 2, &data)).unwrap();
        assert_eq!(img.pixel(1, 1), Some([4, 4, 4]));
    }

    #[test]
    fn zero_and_odd_packed_dimensions_are_invalid() {
        assert!(matches!(
            decode(&raw(PixelFormat::Mono8, 0, 2, &[])),
            Err(DecodeError::InvalidDimensions { .. })
        ));
        let data = [128u8; 12];
        assert!(matches!(
            decode(&raw(PixelFormat::Yuv422Yuyv, 3, 2, &data)),
            Err(DecodeError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn oversized_dimensions_are_invalid() {
        let data = [0u8; 16];
        for format in [PixelFormat::Rgb8, PixelFormat::Mono8, PixelFormat::BayerRg8] {
            assert_eq!(
                decode(&raw(format, u32::MAX, u32::MAX, &data)),
                Err(DecodeError::InvalidDimensions {
                    width: u32::MAX,
                    height: u32::MAX
                }),
                "{format:?}"
            );
        }
    }

    #[test]
    fn bgr_is_swapped_to_rgb() {
        let data = [1u8, 2, 3];
        let img = decode(&raw(PixelFormat::Bgr8, 1, 1, &data)).unwrap();
        assert_eq!(img.pixel(0, 0), Some([3, 2, 1]));
    }

    #[test]
    fn neutral_chroma_gives_grey() {
        // Y0 U Y1 V with U = V = 128
        let yuyv = [100u8, 128, 200, 128];
        let img = decode(&raw(PixelFormat::Yuv422Yuyv, 2, 1, &yuyv)).unwrap();
        assert_eq!(img.pixel(0, 0), Some([100, 100, 100]));
        assert_eq!(img.pixel(1, 0), Some([200, 200, 200]));

        // U Y0 V Y1
        let uyvy = [128u8, 100, 128, 200];
        let img = decode(&raw(PixelFormat::Yuv422Uyvy, 2, 1, &uyvy)).unwrap();
        assert_eq!(img.pixel(0, 0), Some([100, 100, 100]));
        assert_eq!(img.pixel(1, 0), Some([200, 200, 200]));
    }

    #[test]
    fn flat_bayer_field_stays_flat() {
        let data = [77u8; 16];
        for format in [
            PixelFormat::BayerRg8,
            PixelFormat::BayerGb8,
            PixelFormat::BayerGr8,
            PixelFormat::BayerBg8,
        ] {
            let img = decode(&raw(format, 4, 4, &data)).unwrap();
            assert!(img.data.iter().all(|&b| b == 77), "{format:?}");
        }
    }

    #[test]
    fn bayer_tiles_place_red_where_expected() {
        // Only the red sites are lit.
        let rg = [255u8, 0, 255, 0, 0, 0, 0, 0, 255, 0, 255, 0, 0, 0, 0, 0];
        let img = decode(&raw(PixelFormat::BayerRg8, 4, 4, &rg)).unwrap();
        assert_eq!(img.pixel(0, 0), Some([255, 0, 0]));

        let gb = [0u8, 0, 0, 0, 255, 0, 255, 0, 0, 0, 0, 0, 255, 0, 255, 0];
        let img = decode(&raw(PixelFormat::BayerGb8, 4, 4, &gb)).unwrap();
        assert_eq!(img.pixel(0, 1), Some([255, 0, 0]));
        assert_eq!(img.pixel(0, 0).map(|p| p[0]), Some(255));
    }
}
