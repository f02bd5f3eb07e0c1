//! Capture buffer to packed RGBA conversion.

use tracing::instrument;

use super::raster::{try_zeroed, ProcessedRaster};
use crate::capture::{PixelBuffer, PixelFormat, Plane};
use crate::error::{PipelineError, Result};

/// Convert a captured frame into a packed RGBA raster.
///
/// Consumes the buffer so its storage goes back to the capture pool as soon
/// as conversion finishes. YUV input uses the full-range JFIF matrix; RGBA
/// input is copied row by row through its stride. Alpha is always 255 for
/// YUV input.
#[instrument(skip(buffer), fields(w = buffer.width(), h = buffer.height(), seq = buffer.meta.sequence))]
pub fn convert(buffer: PixelBuffer) -> Result<ProcessedRaster> {
    buffer.validate()?;

    let w = buffer.width() as usize;
    let mut out = try_zeroed(ProcessedRaster::byte_len(buffer.width(), buffer.height())?)?;

    match buffer.format() {
        PixelFormat::Rgba8888 => copy_rgba(&buffer.planes()[0], w, &mut out),
        PixelFormat::Yuv420 => {
            let planes = buffer.planes();
            yuv420_to_rgba(&planes[0], &planes[1], &planes[2], w, &mut out)
        }
        other => return Err(PipelineError::UnsupportedFormat(format!("{other:?}"))),
    }

    Ok(ProcessedRaster::new(buffer.width(), buffer.height(), out)?.with_meta(buffer.meta))
}

fn copy_rgba(plane: &Plane, w: usize, out: &mut [u8]) {
    let row_bytes = w * 4;
    for (y, dst) in out.chunks_exact_mut(row_bytes).enumerate() {
        let start = y * plane.row_stride;
        dst.copy_from_slice(&plane.data[start..start + row_bytes]);
    }
}

fn yuv420_to_rgba(y_plane: &Plane, u_plane: &Plane, v_plane: &Plane, w: usize, out: &mut [u8]) {
    for (y, row) in out.chunks_exact_mut(w * 4).enumerate() {
        for (x, px) in row.chunks_exact_mut(4).enumerate() {
            let luma = y_plane.sample(x, y);
            let u = u_plane.sample(x / 2, y / 2);
            let v = v_plane.sample(x / 2, y / 2);
            let [r, g, b] = yuv_to_rgb(luma, u, v);
            px.copy_from_slice(&[r, g, b, 255]);
        }
    }
}

/// Full-range (JFIF) YUV to RGB, rounded then clamped.
#[inline]
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = f32::from(y);
    let u = f32::from(u) - 128.0;
    let v = f32::from(v) - 128.0;
    let r = y + 1.402 * v;
    let g = y - 0.344_136 * u - 0.714_136 * v;
    let b = y + 1.772 * u;
    [clamp_channel(r), clamp_channel(g), clamp_channel(b)]
}

#[inline]
fn clamp_channel(c: f32) -> u8 {
    c.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::processing::{transform, ProcessingMode};

    #[test]
    fn test_neutral_chroma_is_gray() {
        assert_eq!(yuv_to_rgb(0, 128, 128), [0, 0, 0]);
        assert_eq!(yuv_to_rgb(128, 128, 128), [128, 128, 128]);
        assert_eq!(yuv_to_rgb(255, 128, 128), [255, 255, 255]);
    }

    #[test]
    fn test_saturated_chroma_clamps() {
        // Full V pushes red past 255, zero U pulls blue below 0.
        let [r, g, _] = yuv_to_rgb(255, 128, 255);
        assert_eq!(r, 255);
        assert_eq!(g, 164);
        let [_, _, b] = yuv_to_rgb(0, 0, 128);
        assert_eq!(b, 0);
    }

    #[test]
    fn test_known_colour() {
        // Pure red in JFIF: Y=76, U=85, V=255
        let [r, g, b] = yuv_to_rgb(76, 85, 255);
        assert!(r >= 254);
        assert!(g <= 1);
        assert!(b <= 1);
    }

    #[test]
    fn test_rgba_passthrough_strips_padding() {
        // 2x2 with 4 padding bytes per row
        let data = vec![
            1, 2, 3, 4, 5, 6, 7, 8, 0xAA, 0xAA, 0xAA, 0xAA, //
            9, 10, 11, 12, 13, 14, 15, 16, 0xAA, 0xAA, 0xAA, 0xAA,
        ];
        let raster = convert(PixelBuffer::rgba(2, 2, data, 12)).unwrap();
        assert_eq!(raster.data(), (1..=16).collect::<Vec<u8>>().as_slice());
    }

    #[test]
    fn test_semi_planar_uses_strides() {
        // 4x2 luma with stride 6, interleaved chroma row stride 5
        let y = Plane::new(
            vec![
                10, 20, 30, 40, 0, 0, //
                50, 60, 70, 80, 0, 0,
            ],
            6,
            1,
        );
        let u = Plane::new(vec![128, 128, 128, 128, 0], 5, 2);
        let v = Plane::new(vec![128, 128, 128, 128], 5, 2);
        let raster = convert(PixelBuffer::yuv420(4, 2, y, u, v)).unwrap();

        assert_eq!(raster.pixel(0, 0), [10, 10, 10, 255]);
        assert_eq!(raster.pixel(3, 0), [40, 40, 40, 255]);
        assert_eq!(raster.pixel(1, 1), [60, 60, 60, 255]);
        assert_eq!(raster.pixel(3, 1), [80, 80, 80, 255]);
    }

    #[test]
    fn test_chroma_is_shared_per_two_by_two_block() {
        let y = Plane::new(vec![128; 4], 2, 1);
        let u = Plane::new(vec![128], 1, 1);
        let v = Plane::new(vec![200], 1, 1);
        let raster = convert(PixelBuffer::yuv420(2, 2, y, u, v)).unwrap();
        let first = raster.pixel(0, 0);
        assert!(first[0] > first[1]);
        for (x, yy) in [(1, 0), (0, 1), (1, 1)] {
            assert_eq!(raster.pixel(x, yy), first);
        }
    }

    #[test]
    fn test_unsupported_format() {
        let buf = PixelBuffer::new(2, 2, PixelFormat::Yuyv422, vec![Plane::new(vec![0; 8], 4, 2)]);
        assert!(matches!(convert(buf), Err(PipelineError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_zero_width() {
        let buf = PixelBuffer::rgba_packed(0, 2, Vec::new());
        assert!(matches!(convert(buf), Err(PipelineError::InvalidDimensions(_))));
    }

    #[test]
    fn test_garbage_stride_is_an_error() {
        let buf = PixelBuffer::rgba(2, 3, vec![0; 64], usize::MAX / 2);
        assert!(matches!(convert(buf), Err(PipelineError::InvalidDimensions(_))));
    }

    #[test]
    fn test_spread_rgba_pixels_rejected() {
        let data = vec![1, 2, 3, 4, 0xEE, 0xEE, 0xEE, 0xEE, 5, 6, 7, 8];
        let buf = PixelBuffer::new(2, 1, PixelFormat::Rgba8888, vec![Plane::new(data, 12, 8)]);
        assert!(matches!(convert(buf), Err(PipelineError::InvalidDimensions(_))));
    }

    fn arb_padded_rgba() -> impl Strategy<Value = (u32, u32, usize, Vec<u8>)> {
        (1u32..12, 1u32..12, 0usize..9).prop_flat_map(|(w, h, pad)| {
            let stride = w as usize * 4 + pad;
            (
                Just(w),
                Just(h),
                Just(stride),
                proptest::collection::vec(any::<u8>(), stride * h as usize),
            )
        })
    }

    proptest! {
        #[test]
        fn raw_rgba_round_trips_through_stride((w, h, stride, data) in arb_padded_rgba()) {
            let expected: Vec<u8> = data
                .chunks_exact(stride)
                .flat_map(|row| row[..w as usize * 4].to_vec())
                .collect();

            let raster = convert(PixelBuffer::rgba(w, h, data, stride)).unwrap();
            let out = transform(raster, ProcessingMode::Raw).unwrap();
            prop_assert_eq!(out.dimensions(), (w, h));
            prop_assert_eq!(out.data(), expected.as_slice());
        }

        #[test]
        fn raw_neutral_yuv_keeps_luma_and_opaque_alpha(
            (w, h, luma) in (1u32..12, 1u32..12).prop_flat_map(|(w, h)| {
                (Just(w), Just(h), proptest::collection::vec(any::<u8>(), (w * h) as usize))
            })
        ) {
            let (cw, ch) = (w.div_ceil(2) as usize, h.div_ceil(2) as usize);
            let buf = PixelBuffer::yuv420(
                w,
                h,
                Plane::new(luma.clone(), w as usize, 1),
                Plane::new(vec![128; cw * ch], cw, 1),
                Plane::new(vec![128; cw * ch], cw, 1),
            );

            let out = transform(convert(buf).unwrap(), ProcessingMode::Raw).unwrap();
            for (px, l) in out.data().chunks_exact(4).zip(&luma) {
                prop_assert_eq!(px, &[*l, *l, *l, 255][..]);
            }
        }
    }
}
