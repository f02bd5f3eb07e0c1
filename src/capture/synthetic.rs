//! Synthetic capture source standing in for a camera.
//!
//! Renders a moving test pattern into pooled buffers, using padded row
//! strides so every consumer has to honour the stride.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, trace};

use super::frame::{PixelBuffer, PixelFormat, Plane};
use super::pool::{BufferLayout, BufferPool, PlaneLayout};
use crate::error::{PipelineError, Result};
use crate::CaptureConfig;

/// Layout the synthetic source emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    /// YUV 4:2:0 with interleaved chroma (chroma pixel stride 2)
    SemiPlanar,
    /// YUV 4:2:0 with separate chroma planes (chroma pixel stride 1)
    Planar,
    Rgba,
}

pub struct SyntheticCapture {
    pool: BufferPool,
    source: SourceFormat,
    frame_interval: Duration,
    tick: u64,
}

impl SyntheticCapture {
    pub fn new(config: &CaptureConfig) -> Result<Self> {
        if config.width == 0 || config.height == 0 {
            return Err(PipelineError::dimensions(config.width, config.height));
        }

        let layout = Self::layout_for(config);
        info!(
            "Synthetic capture {}x{} {:?} @ {} fps, {} buffers",
            config.width, config.height, config.format, config.fps, config.buffer_count
        );

        Ok(Self {
            pool: BufferPool::new(layout, config.buffer_count),
            source: config.format,
            frame_interval: Duration::from_secs_f64(1.0 / f64::from(config.fps.max(1))),
            tick: 0,
        })
    }

    /// Buffer layout for a capture configuration.
    pub fn layout_for(config: &CaptureConfig) -> BufferLayout {
        let (w, h) = (config.width as usize, config.height as usize);
        let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
        let pad = config.row_padding;

        let (format, planes) = match config.format {
            SourceFormat::Rgba => {
                let row_stride = w * 4 + pad;
                (
                    PixelFormat::Rgba8888,
                    vec![PlaneLayout {
                        len: row_stride * h,
                        row_stride,
                        pixel_stride: 4,
                    }],
                )
            }
            SourceFormat::SemiPlanar => {
                let y_stride = w + pad;
                let c_stride = cw * 2 + pad;
                // Both chroma views cover the interleaved plane minus one byte.
                let chroma = PlaneLayout {
                    len: c_stride * ch - 1,
                    row_stride: c_stride,
                    pixel_stride: 2,
                };
                (
                    PixelFormat::Yuv420,
                    vec![
                        PlaneLayout {
                            len: y_stride * h,
                            row_stride: y_stride,
                            pixel_stride: 1,
                        },
                        chroma,
                        chroma,
                    ],
                )
            }
            SourceFormat::Planar => {
                let y_stride = w + pad;
                let c_stride = cw + pad;
                let chroma = PlaneLayout {
                    len: c_stride * ch,
                    row_stride: c_stride,
                    pixel_stride: 1,
                };
                (
                    PixelFormat::Yuv420,
                    vec![
                        PlaneLayout {
                            len: y_stride * h,
                            row_stride: y_stride,
                            pixel_stride: 1,
                        },
                        chroma,
                        chroma,
                    ],
                )
            }
        };

        BufferLayout {
            width: config.width,
            height: config.height,
            format,
            planes,
        }
    }

    pub fn frame_interval(&self) -> Duration {
        self.frame_interval
    }

    /// Render the next frame, or `None` if every pooled buffer is still held
    /// downstream (the frame is dropped, as a camera would).
    #[instrument(skip(self))]
    pub fn capture_frame(&mut self) -> Option<PixelBuffer> {
        let mut buffer = self.pool.acquire()?;
        self.tick += 1;

        let (w, h) = (buffer.width() as usize, buffer.height() as usize);
        let bar = bar_column(self.tick, w);

        match self.source {
            SourceFormat::Rgba => {
                let plane = &mut buffer.planes_mut()[0];
                for y in 0..h {
                    let row = y * plane.row_stride;
                    for x in 0..w {
                        let [r, g, b] = pattern(x, y, w, h, bar);
                        let i = row + x * 4;
                        plane.data[i..i + 4].copy_from_slice(&[r, g, b, 255]);
                    }
                }
            }
            SourceFormat::SemiPlanar | SourceFormat::Planar => {
                let planes = buffer.planes_mut();
                fill_luma(&mut planes[0], w, h, bar);
                let (u_plane, v_plane) = planes[1..].split_at_mut(1);
                fill_chroma(&mut u_plane[0], &mut v_plane[0], w, h, bar);
            }
        }

        trace!(sequence = buffer.meta.sequence, "captured synthetic frame");
        Some(buffer)
    }
}

fn bar_column(tick: u64, width: usize) -> usize {
    ((tick * 4) % width as u64) as usize
}

/// Horizontal/vertical colour ramps with a white vertical bar.
fn pattern(x: usize, y: usize, w: usize, h: usize, bar: usize) -> [u8; 3] {
    let bar_width = (w / 16).max(1);
    if x >= bar && x < bar + bar_width {
        return [255, 255, 255];
    }
    let r = (x * 255 / w.max(2).saturating_sub(1).max(1)).min(255) as u8;
    let g = (y * 255 / h.max(2).saturating_sub(1).max(1)).min(255) as u8;
    [r, g, 128]
}

fn rgb_to_yuv([r, g, b]: [u8; 3]) -> (u8, u8, u8) {
    let (r, g, b) = (f32::from(r), f32::from(g), f32::from(b));
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let u = 128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b;
    let v = 128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b;
    let q = |c: f32| c.round().clamp(0.0, 255.0) as u8;
    (q(y), q(u), q(v))
}

fn fill_luma(plane: &mut Plane, w: usize, h: usize, bar: usize) {
    for y in 0..h {
        for x in 0..w {
            let (luma, _, _) = rgb_to_yuv(pattern(x, y, w, h, bar));
            plane.data[y * plane.row_stride + x] = luma;
        }
    }
}

fn fill_chroma(u_plane: &mut Plane, v_plane: &mut Plane, w: usize, h: usize, bar: usize) {
    let interleaved = u_plane.pixel_stride == 2;
    for cy in 0..h.div_ceil(2) {
        for cx in 0..w.div_ceil(2) {
            let (_, u, v) = rgb_to_yuv(pattern(cx * 2, cy * 2, w, h, bar));
            let i = cy * u_plane.row_stride + cx * u_plane.pixel_stride;
            u_plane.data[i] = u;
            v_plane.data[i] = v;
            // Each chroma view also sees its partner's sample next to it.
            if interleaved && i + 1 < u_plane.data.len() {
                u_plane.data[i + 1] = v;
                v_plane.data[i + 1] = u;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(format: SourceFormat) -> CaptureConfig {
        CaptureConfig {
            width: 7,
            height: 5,
            fps: 30,
            format,
            buffer_count: 2,
            row_padding: 3,
        }
    }

    #[test]
    fn test_every_format_produces_valid_buffers() {
        for format in [SourceFormat::SemiPlanar, SourceFormat::Planar, SourceFormat::Rgba] {
            let mut capture = SyntheticCapture::new(&config(format)).unwrap();
            let frame = capture.capture_frame().unwrap();
            frame.validate().unwrap();
            assert_eq!((frame.width(), frame.height()), (7, 5));
        }
    }

    #[test]
    fn test_pool_exhaustion_drops_frames() {
        let mut capture = SyntheticCapture::new(&config(SourceFormat::Rgba)).unwrap();
        let a = capture.capture_frame();
        let b = capture.capture_frame();
        assert!(a.is_some() && b.is_some());
        assert!(capture.capture_frame().is_none());
        drop(a);
        assert!(capture.capture_frame().is_some());
    }

    #[test]
    fn test_zero_size_rejected() {
        let mut cfg = config(SourceFormat::Rgba);
        cfg.height = 0;
        assert!(SyntheticCapture::new(&cfg).is_err());
    }

    #[test]
    fn test_gray_round_trips_through_yuv() {
        assert_eq!(rgb_to_yuv([128, 128, 128]), (128, 128, 128));
    }
}
