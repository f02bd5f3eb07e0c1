use std::time::Instant;

use flume::Sender;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Pixel formats a capture source may deliver.
///
/// Only `Yuv420` and `Rgba8888` are understood by the converter; the rest
/// are rejected per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 4:2:0 luma + two chroma planes. The chroma pixel stride tells planar
    /// (1) from semi-planar interleaved (2) layouts.
    Yuv420,
    /// Packed 8-bit RGBA.
    Rgba8888,
    Rgb24,
    Yuyv422,
    Mjpeg,
}

impl PixelFormat {
    /// Number of planes the format carries, `None` for formats the pipeline
    /// does not decode.
    pub fn plane_count(self) -> Option<usize> {
        match self {
            Self::Yuv420 => Some(3),
            Self::Rgba8888 => Some(1),
            Self::Rgb24 | Self::Yuyv422 | Self::Mjpeg => None,
        }
    }
}

/// One plane of pixel data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plane {
    pub data: Vec<u8>,
    /// Bytes between the start of consecutive rows (may include padding)
    pub row_stride: usize,
    /// Bytes between horizontally adjacent samples
    pub pixel_stride: usize,
}

impl Plane {
    pub fn new(data: Vec<u8>, row_stride: usize, pixel_stride: usize) -> Self {
        Self {
            data,
            row_stride,
            pixel_stride,
        }
    }

    /// Sample at plane coordinates. Caller must have validated the plane.
    #[inline]
    pub fn sample(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.row_stride + x * self.pixel_stride]
    }

    /// Check that a `cols` x `rows` grid of `sample_bytes`-wide samples fits.
    fn check(&self, name: &str, cols: usize, rows: usize, sample_bytes: usize) -> Result<()> {
        let overflow = || {
            PipelineError::InvalidDimensions(format!(
                "{name} plane stride {}/{} overflows for {cols}x{rows}",
                self.row_stride, self.pixel_stride
            ))
        };

        let row_bytes = (cols - 1)
            .checked_mul(self.pixel_stride)
            .and_then(|n| n.checked_add(sample_bytes))
            .ok_or_else(overflow)?;
        if self.pixel_stride < sample_bytes || self.row_stride < row_bytes {
            return Err(PipelineError::InvalidDimensions(format!(
                "{name} plane stride {}/{} too small for {cols} samples",
                self.row_stride, self.pixel_stride
            )));
        }
        let required = (rows - 1)
            .checked_mul(self.row_stride)
            .and_then(|n| n.checked_add(row_bytes))
            .ok_or_else(overflow)?;
        if self.data.len() < required {
            return Err(PipelineError::InvalidDimensions(format!(
                "{name} plane holds {} bytes, {cols}x{rows} needs {required}",
                self.data.len()
            )));
        }
        Ok(())
    }
}

/// Frame metadata
#[derive(Debug, Clone, Copy)]
pub struct FrameMetadata {
    pub sequence: u64,
    /// Capture timestamp for latency tracking
    pub captured_at: Instant,
}

/// A captured frame with explicit layout.
///
/// Buffers handed out by a [`BufferPool`](super::BufferPool) return their
/// plane storage to the pool when dropped.
#[derive(Debug)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    format: PixelFormat,
    planes: Vec<Plane>,
    pub meta: FrameMetadata,
    recycle: Option<Sender<Vec<Plane>>>,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32, format: PixelFormat, planes: Vec<Plane>) -> Self {
        Self {
            width,
            height,
            format,
            planes,
            meta: FrameMetadata {
                sequence: 0,
                captured_at: Instant::now(),
            },
            recycle: None,
        }
    }

    /// Packed RGBA frame with the given row stride.
    pub fn rgba(width: u32, height: u32, data: Vec<u8>, row_stride: usize) -> Self {
        Self::new(
            width,
            height,
            PixelFormat::Rgba8888,
            vec![Plane::new(data, row_stride, 4)],
        )
    }

    /// Tightly packed RGBA frame.
    pub fn rgba_packed(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self::rgba(width, height, data, width as usize * 4)
    }

    /// YUV 4:2:0 frame from separate luma and chroma planes.
    pub fn yuv420(width: u32, height: u32, y: Plane, u: Plane, v: Plane) -> Self {
        Self::new(width, height, PixelFormat::Yuv420, vec![y, u, v])
    }

    pub(crate) fn with_recycle(mut self, sequence: u64, tx: Sender<Vec<Plane>>) -> Self {
        self.meta.sequence = sequence;
        self.recycle = Some(tx);
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    pub fn planes_mut(&mut self) -> &mut [Plane] {
        &mut self.planes
    }

    /// Verify format, dimensions and that every plane covers the grid.
    pub fn validate(&self) -> Result<()> {
        let expected = self
            .format
            .plane_count()
            .ok_or_else(|| PipelineError::UnsupportedFormat(format!("{:?}", self.format)))?;

        if self.width == 0 || self.height == 0 {
            return Err(PipelineError::dimensions(self.width, self.height));
        }

        if self.planes.len() != expected {
            return Err(PipelineError::UnsupportedFormat(format!(
                "{:?} with {} planes, expected {expected}",
                self.format,
                self.planes.len()
            )));
        }

        let (w, h) = (self.width as usize, self.height as usize);
        match self.format {
            PixelFormat::Rgba8888 => {
                let plane = &self.planes[0];
                if plane.pixel_stride != 4 {
                    return Err(PipelineError::InvalidDimensions(format!(
                        "packed rgba needs pixel stride 4, got {}",
                        plane.pixel_stride
                    )));
                }
                plane.check("rgba", w, h, 4)
            }
            PixelFormat::Yuv420 => {
                let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
                self.planes[0].check("y", w, h, 1)?;
                self.planes[1].check("u", cw, ch, 1)?;
                self.planes[2].check("v", cw, ch, 1)
            }
            other => Err(PipelineError::UnsupportedFormat(format!("{other:?}"))),
        }
    }
}

impl Drop for PixelBuffer {
    fn drop(&mut self) {
        if let Some(tx) = self.recycle.take() {
            // A closed pool just frees the storage.
            let _ = tx.try_send(std::mem::take(&mut self.planes));
        }
    }
}
