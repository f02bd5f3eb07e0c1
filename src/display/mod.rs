//! Display sink: uploads processed frames into a texture and draws a
//! full-screen quad.

#[cfg(feature = "gpu-display")]
pub mod gpu;
pub mod memory;

use std::time::Instant;

use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{PipelineError, Result};
use crate::pipeline::FrameExchange;
use crate::processing::ProcessedRaster;

#[cfg(feature = "gpu-display")]
pub use gpu::GpuTarget;
pub use memory::MemoryTarget;

/// Texture backend the sink should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayBackend {
    /// CPU-side texture, no GPU required
    Memory,
    /// Offscreen wgpu texture and render pass
    Gpu,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct QuadVertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
}

/// Full-screen quad as a triangle strip. UV v runs top-down to match the
/// raster's top-left origin.
pub const QUAD_VERTICES: [QuadVertex; 4] = [
    QuadVertex { position: [-1.0, -1.0], uv: [0.0, 1.0] },
    QuadVertex { position: [1.0, -1.0], uv: [1.0, 1.0] },
    QuadVertex { position: [-1.0, 1.0], uv: [0.0, 0.0] },
    QuadVertex { position: [1.0, 1.0], uv: [1.0, 0.0] },
];

/// Orthographic projection for a viewport, `ortho(-1, 1, -r, r, -1, 1)`
/// with `r = width / height`.
pub fn projection(viewport_width: u32, viewport_height: u32) -> Mat4 {
    let ratio = viewport_width as f32 / viewport_height.max(1) as f32;
    Mat4::orthographic_rh_gl(-1.0, 1.0, -ratio, ratio, -1.0, 1.0)
}

/// A 2D texture the sink can fill and draw.
pub trait TextureTarget {
    /// Replace texture storage with a `width` x `height` image holding `raster`.
    fn allocate(&mut self, raster: &ProcessedRaster) -> Result<()>;

    /// Overwrite the full frame inside existing storage of the same size.
    fn update(&mut self, raster: &ProcessedRaster) -> Result<()>;

    /// Draw the textured quad.
    fn draw(&mut self, quad: &[QuadVertex; 4], projection: &Mat4) -> Result<()>;

    fn resize_viewport(&mut self, _width: u32, _height: u32) -> Result<()> {
        Ok(())
    }
}

/// Counters kept by a [`DisplaySink`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub allocations: u64,
    pub updates: u64,
    pub draws: u64,
    pub skipped: u64,
}

pub struct DisplaySink<T> {
    target: T,
    texture_size: Option<(u32, u32)>,
    projection: Mat4,
    stats: SinkStats,
}

impl<T: TextureTarget> DisplaySink<T> {
    pub fn new(target: T, viewport_width: u32, viewport_height: u32) -> Self {
        Self {
            target,
            texture_size: None,
            projection: projection(viewport_width, viewport_height),
            stats: SinkStats::default(),
        }
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn stats(&self) -> SinkStats {
        self.stats
    }

    pub fn texture_size(&self) -> Option<(u32, u32)> {
        self.texture_size
    }

    pub fn projection(&self) -> &Mat4 {
        &self.projection
    }

    pub fn resize_viewport(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(PipelineError::dimensions(width, height));
        }
        self.target.resize_viewport(width, height)?;
        self.projection = projection(width, height);
        debug!(width, height, "viewport resized");
        Ok(())
    }

    /// Upload `raster` and draw it.
    ///
    /// A size change reallocates the texture; otherwise the existing storage
    /// is updated in place. A failed allocation forgets the texture so the
    /// next frame retries it.
    #[instrument(skip(self, raster), fields(seq = raster.meta.sequence))]
    pub fn present(&mut self, raster: &ProcessedRaster) -> Result<()> {
        let started = Instant::now();
        let dims = raster.dimensions();

        if self.texture_size == Some(dims) {
            self.target.update(raster)?;
            self.stats.updates += 1;
        } else {
            self.texture_size = None;
            self.target.allocate(raster)?;
            self.texture_size = Some(dims);
            self.stats.allocations += 1;
            debug!(width = dims.0, height = dims.1, "texture reallocated");
        }

        self.target.draw(&QUAD_VERTICES, &self.projection)?;
        self.stats.draws += 1;

        metrics::histogram!("present_time_us").record(started.elapsed().as_micros() as f64);
        Ok(())
    }

    /// Pull the latest frame from `exchange` and present it.
    ///
    /// Returns `Ok(false)` when nothing new was pending. Never waits for the
    /// producer.
    pub fn present_latest(&mut self, exchange: &FrameExchange) -> Result<bool> {
        let Some(raster) = exchange.consume_latest() else {
            return Ok(false);
        };
        match self.present(&raster) {
            Ok(()) => {
                metrics::histogram!("frame_latency_ms")
                    .record(raster.meta.captured_at.elapsed().as_secs_f64() * 1000.0);
                Ok(true)
            }
            Err(e) => {
                self.stats.skipped += 1;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec4;

    use super::*;

    fn raster(w: u32, h: u32, v: u8) -> ProcessedRaster {
        ProcessedRaster::filled(w, h, [v, v, v, 255]).unwrap()
    }

    #[test]
    fn test_same_size_updates_in_place() {
        let mut sink = DisplaySink::new(MemoryTarget::new(), 640, 480);
        sink.present(&raster(4, 4, 1)).unwrap();
        sink.present(&raster(4, 4, 2)).unwrap();
        sink.present(&raster(4, 4, 3)).unwrap();

        let stats = sink.stats();
        assert_eq!(stats.allocations, 1);
        assert_eq!(stats.updates, 2);
        assert_eq!(stats.draws, 3);
        assert_eq!(sink.target().pixels(), raster(4, 4, 3).data());
    }

    #[test]
    fn test_size_change_reallocates() {
        let mut sink = DisplaySink::new(MemoryTarget::new(), 640, 480);
        sink.present(&raster(4, 4, 1)).unwrap();
        sink.present(&raster(8, 2, 1)).unwrap();
        sink.present(&raster(8, 2, 1)).unwrap();
        assert_eq!(sink.stats().allocations, 2);
        assert_eq!(sink.stats().updates, 1);
        assert_eq!(sink.texture_size(), Some((8, 2)));
        assert_eq!(sink.target().size(), (8, 2));
    }

    #[test]
    fn test_allocation_failure_skips_and_retries() {
        // Room for a 4x4 texture only.
        let mut sink = DisplaySink::new(MemoryTarget::with_limit(64), 640, 480);
        let exchange = FrameExchange::new();

        exchange.publish(raster(8, 8, 1));
        assert!(matches!(
            sink.present_latest(&exchange),
            Err(PipelineError::AllocationFailure(_))
        ));
        assert_eq!(sink.texture_size(), None);
        assert_eq!(sink.stats().skipped, 1);

        exchange.publish(raster(4, 4, 9));
        assert!(sink.present_latest(&exchange).unwrap());
        assert_eq!(sink.texture_size(), Some((4, 4)));
        assert_eq!(sink.target().pixels()[0], 9);
    }

    #[test]
    fn test_nothing_pending_is_not_an_error() {
        let mut sink = DisplaySink::new(MemoryTarget::new(), 1, 1);
        assert!(!sink.present_latest(&FrameExchange::new()).unwrap());
        assert_eq!(sink.stats().draws, 0);
    }

    #[test]
    fn test_quad_corners_map_to_flipped_uv() {
        let corners: Vec<_> = QUAD_VERTICES.iter().map(|v| (v.position, v.uv)).collect();
        assert_eq!(
            corners,
            vec![
                ([-1.0, -1.0], [0.0, 1.0]),
                ([1.0, -1.0], [1.0, 1.0]),
                ([-1.0, 1.0], [0.0, 0.0]),
                ([1.0, 1.0], [1.0, 0.0]),
            ]
        );
    }

    #[test]
    fn test_projection_squares_the_viewport() {
        let p = projection(200, 100);
        // x is untouched, y is divided by the aspect ratio
        let top_right = p * Vec4::new(1.0, 2.0, 0.0, 1.0);
        assert!((top_right.x - 1.0).abs() < 1e-6);
        assert!((top_right.y - 1.0).abs() < 1e-6);

        let square = projection(100, 100);
        assert!(square.abs_diff_eq(Mat4::orthographic_rh_gl(-1.0, 1.0, -1.0, 1.0, -1.0, 1.0), 1e-6));
    }

    #[test]
    fn test_resize_viewport_updates_projection() {
        let mut sink = DisplaySink::new(MemoryTarget::new(), 100, 100);
        sink.resize_viewport(300, 100).unwrap();
        assert!(sink.projection().abs_diff_eq(projection(300, 100), 1e-6));
        assert!(sink.resize_viewport(0, 10).is_err());
    }
}
