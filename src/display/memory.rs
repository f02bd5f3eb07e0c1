//! CPU-side texture target.
//!
//! Behaves like a canvas: the texture is a byte vector and a draw records
//! the quad and projection it was issued with. Used for headless runs and
//! tests.

use glam::Mat4;
use tracing::trace;

use super::{QuadVertex, TextureTarget};
use crate::error::{PipelineError, Result};
use crate::processing::ProcessedRaster;

#[derive(Default)]
pub struct MemoryTarget {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    /// Largest texture, in bytes, this target will allocate
    limit: Option<usize>,
    last_draw: Option<([QuadVertex; 4], Mat4)>,
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Target that refuses textures larger than `limit` bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn last_draw(&self) -> Option<&([QuadVertex; 4], Mat4)> {
        self.last_draw.as_ref()
    }
}

impl TextureTarget for MemoryTarget {
    fn allocate(&mut self, raster: &ProcessedRaster) -> Result<()> {
        let len = raster.data().len();
        if self.limit.is_some_and(|limit| len > limit) {
            return Err(PipelineError::AllocationFailure(format!(
                "{}x{} texture exceeds {} byte limit",
                raster.width(),
                raster.height(),
                self.limit.unwrap_or_default()
            )));
        }

        // Release the old storage before growing.
        self.pixels = Vec::new();
        self.width = 0;
        self.height = 0;

        let mut pixels = Vec::new();
        pixels
            .try_reserve_exact(len)
            .map_err(|e| PipelineError::AllocationFailure(format!("texture: {e}")))?;
        pixels.extend_from_slice(raster.data());

        self.pixels = pixels;
        (self.width, self.height) = raster.dimensions();
        Ok(())
    }

    fn update(&mut self, raster: &ProcessedRaster) -> Result<()> {
        if raster.dimensions() != (self.width, self.height) {
            return Err(PipelineError::InvalidDimensions(format!(
                "update {}x{} into {}x{} texture",
                raster.width(),
                raster.height(),
                self.width,
                self.height
            )));
        }
        self.pixels.copy_from_slice(raster.data());
        Ok(())
    }

    fn draw(&mut self, quad: &[QuadVertex; 4], projection: &Mat4) -> Result<()> {
        trace!(width = self.width, height = self.height, "memory draw");
        self.last_draw = Some((*quad, *projection));
        Ok(())
    }
}
