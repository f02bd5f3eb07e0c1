use std::time::Instant;

use crate::capture::FrameMetadata;
use crate::error::{PipelineError, Result};

/// Tightly packed RGBA frame (row length = width * 4).
#[derive(Debug, Clone)]
pub struct ProcessedRaster {
    width: u32,
    height: u32,
    data: Vec<u8>,
    pub meta: FrameMetadata,
}

impl ProcessedRaster {
    /// Wrap existing RGBA bytes.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(PipelineError::dimensions(width, height));
        }
        let expected = Self::byte_len(width, height)?;
        if data.len() != expected {
            return Err(PipelineError::InvalidDimensions(format!(
                "{width}x{height} raster needs {expected} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
            meta: FrameMetadata {
                sequence: 0,
                captured_at: Instant::now(),
            },
        })
    }

    /// Zero-filled raster, reporting allocation failure instead of aborting.
    pub fn allocate(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(PipelineError::dimensions(width, height));
        }
        let len = Self::byte_len(width, height)?;
        let data = try_zeroed(len)?;
        Self::new(width, height, data)
    }

    /// Raster filled with one RGBA value.
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Result<Self> {
        let mut raster = Self::allocate(width, height)?;
        for px in raster.data.chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
        Ok(raster)
    }

    pub fn with_meta(mut self, meta: FrameMetadata) -> Self {
        self.meta = meta;
        self
    }

    pub(crate) fn byte_len(width: u32, height: u32) -> Result<usize> {
        (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| PipelineError::AllocationFailure(format!("{width}x{height} overflows")))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn row_bytes(&self) -> usize {
        self.width as usize * 4
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        [
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ]
    }

    #[inline]
    pub fn set_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        self.data[i..i + 4].copy_from_slice(&rgba);
    }
}

/// Zeroed byte vector via `try_reserve_exact`.
pub(crate) fn try_zeroed(len: usize) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    data.try_reserve_exact(len)
        .map_err(|e| PipelineError::AllocationFailure(format!("{len} bytes: {e}")))?;
    data.resize(len, 0);
    Ok(data)
}
