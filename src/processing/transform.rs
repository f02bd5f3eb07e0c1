//! Per-frame transforms: passthrough, grayscale and thresholded Sobel edges.

use std::sync::Arc;

use tracing::instrument;

use super::mode::{ModeControl, ProcessingMode};
use super::raster::ProcessedRaster;
use crate::error::{PipelineError, Result};

/// Gradient magnitude above which an interior pixel becomes an edge.
pub const EDGE_THRESHOLD: f64 = 50.0;

const SOBEL_X: [[i32; 3]; 3] = [[-1, 0, 1], [-2, 0, 2], [-1, 0, 1]];
const SOBEL_Y: [[i32; 3]; 3] = [[-1, -2, -1], [0, 0, 0], [1, 2, 1]];

/// Luminance with BT.601 weights, rounded to nearest.
#[inline]
pub fn luminance(r: u8, g: u8, b: u8) -> u8 {
    (0.299 * f64::from(r) + 0.587 * f64::from(g) + 0.114 * f64::from(b))
        .round()
        .min(255.0) as u8
}

/// Apply `mode` to `raster`.
pub fn transform(raster: ProcessedRaster, mode: ProcessingMode) -> Result<ProcessedRaster> {
    let mut scratch = Scratch::default();
    apply(raster, mode, &mut scratch)
}

/// Transform engine bound to a shared [`ModeControl`].
///
/// Keeps its intermediate gray/edge planes between frames.
pub struct TransformEngine {
    mode: Arc<ModeControl>,
    scratch: Scratch,
}

impl TransformEngine {
    pub fn new(mode: Arc<ModeControl>) -> Self {
        Self {
            mode,
            scratch: Scratch::default(),
        }
    }

    pub fn mode_control(&self) -> &Arc<ModeControl> {
        &self.mode
    }

    /// Read the mode once, then transform the whole raster with it.
    #[instrument(skip(self, raster), fields(seq = raster.meta.sequence))]
    pub fn process(&mut self, raster: ProcessedRaster) -> Result<(ProcessingMode, ProcessedRaster)> {
        let mode = self.mode.get();
        let out = apply(raster, mode, &mut self.scratch)?;
        Ok((mode, out))
    }
}

#[derive(Default)]
struct Scratch {
    gray: Vec<u8>,
    edges: Vec<u8>,
}

impl Scratch {
    fn prepare(&mut self, len: usize) -> Result<()> {
        for buf in [&mut self.gray, &mut self.edges] {
            buf.clear();
            buf.try_reserve_exact(len)
                .map_err(|e| PipelineError::AllocationFailure(format!("scratch plane: {e}")))?;
            buf.resize(len, 0);
        }
        Ok(())
    }
}

fn apply(mut raster: ProcessedRaster, mode: ProcessingMode, scratch: &mut Scratch) -> Result<ProcessedRaster> {
    let (w, h) = raster.dimensions();
    if w < 1 || h < 1 || raster.data().len() != w as usize * h as usize * 4 {
        return Err(PipelineError::dimensions(w, h));
    }

    match mode {
        ProcessingMode::Raw => {}
        ProcessingMode::Grayscale => grayscale_in_place(raster.data_mut()),
        ProcessingMode::EdgeDetect => {
            grayscale_in_place(raster.data_mut());
            edge_detect_in_place(&mut raster, scratch)?;
        }
    }

    Ok(raster)
}

fn grayscale_in_place(data: &mut [u8]) {
    for px in data.chunks_exact_mut(4) {
        let gray = luminance(px[0], px[1], px[2]);
        px[0] = gray;
        px[1] = gray;
        px[2] = gray;
    }
}

/// Expects grayscale content. Border pixels are not computed and end up 0.
fn edge_detect_in_place(raster: &mut ProcessedRaster, scratch: &mut Scratch) -> Result<()> {
    let (w, h) = (raster.width() as usize, raster.height() as usize);
    scratch.prepare(w * h)?;

    for (g, px) in scratch.gray.iter_mut().zip(raster.data().chunks_exact(4)) {
        *g = px[0];
    }

    for y in 1..h.saturating_sub(1) {
        for x in 1..w.saturating_sub(1) {
            let (gx, gy) = sobel_at(&scratch.gray, w, x, y);
            scratch.edges[y * w + x] = if is_edge(gx, gy) { 255 } else { 0 };
        }
    }

    for (px, &edge) in raster.data_mut().chunks_exact_mut(4).zip(scratch.edges.iter()) {
        px[0] = edge;
        px[1] = edge;
        px[2] = edge;
    }
    Ok(())
}

/// Horizontal and vertical Sobel responses at an interior pixel of a
/// row-major gray plane of width `w`.
pub fn sobel_at(gray: &[u8], w: usize, x: usize, y: usize) -> (i32, i32) {
    let mut gx = 0;
    let mut gy = 0;
    for ky in 0..3 {
        let row = (y + ky - 1) * w;
        for kx in 0..3 {
            let v = i32::from(gray[row + x + kx - 1]);
            gx += v * SOBEL_X[ky][kx];
            gy += v * SOBEL_Y[ky][kx];
        }
    }
    (gx, gy)
}

#[inline]
fn is_edge(gx: i32, gy: i32) -> bool {
    let magnitude = f64::from(gx * gx + gy * gy).sqrt().min(255.0);
    magnitude > EDGE_THRESHOLD
}
