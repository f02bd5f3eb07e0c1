//! Per-frame pipeline: convert, transform, publish.

pub mod exchange;
pub mod runner;
pub mod stats;

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use crate::capture::PixelBuffer;
use crate::error::Result;
use crate::processing::{convert, ModeControl, ProcessingMode, TransformEngine};

pub use exchange::FrameExchange;
pub use runner::{PipelineRunner, ShutdownReport};
pub use stats::{FpsMeter, FrameStats, StatsSnapshot};

/// Producer side of the pipeline.
///
/// Each call handles exactly one frame; an error aborts that frame only and
/// leaves the exchange untouched.
pub struct Pipeline {
    engine: TransformEngine,
    exchange: Arc<FrameExchange>,
    stats: Arc<FrameStats>,
    frame_size: Option<(u32, u32)>,
}

impl Pipeline {
    pub fn new(mode: Arc<ModeControl>, exchange: Arc<FrameExchange>, stats: Arc<FrameStats>) -> Self {
        Self {
            engine: TransformEngine::new(mode),
            exchange,
            stats,
            frame_size: None,
        }
    }

    pub fn exchange(&self) -> &Arc<FrameExchange> {
        &self.exchange
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Current frame size, once a frame has been converted.
    pub fn frame_size(&self) -> Option<(u32, u32)> {
        self.frame_size
    }

    /// Convert, transform and publish one frame.
    ///
    /// The capture buffer is released right after conversion.
    #[instrument(skip(self, buffer), fields(seq = buffer.meta.sequence))]
    pub fn process_frame(&mut self, buffer: PixelBuffer) -> Result<ProcessingMode> {
        let started = Instant::now();

        let raster = match convert(buffer) {
            Ok(raster) => raster,
            Err(e) => {
                self.stats.record_failed();
                return Err(e);
            }
        };

        let dims = raster.dimensions();
        if self.frame_size != Some(dims) {
            match self.frame_size {
                Some((w, h)) => info!("Frame size changed: {}x{} -> {}x{}", w, h, dims.0, dims.1),
                None => info!("Initialized processor: {}x{}", dims.0, dims.1),
            }
            self.frame_size = Some(dims);
        }

        let (mode, raster) = match self.engine.process(raster) {
            Ok(out) => out,
            Err(e) => {
                self.stats.record_failed();
                return Err(e);
            }
        };

        let latency = raster.meta.captured_at.elapsed();
        if self.exchange.publish(raster) {
            debug!("display lagging, previous frame dropped");
        }
        self.stats.record_processed();

        metrics::histogram!("process_time_us").record(started.elapsed().as_micros() as f64);
        metrics::histogram!("capture_to_publish_ms").record(latency.as_secs_f64() * 1000.0);
        Ok(mode)
    }

    /// Like [`process_frame`](Self::process_frame) but logs failures instead
    /// of returning them. Returns whether a frame was published.
    pub fn handle_frame(&mut self, buffer: PixelBuffer) -> bool {
        match self.process_frame(buffer) {
            Ok(_) => true,
            Err(e) => {
                warn!("Failed to process frame: {}", e);
                false
            }
        }
    }
}
