pub mod frame;
pub mod pool;
pub mod synthetic;

use std::time::Duration;

pub use frame::{FrameMetadata, PixelBuffer, PixelFormat, Plane};
pub use pool::{BufferLayout, BufferPool, PlaneLayout};
pub use synthetic::{SourceFormat, SyntheticCapture};

/// Anything that delivers captured frames to the pipeline.
pub trait FrameSource {
    /// Next frame, or `None` when no frame is available this tick.
    fn next_frame(&mut self) -> Option<PixelBuffer>;

    /// Pacing between capture attempts.
    fn frame_interval(&self) -> Duration;
}

impl FrameSource for SyntheticCapture {
    fn next_frame(&mut self) -> Option<PixelBuffer> {
        self.capture_frame()
    }

    fn frame_interval(&self) -> Duration {
        SyntheticCapture::frame_interval(self)
    }
}
