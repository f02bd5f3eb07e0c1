//! Frame processing: format conversion and mode-selected transforms.

pub mod convert;
pub mod mode;
pub mod raster;
pub mod transform;

pub use convert::convert;
pub use mode::{ModeControl, ProcessingMode};
pub use raster::ProcessedRaster;
pub use transform::{transform, TransformEngine};
