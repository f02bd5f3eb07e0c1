pub mod capture;
pub mod display;
pub mod error;
pub mod pipeline;
pub mod processing;
pub mod utils;

use std::path::Path;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use capture::{PixelBuffer, PixelFormat, SourceFormat};
pub use display::{DisplayBackend, DisplaySink};
pub use error::{PipelineError, Result};
pub use pipeline::{FrameExchange, Pipeline, PipelineRunner};
pub use processing::{ModeControl, ProcessedRaster, ProcessingMode};

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// Environment prefix for configuration overrides, e.g.
/// `EDGECAM_PIPELINE__INITIAL_MODE=edge_detect`.
pub const ENV_PREFIX: &str = "EDGECAM";

/// System configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub display: DisplayConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: SourceFormat,
    /// Buffers circulating between source and pipeline
    pub buffer_count: usize,
    /// Extra bytes at the end of every row
    pub row_padding: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    pub refresh_hz: u32,
    pub backend: DisplayBackend,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub initial_mode: ProcessingMode,
    pub shutdown_timeout_ms: u64,
    /// Pin the producer thread to this core
    pub producer_core: Option<usize>,
    /// FPS samples kept for reporting
    pub fps_history: usize,
    /// Advance the processing mode every N seconds (demo binary)
    pub demo_cycle_secs: Option<u64>,
    /// Stop after N seconds instead of waiting for Ctrl-C (demo binary)
    pub run_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            display: DisplayConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
            format: SourceFormat::SemiPlanar,
            buffer_count: 2,
            row_padding: 32,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            refresh_hz: 60,
            backend: DisplayBackend::Memory,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            initial_mode: ProcessingMode::Raw,
            shutdown_timeout_ms: 500,
            producer_core: None,
            fps_history: 30,
            demo_cycle_secs: None,
            run_secs: None,
        }
    }
}

impl PipelineConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl DisplayConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.refresh_hz.max(1)))
    }
}

impl Config {
    /// Layer defaults, an optional TOML file and `EDGECAM_*` environment
    /// variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            debug!("Loading configuration from {}", path.display());
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(false),
            );
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults_round_trip_through_loader() {
        let loaded = Config::load(None).unwrap();
        assert_eq!(loaded, Config::default());
    }

    #[test]
    fn test_toml_file_overrides_defaults() {
        let path = std::env::temp_dir().join(format!("edgecam-test-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[capture]\nwidth = 320\nformat = \"rgba\"\n\n[pipeline]\ninitial_mode = \"edge_detect\"\nproducer_core = 1"
        )
        .unwrap();
        drop(file);

        let loaded = Config::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded.capture.width, 320);
        assert_eq!(loaded.capture.height, 480);
        assert_eq!(loaded.capture.format, SourceFormat::Rgba);
        assert_eq!(loaded.pipeline.initial_mode, ProcessingMode::EdgeDetect);
        assert_eq!(loaded.pipeline.producer_core, Some(1));
        assert_eq!(loaded.display, DisplayConfig::default());
    }

    #[test]
    fn test_missing_file_is_optional() {
        let loaded = Config::load(Some(Path::new("/nonexistent/edgecam.toml"))).unwrap();
        assert_eq!(loaded, Config::default());
    }
}
