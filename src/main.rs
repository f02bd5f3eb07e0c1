//! Edgecam demo: synthetic camera through the processing pipeline into a
//! display sink.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use edgecam::capture::SyntheticCapture;
use edgecam::display::{DisplayBackend, DisplaySink, MemoryTarget};
use edgecam::pipeline::PipelineRunner;
use edgecam::Config;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("edgecam=debug")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Edgecam launching...");

    let path = std::env::var_os("EDGECAM_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("edgecam.toml"));
    let config = Config::load(Some(&path))?;
    edgecam::CONFIG.store(Arc::new(config.clone()));

    info!(
        "Capture {}x{} @ {} fps ({:?}), display {:?} {}x{}",
        config.capture.width,
        config.capture.height,
        config.capture.fps,
        config.capture.format,
        config.display.backend,
        config.display.width,
        config.display.height
    );

    let source = SyntheticCapture::new(&config.capture)?;
    let runner = match config.display.backend {
        DisplayBackend::Memory => start_memory(&config, source)?,
        DisplayBackend::Gpu => start_gpu(&config, source)?,
    };

    let mode = runner.mode_control().clone();
    let cycler = config.pipeline.demo_cycle_secs.map(|secs| {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(secs.max(1)));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let next = mode.cycle();
                info!("Switched to {} mode", next);
            }
        })
    });

    match config.pipeline.run_secs {
        Some(secs) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => info!("Run time elapsed"),
                _ = tokio::signal::ctrl_c() => info!("Interrupted"),
            }
        }
        None => {
            tokio::signal::ctrl_c().await?;
            info!("Interrupted");
        }
    }

    if let Some(cycler) = cycler {
        cycler.abort();
    }

    let report = runner.shutdown(config.pipeline.shutdown_timeout());
    if report.detached > 0 {
        warn!("{} thread(s) detached during shutdown", report.detached);
    }

    let stats = runner.stats();
    info!(
        captured = stats.captured,
        skipped = stats.capture_skipped,
        processed = stats.processed,
        failed = stats.failed,
        presented = stats.presented,
        present_failed = stats.present_failed,
        "Final frame counts"
    );
    info!("Last FPS: producer {}, display {}", stats.producer_fps, stats.display_fps);
    let (published, consumed, superseded) = runner.exchange().stats();
    info!(published, consumed, superseded, "Exchange");

    Ok(())
}

fn start_memory(config: &Config, source: SyntheticCapture) -> Result<PipelineRunner> {
    let sink = DisplaySink::new(MemoryTarget::new(), config.display.width, config.display.height);
    Ok(PipelineRunner::start(config, source, sink)?)
}

#[cfg(feature = "gpu-display")]
fn start_gpu(config: &Config, source: SyntheticCapture) -> Result<PipelineRunner> {
    use edgecam::display::GpuTarget;

    let target = GpuTarget::new(config.display.width, config.display.height)?;
    let sink = DisplaySink::new(target, config.display.width, config.display.height);
    Ok(PipelineRunner::start(config, source, sink)?)
}

#[cfg(not(feature = "gpu-display"))]
fn start_gpu(config: &Config, source: SyntheticCapture) -> Result<PipelineRunner> {
    warn!("Built without gpu-display, falling back to the memory backend");
    start_memory(config, source)
}
