//! Producer and display threads around the frame exchange.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::{FpsMeter, FrameExchange, FrameStats, Pipeline, StatsSnapshot};
use crate::capture::FrameSource;
use crate::display::{DisplaySink, TextureTarget};
use crate::error::{PipelineError, Result};
use crate::processing::ModeControl;
use crate::{utils, Config};

/// Outcome of [`PipelineRunner::shutdown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub joined: usize,
    /// Threads that missed the deadline and were left to exit on their own
    pub detached: usize,
}

struct Worker {
    name: &'static str,
    handle: JoinHandle<()>,
    done: Receiver<()>,
}

/// Signals thread exit on drop, including on panic.
struct ExitSignal(Sender<()>);

impl Drop for ExitSignal {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}

/// Runs capture/processing and display on two threads.
///
/// The threads only meet at the [`FrameExchange`]; neither waits for the
/// other.
pub struct PipelineRunner {
    running: Arc<AtomicBool>,
    mode: Arc<ModeControl>,
    exchange: Arc<FrameExchange>,
    stats: Arc<FrameStats>,
    workers: Mutex<Vec<Worker>>,
    shutdown_timeout: Duration,
}

impl PipelineRunner {
    pub fn start<S, T>(config: &Config, source: S, sink: DisplaySink<T>) -> Result<Self>
    where
        S: FrameSource + Send + 'static,
        T: TextureTarget + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let mode = Arc::new(ModeControl::new(config.pipeline.initial_mode));
        let exchange = Arc::new(FrameExchange::new());
        let stats = Arc::new(FrameStats::new());

        let runner = Self {
            running: running.clone(),
            mode: mode.clone(),
            exchange: exchange.clone(),
            stats: stats.clone(),
            workers: Mutex::new(Vec::with_capacity(2)),
            shutdown_timeout: config.pipeline.shutdown_timeout(),
        };

        let pipeline = Pipeline::new(mode, exchange.clone(), stats.clone());
        let producer = ProducerLoop {
            running: running.clone(),
            source,
            pipeline,
            stats: stats.clone(),
            fps: FpsMeter::new(config.pipeline.fps_history),
            core: config.pipeline.producer_core,
        };
        runner.spawn("edgecam-producer", move || producer.run())?;

        let display = DisplayLoop {
            running,
            sink,
            exchange,
            stats,
            fps: FpsMeter::new(config.pipeline.fps_history),
            interval: config.display.refresh_interval(),
        };
        runner.spawn("edgecam-display", move || display.run())?;

        info!("Pipeline started in {} mode", runner.mode.get());
        Ok(runner)
    }

    fn spawn<F>(&self, name: &'static str, body: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let (done_tx, done) = flume::bounded(1);
        let spawned = thread::Builder::new().name(name.into()).spawn(move || {
            let _exit = ExitSignal(done_tx);
            body();
        });

        match spawned {
            Ok(handle) => {
                self.workers.lock().push(Worker { name, handle, done });
                Ok(())
            }
            Err(e) => {
                // Stop whatever already started.
                self.shutdown(self.shutdown_timeout);
                Err(PipelineError::AllocationFailure(format!("spawn {name}: {e}")))
            }
        }
    }

    /// Shared mode control; changes apply from the next processed frame.
    pub fn mode_control(&self) -> &Arc<ModeControl> {
        &self.mode
    }

    pub fn exchange(&self) -> &Arc<FrameExchange> {
        &self.exchange
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop both threads, waiting at most `timeout` overall.
    ///
    /// Threads that do not exit in time are detached. Safe to call more than
    /// once and from either worker thread.
    pub fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        self.running.store(false, Ordering::Release);
        let workers = std::mem::take(&mut *self.workers.lock());
        let deadline = Instant::now() + timeout;
        let current = thread::current().id();
        let mut report = ShutdownReport::default();

        for worker in workers {
            if worker.handle.thread().id() == current {
                // Cannot join ourselves; we exit once the caller returns.
                report.detached += 1;
                continue;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            match worker.done.recv_timeout(remaining) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    if worker.handle.join().is_err() {
                        error!("{} thread panicked", worker.name);
                    }
                    report.joined += 1;
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!("{} thread did not stop within {:?}, detaching", worker.name, timeout);
                    report.detached += 1;
                }
            }
        }

        self.exchange.clear();
        if report != ShutdownReport::default() {
            info!(joined = report.joined, detached = report.detached, "Pipeline stopped");
        }
        report
    }
}

impl Drop for PipelineRunner {
    fn drop(&mut self) {
        self.shutdown(self.shutdown_timeout);
    }
}

struct ProducerLoop<S> {
    running: Arc<AtomicBool>,
    source: S,
    pipeline: Pipeline,
    stats: Arc<FrameStats>,
    fps: FpsMeter,
    core: Option<usize>,
}

impl<S: FrameSource> ProducerLoop<S> {
    fn run(mut self) {
        if let Some(core) = self.core {
            utils::pin_current_thread(core);
        }
        debug!("{} running", utils::thread_label());

        let interval = self.source.frame_interval();
        while self.running.load(Ordering::Acquire) {
            let started = Instant::now();

            match self.source.next_frame() {
                Some(buffer) => {
                    self.stats.record_captured();
                    if self.pipeline.handle_frame(buffer) {
                        if let Some(fps) = self.fps.tick() {
                            self.stats.set_producer_fps(fps);
                            debug!(fps, "producer");
                        }
                    }
                }
                None => self.stats.record_capture_skipped(),
            }

            thread::sleep(interval.saturating_sub(started.elapsed()));
        }
        debug!("{} exiting", utils::thread_label());
    }
}

struct DisplayLoop<T> {
    running: Arc<AtomicBool>,
    sink: DisplaySink<T>,
    exchange: Arc<FrameExchange>,
    stats: Arc<FrameStats>,
    fps: FpsMeter,
    interval: Duration,
}

impl<T: TextureTarget> DisplayLoop<T> {
    fn run(mut self) {
        debug!("{} running", utils::thread_label());

        while self.running.load(Ordering::Acquire) {
            let started = Instant::now();

            match self.sink.present_latest(&self.exchange) {
                Ok(true) => {
                    self.stats.record_presented();
                    if let Some(fps) = self.fps.tick() {
                        self.stats.set_display_fps(fps);
                        debug!(fps, "display");
                    }
                }
                Ok(false) => {}
                Err(PipelineError::AllocationFailure(e)) => {
                    self.stats.record_present_failed();
                    warn!("Texture allocation failed, retrying next frame: {}", e);
                }
                Err(e) => {
                    self.stats.record_present_failed();
                    error!("Display error: {}", e);
                }
            }

            thread::sleep(self.interval.saturating_sub(started.elapsed()));
        }
        debug!("{} exiting", utils::thread_label());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{PixelBuffer, SourceFormat, SyntheticCapture};
    use crate::display::MemoryTarget;
    use crate::processing::ProcessingMode;
    use crate::CaptureConfig;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.capture = CaptureConfig {
            width: 32,
            height: 24,
            fps: 200,
            format: SourceFormat::SemiPlanar,
            buffer_count: 2,
            row_padding: 8,
        };
        config.display.refresh_hz = 200;
        config
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_frames_flow_to_display_and_stop_cleanly() {
        let config = test_config();
        let source = SyntheticCapture::new(&config.capture).unwrap();
        let sink = DisplaySink::new(MemoryTarget::new(), 64, 48);
        let runner = PipelineRunner::start(&config, source, sink).unwrap();

        assert!(wait_for(|| runner.stats().presented >= 3));
        runner.mode_control().set(ProcessingMode::EdgeDetect);
        let processed = runner.stats().processed;
        assert!(wait_for(|| runner.stats().processed > processed + 2));

        let report = runner.shutdown(Duration::from_secs(2));
        assert_eq!(report, ShutdownReport { joined: 2, detached: 0 });
        assert!(!runner.is_running());
        assert!(runner.exchange().consume_latest().is_none());

        let stats = runner.stats();
        assert_eq!(stats.failed, 0);
        assert!(stats.captured >= stats.processed);

        // Second call is a no-op.
        assert_eq!(runner.shutdown(Duration::from_millis(10)), ShutdownReport::default());
    }

    struct StuckSource {
        release: Receiver<()>,
    }

    impl FrameSource for StuckSource {
        fn next_frame(&mut self) -> Option<PixelBuffer> {
            // Blocks well past the shutdown deadline.
            let _ = self.release.recv_timeout(Duration::from_secs(10));
            None
        }

        fn frame_interval(&self) -> Duration {
            Duration::from_millis(1)
        }
    }

    #[test]
    fn test_shutdown_is_bounded_when_producer_hangs() {
        let (release_tx, release) = flume::bounded(1);
        let config = test_config();
        let sink = DisplaySink::new(MemoryTarget::new(), 8, 8);
        let runner = PipelineRunner::start(&config, StuckSource { release }, sink).unwrap();
        thread::sleep(Duration::from_millis(20));

        let started = Instant::now();
        let report = runner.shutdown(Duration::from_millis(100));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(report, ShutdownReport { joined: 1, detached: 1 });

        // Let the detached producer finish.
        let _ = release_tx.send(());
    }

    #[test]
    fn test_failing_frames_do_not_stop_the_producer() {
        struct BadSource(u32);

        impl FrameSource for BadSource {
            fn next_frame(&mut self) -> Option<PixelBuffer> {
                self.0 += 1;
                if self.0 % 2 == 0 {
                    Some(PixelBuffer::rgba_packed(0, 0, Vec::new()))
                } else {
                    Some(PixelBuffer::rgba_packed(2, 2, vec![200; 16]))
                }
            }

            fn frame_interval(&self) -> Duration {
                Duration::from_millis(2)
            }
        }

        let config = test_config();
        let sink = DisplaySink::new(MemoryTarget::new(), 8, 8);
        let runner = PipelineRunner::start(&config, BadSource(0), sink).unwrap();
        assert!(wait_for(|| {
            let s = runner.stats();
            s.failed >= 3 && s.processed >= 3
        }));
        runner.shutdown(Duration::from_secs(2));
    }
}
