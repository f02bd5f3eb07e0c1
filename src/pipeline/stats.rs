//! Frame counters and FPS measurement.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam::utils::CachePadded;
use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;

/// Counters shared by the producer and display threads.
#[derive(Default)]
pub struct FrameStats {
    counters: CachePadded<Counters>,
    producer_fps: AtomicU32,
    display_fps: AtomicU32,
}

#[derive(Default)]
struct Counters {
    captured: AtomicU64,
    capture_skipped: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    presented: AtomicU64,
    present_failed: AtomicU64,
}

/// Point-in-time copy of [`FrameStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub captured: u64,
    /// Capture ticks with no free buffer
    pub capture_skipped: u64,
    pub processed: u64,
    pub failed: u64,
    pub presented: u64,
    pub present_failed: u64,
    pub producer_fps: u32,
    pub display_fps: u32,
}

impl FrameStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_captured(&self) {
        self.counters.captured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_capture_skipped(&self) {
        self.counters.capture_skipped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("capture_skipped").increment(1);
    }

    pub fn record_processed(&self) {
        self.counters.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("frames_failed").increment(1);
    }

    pub fn record_presented(&self) {
        self.counters.presented.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_present_failed(&self) {
        self.counters.present_failed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("present_failed").increment(1);
    }

    pub fn set_producer_fps(&self, fps: u32) {
        self.producer_fps.store(fps, Ordering::Relaxed);
    }

    pub fn set_display_fps(&self, fps: u32) {
        self.display_fps.store(fps, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let c = &self.counters;
        StatsSnapshot {
            captured: c.captured.load(Ordering::Relaxed),
            capture_skipped: c.capture_skipped.load(Ordering::Relaxed),
            processed: c.processed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            presented: c.presented.load(Ordering::Relaxed),
            present_failed: c.present_failed.load(Ordering::Relaxed),
            producer_fps: self.producer_fps.load(Ordering::Relaxed),
            display_fps: self.display_fps.load(Ordering::Relaxed),
        }
    }
}

/// Frames-per-second meter sampled about once a second.
pub struct FpsMeter {
    frames: u32,
    last_sample: Option<Instant>,
    current: u32,
    history: HeapRb<u32>,
}

impl FpsMeter {
    const WINDOW: Duration = Duration::from_secs(1);

    pub fn new(history_len: usize) -> Self {
        Self {
            frames: 0,
            last_sample: None,
            current: 0,
            history: HeapRb::new(history_len.max(1)),
        }
    }

    /// Count a frame. Returns a new FPS value when a sample window closes.
    pub fn tick(&mut self) -> Option<u32> {
        self.tick_at(Instant::now())
    }

    pub fn tick_at(&mut self, now: Instant) -> Option<u32> {
        let start = *self.last_sample.get_or_insert(now);
        self.frames += 1;

        let elapsed = now.saturating_duration_since(start);
        if elapsed < Self::WINDOW {
            return None;
        }

        let fps = (f64::from(self.frames) / elapsed.as_secs_f64()).round() as u32;
        self.current = fps;
        self.history.push_overwrite(fps);
        self.frames = 0;
        self.last_sample = Some(now);
        Some(fps)
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    /// Oldest sample first.
    pub fn history(&self) -> Vec<u32> {
        self.history.iter().copied().collect()
    }

    pub fn samples(&self) -> usize {
        self.history.occupied_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fps_sampled_after_one_second() {
        let mut meter = FpsMeter::new(4);
        let t0 = Instant::now();
        // First tick opens the window.
        assert_eq!(meter.tick_at(t0), None);
        for i in 1..30 {
            assert_eq!(meter.tick_at(t0 + Duration::from_millis(i * 33)), None);
        }
        assert_eq!(meter.tick_at(t0 + Duration::from_millis(1000)), Some(31));
        assert_eq!(meter.current(), 31);
    }

    #[test]
    fn test_history_evicts_oldest() {
        let mut meter = FpsMeter::new(2);
        let t0 = Instant::now();
        meter.tick_at(t0);
        for s in 1..=3u64 {
            meter.tick_at(t0 + Duration::from_secs(s));
        }
        assert_eq!(meter.samples(), 2);
        assert_eq!(meter.history(), vec![1, 1]);
    }

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = FrameStats::new();
        stats.record_captured();
        stats.record_captured();
        stats.record_processed();
        stats.record_failed();
        stats.set_display_fps(24);
        let snap = stats.snapshot();
        assert_eq!(snap.captured, 2);
        assert_eq!(snap.processed, 1);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.display_fps, 24);
    }
}
