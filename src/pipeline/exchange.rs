//! Single-slot, latest-wins hand-off between the producer and the display.

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::utils::CachePadded;
use parking_lot::Mutex;
use tracing::trace;

use crate::processing::ProcessedRaster;

/// Holds at most one processed frame.
///
/// `publish` replaces unread content instead of queueing it, so the display
/// always gets the freshest complete frame and a slow consumer just drops
/// frames. The lock only guards an ownership swap; pixels are never copied
/// inside it.
#[derive(Default)]
pub struct FrameExchange {
    slot: Mutex<Option<ProcessedRaster>>,

    /// Statistics
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    published: AtomicUsize,
    consumed: AtomicUsize,
    superseded: AtomicUsize,
}

impl FrameExchange {
    pub fn new() -> Self {
        Self::default()
    }

    /// Producer: store `raster`, discarding any unread frame.
    ///
    /// Returns `true` if an unread frame was superseded.
    pub fn publish(&self, raster: ProcessedRaster) -> bool {
        let previous = self.slot.lock().replace(raster);
        self.stats.published.fetch_add(1, Ordering::Relaxed);

        match previous {
            Some(old) => {
                self.stats.superseded.fetch_add(1, Ordering::Relaxed);
                trace!(seq = old.meta.sequence, "superseded unread frame");
                // Freed outside the lock.
                drop(old);
                true
            }
            None => false,
        }
    }

    /// Consumer: take the pending frame, leaving the slot empty.
    pub fn consume_latest(&self) -> Option<ProcessedRaster> {
        let taken = self.slot.lock().take();
        if taken.is_some() {
            self.stats.consumed.fetch_add(1, Ordering::Relaxed);
        }
        taken
    }

    /// Dimensions of the pending frame, if any.
    pub fn pending_dimensions(&self) -> Option<(u32, u32)> {
        self.slot.lock().as_ref().map(ProcessedRaster::dimensions)
    }

    pub fn has_pending(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Drop any pending frame.
    pub fn clear(&self) {
        let _ = self.slot.lock().take();
    }

    /// (published, consumed, superseded)
    pub fn stats(&self) -> (usize, usize, usize) {
        (
            self.stats.published.load(Ordering::Relaxed),
            self.stats.consumed.load(Ordering::Relaxed),
            self.stats.superseded.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    fn raster(value: u8) -> ProcessedRaster {
        ProcessedRaster::filled(2, 2, [value, value, value, 255]).unwrap()
    }

    #[test]
    fn test_latest_wins() {
        let exchange = FrameExchange::new();
        assert!(!exchange.publish(raster(1)));
        assert!(exchange.publish(raster(2)));

        let got = exchange.consume_latest().unwrap();
        assert_eq!(got.pixel(0, 0), [2, 2, 2, 255]);
        assert!(exchange.consume_latest().is_none());
        assert_eq!(exchange.stats(), (2, 1, 1));
    }

    #[test]
    fn test_empty_slot_yields_none() {
        let exchange = FrameExchange::new();
        assert!(exchange.consume_latest().is_none());
        assert!(!exchange.has_pending());
        assert_eq!(exchange.pending_dimensions(), None);
    }

    #[test]
    fn test_clear_drops_pending() {
        let exchange = FrameExchange::new();
        exchange.publish(ProcessedRaster::filled(3, 1, [0; 4]).unwrap());
        assert_eq!(exchange.pending_dimensions(), Some((3, 1)));
        exchange.clear();
        assert!(exchange.consume_latest().is_none());
    }

    #[test]
    fn test_concurrent_consumer_never_sees_torn_frames() {
        let exchange = Arc::new(FrameExchange::new());
        let producer = {
            let exchange = exchange.clone();
            thread::spawn(move || {
                for i in 0..2000u32 {
                    exchange.publish(raster((i % 256) as u8));
                }
            })
        };

        let mut last_seen = None;
        while !producer.is_finished() || exchange.has_pending() {
            if let Some(frame) = exchange.consume_latest() {
                let first = frame.data()[0];
                assert!(frame.data().chunks_exact(4).all(|px| px == [first, first, first, 255]));
                last_seen = Some(first);
            }
        }
        producer.join().unwrap();

        let (published, consumed, superseded) = exchange.stats();
        assert_eq!(published, 2000);
        assert_eq!(consumed + superseded, published);
        assert_eq!(last_seen, Some((1999 % 256) as u8));
    }
}
