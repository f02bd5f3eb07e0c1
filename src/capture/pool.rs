//! Fixed pool of capture buffers.
//!
//! Mirrors a camera image reader: a small number of buffers circulate
//! between the source and the pipeline. A buffer goes back to the pool as
//! soon as the pipeline drops it after conversion.

use std::sync::atomic::{AtomicU64, Ordering};

use flume::{Receiver, Sender};
use tracing::debug;

use super::frame::{PixelBuffer, PixelFormat, Plane};

/// Shape of one plane inside a pooled buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    pub len: usize,
    pub row_stride: usize,
    pub pixel_stride: usize,
}

/// Shape of every buffer in a pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferLayout {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub planes: Vec<PlaneLayout>,
}

impl BufferLayout {
    fn allocate(&self) -> Vec<Plane> {
        self.planes
            .iter()
            .map(|p| Plane::new(vec![0; p.len], p.row_stride, p.pixel_stride))
            .collect()
    }
}

pub struct BufferPool {
    layout: BufferLayout,
    free_tx: Sender<Vec<Plane>>,
    free_rx: Receiver<Vec<Plane>>,
    capacity: usize,
    sequence: AtomicU64,
}

impl BufferPool {
    pub fn new(layout: BufferLayout, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (free_tx, free_rx) = flume::bounded(capacity);
        for _ in 0..capacity {
            // Channel is sized to hold every buffer.
            let _ = free_tx.try_send(layout.allocate());
        }
        debug!(capacity, format = ?layout.format, "buffer pool ready");

        Self {
            layout,
            free_tx,
            free_rx,
            capacity,
            sequence: AtomicU64::new(0),
        }
    }

    /// Take a free buffer, or `None` when every buffer is in flight.
    pub fn acquire(&self) -> Option<PixelBuffer> {
        let planes = self.free_rx.try_recv().ok()?;
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let buffer = PixelBuffer::new(
            self.layout.width,
            self.layout.height,
            self.layout.format,
            planes,
        );
        Some(buffer.with_recycle(sequence, self.free_tx.clone()))
    }

    pub fn layout(&self) -> &BufferLayout {
        &self.layout
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Buffers currently sitting in the pool.
    pub fn available(&self) -> usize {
        self.free_rx.len()
    }
}
