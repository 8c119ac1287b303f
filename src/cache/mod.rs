//! Single-slot frame cache: the latest encoded frame, overwritten each tick.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::capture::EncodedFrame;

/// Holds at most one frame. `publish` overwrites unconditionally, `snapshot`
/// hands out the current frame (or `None` before the first successful tick).
/// Readers get an `Arc` clone, so a snapshot can never observe a torn write
/// and publishing never waits on slow readers.
pub struct FrameCache {
    slot: Mutex<Option<Arc<EncodedFrame>>>,
    metrics: CaptureMetrics,
}

impl FrameCache {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            metrics: CaptureMetrics::new(),
        }
    }

    /// Overwrite the slot with a new frame. Returns the shared handle so the
    /// caller can also push it to live viewers without re-locking.
    pub fn publish(&self, frame: EncodedFrame) -> Arc<EncodedFrame> {
        let frame = Arc::new(frame);
        let mut slot = self.slot.lock().unwrap();
        *slot = Some(frame.clone());
        drop(slot);

        self.metrics.frame_count.fetch_add(1, Ordering::Relaxed);
        frame
    }

    pub fn snapshot(&self) -> Option<Arc<EncodedFrame>> {
        self.slot.lock().unwrap().clone()
    }

    pub fn metrics(&self) -> &CaptureMetrics {
        &self.metrics
    }
}

/// Counters the capture loop maintains and the stats surface reads.
pub struct CaptureMetrics {
    frame_count: AtomicU64,
    /// Rolling actual fps over the last one-second window, stored as f32 bits.
    actual_fps: AtomicU32,
}

impl CaptureMetrics {
    fn new() -> Self {
        Self {
            frame_count: AtomicU64::new(0),
            actual_fps: AtomicU32::new(0f32.to_bits()),
        }
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }

    pub fn actual_fps(&self) -> f32 {
        f32::from_bits(self.actual_fps.load(Ordering::Relaxed))
    }

    pub fn set_actual_fps(&self, fps: f32) {
        self.actual_fps.store(fps.to_bits(), Ordering::Relaxed);
    }
}
