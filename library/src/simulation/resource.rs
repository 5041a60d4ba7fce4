//! State shared between the generator and its worker.
//!
//! Each field has exactly one writer. The worker publishes progress
//! (`num_simulated_frames`, `recent_update_time`); the controller owns the
//! cancel flag. Plain atomics are enough.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct SimulationResource {
    num_simulated_frames: AtomicU32,
    /// Microseconds since `epoch`; 0 means no frame yet.
    recent_update_time: AtomicU64,
    cancelled: AtomicBool,
    epoch: Instant,
}

impl Default for SimulationResource {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulationResource {
    pub fn new() -> Self {
        Self {
            num_simulated_frames: AtomicU32::new(0),
            recent_update_time: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
            epoch: Instant::now(),
        }
    }

    /// Worker only. Called after the frame's cache write; the counter
    /// increment publishes it.
    pub fn finish_frame(&self) {
        let micros = self.epoch.elapsed().as_micros().max(1) as u64;
        self.recent_update_time.store(micros, Ordering::Release);
        self.num_simulated_frames.fetch_add(1, Ordering::Release);
    }

    pub fn num_simulated_frames(&self) -> u32 {
        self.num_simulated_frames.load(Ordering::Acquire)
    }

    /// Time since the last published frame, or since creation if none.
    pub fn time_since_update(&self) -> Duration {
        let micros = self.recent_update_time.load(Ordering::Acquire);
        let last = self.epoch + Duration::from_micros(micros);
        Instant::now().saturating_duration_since(last)
    }

    pub fn has_update(&self) -> bool {
        self.recent_update_time.load(Ordering::Acquire) != 0
    }

    /// Controller only.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
