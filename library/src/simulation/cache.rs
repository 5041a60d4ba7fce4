use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::error::DataflowError;

pub type SharedSimulationCache = Arc<SimulationCache>;

/// What a world reports for one frame.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct FrameSample {
    pub positions: Vec<[f64; 3]>,
    pub velocities: Vec<[f64; 3]>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CachedFrame {
    pub frame: u32,
    pub time: f64,
    pub sample: FrameSample,
}

/// Serialized form of a cache.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct CacheSnapshot {
    pub destination: String,
    pub frames: BTreeMap<u32, CachedFrame>,
}

/// Time-indexed simulation results. The running task appends one frame at a
/// time; the controller reads only frames the task has published.
#[derive(Debug, Default)]
pub struct SimulationCache {
    destination: String,
    frames: Mutex<BTreeMap<u32, CachedFrame>>,
}

impl SimulationCache {
    pub fn new(destination: &str) -> Self {
        Self {
            destination: destination.to_string(),
            frames: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn shared(destination: &str) -> SharedSimulationCache {
        Arc::new(Self::new(destination))
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    // A panic inside a frame never leaves the map half-written, so a
    // poisoned lock is still usable.
    fn frames(&self) -> MutexGuard<'_, BTreeMap<u32, CachedFrame>> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or overwrite the entry for `frame`.
    pub fn record(&self, frame: u32, time: f64, sample: FrameSample) {
        self.frames()
            .insert(frame, CachedFrame { frame, time, sample });
    }

    pub fn get(&self, frame: u32) -> Option<CachedFrame> {
        self.frames().get(&frame).cloned()
    }

    pub fn frame_indices(&self) -> Vec<u32> {
        self.frames().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.frames().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames().is_empty()
    }

    pub fn clear(&self) {
        self.frames().clear();
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            destination: self.destination.clone(),
            frames: self.frames().clone(),
        }
    }

    pub fn to_json(&self) -> Result<String, DataflowError> {
        Ok(serde_json::to_string_pretty(&self.snapshot())?)
    }

    pub fn save(&self, path: &Path) -> Result<(), DataflowError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn from_snapshot(snapshot: CacheSnapshot) -> Self {
        Self {
            destination: snapshot.destination,
            frames: Mutex::new(snapshot.frames),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_overwrites_frame() {
        let cache = SimulationCache::new("out/cache.json");
        cache.record(3, 0.3, FrameSample::default());
        cache.record(
            3,
            0.3,
            FrameSample {
                positions: vec![[1.0, 2.0, 3.0]],
                velocities: vec![[0.0; 3]],
            },
        );
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(3).unwrap().sample.positions, vec![[1.0, 2.0, 3.0]]);
    }

    #[test]
    fn test_snapshot_json_keeps_frames() {
        let cache = SimulationCache::new("cache.json");
        cache.record(0, 0.1, FrameSample::default());
        cache.record(1, 0.2, FrameSample::default());

        let json = cache.to_json().unwrap();
        let snapshot: CacheSnapshot = serde_json::from_str(&json).unwrap();
        let restored = SimulationCache::from_snapshot(snapshot);
        assert_eq!(restored.frame_indices(), vec![0, 1]);
        assert_eq!(restored.destination(), "cache.json");
    }
}
