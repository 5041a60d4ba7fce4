//! Run configuration for background simulation caching.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DataflowError;

/// Seconds, inclusive of both ends.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct TimeRange {
    pub min: f64,
    pub max: f64,
}

impl TimeRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn duration(&self) -> f64 {
        self.max - self.min
    }

    pub fn clamp_to(&self, outer: &TimeRange) -> TimeRange {
        TimeRange {
            min: self.min.clamp(outer.min, outer.max),
            max: self.max.clamp(outer.min, outer.max),
        }
    }

    fn is_finite(&self) -> bool {
        self.min.is_finite() && self.max.is_finite()
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self { min: 0.0, max: 5.0 }
    }
}

/// Recognised options of a simulation caching run.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SimulationConfig {
    /// Frames per second sampled into the cache.
    pub frame_rate: u32,
    /// Solver sub-steps per frame.
    pub subframe_rate: u32,
    pub time_range: TimeRange,
    pub restart_simulation: bool,
    pub restart_time_range: TimeRange,
    /// Run on a worker thread. When false the generator steps one frame per
    /// tick on the controlling thread.
    pub async_caching: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            frame_rate: 30,
            subframe_rate: 1,
            time_range: TimeRange::default(),
            restart_simulation: false,
            restart_time_range: TimeRange::default(),
            async_caching: true,
        }
    }
}

/// Which frames a run simulates and how.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FramePlan {
    /// Cache index of the first simulated frame.
    pub first_frame: u32,
    pub num_frames: u32,
    pub delta_time: f64,
    pub substeps: u32,
    /// World time the run starts from.
    pub start_time: f64,
    /// Whether existing cache contents are dropped before the run.
    pub clear_cache: bool,
}

impl FramePlan {
    pub fn frame_time(&self, frame: u32) -> f64 {
        self.start_time + f64::from(frame - self.first_frame + 1) * self.delta_time
    }

    pub fn last_frame(&self) -> Option<u32> {
        (self.num_frames > 0).then(|| self.first_frame + self.num_frames - 1)
    }
}

// Absorbs float noise such as (0.3 - 0.0) * 10.0 = 3.0000000000000004.
const FRAME_EPSILON: f64 = 1e-9;

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), DataflowError> {
        if self.frame_rate == 0 {
            return Err(DataflowError::config("frame_rate must be greater than zero"));
        }
        if self.subframe_rate == 0 {
            return Err(DataflowError::config("subframe_rate must be at least 1"));
        }
        if !self.time_range.is_finite() || self.time_range.max <= self.time_range.min {
            return Err(DataflowError::config(format!(
                "time_range [{}, {}] is empty",
                self.time_range.min, self.time_range.max
            )));
        }
        if self.restart_simulation {
            let restart = &self.restart_time_range;
            if !restart.is_finite() || restart.max < restart.min {
                return Err(DataflowError::config(format!(
                    "restart_time_range [{}, {}] is inverted",
                    restart.min, restart.max
                )));
            }
            if restart.max <= self.time_range.min || restart.min >= self.time_range.max {
                return Err(DataflowError::config(
                    "restart_time_range does not overlap time_range",
                ));
            }
        }
        Ok(())
    }

    pub fn delta_time(&self) -> f64 {
        1.0 / f64::from(self.frame_rate)
    }

    /// Frames covering the whole `time_range`.
    pub fn num_frames(&self) -> u32 {
        let frames = self.time_range.duration() * f64::from(self.frame_rate);
        (frames - FRAME_EPSILON).ceil().max(0.0) as u32
    }

    /// Without restart the whole range is simulated into a cleared cache.
    /// With restart only the frames covering the (clamped) restart range are
    /// simulated, from a world reset at the start of that window, and the
    /// rest of the cache is left alone.
    pub fn frame_plan(&self) -> FramePlan {
        let delta_time = self.delta_time();
        let total = self.num_frames();
        let fps = f64::from(self.frame_rate);

        if !self.restart_simulation {
            return FramePlan {
                first_frame: 0,
                num_frames: total,
                delta_time,
                substeps: self.subframe_rate,
                start_time: self.time_range.min,
                clear_cache: true,
            };
        }

        let window = self.restart_time_range.clamp_to(&self.time_range);
        let offset = |t: f64| (t - self.time_range.min) * fps;
        let first = ((offset(window.min) + FRAME_EPSILON).floor().max(0.0) as u32).min(total);
        let end = ((offset(window.max) - FRAME_EPSILON).ceil().max(0.0) as u32).min(total);

        FramePlan {
            first_frame: first,
            num_frames: end.saturating_sub(first),
            delta_time,
            substeps: self.subframe_rate,
            start_time: self.time_range.min + f64::from(first) * delta_time,
            clear_cache: false,
        }
    }
}

/// Rotation is a quaternion `[x, y, z, w]`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Transform {
    pub translation: [f64; 3],
    pub rotation: [f64; 4],
    pub scale: [f64; 3],
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: [0.0; 3],
            rotation: [0.0, 0.0, 0.0, 1.0],
            scale: [1.0; 3],
        }
    }
}

/// What to build into the temporary simulation world.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(default)]
pub struct ActorSpec {
    pub blueprint_class: String,
    pub transform: Transform,
    pub skeletal_mesh_visible: bool,
    /// Where the resulting cache is written.
    pub cache_destination: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GeneratorSettings {
    /// A run that publishes no frame for this long is reported as stalled.
    pub stall_timeout: Duration,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            stall_timeout: Duration::from_secs(10),
        }
    }
}
