//! The per-run work loop: step the world frame by frame and record samples.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::mpsc::Sender;

use log::{debug, error, info};

use super::cache::{SharedSimulationCache, SimulationCache};
use super::config::FramePlan;
use super::resource::SimulationResource;
use super::world::WorldLease;
use crate::error::{DataflowError, panic_message};

#[derive(Clone, Debug, PartialEq)]
pub enum StepResult {
    Continue,
    Completed,
    Cancelled,
    Failed(String),
}

/// How a run ended, as reported by the task.
#[derive(Clone, Debug, PartialEq)]
pub enum TaskOutcome {
    Completed,
    Cancelled,
    Failed(String),
}

pub struct SimulationTask {
    plan: FramePlan,
    frames_done: u32,
}

impl SimulationTask {
    pub fn new(plan: FramePlan) -> Self {
        Self {
            plan,
            frames_done: 0,
        }
    }

    pub fn plan(&self) -> &FramePlan {
        &self.plan
    }

    pub fn frames_done(&self) -> u32 {
        self.frames_done
    }

    /// Reset the world to the start of the plan, then clear the cache if the
    /// plan asks for a fresh run.
    pub fn begin(
        &mut self,
        lease: &WorldLease,
        cache: &SimulationCache,
    ) -> Result<(), DataflowError> {
        let start_time = self.plan.start_time;
        lease.with_world(|world| world.reset(start_time))?;
        if self.plan.clear_cache {
            cache.clear();
        }
        self.frames_done = 0;
        debug!(
            "Simulation task: frames {}..{} from t={}",
            self.plan.first_frame,
            self.plan.first_frame + self.plan.num_frames,
            start_time
        );
        Ok(())
    }

    /// Simulate one frame. The sample is recorded before the frame counter is
    /// published; the cancel flag is checked afterwards.
    pub fn step(
        &mut self,
        lease: &WorldLease,
        resource: &SimulationResource,
        cache: &SimulationCache,
    ) -> StepResult {
        if self.frames_done >= self.plan.num_frames {
            return StepResult::Completed;
        }
        if resource.is_cancelled() {
            return StepResult::Cancelled;
        }

        let frame = self.plan.first_frame + self.frames_done;
        let substeps = self.plan.substeps.max(1);
        let dt = self.plan.delta_time / f64::from(substeps);

        let result = catch_unwind(AssertUnwindSafe(|| {
            lease.with_world(|world| {
                for _ in 0..substeps {
                    world.advance(dt)?;
                }
                Ok(world.sample())
            })
        }));

        let sample = match result {
            Ok(Ok(sample)) => sample,
            Ok(Err(e)) => {
                error!("Simulation frame {} failed: {}", frame, e);
                return StepResult::Failed(e.to_string());
            }
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                let message = format!("frame {} panicked: {}", frame, reason);
                error!("Simulation {}", message);
                return StepResult::Failed(message);
            }
        };

        cache.record(frame, self.plan.frame_time(frame), sample);
        resource.finish_frame();
        self.frames_done += 1;

        if resource.is_cancelled() {
            StepResult::Cancelled
        } else if self.frames_done >= self.plan.num_frames {
            StepResult::Completed
        } else {
            StepResult::Continue
        }
    }

    /// Run to completion, cancellation or failure, then report the outcome.
    pub fn do_work(
        mut self,
        lease: WorldLease,
        resource: Arc<SimulationResource>,
        cache: SharedSimulationCache,
        done: Sender<TaskOutcome>,
    ) {
        let outcome = loop {
            match self.step(&lease, &resource, &cache) {
                StepResult::Continue => {}
                StepResult::Completed => break TaskOutcome::Completed,
                StepResult::Cancelled => break TaskOutcome::Cancelled,
                StepResult::Failed(message) => break TaskOutcome::Failed(message),
            }
        };
        info!(
            "Simulation task stopped after {} frame(s): {:?}",
            self.frames_done, outcome
        );
        if done.send(outcome).is_err() {
            debug!("Simulation task finished after its generator went away");
        }
    }
}

impl From<StepResult> for Option<TaskOutcome> {
    fn from(result: StepResult) -> Self {
        match result {
            StepResult::Continue => None,
            StepResult::Completed => Some(TaskOutcome::Completed),
            StepResult::Cancelled => Some(TaskOutcome::Cancelled),
            StepResult::Failed(message) => Some(TaskOutcome::Failed(message)),
        }
    }
}
