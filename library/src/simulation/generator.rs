//! Runs one background simulation at a time and reports its progress.
//!
//! Every method runs on the controlling thread and none of them block on the
//! worker: completion is noticed by [`SimulationGenerator::tick_generate`]
//! polling the task's outcome channel.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, TryRecvError, channel};
use std::thread;
use std::time::Instant;

use log::{error, info, warn};

use super::cache::SharedSimulationCache;
use super::config::{ActorSpec, GeneratorSettings, SimulationConfig};
use super::notification::{GeneratorEvent, NotificationState, ProgressNotification, RunSummary};
use super::resource::SimulationResource;
use super::task::{SimulationTask, TaskOutcome};
use super::world::{WorldFactory, WorldHandle, WorldLease};
use crate::error::DataflowError;
use crate::util::observers::{Observers, SubscriptionId};
use crate::util::timing::format_elapsed;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GeneratorAction {
    NoAction,
    StartGenerate,
    TickGenerate,
}

struct GenerateRequest {
    config: SimulationConfig,
    actor: ActorSpec,
    cache: SharedSimulationCache,
}

enum Runner {
    Background {
        rx: Receiver<TaskOutcome>,
        handle: Option<thread::JoinHandle<()>>,
    },
    Foreground {
        task: SimulationTask,
        lease: WorldLease,
    },
}

struct ActiveRun {
    resource: Arc<SimulationResource>,
    world: WorldHandle,
    cache: SharedSimulationCache,
    runner: Runner,
    notification: ProgressNotification,
    started: Instant,
    cancel_requested: bool,
    stall_reported: bool,
}

impl ActiveRun {
    /// Poll the worker, or do one frame of foreground work.
    fn poll(&mut self) -> Option<TaskOutcome> {
        match &mut self.runner {
            Runner::Background { rx, handle } => {
                let outcome = match rx.try_recv() {
                    Ok(outcome) => outcome,
                    Err(TryRecvError::Empty) => return None,
                    Err(TryRecvError::Disconnected) => {
                        let message = "simulation worker exited without reporting";
                        TaskOutcome::Failed(message.to_string())
                    }
                };
                if let Some(handle) = handle.take() {
                    if handle.join().is_err() {
                        warn!("Simulation worker thread panicked");
                    }
                }
                Some(outcome)
            }
            Runner::Foreground { task, lease } => {
                task.step(lease, &self.resource, &self.cache).into()
            }
        }
    }

    /// Stop the worker and wait for it. Only used when the generator is
    /// dropped mid-run.
    fn abort(&mut self) {
        self.resource.cancel();
        if let Runner::Background { handle, .. } = &mut self.runner {
            if let Some(handle) = handle.take() {
                let _ = handle.join();
            }
        }
        self.world.release();
    }
}

pub struct SimulationGenerator {
    factory: Box<dyn WorldFactory>,
    settings: GeneratorSettings,
    action: GeneratorAction,
    pending_request: Option<GenerateRequest>,
    active: Option<ActiveRun>,
    last_summary: Option<RunSummary>,
    observers: Observers<GeneratorEvent>,
}

impl SimulationGenerator {
    pub fn new(factory: impl WorldFactory + 'static, settings: GeneratorSettings) -> Self {
        Self {
            factory: Box::new(factory),
            settings,
            action: GeneratorAction::NoAction,
            pending_request: None,
            active: None,
            last_summary: None,
            observers: Observers::new(),
        }
    }

    pub fn action(&self) -> GeneratorAction {
        self.action
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    pub fn progress(&self) -> Option<&ProgressNotification> {
        self.active.as_ref().map(|run| &run.notification)
    }

    pub fn last_summary(&self) -> Option<&RunSummary> {
        self.last_summary.as_ref()
    }

    pub fn subscribe(&mut self, callback: impl FnMut(&GeneratorEvent) + 'static) -> SubscriptionId {
        self.observers.subscribe(callback)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    /// Start a run now. Setup failures are returned here and no run starts.
    /// Rejected while a run is active or a requested run is still queued.
    pub fn start_generate(
        &mut self,
        config: SimulationConfig,
        actor: ActorSpec,
        cache: SharedSimulationCache,
    ) -> Result<(), DataflowError> {
        if self.active.is_some() || self.pending_request.is_some() {
            return Err(DataflowError::GenerationInProgress);
        }
        self.action = GeneratorAction::StartGenerate;

        match self.launch(&config, &actor, cache) {
            Ok(run) => {
                let total_frames = run.notification.total_frames;
                info!(
                    "Simulation generation started: {} frame(s) at {} fps",
                    total_frames, config.frame_rate
                );
                self.active = Some(run);
                self.action = GeneratorAction::TickGenerate;
                self.observers
                    .notify(&GeneratorEvent::Started { total_frames });
                Ok(())
            }
            Err(e) => {
                error!("Simulation generation could not start: {}", e);
                self.action = GeneratorAction::NoAction;
                Err(e)
            }
        }
    }

    /// Queue a run to be started by the next [`tick`](Self::tick).
    pub fn request_generate(
        &mut self,
        config: SimulationConfig,
        actor: ActorSpec,
        cache: SharedSimulationCache,
    ) -> Result<(), DataflowError> {
        if self.active.is_some() || self.pending_request.is_some() {
            return Err(DataflowError::GenerationInProgress);
        }
        self.pending_request = Some(GenerateRequest {
            config,
            actor,
            cache,
        });
        self.action = GeneratorAction::StartGenerate;
        Ok(())
    }

    /// Drive the state machine once. Returns the summary of a run that ended
    /// during this tick, including a deferred start that failed.
    pub fn tick(&mut self) -> Option<RunSummary> {
        match self.action {
            GeneratorAction::NoAction => None,
            GeneratorAction::StartGenerate => {
                let request = self.pending_request.take()?;
                match self.start_generate(request.config, request.actor, request.cache) {
                    Ok(()) => None,
                    Err(e) => {
                        let summary = RunSummary {
                            state: NotificationState::Failed,
                            frames_simulated: 0,
                            total_frames: 0,
                            elapsed: std::time::Duration::ZERO,
                            error: Some(e.to_string()),
                        };
                        self.last_summary = Some(summary.clone());
                        self.observers
                            .notify(&GeneratorEvent::Finished(summary.clone()));
                        Some(summary)
                    }
                }
            }
            GeneratorAction::TickGenerate => self.tick_generate(),
        }
    }

    /// Update progress, watch for stalls and finish the run once the worker
    /// has stopped.
    pub fn tick_generate(&mut self) -> Option<RunSummary> {
        let Some(run) = self.active.as_mut() else {
            self.action = GeneratorAction::NoAction;
            return None;
        };

        let finished = run.poll();
        let frames = run.resource.num_simulated_frames();
        if run.notification.update(frames, run.started.elapsed()) {
            self.observers
                .notify(&GeneratorEvent::Progress(run.notification.clone()));
        }

        if finished.is_none() && !run.stall_reported {
            let since_last_frame = run.resource.time_since_update();
            if since_last_frame > self.settings.stall_timeout {
                warn!(
                    "Simulation generation stalled: no frame for {}",
                    format_elapsed(since_last_frame)
                );
                run.stall_reported = true;
                run.notification.stalled = true;
                self.observers
                    .notify(&GeneratorEvent::Stalled { since_last_frame });
            }
        }

        let outcome = finished?;
        let run = self.active.take()?;
        Some(self.finish(run, outcome))
    }

    /// Ask the worker to stop. Returns immediately; the run is torn down by a
    /// later tick.
    pub fn cancel_simulation_generation(&mut self) -> bool {
        if self.pending_request.take().is_some() {
            self.action = GeneratorAction::NoAction;
            info!("Pending simulation generation request dropped");
            return true;
        }
        match self.active.as_mut() {
            Some(run) => {
                run.resource.cancel();
                run.cancel_requested = true;
                info!("Simulation generation cancel requested");
                true
            }
            None => false,
        }
    }

    fn launch(
        &self,
        config: &SimulationConfig,
        actor: &ActorSpec,
        cache: SharedSimulationCache,
    ) -> Result<ActiveRun, DataflowError> {
        config.validate()?;
        let plan = config.frame_plan();

        let world = self.factory.build(actor, config).map_err(|e| match e {
            DataflowError::SimulationSetup(_) => e,
            other => DataflowError::SimulationSetup(other.to_string()),
        })?;
        let world = WorldHandle::new(world);
        let lease = world.lease();

        let mut task = SimulationTask::new(plan);
        if let Err(e) = task.begin(&lease, &cache) {
            world.release();
            return Err(DataflowError::SimulationSetup(e.to_string()));
        }

        let resource = Arc::new(SimulationResource::new());
        let runner = if config.async_caching {
            let (tx, rx) = channel();
            let worker_resource = Arc::clone(&resource);
            let worker_cache = Arc::clone(&cache);
            let spawned = thread::Builder::new()
                .name("simulation-cache".to_string())
                .spawn(move || task.do_work(lease, worker_resource, worker_cache, tx));
            match spawned {
                Ok(handle) => Runner::Background {
                    rx,
                    handle: Some(handle),
                },
                Err(e) => {
                    world.release();
                    return Err(DataflowError::Worker(e.to_string()));
                }
            }
        } else {
            Runner::Foreground { task, lease }
        };

        Ok(ActiveRun {
            resource,
            world,
            cache,
            runner,
            notification: ProgressNotification::new(plan.num_frames),
            started: Instant::now(),
            cancel_requested: false,
            stall_reported: false,
        })
    }

    fn finish(&mut self, mut run: ActiveRun, outcome: TaskOutcome) -> RunSummary {
        run.world.release();

        let (state, error) = match outcome {
            TaskOutcome::Failed(message) => (NotificationState::Failed, Some(message)),
            _ if run.cancel_requested => (NotificationState::Cancelled, None),
            TaskOutcome::Completed => (NotificationState::Succeeded, None),
            TaskOutcome::Cancelled => (NotificationState::Cancelled, None),
        };

        let elapsed = run.started.elapsed();
        run.notification
            .update(run.resource.num_simulated_frames(), elapsed);
        let summary = RunSummary {
            state,
            frames_simulated: run.notification.completed_frames,
            total_frames: run.notification.total_frames,
            elapsed,
            error,
        };
        run.notification.finish(state, summary.to_string());

        match state {
            NotificationState::Failed => error!("Simulation generation failed: {}", summary),
            NotificationState::Cancelled => info!("Simulation generation cancelled: {}", summary),
            _ => info!("Simulation generation finished: {}", summary),
        }

        self.action = GeneratorAction::NoAction;
        self.last_summary = Some(summary.clone());
        self.observers
            .notify(&GeneratorEvent::Finished(summary.clone()));
        summary
    }
}

impl Drop for SimulationGenerator {
    fn drop(&mut self) {
        if let Some(mut run) = self.active.take() {
            warn!("Simulation generator dropped mid-run; stopping worker");
            run.abort();
        }
    }
}
