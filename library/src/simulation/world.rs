//! The temporary world a simulation run steps, and who owns it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::debug;

use super::cache::FrameSample;
use super::config::{ActorSpec, SimulationConfig};
use crate::error::DataflowError;

/// A world built for one caching run.
pub trait SimulationWorld: Send {
    /// Put the world in its initial state at `time`.
    fn reset(&mut self, time: f64) -> Result<(), DataflowError>;

    /// Advance by one solver step.
    fn advance(&mut self, dt: f64) -> Result<(), DataflowError>;

    fn sample(&self) -> FrameSample;

    /// Release whatever the world holds. Called exactly once, by the
    /// controller, after the worker has stopped.
    fn teardown(&mut self) {}
}

/// Builds worlds from an actor description.
pub trait WorldFactory {
    fn build(
        &self,
        actor: &ActorSpec,
        config: &SimulationConfig,
    ) -> Result<Box<dyn SimulationWorld>, DataflowError>;
}

impl<F> WorldFactory for F
where
    F: Fn(&ActorSpec, &SimulationConfig) -> Result<Box<dyn SimulationWorld>, DataflowError>,
{
    fn build(
        &self,
        actor: &ActorSpec,
        config: &SimulationConfig,
    ) -> Result<Box<dyn SimulationWorld>, DataflowError> {
        self(actor, config)
    }
}

type WorldSlot = Arc<Mutex<Option<Box<dyn SimulationWorld>>>>;

fn lock(slot: &WorldSlot) -> MutexGuard<'_, Option<Box<dyn SimulationWorld>>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Controller-side owner of a world. Only the handle can release it.
pub struct WorldHandle {
    slot: WorldSlot,
}

/// Worker-side access to a world owned by a [`WorldHandle`].
#[derive(Clone)]
pub struct WorldLease {
    slot: WorldSlot,
}

impl WorldHandle {
    pub fn new(world: Box<dyn SimulationWorld>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(world))),
        }
    }

    pub fn lease(&self) -> WorldLease {
        WorldLease {
            slot: Arc::clone(&self.slot),
        }
    }

    /// Tear the world down. Returns false if it was already released.
    pub fn release(&self) -> bool {
        let world = lock(&self.slot).take();
        match world {
            Some(mut world) => {
                world.teardown();
                debug!("Simulation world released");
                true
            }
            None => false,
        }
    }
}

impl WorldLease {
    pub fn with_world<T>(
        &self,
        f: impl FnOnce(&mut dyn SimulationWorld) -> Result<T, DataflowError>,
    ) -> Result<T, DataflowError> {
        let mut guard = lock(&self.slot);
        match guard.as_mut() {
            Some(world) => f(world.as_mut()),
            None => Err(DataflowError::step("simulation world was already released")),
        }
    }
}
