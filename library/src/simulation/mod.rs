//! Background simulation caching.
//!
//! A [`SimulationGenerator`] owns at most one run. The run's world is stepped
//! frame by frame by a [`SimulationTask`] on a worker thread, which records
//! samples into a [`SimulationCache`] and publishes progress through a shared
//! [`SimulationResource`].

pub mod cache;
pub mod config;
pub mod generator;
pub mod notification;
pub mod resource;
pub mod task;
pub mod world;

pub use cache::{CacheSnapshot, CachedFrame, FrameSample, SharedSimulationCache, SimulationCache};
pub use config::{ActorSpec, FramePlan, GeneratorSettings, SimulationConfig, TimeRange, Transform};
pub use generator::{GeneratorAction, SimulationGenerator};
pub use notification::{GeneratorEvent, NotificationState, ProgressNotification, RunSummary};
pub use resource::SimulationResource;
pub use task::{SimulationTask, StepResult, TaskOutcome};
pub use world::{SimulationWorld, WorldFactory, WorldHandle, WorldLease};
