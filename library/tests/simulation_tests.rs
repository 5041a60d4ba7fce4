use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

mod common;

use common::init_logger;
use dataflow::DataflowError;
use dataflow::simulation::{
    ActorSpec, FrameSample, GeneratorAction, GeneratorEvent, GeneratorSettings, NotificationState,
    RunSummary, SharedSimulationCache, SimulationCache, SimulationConfig, SimulationGenerator,
    SimulationWorld, TimeRange,
};

#[derive(Clone, Default)]
struct Behaviour {
    /// Each advance consumes one permit; `None` means unlimited.
    permits: Option<Arc<AtomicU32>>,
    fail_at_advance: Option<u32>,
    panic_at_advance: Option<u32>,
    delay: Duration,
}

struct TestWorld {
    run_id: f64,
    time: f64,
    advances: u32,
    behaviour: Behaviour,
    teardowns: Arc<AtomicUsize>,
}

impl TestWorld {
    fn wait_for_permit(&self) -> Result<(), DataflowError> {
        let Some(permits) = &self.behaviour.permits else {
            return Ok(());
        };
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let taken = permits
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |p| p.checked_sub(1))
                .is_ok();
            if taken {
                return Ok(());
            }
            if Instant::now() > deadline {
                return Err(DataflowError::step("timed out waiting for a permit"));
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
}

impl SimulationWorld for TestWorld {
    fn reset(&mut self, time: f64) -> Result<(), DataflowError> {
        self.time = time;
        Ok(())
    }

    fn advance(&mut self, dt: f64) -> Result<(), DataflowError> {
        self.wait_for_permit()?;
        self.advances += 1;
        if self.behaviour.fail_at_advance == Some(self.advances) {
            return Err(DataflowError::step("solver diverged"));
        }
        if self.behaviour.panic_at_advance == Some(self.advances) {
            panic!("solver blew up");
        }
        if !self.behaviour.delay.is_zero() {
            thread::sleep(self.behaviour.delay);
        }
        self.time += dt;
        Ok(())
    }

    fn sample(&self) -> FrameSample {
        FrameSample {
            positions: vec![[self.run_id, self.time, 0.0]],
            velocities: Vec::new(),
        }
    }

    fn teardown(&mut self) {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
    }
}

struct Harness {
    generator: SimulationGenerator,
    teardowns: Arc<AtomicUsize>,
    builds: Arc<AtomicUsize>,
}

fn harness(behaviour: Behaviour, settings: GeneratorSettings) -> Harness {
    init_logger();
    let teardowns = Arc::new(AtomicUsize::new(0));
    let builds = Arc::new(AtomicUsize::new(0));
    let world_teardowns = Arc::clone(&teardowns);
    let world_builds = Arc::clone(&builds);

    let factory = move |actor: &ActorSpec,
                        _config: &SimulationConfig|
          -> Result<Box<dyn SimulationWorld>, DataflowError> {
        if actor.blueprint_class.is_empty() {
            return Err(DataflowError::SimulationSetup(
                "actor has no blueprint class".to_string(),
            ));
        }
        let run_id = world_builds.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(TestWorld {
            run_id: run_id as f64,
            time: 0.0,
            advances: 0,
            behaviour: behaviour.clone(),
            teardowns: Arc::clone(&world_teardowns),
        }))
    };

    Harness {
        generator: SimulationGenerator::new(factory, settings),
        teardowns,
        builds,
    }
}

fn actor() -> ActorSpec {
    ActorSpec {
        blueprint_class: "Cloth".to_string(),
        cache_destination: "cache/cloth.json".to_string(),
        ..ActorSpec::default()
    }
}

/// 10 fps over `[0, max]`.
fn config(max: f64) -> SimulationConfig {
    SimulationConfig {
        frame_rate: 10,
        time_range: TimeRange::new(0.0, max),
        ..SimulationConfig::default()
    }
}

fn cache() -> SharedSimulationCache {
    SimulationCache::shared("cache/cloth.json")
}

fn run_to_end(generator: &mut SimulationGenerator) -> RunSummary {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(summary) = generator.tick() {
            return summary;
        }
        assert!(Instant::now() < deadline, "simulation did not finish in time");
        thread::sleep(Duration::from_millis(1));
    }
}

fn wait_for_frames(generator: &mut SimulationGenerator, frames: u32) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        assert!(generator.tick().is_none(), "run ended early");
        let done = generator
            .progress()
            .map(|p| p.completed_frames)
            .unwrap_or_default();
        if done >= frames {
            return;
        }
        assert!(Instant::now() < deadline, "worker did not reach frame {}", frames);
        thread::sleep(Duration::from_millis(1));
    }
}

fn record(generator: &mut SimulationGenerator) -> Rc<RefCell<Vec<GeneratorEvent>>> {
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    generator.subscribe(move |event| sink.borrow_mut().push(event.clone()));
    events
}

#[test]
fn test_full_run_fills_cache() {
    let mut h = harness(Behaviour::default(), GeneratorSettings::default());
    let cache = cache();
    let events = record(&mut h.generator);

    h.generator
        .start_generate(config(2.0), actor(), Arc::clone(&cache))
        .unwrap();
    assert_eq!(h.generator.action(), GeneratorAction::TickGenerate);

    let summary = run_to_end(&mut h.generator);
    assert_eq!(summary.state, NotificationState::Succeeded);
    assert_eq!(summary.frames_simulated, 20);
    assert_eq!(summary.total_frames, 20);
    assert_eq!(cache.len(), 20);
    assert_eq!(h.teardowns.load(Ordering::SeqCst), 1);
    assert_eq!(h.generator.action(), GeneratorAction::NoAction);
    assert!(!h.generator.is_running());
    assert_eq!(h.generator.last_summary(), Some(&summary));

    let last = cache.get(19).unwrap();
    assert!((last.time - 2.0).abs() < 1e-9);
    assert!((last.sample.positions[0][1] - 2.0).abs() < 1e-9);

    let mut previous = 0;
    for event in events.borrow().iter() {
        if let GeneratorEvent::Progress(progress) = event {
            assert!(progress.completed_frames > previous);
            previous = progress.completed_frames;
        }
    }
    assert!(previous <= 20);
}

#[test]
fn test_events_bracket_the_run() {
    let mut h = harness(Behaviour::default(), GeneratorSettings::default());
    let events = record(&mut h.generator);

    h.generator
        .start_generate(config(1.0), actor(), cache())
        .unwrap();
    run_to_end(&mut h.generator);

    let events = events.borrow();
    assert!(matches!(
        events.first(),
        Some(GeneratorEvent::Started { total_frames: 10 })
    ));
    match events.last() {
        Some(GeneratorEvent::Finished(summary)) => {
            assert_eq!(summary.state, NotificationState::Succeeded)
        }
        other => panic!("unexpected last event {:?}", other),
    }
}

#[test]
fn test_cancel_mid_run() {
    let permits = Arc::new(AtomicU32::new(5));
    let behaviour = Behaviour {
        permits: Some(Arc::clone(&permits)),
        ..Behaviour::default()
    };
    let mut h = harness(behaviour, GeneratorSettings::default());
    let run_cache = cache();

    h.generator
        .start_generate(config(2.0), actor(), Arc::clone(&run_cache))
        .unwrap();
    wait_for_frames(&mut h.generator, 5);

    assert!(h.generator.cancel_simulation_generation());
    permits.store(1000, Ordering::SeqCst);

    let summary = run_to_end(&mut h.generator);
    assert_eq!(summary.state, NotificationState::Cancelled);
    let frames = run_cache.len();
    assert!((5..=6).contains(&frames), "cache has {} frames", frames);
    assert_eq!(h.teardowns.load(Ordering::SeqCst), 1);

    // The generator is reusable after a cancelled run.
    h.generator
        .start_generate(config(1.0), actor(), cache())
        .unwrap();
    let summary = run_to_end(&mut h.generator);
    assert_eq!(summary.state, NotificationState::Succeeded);
    assert_eq!(h.teardowns.load(Ordering::SeqCst), 2);
}

#[test]
fn test_cancel_right_after_start() {
    let permits = Arc::new(AtomicU32::new(0));
    let behaviour = Behaviour {
        permits: Some(Arc::clone(&permits)),
        ..Behaviour::default()
    };
    let mut h = harness(behaviour, GeneratorSettings::default());
    let cache = cache();

    h.generator
        .start_generate(config(2.0), actor(), Arc::clone(&cache))
        .unwrap();
    assert!(h.generator.cancel_simulation_generation());
    permits.store(1000, Ordering::SeqCst);

    let summary = run_to_end(&mut h.generator);
    assert_eq!(summary.state, NotificationState::Cancelled);
    assert!(cache.len() <= 1);
    assert_eq!(h.teardowns.load(Ordering::SeqCst), 1);
}

#[test]
fn test_cancel_without_run() {
    let mut h = harness(Behaviour::default(), GeneratorSettings::default());
    assert!(!h.generator.cancel_simulation_generation());
}

#[test]
fn test_setup_failure_is_reported_synchronously() {
    let mut h = harness(Behaviour::default(), GeneratorSettings::default());

    let result = h
        .generator
        .start_generate(config(1.0), ActorSpec::default(), cache());
    assert!(matches!(result, Err(DataflowError::SimulationSetup(_))));
    assert_eq!(h.generator.action(), GeneratorAction::NoAction);
    assert!(!h.generator.is_running());
    assert_eq!(h.builds.load(Ordering::SeqCst), 0);

    let invalid = SimulationConfig {
        frame_rate: 0,
        ..config(1.0)
    };
    let result = h.generator.start_generate(invalid, actor(), cache());
    assert!(matches!(result, Err(DataflowError::InvalidConfig(_))));
    assert!(!h.generator.is_running());
}

#[test]
fn test_step_error_fails_the_run() {
    let behaviour = Behaviour {
        fail_at_advance: Some(4),
        ..Behaviour::default()
    };
    let mut h = harness(behaviour, GeneratorSettings::default());
    let cache = cache();

    h.generator
        .start_generate(config(2.0), actor(), Arc::clone(&cache))
        .unwrap();
    let summary = run_to_end(&mut h.generator);

    assert_eq!(summary.state, NotificationState::Failed);
    assert!(summary.error.as_deref().unwrap_or_default().contains("solver diverged"));
    assert_eq!(summary.frames_simulated, 3);
    assert_eq!(cache.len(), 3);
    assert_eq!(h.teardowns.load(Ordering::SeqCst), 1);
}

#[test]
fn test_panicking_frame_fails_the_run() {
    let behaviour = Behaviour {
        panic_at_advance: Some(2),
        ..Behaviour::default()
    };
    let mut h = harness(behaviour, GeneratorSettings::default());
    let cache = cache();

    h.generator
        .start_generate(config(2.0), actor(), Arc::clone(&cache))
        .unwrap();
    let summary = run_to_end(&mut h.generator);

    assert_eq!(summary.state, NotificationState::Failed);
    assert!(summary.error.as_deref().unwrap_or_default().contains("panicked"));
    assert_eq!(cache.len(), 1);
    assert_eq!(h.teardowns.load(Ordering::SeqCst), 1);
}

#[test]
fn test_second_start_is_rejected() {
    let permits = Arc::new(AtomicU32::new(0));
    let behaviour = Behaviour {
        permits: Some(Arc::clone(&permits)),
        ..Behaviour::default()
    };
    let mut h = harness(behaviour, GeneratorSettings::default());

    h.generator
        .start_generate(config(1.0), actor(), cache())
        .unwrap();
    let second = h.generator.start_generate(config(1.0), actor(), cache());
    assert!(matches!(second, Err(DataflowError::GenerationInProgress)));
    assert_eq!(h.builds.load(Ordering::SeqCst), 1);
    assert!(h.generator.is_running());

    permits.store(1000, Ordering::SeqCst);
    let summary = run_to_end(&mut h.generator);
    assert_eq!(summary.state, NotificationState::Succeeded);
}

#[test]
fn test_restart_only_overwrites_its_window() {
    let mut h = harness(Behaviour::default(), GeneratorSettings::default());
    let cache = cache();

    h.generator
        .start_generate(config(2.0), actor(), Arc::clone(&cache))
        .unwrap();
    run_to_end(&mut h.generator);

    let restart = SimulationConfig {
        restart_simulation: true,
        restart_time_range: TimeRange::new(1.0, 1.5),
        ..config(2.0)
    };
    h.generator
        .start_generate(restart, actor(), Arc::clone(&cache))
        .unwrap();
    let summary = run_to_end(&mut h.generator);

    assert_eq!(summary.state, NotificationState::Succeeded);
    assert_eq!(summary.total_frames, 5);
    assert_eq!(cache.len(), 20);

    let run_of = |frame: u32| cache.get(frame).unwrap().sample.positions[0][0];
    assert_eq!(run_of(9), 1.0);
    for frame in 10..15 {
        assert_eq!(run_of(frame), 2.0);
    }
    assert_eq!(run_of(15), 1.0);

    let first_restarted = cache.get(10).unwrap();
    assert!((first_restarted.time - 1.1).abs() < 1e-9);
    assert!((first_restarted.sample.positions[0][1] - 1.1).abs() < 1e-9);
}

#[test]
fn test_fresh_run_clears_previous_cache() {
    let mut h = harness(Behaviour::default(), GeneratorSettings::default());
    let cache = cache();

    h.generator
        .start_generate(config(2.0), actor(), Arc::clone(&cache))
        .unwrap();
    run_to_end(&mut h.generator);
    assert_eq!(cache.len(), 20);

    h.generator
        .start_generate(config(1.0), actor(), Arc::clone(&cache))
        .unwrap();
    run_to_end(&mut h.generator);
    assert_eq!(cache.len(), 10);
}

#[test]
fn test_foreground_run_steps_once_per_tick() {
    let mut h = harness(Behaviour::default(), GeneratorSettings::default());
    let cache = cache();
    let foreground = SimulationConfig {
        async_caching: false,
        ..config(0.5)
    };

    h.generator
        .start_generate(foreground, actor(), Arc::clone(&cache))
        .unwrap();
    for tick in 1..5 {
        assert!(h.generator.tick().is_none());
        assert_eq!(cache.len(), tick);
    }
    let summary = h.generator.tick().unwrap();
    assert_eq!(summary.state, NotificationState::Succeeded);
    assert_eq!(cache.len(), 5);
    assert_eq!(h.teardowns.load(Ordering::SeqCst), 1);
}

#[test]
fn test_stall_is_reported_once() {
    let permits = Arc::new(AtomicU32::new(0));
    let behaviour = Behaviour {
        permits: Some(Arc::clone(&permits)),
        ..Behaviour::default()
    };
    let settings = GeneratorSettings {
        stall_timeout: Duration::from_millis(20),
    };
    let mut h = harness(behaviour, settings);
    let events = record(&mut h.generator);

    h.generator
        .start_generate(config(1.0), actor(), cache())
        .unwrap();
    thread::sleep(Duration::from_millis(50));
    assert!(h.generator.tick().is_none());
    assert!(h.generator.progress().is_some_and(|p| p.stalled));
    thread::sleep(Duration::from_millis(30));
    assert!(h.generator.tick().is_none());

    let stalls = events
        .borrow()
        .iter()
        .filter(|e| matches!(e, GeneratorEvent::Stalled { .. }))
        .count();
    assert_eq!(stalls, 1);

    permits.store(1000, Ordering::SeqCst);
    let summary = run_to_end(&mut h.generator);
    assert_eq!(summary.state, NotificationState::Succeeded);
}

#[test]
fn test_requested_run_starts_on_tick() {
    let mut h = harness(Behaviour::default(), GeneratorSettings::default());

    h.generator
        .request_generate(config(1.0), actor(), cache())
        .unwrap();
    assert_eq!(h.generator.action(), GeneratorAction::StartGenerate);
    assert!(!h.generator.is_running());
    assert!(matches!(
        h.generator.request_generate(config(1.0), actor(), cache()),
        Err(DataflowError::GenerationInProgress)
    ));

    assert!(h.generator.tick().is_none());
    assert!(h.generator.is_running());
    let summary = run_to_end(&mut h.generator);
    assert_eq!(summary.state, NotificationState::Succeeded);
}

#[test]
fn test_start_rejected_while_request_queued() {
    let mut h = harness(Behaviour::default(), GeneratorSettings::default());

    h.generator
        .request_generate(config(1.0), actor(), cache())
        .unwrap();
    let direct = h.generator.start_generate(config(1.0), actor(), cache());
    assert!(matches!(direct, Err(DataflowError::GenerationInProgress)));
    assert_eq!(h.builds.load(Ordering::SeqCst), 0);
    assert_eq!(h.generator.action(), GeneratorAction::StartGenerate);

    // The queued request still runs, and only once.
    assert!(h.generator.tick().is_none());
    assert!(h.generator.is_running());
    let summary = run_to_end(&mut h.generator);
    assert_eq!(summary.state, NotificationState::Succeeded);
    assert_eq!(h.builds.load(Ordering::SeqCst), 1);
}

#[test]
fn test_requested_run_with_bad_actor_fails_on_tick() {
    let mut h = harness(Behaviour::default(), GeneratorSettings::default());

    h.generator
        .request_generate(config(1.0), ActorSpec::default(), cache())
        .unwrap();
    let summary = h.generator.tick().unwrap();
    assert_eq!(summary.state, NotificationState::Failed);
    assert!(summary.error.is_some());
    assert_eq!(h.generator.action(), GeneratorAction::NoAction);
}

#[test]
fn test_drop_mid_run_tears_down_once() {
    let behaviour = Behaviour {
        delay: Duration::from_millis(1),
        ..Behaviour::default()
    };
    let mut h = harness(behaviour, GeneratorSettings::default());
    let teardowns = Arc::clone(&h.teardowns);

    h.generator
        .start_generate(config(1000.0), actor(), cache())
        .unwrap();
    wait_for_frames(&mut h.generator, 2);
    drop(h);

    assert_eq!(teardowns.load(Ordering::SeqCst), 1);
}
