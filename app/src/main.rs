use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use dataflow::simulation::{
    GeneratorEvent, NotificationState, SimulationCache, SimulationGenerator,
};
use dataflow::util::timing::ScopedTimer;
use log::{info, warn};

mod config;
mod graph_demo;
mod world;

use config::AppConfig;

const TICK_INTERVAL: Duration = Duration::from_millis(10);

fn run_simulation(config: &AppConfig) -> Result<()> {
    let _timer = ScopedTimer::info("Simulation run");
    let mut generator = SimulationGenerator::new(world::build_world, config.generator.settings());
    generator.subscribe(|event| match event {
        GeneratorEvent::Progress(progress) => info!(
            "Simulating: {}/{} frames ({:.0}%)",
            progress.completed_frames,
            progress.total_frames,
            progress.percentage()
        ),
        GeneratorEvent::Stalled { since_last_frame } => {
            warn!("No frame simulated for {:?}", since_last_frame)
        }
        _ => {}
    });

    let cache = SimulationCache::shared(&config.actor.cache_destination);
    generator.start_generate(
        config.simulation.clone(),
        config.actor.clone(),
        Arc::clone(&cache),
    )?;

    let summary = loop {
        if let Some(summary) = generator.tick() {
            break summary;
        }
        thread::sleep(TICK_INTERVAL);
    };

    if summary.state != NotificationState::Succeeded {
        bail!("simulation did not complete: {}", summary);
    }

    let destination = Path::new(cache.destination());
    cache
        .save(destination)
        .with_context(|| format!("writing cache to {}", destination.display()))?;
    info!(
        "Wrote {} cached frame(s) to {}",
        cache.len(),
        destination.display()
    );
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let config = match args.next().as_deref() {
        Some("--init-config") => {
            config::save_config(&AppConfig::default());
            return Ok(());
        }
        Some(path) => config::load_config(Some(Path::new(path))),
        None => config::load_config(None),
    };

    graph_demo::run(&config.evaluation)?;
    run_simulation(&config)?;
    Ok(())
}
