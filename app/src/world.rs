use dataflow::simulation::{ActorSpec, FrameSample, SimulationConfig, SimulationWorld};
use dataflow::DataflowError;
use log::debug;

pub const SPRING_CLASS: &str = "DampedSpring";

const STIFFNESS: f64 = 40.0;
const DAMPING: f64 = 1.5;

/// A unit mass on a damped spring, anchored at the actor's translation and
/// released from one unit of (scaled) displacement along Y.
pub struct SpringWorld {
    anchor: [f64; 3],
    initial_offset: [f64; 3],
    offset: [f64; 3],
    velocity: [f64; 3],
    time: f64,
}

impl SpringWorld {
    pub fn new(actor: &ActorSpec) -> Self {
        let initial_offset = [0.0, actor.transform.scale[1], 0.0];
        Self {
            anchor: actor.transform.translation,
            initial_offset,
            offset: initial_offset,
            velocity: [0.0; 3],
            time: 0.0,
        }
    }
}

impl SimulationWorld for SpringWorld {
    fn reset(&mut self, time: f64) -> Result<(), DataflowError> {
        self.offset = self.initial_offset;
        self.velocity = [0.0; 3];
        self.time = time;
        Ok(())
    }

    fn advance(&mut self, dt: f64) -> Result<(), DataflowError> {
        for axis in 0..3 {
            let accel = -STIFFNESS * self.offset[axis] - DAMPING * self.velocity[axis];
            self.velocity[axis] += accel * dt;
            self.offset[axis] += self.velocity[axis] * dt;
        }
        if self.offset.iter().any(|x| !x.is_finite()) {
            return Err(DataflowError::step(format!(
                "spring diverged at t={:.3}",
                self.time
            )));
        }
        self.time += dt;
        Ok(())
    }

    fn sample(&self) -> FrameSample {
        let position = [
            self.anchor[0] + self.offset[0],
            self.anchor[1] + self.offset[1],
            self.anchor[2] + self.offset[2],
        ];
        FrameSample {
            positions: vec![position],
            velocities: vec![self.velocity],
        }
    }

    fn teardown(&mut self) {
        debug!("Spring world torn down at t={:.3}", self.time);
    }
}

pub fn build_world(
    actor: &ActorSpec,
    _config: &SimulationConfig,
) -> Result<Box<dyn SimulationWorld>, DataflowError> {
    match actor.blueprint_class.as_str() {
        "" => Err(DataflowError::SimulationSetup(
            "actor has no blueprint class".to_string(),
        )),
        SPRING_CLASS => Ok(Box::new(SpringWorld::new(actor))),
        other => Err(DataflowError::SimulationSetup(format!(
            "unknown blueprint class '{}'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spring_settles_towards_anchor() {
        let actor = ActorSpec {
            blueprint_class: SPRING_CLASS.to_string(),
            ..ActorSpec::default()
        };
        let mut world = build_world(&actor, &SimulationConfig::default()).unwrap();
        world.reset(0.0).unwrap();
        for _ in 0..2000 {
            world.advance(1.0 / 120.0).unwrap();
        }
        let y = world.sample().positions[0][1];
        assert!(y.abs() < 0.05, "spring still at {}", y);
    }

    #[test]
    fn test_unknown_class_is_rejected() {
        let actor = ActorSpec::default();
        assert!(build_world(&actor, &SimulationConfig::default()).is_err());
    }
}
