pub mod error;
pub mod evaluation;
pub mod model;
pub mod simulation;
pub mod util;

pub use error::DataflowError;
pub use evaluation::{
    EvaluationContext, EvaluationEvent, EvaluationMode, EvaluationOutcome, EvaluationScheduler,
    EvaluationSettings, EvaluationStatus, EvaluatorRegistry, FreezeState, NodeContext,
    NodeEvaluator, TerminalSink,
};
pub use model::{Graph, GraphNode, NodeRole, OutputSlot, PinId, PinValue, Timestamp};
pub use simulation::{SimulationConfig, SimulationGenerator};
