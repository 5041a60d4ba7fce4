//! Pull-based graph evaluation with cached outputs.
//!
//! [`EvaluationContext`] is the entry point. It plans the work needed to bring
//! an output up to date, runs it inline or on a worker thread, and stores the
//! results keyed by `(node, output)` together with the dependency timestamp
//! they were computed against. [`EvaluationScheduler`] decides when terminal
//! nodes are evaluated.

pub mod context;
pub mod evaluator;
pub mod evaluators;
pub mod events;
pub mod freeze;
pub mod output_cache;
mod plan;
pub mod scheduler;
pub mod settings;
pub mod terminal;
pub mod worker;

pub use context::{CompletionCallback, EvaluationContext, EvaluationOutcome, EvaluationStatus};
pub use evaluator::{Diagnostic, EvaluatorRegistry, FnEvaluator, NodeContext, NodeEvaluator};
pub use events::{EvaluationEvent, EventBus};
pub use freeze::FreezeState;
pub use output_cache::CachedOutput;
pub use scheduler::{EvaluationMode, EvaluationScheduler};
pub use settings::EvaluationSettings;
pub use terminal::TerminalSink;
pub use worker::CancellationToken;
