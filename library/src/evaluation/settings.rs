use serde::{Deserialize, Serialize};

/// Switches read by the evaluation context.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct EvaluationSettings {
    /// When false every `evaluate` call is a no-op returning `Disabled`.
    pub enable_graph_eval: bool,
    /// Run evaluations on a worker thread and complete them on `poll`.
    pub threaded: bool,
    /// Emit an info event with the elapsed time of every computed output.
    pub perf_data: bool,
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self {
            enable_graph_eval: true,
            threaded: false,
            perf_data: false,
        }
    }
}
