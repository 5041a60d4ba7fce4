use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum DataflowError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Node not found: {0}")]
    NodeNotFound(Uuid),
    #[error("Node {node} has no pin named '{pin}'")]
    PinNotFound { node: Uuid, pin: String },
    #[error("Connecting {from} -> {to} would create a cycle")]
    CycleDetected { from: Uuid, to: Uuid },
    #[error("No evaluator registered for node type: {0}")]
    NoEvaluator(String),
    #[error("Node error: {0}")]
    Node(String),
    #[error("Evaluation of {node}.{output} failed: {message}")]
    Evaluation {
        node: String,
        output: String,
        message: String,
    },
    #[error("Terminal node {0} cannot be frozen")]
    TerminalNotFreezable(Uuid),
    #[error("Node {0} is already frozen")]
    AlreadyFrozen(Uuid),
    #[error("Node {0} is not frozen")]
    NotFrozen(Uuid),
    #[error("Node {0} is not a terminal node")]
    NotTerminal(Uuid),
    #[error("Terminal write failed: {0}")]
    TerminalWrite(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("A simulation generation is already in progress")]
    GenerationInProgress,
    #[error("Simulation setup failed: {0}")]
    SimulationSetup(String),
    #[error("Simulation step failed: {0}")]
    SimulationStep(String),
    #[error("Worker error: {0}")]
    Worker(String),
}

impl DataflowError {
    pub fn node(message: impl Into<String>) -> Self {
        DataflowError::Node(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        DataflowError::InvalidConfig(message.into())
    }

    pub fn step(message: impl Into<String>) -> Self {
        DataflowError::SimulationStep(message.into())
    }
}

/// Turn a `catch_unwind` payload into a readable message.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
