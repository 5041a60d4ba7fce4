//! Node evaluator trait and the registry that dispatches on `type_id`.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use super::worker::CancellationToken;
use crate::error::DataflowError;
use crate::model::{PinValue, PropertyMap};

/// Trait for evaluating a category of nodes.
///
/// Each implementation handles one or more `type_id` prefixes (e.g. `"math."`,
/// `"value.constant"`). The context dispatches to the first registered
/// evaluator whose prefix matches the node's `type_id`.
///
/// Evaluators run on the controlling thread in synchronous mode and on a
/// worker thread in threaded mode, hence `Send + Sync`.
pub trait NodeEvaluator: Send + Sync {
    /// The `type_id` prefixes this evaluator handles.
    fn handles(&self) -> &[&str];

    /// Compute `ctx.output_name()` from the node's inputs and properties.
    fn evaluate(&self, ctx: &mut NodeContext) -> Result<PinValue, DataflowError>;
}

/// Non-fatal message raised by an evaluator.
#[derive(Clone, Debug, PartialEq)]
pub enum Diagnostic {
    Info(String),
    Warning(String),
}

/// Everything an evaluator may look at while computing one output.
///
/// Inputs are already resolved: unconnected inputs read as `PinValue::None`.
pub struct NodeContext<'a> {
    node_id: Uuid,
    node_name: &'a str,
    type_id: &'a str,
    output: &'a str,
    inputs: &'a HashMap<String, PinValue>,
    properties: &'a PropertyMap,
    cancel: &'a CancellationToken,
    diagnostics: Vec<Diagnostic>,
}

static NONE: PinValue = PinValue::None;

impl<'a> NodeContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        node_id: Uuid,
        node_name: &'a str,
        type_id: &'a str,
        output: &'a str,
        inputs: &'a HashMap<String, PinValue>,
        properties: &'a PropertyMap,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            node_id,
            node_name,
            type_id,
            output,
            inputs,
            properties,
            cancel,
            diagnostics: Vec::new(),
        }
    }

    pub fn node_id(&self) -> Uuid {
        self.node_id
    }

    pub fn node_name(&self) -> &str {
        self.node_name
    }

    pub fn type_id(&self) -> &str {
        self.type_id
    }

    /// The output slot being evaluated.
    pub fn output_name(&self) -> &str {
        self.output
    }

    pub fn input(&self, name: &str) -> &PinValue {
        self.inputs.get(name).unwrap_or(&NONE)
    }

    pub fn property(&self, key: &str) -> Option<&PinValue> {
        self.properties.get(key)
    }

    /// Input value, falling back to the property of the same name when the
    /// input is unconnected.
    pub fn input_or_property(&self, name: &str) -> &PinValue {
        match self.inputs.get(name) {
            Some(value) if !value.is_none() => value,
            _ => self.properties.get(name).unwrap_or(&NONE),
        }
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::Info(message.into()));
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::Warning(message.into()));
    }

    /// Long-running evaluators should poll this and bail out early.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }
}

/// Evaluators keyed by `type_id` prefix.
#[derive(Clone, Default)]
pub struct EvaluatorRegistry {
    evaluators: Vec<Arc<dyn NodeEvaluator>>,
}

impl EvaluatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the built-in evaluators.
    pub fn with_default_evaluators() -> Self {
        let mut registry = Self::new();
        super::evaluators::register_defaults(&mut registry);
        registry
    }

    pub fn register(&mut self, evaluator: impl NodeEvaluator + 'static) {
        self.evaluators.push(Arc::new(evaluator));
    }

    pub fn find(&self, type_id: &str) -> Option<Arc<dyn NodeEvaluator>> {
        self.evaluators
            .iter()
            .find(|e| e.handles().iter().any(|prefix| type_id.starts_with(prefix)))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.evaluators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.evaluators.is_empty()
    }
}

/// Adapter turning a closure into a [`NodeEvaluator`].
pub struct FnEvaluator<F> {
    prefixes: Vec<&'static str>,
    f: F,
}

impl<F> FnEvaluator<F>
where
    F: Fn(&mut NodeContext) -> Result<PinValue, DataflowError> + Send + Sync,
{
    pub fn new(prefix: &'static str, f: F) -> Self {
        Self {
            prefixes: vec![prefix],
            f,
        }
    }
}

impl<F> NodeEvaluator for FnEvaluator<F>
where
    F: Fn(&mut NodeContext) -> Result<PinValue, DataflowError> + Send + Sync,
{
    fn handles(&self) -> &[&str] {
        &self.prefixes
    }

    fn evaluate(&self, ctx: &mut NodeContext) -> Result<PinValue, DataflowError> {
        (self.f)(ctx)
    }
}
