use crate::error::DataflowError;
use crate::evaluation::evaluator::{NodeContext, NodeEvaluator};
use crate::model::PinValue;

/// `value.constant`: every output returns the `value` property.
pub struct ConstantEvaluator;

impl NodeEvaluator for ConstantEvaluator {
    fn handles(&self) -> &[&str] {
        &["value.constant"]
    }

    fn evaluate(&self, ctx: &mut NodeContext) -> Result<PinValue, DataflowError> {
        ctx.property("value").cloned().ok_or_else(|| {
            DataflowError::node(format!("'{}' has no 'value' property", ctx.node_name()))
        })
    }
}

/// `passthrough`: forwards the input named like the requested output. An
/// input with no value yields `None` and a warning. Terminals use this to
/// hand their inputs to a sink.
pub struct PassthroughEvaluator;

impl NodeEvaluator for PassthroughEvaluator {
    fn handles(&self) -> &[&str] {
        &["passthrough"]
    }

    fn evaluate(&self, ctx: &mut NodeContext) -> Result<PinValue, DataflowError> {
        let output = ctx.output_name().to_string();
        let value = ctx.input(&output).clone();
        if value.is_none() {
            ctx.warning(format!("input '{}' is not connected", output));
        }
        Ok(value)
    }
}
