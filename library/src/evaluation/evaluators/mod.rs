//! Built-in node evaluators.

pub mod math;
pub mod value;

use super::evaluator::EvaluatorRegistry;

pub fn register_defaults(registry: &mut EvaluatorRegistry) {
    registry.register(value::ConstantEvaluator);
    registry.register(math::MathEvaluator);
    registry.register(value::PassthroughEvaluator);
}
