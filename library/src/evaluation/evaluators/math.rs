use crate::error::DataflowError;
use crate::evaluation::evaluator::{NodeContext, NodeEvaluator};
use crate::model::PinValue;

/// `math.add` / `math.multiply` over inputs `a` and `b`.
///
/// An unconnected operand falls back to the property of the same name, then
/// to the operation's identity. Scalars and integers mix; `Vec3` operands are
/// combined component-wise and scalars broadcast.
pub struct MathEvaluator;

#[derive(Clone, Copy)]
enum Op {
    Add,
    Multiply,
}

impl Op {
    fn identity(self) -> f64 {
        match self {
            Op::Add => 0.0,
            Op::Multiply => 1.0,
        }
    }

    fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            Op::Add => a + b,
            Op::Multiply => a * b,
        }
    }
}

enum Operand {
    Scalar(f64),
    Vec3([f64; 3]),
}

fn operand(value: &PinValue, op: Op, name: &str) -> Result<Operand, DataflowError> {
    match value {
        PinValue::None => Ok(Operand::Scalar(op.identity())),
        PinValue::Scalar(_) | PinValue::Integer(_) => Ok(Operand::Scalar(value.as_scalar(0.0))),
        PinValue::Vec3(v) => Ok(Operand::Vec3(*v)),
        other => Err(DataflowError::node(format!(
            "operand '{}' is not numeric: {:?}",
            name, other
        ))),
    }
}

impl NodeEvaluator for MathEvaluator {
    fn handles(&self) -> &[&str] {
        &["math."]
    }

    fn evaluate(&self, ctx: &mut NodeContext) -> Result<PinValue, DataflowError> {
        let op = match ctx.type_id() {
            "math.add" => Op::Add,
            "math.multiply" => Op::Multiply,
            other => return Err(DataflowError::NoEvaluator(other.to_string())),
        };

        let a = operand(ctx.input_or_property("a"), op, "a")?;
        let b = operand(ctx.input_or_property("b"), op, "b")?;

        let result = match (a, b) {
            (Operand::Scalar(a), Operand::Scalar(b)) => PinValue::Scalar(op.apply(a, b)),
            (Operand::Vec3(a), Operand::Vec3(b)) => {
                PinValue::Vec3([op.apply(a[0], b[0]), op.apply(a[1], b[1]), op.apply(a[2], b[2])])
            }
            (Operand::Vec3(v), Operand::Scalar(s)) | (Operand::Scalar(s), Operand::Vec3(v)) => {
                PinValue::Vec3([op.apply(v[0], s), op.apply(v[1], s), op.apply(v[2], s)])
            }
        };
        Ok(result)
    }
}
