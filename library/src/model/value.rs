//! Typed values flowing between node pins.

use serde::{Deserialize, Serialize};

/// The value produced by evaluating a node's output slot, and the type of
/// node properties.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum PinValue {
    /// No value / unconnected input.
    #[default]
    None,
    Boolean(bool),
    Integer(i64),
    Scalar(f64),
    Vec3([f64; 3]),
    String(String),
    List(Vec<PinValue>),
}

impl PinValue {
    /// Extract as scalar, returning default if not numeric.
    pub fn as_scalar(&self, default: f64) -> f64 {
        match self {
            PinValue::Scalar(v) => *v,
            PinValue::Integer(v) => *v as f64,
            _ => default,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            PinValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, PinValue::None)
    }
}
