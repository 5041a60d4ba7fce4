//! Connection model for the dataflow graph.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies a specific slot on a specific node. Used both for output slots
/// (cache keys, connection sources) and input slots (connection targets).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PinId {
    pub node_id: Uuid,
    pub pin_name: String,
}

impl PinId {
    pub fn new(node_id: Uuid, pin_name: &str) -> Self {
        Self {
            node_id,
            pin_name: pin_name.to_string(),
        }
    }
}

impl std::fmt::Display for PinId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.node_id, self.pin_name)
    }
}

/// An edge from an output slot to an input slot.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Connection {
    pub id: Uuid,
    /// Source pin (output)
    pub from: PinId,
    /// Destination pin (input)
    pub to: PinId,
}

impl Connection {
    pub fn new(from: PinId, to: PinId) -> Self {
        Self {
            id: Uuid::new_v4(),
            from,
            to,
        }
    }
}
