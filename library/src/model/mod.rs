//! Graph data model: nodes, output slots, connections and logical timestamps.

pub mod connection;
pub mod graph;
pub mod node;
pub mod timestamp;
pub mod value;

pub use connection::{Connection, PinId};
pub use graph::Graph;
pub use node::{GraphNode, NodeRole, OutputSlot, PropertyMap};
pub use timestamp::Timestamp;
pub use value::PinValue;
