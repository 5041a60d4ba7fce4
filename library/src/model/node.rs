//! Graph node and its output slots.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::timestamp::Timestamp;
use super::value::PinValue;

pub type PropertyMap = BTreeMap<String, PinValue>;

/// Whether a node's result only feeds other nodes or is also pushed to an
/// external sink.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    #[default]
    Standard,
    Terminal,
}

/// A named output of a node.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OutputSlot {
    pub name: String,
    /// Inputs this output reads. `None` means every input of the node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Vec<String>>,
}

impl OutputSlot {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            depends_on: None,
        }
    }

    /// An output that only reads the listed inputs.
    pub fn reading(name: &str, inputs: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            depends_on: Some(inputs.iter().map(|s| s.to_string()).collect()),
        }
    }

    pub fn depends_on_input(&self, input: &str) -> bool {
        match &self.depends_on {
            Some(inputs) => inputs.iter().any(|i| i == input),
            None => true,
        }
    }
}

/// A node of the dataflow graph.
///
/// `type_id` selects the evaluator (see `EvaluatorRegistry`). The timestamp is
/// bumped by [`GraphNode::invalidate`] and never persisted.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct GraphNode {
    pub id: Uuid,
    pub name: String,
    pub type_id: String,
    #[serde(default)]
    pub role: NodeRole,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<OutputSlot>,
    #[serde(default)]
    pub properties: PropertyMap,
    #[serde(default = "default_active")]
    active: bool,
    #[serde(skip, default = "Timestamp::now")]
    timestamp: Timestamp,
    #[serde(skip)]
    frozen_at: Option<Timestamp>,
}

fn default_active() -> bool {
    true
}

impl GraphNode {
    pub fn new(name: &str, type_id: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            type_id: type_id.to_string(),
            role: NodeRole::Standard,
            inputs: Vec::new(),
            outputs: Vec::new(),
            properties: PropertyMap::new(),
            active: true,
            timestamp: Timestamp::now(),
            frozen_at: None,
        }
    }

    pub fn terminal(name: &str, type_id: &str) -> Self {
        Self {
            role: NodeRole::Terminal,
            ..Self::new(name, type_id)
        }
    }

    pub fn with_input(mut self, name: &str) -> Self {
        self.inputs.push(name.to_string());
        self
    }

    pub fn with_output(mut self, name: &str) -> Self {
        self.outputs.push(OutputSlot::new(name));
        self
    }

    pub fn with_output_slot(mut self, slot: OutputSlot) -> Self {
        self.outputs.push(slot);
        self
    }

    pub fn with_property(mut self, key: &str, value: PinValue) -> Self {
        self.properties.insert(key.to_string(), value);
        self
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Mark every output of this node stale.
    pub fn invalidate(&mut self) -> Timestamp {
        self.timestamp = Timestamp::now();
        self.timestamp
    }

    pub fn is_terminal(&self) -> bool {
        self.role == NodeRole::Terminal
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen_at.is_some()
    }

    /// Timestamp recorded when the node was frozen.
    pub fn frozen_at(&self) -> Option<Timestamp> {
        self.frozen_at
    }

    pub(crate) fn set_frozen_at(&mut self, frozen_at: Option<Timestamp>) {
        self.frozen_at = frozen_at;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn has_input(&self, name: &str) -> bool {
        self.inputs.iter().any(|i| i == name)
    }

    pub fn output(&self, name: &str) -> Option<&OutputSlot> {
        self.outputs.iter().find(|o| o.name == name)
    }

    pub fn output_names(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().map(|o| o.name.as_str())
    }

    /// Inputs read by `output`, in declaration order.
    pub fn inputs_for<'a>(&'a self, output: &'a OutputSlot) -> impl Iterator<Item = &'a str> + 'a {
        self.inputs
            .iter()
            .map(|i| i.as_str())
            .filter(move |i| output.depends_on_input(i))
    }
}
