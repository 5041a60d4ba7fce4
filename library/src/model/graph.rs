//! The dataflow graph: nodes, connections and dependency analysis.
//!
//! There is no dirty-propagation walk. Invalidating a node only bumps its own
//! timestamp; consumers compare against the *dependency timestamp* of the
//! output they read, which is derived by pulling through the upstream
//! connections on demand.

use std::collections::{HashMap, HashSet, VecDeque};

use log::debug;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::connection::{Connection, PinId};
use super::node::GraphNode;
use super::timestamp::Timestamp;
use super::value::PinValue;
use crate::error::DataflowError;

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Graph {
    #[serde(default)]
    nodes: Vec<GraphNode>,
    #[serde(default)]
    connections: Vec<Connection>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(json_str: &str) -> Result<Self, DataflowError> {
        let graph: Graph = serde_json::from_str(json_str)?;
        for connection in &graph.connections {
            graph.validate_connection(&connection.from, &connection.to)?;
        }
        Ok(graph)
    }

    pub fn save(&self) -> Result<String, DataflowError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn add_node(&mut self, node: GraphNode) -> Uuid {
        let id = node.id;
        debug!("Graph: add node '{}' ({}) as {}", node.name, node.type_id, id);
        self.nodes.push(node);
        id
    }

    /// Remove a node and every connection touching it. Nodes that were reading
    /// from it are invalidated since their inputs changed.
    pub fn remove_node(&mut self, id: Uuid) -> Option<GraphNode> {
        let index = self.nodes.iter().position(|n| n.id == id)?;
        let node = self.nodes.remove(index);

        let affected: Vec<Uuid> = self
            .connections
            .iter()
            .filter(|c| c.from.node_id == id)
            .map(|c| c.to.node_id)
            .collect();
        self.connections
            .retain(|c| c.from.node_id != id && c.to.node_id != id);
        for node_id in affected {
            if let Some(n) = self.get_node_mut(node_id) {
                n.invalidate();
            }
        }
        Some(node)
    }

    pub fn get_node(&self, id: Uuid) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub(crate) fn get_node_mut(&mut self, id: Uuid) -> Option<&mut GraphNode> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    pub fn require_node(&self, id: Uuid) -> Result<&GraphNode, DataflowError> {
        self.get_node(id).ok_or(DataflowError::NodeNotFound(id))
    }

    pub(crate) fn require_node_mut(&mut self, id: Uuid) -> Result<&mut GraphNode, DataflowError> {
        self.get_node_mut(id).ok_or(DataflowError::NodeNotFound(id))
    }

    /// Bump the node's timestamp.
    pub fn invalidate(&mut self, id: Uuid) -> Result<Timestamp, DataflowError> {
        let node = self.require_node_mut(id)?;
        let ts = node.invalidate();
        debug!("Graph: invalidated '{}' at {:?}", node.name, ts);
        Ok(ts)
    }

    /// Change a configuration property; invalidates the node.
    pub fn set_property(
        &mut self,
        id: Uuid,
        key: &str,
        value: PinValue,
    ) -> Result<Timestamp, DataflowError> {
        let node = self.require_node_mut(id)?;
        node.properties.insert(key.to_string(), value);
        Ok(node.invalidate())
    }

    pub fn set_active(&mut self, id: Uuid, active: bool) -> Result<(), DataflowError> {
        self.require_node_mut(id)?.set_active(active);
        Ok(())
    }

    /// Connect an output slot to an input slot, replacing any connection that
    /// already feeds that input. The target node is invalidated.
    pub fn connect(&mut self, from: PinId, to: PinId) -> Result<Uuid, DataflowError> {
        self.validate_connection(&from, &to)?;
        if from.node_id == to.node_id || self.upstream_closure(from.node_id).contains(&to.node_id)
        {
            return Err(DataflowError::CycleDetected {
                from: from.node_id,
                to: to.node_id,
            });
        }

        self.connections.retain(|c| c.to != to);
        let connection = Connection::new(from, to);
        let id = connection.id;
        let target = connection.to.node_id;
        self.connections.push(connection);
        self.invalidate(target)?;
        Ok(id)
    }

    /// Remove the connection feeding `to`, if any. The target node is invalidated.
    pub fn disconnect(&mut self, to: &PinId) -> Option<Connection> {
        let index = self.connections.iter().position(|c| &c.to == to)?;
        let connection = self.connections.remove(index);
        if let Some(node) = self.get_node_mut(to.node_id) {
            node.invalidate();
        }
        Some(connection)
    }

    fn validate_connection(&self, from: &PinId, to: &PinId) -> Result<(), DataflowError> {
        let source = self.require_node(from.node_id)?;
        if source.output(&from.pin_name).is_none() {
            return Err(DataflowError::PinNotFound {
                node: from.node_id,
                pin: from.pin_name.clone(),
            });
        }
        let target = self.require_node(to.node_id)?;
        if !target.has_input(&to.pin_name) {
            return Err(DataflowError::PinNotFound {
                node: to.node_id,
                pin: to.pin_name.clone(),
            });
        }
        Ok(())
    }

    /// The output feeding an input pin, if connected.
    pub fn find_upstream(&self, node_id: Uuid, input: &str) -> Option<&PinId> {
        self.connections
            .iter()
            .find(|c| c.to.node_id == node_id && c.to.pin_name == input)
            .map(|c| &c.from)
    }

    pub fn terminal_nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.iter().filter(|n| n.is_terminal())
    }

    /// Every node that transitively feeds `id` (excluding `id` itself).
    pub fn upstream_closure(&self, id: Uuid) -> HashSet<Uuid> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            for connection in self.connections.iter().filter(|c| c.to.node_id == current) {
                let source = connection.from.node_id;
                if source != id && visited.insert(source) {
                    queue.push_back(source);
                }
            }
        }
        visited
    }

    /// Terminal nodes whose result depends on `id`, in graph order. Includes
    /// `id` itself when it is a terminal.
    pub fn downstream_terminals(&self, id: Uuid) -> Vec<Uuid> {
        self.terminal_nodes()
            .filter(|t| t.id == id || self.upstream_closure(t.id).contains(&id))
            .map(|t| t.id)
            .collect()
    }

    /// The newest timestamp among the node itself and everything an output
    /// reads. A frozen node reports the timestamp at which it was frozen.
    pub fn output_timestamp(&self, pin: &PinId) -> Result<Timestamp, DataflowError> {
        let mut memo = HashMap::new();
        let mut visiting = HashSet::new();
        self.output_timestamp_memo(pin, &mut memo, &mut visiting)
    }

    /// Dependency timestamp of a whole node, over all of its connected inputs.
    pub fn node_timestamp(&self, id: Uuid) -> Result<Timestamp, DataflowError> {
        let node = self.require_node(id)?;
        if let Some(frozen_at) = node.frozen_at() {
            return Ok(frozen_at);
        }
        let mut memo = HashMap::new();
        let mut visiting = HashSet::new();
        let mut ts = node.timestamp();
        for input in &node.inputs {
            if let Some(source) = self.find_upstream(id, input) {
                ts = ts.max(self.output_timestamp_memo(source, &mut memo, &mut visiting)?);
            }
        }
        Ok(ts)
    }

    fn output_timestamp_memo(
        &self,
        pin: &PinId,
        memo: &mut HashMap<PinId, Timestamp>,
        visiting: &mut HashSet<PinId>,
    ) -> Result<Timestamp, DataflowError> {
        if let Some(ts) = memo.get(pin) {
            return Ok(*ts);
        }
        let node = self.require_node(pin.node_id)?;
        if let Some(frozen_at) = node.frozen_at() {
            memo.insert(pin.clone(), frozen_at);
            return Ok(frozen_at);
        }
        let slot = node
            .output(&pin.pin_name)
            .ok_or_else(|| DataflowError::PinNotFound {
                node: pin.node_id,
                pin: pin.pin_name.clone(),
            })?;
        // Only reachable through a graph loaded with a cycle in it.
        if !visiting.insert(pin.clone()) {
            return Err(DataflowError::CycleDetected {
                from: pin.node_id,
                to: pin.node_id,
            });
        }

        let mut ts = node.timestamp();
        for input in node.inputs_for(slot) {
            if let Some(source) = self.find_upstream(node.id, input) {
                ts = ts.max(self.output_timestamp_memo(source, memo, visiting)?);
            }
        }

        visiting.remove(pin);
        memo.insert(pin.clone(), ts);
        Ok(ts)
    }
}
