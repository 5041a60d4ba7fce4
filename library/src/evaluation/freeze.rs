//! Freezing pins a node's current output values so that upstream changes no
//! longer reach it or anything downstream.

use std::collections::BTreeMap;

use log::{info, warn};
use uuid::Uuid;

use super::context::EvaluationContext;
use super::output_cache::FrozenOutputs;
use crate::error::DataflowError;
use crate::model::{PinId, PinValue, Timestamp};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FreezeState {
    Live,
    Frozen,
}

impl EvaluationContext {
    pub fn freeze_state(&self, node_id: Uuid) -> FreezeState {
        if self.frozen.contains_key(&node_id) {
            FreezeState::Frozen
        } else {
            FreezeState::Live
        }
    }

    /// Evaluate the node's outputs if stale, then pin them. The freeze is
    /// stamped with the node's dependency timestamp, so downstream values
    /// computed from the same inputs stay fresh.
    pub fn freeze(&mut self, node_id: Uuid) -> Result<Timestamp, DataflowError> {
        let node = self.graph().require_node(node_id)?;
        if node.is_terminal() {
            return Err(DataflowError::TerminalNotFreezable(node_id));
        }
        if self.freeze_state(node_id) == FreezeState::Frozen {
            return Err(DataflowError::AlreadyFrozen(node_id));
        }

        let values = self.evaluate_for_freeze(node_id)?;
        let frozen_at = self.graph().node_timestamp(node_id)?;
        self.pin(node_id, values, frozen_at)?;
        info!("Froze node {} at {:?}", node_id, frozen_at);
        Ok(frozen_at)
    }

    /// Release the pins. The values stay in the ordinary cache stamped with
    /// the freeze time, so they are reused only if nothing upstream changed.
    pub fn unfreeze(&mut self, node_id: Uuid) -> Result<(), DataflowError> {
        let frozen = self
            .frozen
            .remove(&node_id)
            .ok_or(DataflowError::NotFrozen(node_id))?;
        for (output, value) in frozen.values {
            self.cache
                .store(PinId::new(node_id, &output), value, frozen.frozen_at);
        }
        if let Some(node) = self.graph_mut().get_node_mut(node_id) {
            node.set_frozen_at(None);
        }
        info!("Unfroze node {}", node_id);
        Ok(())
    }

    /// Recompute the node against its current inputs and pin the new values.
    /// On failure the previous pins are restored and the node stays frozen.
    pub fn refreeze(&mut self, node_id: Uuid) -> Result<Timestamp, DataflowError> {
        let previous = self
            .frozen
            .get(&node_id)
            .cloned()
            .ok_or(DataflowError::NotFrozen(node_id))?;

        self.unfreeze(node_id)?;
        self.cache.remove_node(node_id);

        match self.evaluate_for_freeze(node_id) {
            Ok(values) => {
                let frozen_at = self.graph().node_timestamp(node_id)?;
                self.pin(node_id, values, frozen_at)?;
                info!("Refroze node {} at {:?}", node_id, frozen_at);
                Ok(frozen_at)
            }
            Err(e) => {
                warn!("Refreeze of {} failed, keeping previous values: {}", node_id, e);
                let frozen_at = previous.frozen_at;
                self.pin(node_id, previous.values, frozen_at)?;
                Err(e)
            }
        }
    }

    fn evaluate_for_freeze(
        &mut self,
        node_id: Uuid,
    ) -> Result<BTreeMap<String, PinValue>, DataflowError> {
        let outcome = self.evaluate_now(node_id, None)?;
        if !outcome.is_success() {
            return Err(DataflowError::node(format!(
                "{} output(s) of node {} failed to evaluate",
                outcome.failed, node_id
            )));
        }
        Ok(outcome.values)
    }

    fn pin(
        &mut self,
        node_id: Uuid,
        values: BTreeMap<String, PinValue>,
        frozen_at: Timestamp,
    ) -> Result<(), DataflowError> {
        self.graph_mut()
            .require_node_mut(node_id)?
            .set_frozen_at(Some(frozen_at));
        self.frozen
            .insert(node_id, FrozenOutputs { values, frozen_at });
        Ok(())
    }
}
