//! Decides *when* terminals get evaluated: immediately after edits in
//! automatic mode, or only on explicit request in manual mode.

use std::collections::HashSet;

use log::debug;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::context::{EvaluationContext, EvaluationStatus};
use super::events::EvaluationEvent;
use crate::error::DataflowError;
use crate::util::timing::{ScopedTimer, format_elapsed};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationMode {
    #[default]
    Automatic,
    Manual,
}

/// Queue of terminals waiting for the next [`tick`](Self::tick).
#[derive(Default)]
pub struct EvaluationScheduler {
    mode: EvaluationMode,
    pending: HashSet<Uuid>,
    /// Timer of the run started by the last tick that evaluated terminals.
    run: Option<ScopedTimer>,
}

impl EvaluationScheduler {
    pub fn new(mode: EvaluationMode) -> Self {
        Self {
            mode,
            pending: HashSet::new(),
            run: None,
        }
    }

    pub fn mode(&self) -> EvaluationMode {
        self.mode
    }

    /// Switching back to automatic evaluates the whole graph on the next tick.
    pub fn set_mode(&mut self, ctx: &EvaluationContext, mode: EvaluationMode) {
        let previous = self.mode;
        self.mode = mode;
        if mode == EvaluationMode::Automatic && previous != EvaluationMode::Automatic {
            self.evaluate_graph(ctx);
        }
    }

    pub fn is_queued(&self, node_id: Uuid) -> bool {
        self.pending.contains(&node_id)
    }

    pub fn num_queued(&self) -> usize {
        self.pending.len()
    }

    /// Queue the active terminals that depend on `node_id`. Manual mode
    /// ignores invalidations.
    pub fn on_node_invalidated(&mut self, ctx: &EvaluationContext, node_id: Uuid) {
        if self.mode != EvaluationMode::Automatic {
            return;
        }
        let graph = ctx.graph();
        for terminal in graph.downstream_terminals(node_id) {
            if graph.get_node(terminal).is_some_and(|n| n.is_active()) {
                self.pending.insert(terminal);
            }
        }
    }

    /// Invalidate a node through the context and react to it.
    pub fn invalidate(
        &mut self,
        ctx: &mut EvaluationContext,
        node_id: Uuid,
    ) -> Result<(), DataflowError> {
        ctx.invalidate(node_id)?;
        self.on_node_invalidated(ctx, node_id);
        Ok(())
    }

    /// Queue every terminal of the graph.
    pub fn evaluate_graph(&mut self, ctx: &EvaluationContext) {
        self.pending
            .extend(ctx.graph().terminal_nodes().map(|n| n.id));
    }

    /// Explicit request for one node. Terminals in automatic mode are already
    /// kept up to date by invalidation, so the request is ignored for them.
    pub fn request_evaluation(
        &mut self,
        ctx: &mut EvaluationContext,
        node_id: Uuid,
        output: Option<&str>,
    ) -> Result<Option<EvaluationStatus>, DataflowError> {
        let node = ctx.graph().require_node(node_id)?;
        if self.mode == EvaluationMode::Automatic && node.is_terminal() {
            debug!("Skipping explicit request for terminal {} in automatic mode", node_id);
            return Ok(None);
        }
        ctx.evaluate(node_id, output, None).map(Some)
    }

    /// Complete finished asynchronous work, then evaluate queued terminals in
    /// graph order. Returns how many terminals were evaluated.
    ///
    /// A run starts with the warning and error counters reset. Once no
    /// evaluation is left in flight the run is reported with its totals and
    /// elapsed time.
    pub fn tick(&mut self, ctx: &mut EvaluationContext) -> usize {
        ctx.poll();
        let evaluated = self.evaluate_queued(ctx);
        if self.run.is_some() && !ctx.has_pending_evaluations() {
            self.finish_run(ctx);
        }
        evaluated
    }

    fn evaluate_queued(&mut self, ctx: &mut EvaluationContext) -> usize {
        if self.pending.is_empty() {
            return 0;
        }
        let queued: Vec<Uuid> = ctx
            .graph()
            .terminal_nodes()
            .filter(|n| self.pending.contains(&n.id) && n.is_active())
            .map(|n| n.id)
            .collect();
        self.pending.clear();
        if queued.is_empty() {
            return 0;
        }

        if self.run.is_none() {
            ctx.reset_counters();
            self.run = Some(ScopedTimer::debug("Terminal evaluation"));
        }
        let mut evaluated = 0;
        for terminal in queued {
            match ctx.evaluate(terminal, None, None) {
                Ok(EvaluationStatus::Disabled) => {}
                Ok(_) => evaluated += 1,
                Err(e) => ctx.publish(EvaluationEvent::error(
                    Some(terminal),
                    None,
                    e.to_string(),
                )),
            }
        }
        evaluated
    }

    fn finish_run(&mut self, ctx: &mut EvaluationContext) {
        let Some(timer) = self.run.take() else {
            return;
        };
        let (warnings, errors) = (ctx.num_warnings(), ctx.num_errors());
        if warnings > 0 || errors > 0 {
            ctx.publish(EvaluationEvent::warning(
                None,
                None,
                format!(
                    "Finished graph evaluation Warning(s): {} Error(s): {}",
                    warnings, errors
                ),
            ));
        }
        ctx.publish(EvaluationEvent::info(
            None,
            None,
            format!("Evaluation time: {}", format_elapsed(timer.elapsed())),
        ));
    }

    /// True when a bound terminal has not been written since its inputs last
    /// changed.
    pub fn is_graph_dirty(&self, ctx: &EvaluationContext) -> bool {
        ctx.graph().terminal_nodes().any(|terminal| {
            match (
                ctx.terminal_last_modified(terminal.id),
                ctx.graph().node_timestamp(terminal.id),
            ) {
                (Some(last_modified), Ok(stamp)) => last_modified.is_older_than(stamp),
                _ => false,
            }
        })
    }
}
