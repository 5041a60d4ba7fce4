//! Evaluation context: owns the graph, the output cache and in-flight
//! asynchronous evaluations, and is the single entry point for evaluating
//! node outputs.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use uuid::Uuid;

use super::evaluator::EvaluatorRegistry;
use super::events::{EvaluationEvent, EventBus};
use super::output_cache::{FrozenOutputs, OutputCache};
use super::plan::{EvaluationPlan, PlanOutcome};
use super::settings::EvaluationSettings;
use super::terminal::{TerminalBinding, TerminalSink};
use super::worker::{CancellationToken, PlanWorker, WorkerPoll};
use crate::error::DataflowError;
use crate::model::{Graph, PinId, PinValue, Timestamp};
use crate::util::observers::SubscriptionId;
use crate::util::timing::measure_debug;

/// Called on the controlling thread once an evaluation has completed.
pub type CompletionCallback = Box<dyn FnOnce(&EvaluationOutcome)>;

/// Summary of one finished `evaluate` call.
#[derive(Clone, Debug)]
pub struct EvaluationOutcome {
    pub node_id: Uuid,
    /// The requested output, `None` when every output was requested.
    pub output: Option<String>,
    /// Values of the requested outputs that are available.
    pub values: BTreeMap<String, PinValue>,
    /// Number of `(node, output)` pairs actually computed.
    pub computed: usize,
    /// Number of outputs that failed or were skipped.
    pub failed: usize,
    pub terminal_written: bool,
    pub elapsed: Duration,
}

impl EvaluationOutcome {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    pub fn value(&self, output: &str) -> Option<&PinValue> {
        self.values.get(output)
    }
}

#[derive(Debug)]
pub enum EvaluationStatus {
    /// Evaluated inline.
    Completed(EvaluationOutcome),
    /// Handed to a worker; completes on a later `poll`.
    Pending,
    /// Folded into an evaluation already in flight for the same node.
    Coalesced,
    /// Graph evaluation is switched off.
    Disabled,
}

struct AsyncEvaluation {
    output: Option<String>,
    targets: Vec<PinId>,
    stamp: Timestamp,
    started: Instant,
    worker: Option<PlanWorker>,
    ready: Option<PlanOutcome>,
    callbacks: Vec<CompletionCallback>,
    /// Set when another request arrived while this one was running. Holds the
    /// outputs to re-check, `None` meaning all of them.
    recheck: Option<Option<String>>,
    recheck_callbacks: Vec<CompletionCallback>,
}

impl AsyncEvaluation {
    fn coalesce(&mut self, output: Option<&str>, on_complete: Option<CompletionCallback>) {
        let requested = output.map(str::to_string);
        self.recheck = Some(match self.recheck.take() {
            None => requested,
            Some(previous) if previous == requested => previous,
            // Different outputs were asked for; widen to the whole node.
            Some(_) => None,
        });
        self.recheck_callbacks.extend(on_complete);
    }

    fn poll_worker(&mut self) -> bool {
        if self.ready.is_none() {
            if let Some(worker) = self.worker.as_mut() {
                match worker.try_result() {
                    WorkerPoll::Pending => {}
                    WorkerPoll::Done(outcome) => self.ready = Some(outcome),
                    WorkerPoll::Lost => self.ready = Some(PlanOutcome::lost(&self.targets)),
                }
            }
        }
        self.ready.is_some()
    }
}

pub struct EvaluationContext {
    graph: Graph,
    registry: EvaluatorRegistry,
    settings: EvaluationSettings,
    pub(crate) cache: OutputCache,
    pub(crate) frozen: HashMap<Uuid, FrozenOutputs>,
    events: EventBus,
    terminals: HashMap<Uuid, TerminalBinding>,
    in_flight: HashMap<Uuid, AsyncEvaluation>,
}

impl EvaluationContext {
    pub fn new(graph: Graph, registry: EvaluatorRegistry, settings: EvaluationSettings) -> Self {
        Self {
            graph,
            registry,
            settings,
            cache: OutputCache::default(),
            frozen: HashMap::new(),
            events: EventBus::new(),
            terminals: HashMap::new(),
            in_flight: HashMap::new(),
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Mutable access for topology and property edits. Edits invalidate the
    /// affected nodes through the graph's own operations.
    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    pub fn registry_mut(&mut self) -> &mut EvaluatorRegistry {
        &mut self.registry
    }

    pub fn settings(&self) -> EvaluationSettings {
        self.settings
    }

    pub fn invalidate(&mut self, node_id: Uuid) -> Result<Timestamp, DataflowError> {
        self.graph.invalidate(node_id)
    }

    pub fn subscribe(
        &mut self,
        callback: impl FnMut(&EvaluationEvent) + 'static,
    ) -> SubscriptionId {
        self.events.subscribe(callback)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    pub(crate) fn publish(&mut self, event: EvaluationEvent) {
        self.events.publish(event);
    }

    pub fn num_warnings(&self) -> usize {
        self.events.num_warnings()
    }

    pub fn num_errors(&self) -> usize {
        self.events.num_errors()
    }

    pub fn reset_counters(&mut self) {
        self.events.reset_counters();
    }

    /// Switch between inline and worker-thread evaluation. Turning threading
    /// off cancels whatever is still in flight.
    pub fn set_threaded(&mut self, threaded: bool) {
        if self.settings.threaded && !threaded {
            self.cancel_async_evaluation();
        }
        self.settings.threaded = threaded;
    }

    /// Record per-step timings as info events.
    pub fn set_perf_data(&mut self, enabled: bool) {
        self.settings.perf_data = enabled;
    }

    pub fn set_enable_graph_eval(&mut self, enabled: bool) {
        self.settings.enable_graph_eval = enabled;
    }

    /// Attach the external destination of a terminal node.
    pub fn bind_terminal(
        &mut self,
        node_id: Uuid,
        sink: impl TerminalSink + 'static,
    ) -> Result<(), DataflowError> {
        let node = self.graph.require_node(node_id)?;
        if !node.is_terminal() {
            return Err(DataflowError::NotTerminal(node_id));
        }
        self.terminals
            .insert(node_id, TerminalBinding::new(Box::new(sink)));
        Ok(())
    }

    pub fn unbind_terminal(&mut self, node_id: Uuid) -> bool {
        self.terminals.remove(&node_id).is_some()
    }

    /// Dependency timestamp the bound sink was last written at.
    pub fn terminal_last_modified(&self, node_id: Uuid) -> Option<Timestamp> {
        self.terminals.get(&node_id).map(|b| b.last_modified)
    }

    /// Evaluate one output of a node, or all of them when `output` is `None`.
    ///
    /// In threaded mode the work runs on a worker and completes, including the
    /// terminal write and `on_complete`, on a later [`poll`](Self::poll).
    pub fn evaluate(
        &mut self,
        node_id: Uuid,
        output: Option<&str>,
        on_complete: Option<CompletionCallback>,
    ) -> Result<EvaluationStatus, DataflowError> {
        if !self.settings.enable_graph_eval {
            debug!("Graph evaluation disabled; ignoring request for {}", node_id);
            return Ok(EvaluationStatus::Disabled);
        }
        let targets = self.plan_targets(node_id, output)?;

        if let Some(pending) = self.in_flight.get_mut(&node_id) {
            debug!("Coalescing evaluation request for {}", node_id);
            pending.coalesce(output, on_complete);
            return Ok(EvaluationStatus::Coalesced);
        }

        if self.settings.threaded {
            self.start_async(node_id, output, targets, on_complete.into_iter().collect())?;
            Ok(EvaluationStatus::Pending)
        } else {
            let result = self.evaluate_inline(node_id, output, targets)?;
            if let Some(callback) = on_complete {
                callback(&result);
            }
            Ok(EvaluationStatus::Completed(result))
        }
    }

    /// Evaluate on the calling thread regardless of the threading setting.
    pub(crate) fn evaluate_now(
        &mut self,
        node_id: Uuid,
        output: Option<&str>,
    ) -> Result<EvaluationOutcome, DataflowError> {
        let targets = self.plan_targets(node_id, output)?;
        self.evaluate_inline(node_id, output, targets)
    }

    /// Targets for an evaluation request. A bound terminal that is behind
    /// its inputs is written as a whole, so the request widens to every output.
    fn plan_targets(
        &self,
        node_id: Uuid,
        output: Option<&str>,
    ) -> Result<Vec<PinId>, DataflowError> {
        let targets = self.targets(node_id, output)?;
        if output.is_none() {
            return Ok(targets);
        }
        let Some(binding) = self.terminals.get(&node_id) else {
            return Ok(targets);
        };
        if binding.last_modified.is_older_than(self.graph.node_timestamp(node_id)?) {
            debug!("Terminal {} is stale; evaluating all of its outputs", node_id);
            return self.targets(node_id, None);
        }
        Ok(targets)
    }

    fn targets(&self, node_id: Uuid, output: Option<&str>) -> Result<Vec<PinId>, DataflowError> {
        let node = self.graph.require_node(node_id)?;
        match output {
            Some(name) => {
                if node.output(name).is_none() {
                    return Err(DataflowError::PinNotFound {
                        node: node_id,
                        pin: name.to_string(),
                    });
                }
                Ok(vec![PinId::new(node_id, name)])
            }
            None => Ok(node.output_names().map(|o| PinId::new(node_id, o)).collect()),
        }
    }

    fn evaluate_inline(
        &mut self,
        node_id: Uuid,
        output: Option<&str>,
        targets: Vec<PinId>,
    ) -> Result<EvaluationOutcome, DataflowError> {
        let started = Instant::now();
        let stamp = self.graph.node_timestamp(node_id)?;
        let plan = measure_debug("Planning evaluation", || {
            EvaluationPlan::build(&self.graph, &self.registry, &self.cache, &self.frozen, targets)
        })?
        .with_perf_data(self.settings.perf_data);
        debug!("Evaluating {} inline: {} step(s)", node_id, plan.len());

        let events = &mut self.events;
        let outcome = plan.execute(&CancellationToken::new(), &mut |event| events.publish(event));
        Ok(self.complete(node_id, output.map(str::to_string), stamp, outcome, started))
    }

    fn start_async(
        &mut self,
        node_id: Uuid,
        output: Option<&str>,
        targets: Vec<PinId>,
        callbacks: Vec<CompletionCallback>,
    ) -> Result<(), DataflowError> {
        let started = Instant::now();
        let stamp = self.graph.node_timestamp(node_id)?;
        let plan = EvaluationPlan::build(
            &self.graph,
            &self.registry,
            &self.cache,
            &self.frozen,
            targets.clone(),
        )?
        .with_perf_data(self.settings.perf_data);

        let (worker, ready) = if plan.is_empty() {
            (None, Some(plan.execute_buffered(&CancellationToken::new())))
        } else {
            debug!("Evaluating {} on a worker: {} step(s)", node_id, plan.len());
            let label = node_id.simple().to_string();
            (Some(PlanWorker::spawn(plan, &label[..8])?), None)
        };

        self.in_flight.insert(
            node_id,
            AsyncEvaluation {
                output: output.map(str::to_string),
                targets,
                stamp,
                started,
                worker,
                ready,
                callbacks,
                recheck: None,
                recheck_callbacks: Vec::new(),
            },
        );
        Ok(())
    }

    /// Complete every asynchronous evaluation whose worker has finished.
    /// Returns how many completed.
    pub fn poll(&mut self) -> usize {
        let finished: Vec<Uuid> = self
            .in_flight
            .iter_mut()
            .filter_map(|(id, pending)| pending.poll_worker().then_some(*id))
            .collect();

        for node_id in &finished {
            let Some(mut pending) = self.in_flight.remove(node_id) else {
                continue;
            };
            let Some(outcome) = pending.ready.take() else {
                continue;
            };
            let output = pending.output.take();
            let result = self.complete(*node_id, output, pending.stamp, outcome, pending.started);
            for callback in pending.callbacks {
                callback(&result);
            }

            if let Some(output) = pending.recheck {
                let callbacks = pending.recheck_callbacks;
                let reissued = self
                    .plan_targets(*node_id, output.as_deref())
                    .and_then(|targets| {
                        self.start_async(*node_id, output.as_deref(), targets, callbacks)
                    });
                if let Err(e) = reissued {
                    self.events.publish(EvaluationEvent::error(
                        Some(*node_id),
                        output.as_deref(),
                        format!("Re-check after coalesced request failed: {}", e),
                    ));
                }
            }
        }
        finished.len()
    }

    pub fn has_pending_evaluations(&self) -> bool {
        !self.in_flight.is_empty()
    }

    pub fn is_evaluation_pending(&self, node_id: Uuid) -> bool {
        self.in_flight.contains_key(&node_id)
    }

    /// Signal every worker to stop and forget their results. Neither terminal
    /// writes nor completion callbacks run for cancelled work.
    pub fn cancel_async_evaluation(&mut self) -> usize {
        let count = self.in_flight.len();
        for (node_id, pending) in self.in_flight.drain() {
            if let Some(worker) = &pending.worker {
                worker.cancel();
            }
            debug!("Cancelled asynchronous evaluation of {}", node_id);
        }
        if count > 0 {
            info!("Cancelled {} asynchronous evaluation(s)", count);
        }
        count
    }

    fn complete(
        &mut self,
        node_id: Uuid,
        output: Option<String>,
        stamp: Timestamp,
        outcome: PlanOutcome,
        started: Instant,
    ) -> EvaluationOutcome {
        let PlanOutcome {
            produced,
            target_values,
            events,
            failed,
            computed,
            cancelled,
        } = outcome;
        for event in events {
            self.events.publish(event);
        }
        for (pin, value, produced_at) in produced {
            self.cache.store(pin, value, produced_at);
        }

        let values: BTreeMap<String, PinValue> = target_values
            .into_iter()
            .map(|(pin, value)| (pin.pin_name, value))
            .collect();

        let num_outputs = self
            .graph
            .get_node(node_id)
            .map_or(0, |node| node.output_names().count());
        let mut terminal_written = false;
        if failed.is_empty() && !cancelled {
            if let Some(binding) = self.terminals.get_mut(&node_id) {
                // Only a complete set of outputs may replace the sink's contents.
                if binding.last_modified.is_older_than(stamp) && values.len() == num_outputs {
                    match binding.sink.write(node_id, &values) {
                        Ok(()) => {
                            binding.last_modified = stamp;
                            terminal_written = true;
                            debug!("Terminal {} written at {:?}", node_id, stamp);
                        }
                        Err(e) => {
                            warn!("Terminal {} write failed", node_id);
                            self.events.publish(EvaluationEvent::error(
                                Some(node_id),
                                None,
                                format!("Terminal write failed: {}", e),
                            ));
                        }
                    }
                }
            }
        }

        EvaluationOutcome {
            node_id,
            output,
            values,
            computed,
            failed: failed.len(),
            terminal_written,
            elapsed: started.elapsed(),
        }
    }

    /// Value of an output as it currently stands, frozen pins first.
    pub fn output_value(&self, node_id: Uuid, output: &str) -> Option<&PinValue> {
        if let Some(frozen) = self.frozen.get(&node_id) {
            return frozen.values.get(output);
        }
        self.cache
            .get(&PinId::new(node_id, output))
            .map(|entry| &entry.value)
    }

    /// True when the output would be served without recomputation.
    pub fn is_output_fresh(&self, node_id: Uuid, output: &str) -> Result<bool, DataflowError> {
        if self.frozen.contains_key(&node_id) {
            return Ok(true);
        }
        let pin = PinId::new(node_id, output);
        let stamp = self.graph.output_timestamp(&pin)?;
        Ok(self.cache.fresh(&pin, stamp).is_some())
    }

    /// Drop every cached output. Frozen values are kept.
    pub fn clear_all_data(&mut self) {
        debug!("Clearing {} cached output(s)", self.cache.len());
        self.cache.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl Drop for EvaluationContext {
    fn drop(&mut self) {
        self.cancel_async_evaluation();
    }
}
