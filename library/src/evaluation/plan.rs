//! Evaluation plans.
//!
//! A plan is the ordered list of `(node, output)` computations needed to bring
//! a set of target outputs up to date. It is built on the controlling thread
//! against the current graph and caches, then executed either inline or on a
//! worker. Everything a step needs is captured by value so execution never
//! touches the graph.

use std::collections::{HashMap, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use uuid::Uuid;

use super::evaluator::{Diagnostic, EvaluatorRegistry, NodeContext, NodeEvaluator};
use super::events::EvaluationEvent;
use super::output_cache::{FrozenOutputs, OutputCache};
use super::worker::CancellationToken;
use crate::error::{DataflowError, panic_message};
use crate::model::{Graph, PinId, PinValue, PropertyMap, Timestamp};
use crate::util::timing::{ScopedTimer, format_elapsed};

pub(crate) struct PlanStep {
    node_id: Uuid,
    node_name: String,
    type_id: String,
    output: String,
    evaluator: Arc<dyn NodeEvaluator>,
    properties: PropertyMap,
    /// Input name and the upstream output feeding it, if connected.
    inputs: Vec<(String, Option<PinId>)>,
    /// Dependency timestamp observed when the plan was built.
    stamp: Timestamp,
}

pub(crate) struct EvaluationPlan {
    targets: Vec<PinId>,
    seeds: HashMap<PinId, PinValue>,
    steps: Vec<PlanStep>,
    unresolved: Vec<(PinId, String)>,
    perf_data: bool,
}

/// Result of running a plan.
pub(crate) struct PlanOutcome {
    /// Freshly computed values with the stamp they were computed against.
    pub produced: Vec<(PinId, PinValue, Timestamp)>,
    /// Values of the target outputs that are available (computed or seeded).
    pub target_values: Vec<(PinId, PinValue)>,
    /// Events buffered by a worker; empty when emitted live.
    pub events: Vec<EvaluationEvent>,
    pub failed: Vec<PinId>,
    pub computed: usize,
    pub cancelled: bool,
}

impl PlanOutcome {
    /// Outcome for a worker that exited without reporting.
    pub fn lost(targets: &[PinId]) -> Self {
        let node = targets.first().map(|t| t.node_id);
        Self {
            produced: Vec::new(),
            target_values: Vec::new(),
            events: vec![EvaluationEvent::error(
                node,
                None,
                "Evaluation worker exited without a result",
            )],
            failed: targets.to_vec(),
            computed: 0,
            cancelled: false,
        }
    }
}

struct PlanBuilder<'a> {
    graph: &'a Graph,
    registry: &'a EvaluatorRegistry,
    cache: &'a OutputCache,
    frozen: &'a HashMap<Uuid, FrozenOutputs>,
    seeds: HashMap<PinId, PinValue>,
    steps: Vec<PlanStep>,
    unresolved: Vec<(PinId, String)>,
    planned: HashSet<PinId>,
    visiting: HashSet<PinId>,
}

impl<'a> PlanBuilder<'a> {
    fn is_known(&self, pin: &PinId) -> bool {
        self.planned.contains(pin)
            || self.seeds.contains_key(pin)
            || self.unresolved.iter().any(|(p, _)| p == pin)
    }

    fn visit(&mut self, pin: &PinId) -> Result<(), DataflowError> {
        if self.is_known(pin) {
            return Ok(());
        }
        let graph = self.graph;
        let node = graph.require_node(pin.node_id)?;

        // Frozen nodes are never computed, whatever their timestamp says.
        if let Some(frozen) = self.frozen.get(&node.id) {
            match frozen.values.get(&pin.pin_name) {
                Some(value) => {
                    self.seeds.insert(pin.clone(), value.clone());
                }
                None => self.unresolved.push((
                    pin.clone(),
                    format!("Frozen node '{}' has no value for '{}'", node.name, pin.pin_name),
                )),
            }
            return Ok(());
        }

        let slot = node.output(&pin.pin_name).ok_or_else(|| DataflowError::PinNotFound {
            node: pin.node_id,
            pin: pin.pin_name.clone(),
        })?;
        let stamp = graph.output_timestamp(pin)?;
        if let Some(value) = self.cache.fresh(pin, stamp) {
            self.seeds.insert(pin.clone(), value.clone());
            return Ok(());
        }

        if !self.visiting.insert(pin.clone()) {
            return Err(DataflowError::CycleDetected {
                from: pin.node_id,
                to: pin.node_id,
            });
        }
        let mut inputs = Vec::new();
        for input in node.inputs_for(slot) {
            let upstream = graph.find_upstream(node.id, input).cloned();
            if let Some(source) = &upstream {
                self.visit(source)?;
            }
            inputs.push((input.to_string(), upstream));
        }
        self.visiting.remove(pin);

        match self.registry.find(&node.type_id) {
            Some(evaluator) => {
                self.planned.insert(pin.clone());
                self.steps.push(PlanStep {
                    node_id: node.id,
                    node_name: node.name.clone(),
                    type_id: node.type_id.clone(),
                    output: pin.pin_name.clone(),
                    evaluator,
                    properties: node.properties.clone(),
                    inputs,
                    stamp,
                });
            }
            None => self.unresolved.push((
                pin.clone(),
                DataflowError::NoEvaluator(node.type_id.clone()).to_string(),
            )),
        }
        Ok(())
    }
}

impl EvaluationPlan {
    /// Plan the work needed to bring `targets` up to date.
    pub fn build(
        graph: &Graph,
        registry: &EvaluatorRegistry,
        cache: &OutputCache,
        frozen: &HashMap<Uuid, FrozenOutputs>,
        targets: Vec<PinId>,
    ) -> Result<Self, DataflowError> {
        let mut builder = PlanBuilder {
            graph,
            registry,
            cache,
            frozen,
            seeds: HashMap::new(),
            steps: Vec::new(),
            unresolved: Vec::new(),
            planned: HashSet::new(),
            visiting: HashSet::new(),
        };
        for target in &targets {
            builder.visit(target)?;
        }
        Ok(Self {
            targets,
            seeds: builder.seeds,
            steps: builder.steps,
            unresolved: builder.unresolved,
            perf_data: false,
        })
    }

    /// Report the elapsed time of each computed output as an info event.
    pub fn with_perf_data(mut self, enabled: bool) -> Self {
        self.perf_data = enabled;
        self
    }

    /// Number of outputs that will be computed.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every step in order. Events are handed to `emit` as they happen.
    ///
    /// A failing step only poisons the steps that read its output; unrelated
    /// steps still run. Cancellation is checked between steps.
    pub fn execute(
        self,
        cancel: &CancellationToken,
        emit: &mut dyn FnMut(EvaluationEvent),
    ) -> PlanOutcome {
        let mut values = self.seeds;
        let mut failed: HashSet<PinId> = HashSet::new();
        let mut produced = Vec::new();
        let mut computed = 0;
        let mut cancelled = false;

        for (pin, message) in self.unresolved {
            emit(EvaluationEvent::error(
                Some(pin.node_id),
                Some(&pin.pin_name),
                message,
            ));
            failed.insert(pin);
        }

        for step in self.steps {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let pin = PinId::new(step.node_id, &step.output);

            let poisoned = step
                .inputs
                .iter()
                .filter_map(|(_, source)| source.as_ref())
                .find(|source| failed.contains(*source));
            if let Some(source) = poisoned {
                emit(EvaluationEvent::warning(
                    Some(step.node_id),
                    Some(&step.output),
                    format!(
                        "Skipped {}.{}: upstream output {} failed",
                        step.node_name, step.output, source
                    ),
                ));
                failed.insert(pin);
                continue;
            }

            let inputs: HashMap<String, PinValue> = step
                .inputs
                .iter()
                .map(|(name, source)| {
                    let value = source
                        .as_ref()
                        .and_then(|s| values.get(s))
                        .cloned()
                        .unwrap_or_default();
                    (name.clone(), value)
                })
                .collect();

            emit(EvaluationEvent::BeginEvaluate {
                node: step.node_id,
                output: step.output.clone(),
            });

            let timer =
                ScopedTimer::debug_lazy(|| format!("{}.{}", step.node_name, step.output));
            let result = catch_unwind(AssertUnwindSafe(|| {
                let mut ctx = NodeContext::new(
                    step.node_id,
                    &step.node_name,
                    &step.type_id,
                    &step.output,
                    &inputs,
                    &step.properties,
                    cancel,
                );
                let value = step.evaluator.evaluate(&mut ctx);
                (value, ctx.take_diagnostics())
            }));

            let outcome = match result {
                Ok((value, diagnostics)) => {
                    for diagnostic in diagnostics {
                        emit(match diagnostic {
                            Diagnostic::Info(message) => EvaluationEvent::info(
                                Some(step.node_id),
                                Some(&step.output),
                                message,
                            ),
                            Diagnostic::Warning(message) => EvaluationEvent::warning(
                                Some(step.node_id),
                                Some(&step.output),
                                message,
                            ),
                        });
                    }
                    value.map_err(|e| e.to_string())
                }
                Err(payload) => Err(format!("panicked: {}", panic_message(payload.as_ref()))),
            };

            match outcome {
                Ok(value) => {
                    if self.perf_data {
                        emit(EvaluationEvent::info(
                            Some(step.node_id),
                            Some(&step.output),
                            format!(
                                "{}.{} evaluated in {}",
                                step.node_name,
                                step.output,
                                format_elapsed(timer.elapsed())
                            ),
                        ));
                    }
                    computed += 1;
                    produced.push((pin.clone(), value.clone(), step.stamp));
                    values.insert(pin, value);
                }
                Err(message) => {
                    let error = DataflowError::Evaluation {
                        node: step.node_name.clone(),
                        output: step.output.clone(),
                        message,
                    };
                    emit(EvaluationEvent::error(
                        Some(step.node_id),
                        Some(&step.output),
                        error.to_string(),
                    ));
                    failed.insert(pin);
                }
            }

            emit(EvaluationEvent::FinishEvaluate {
                node: step.node_id,
                output: step.output,
            });
        }

        let mut failed_targets = Vec::new();
        let mut target_values = Vec::new();
        for target in self.targets {
            match values.get(&target) {
                Some(value) => target_values.push((target, value.clone())),
                None => failed_targets.push(target),
            }
        }
        // Targets missing because of a cancel are not failures.
        let mut failed: Vec<PinId> = failed.into_iter().collect();
        if !cancelled {
            for target in failed_targets {
                if !failed.contains(&target) {
                    failed.push(target);
                }
            }
        }
        failed.sort();

        PlanOutcome {
            produced,
            target_values,
            events: Vec::new(),
            failed,
            computed,
            cancelled,
        }
    }

    /// Run the plan, collecting events into the outcome instead of emitting
    /// them.
    pub fn execute_buffered(self, cancel: &CancellationToken) -> PlanOutcome {
        let mut events = Vec::new();
        let mut outcome = self.execute(cancel, &mut |event| events.push(event));
        outcome.events = events;
        outcome
    }
}
