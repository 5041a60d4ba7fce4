#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dataflow::DataflowError;
use dataflow::evaluation::{
    EvaluationContext, EvaluationEvent, EvaluationSettings, EvaluatorRegistry, FnEvaluator,
    NodeContext,
};
use dataflow::model::{Graph, GraphNode, PinId, PinValue};
use uuid::Uuid;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub struct Fixture {
    pub ctx: EvaluationContext,
    pub source: Uuid,
    pub doubled: Uuid,
    pub terminal: Uuid,
    pub calls: Arc<AtomicUsize>,
}

/// constant(3) -> double -> terminal
pub fn fixture(settings: EvaluationSettings) -> Fixture {
    init_logger();
    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = EvaluatorRegistry::with_default_evaluators();
    let counter = Arc::clone(&calls);
    registry.register(FnEvaluator::new("test.double", move |ctx: &mut NodeContext| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(PinValue::Scalar(ctx.input("value").as_scalar(0.0) * 2.0))
    }));

    let mut graph = Graph::new();
    let source = graph.add_node(
        GraphNode::new("source", "value.constant")
            .with_output("value")
            .with_property("value", PinValue::Scalar(3.0)),
    );
    let doubled = graph.add_node(
        GraphNode::new("doubled", "test.double")
            .with_input("value")
            .with_output("value"),
    );
    let terminal = graph.add_node(
        GraphNode::terminal("asset", "passthrough")
            .with_input("value")
            .with_output("value"),
    );
    graph
        .connect(PinId::new(source, "value"), PinId::new(doubled, "value"))
        .unwrap();
    graph
        .connect(PinId::new(doubled, "value"), PinId::new(terminal, "value"))
        .unwrap();

    Fixture {
        ctx: EvaluationContext::new(graph, registry, settings),
        source,
        doubled,
        terminal,
        calls,
    }
}

pub fn record_events(ctx: &mut EvaluationContext) -> Rc<RefCell<Vec<EvaluationEvent>>> {
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    ctx.subscribe(move |event| sink.borrow_mut().push(event.clone()));
    events
}

pub type Writes = Rc<RefCell<Vec<BTreeMap<String, PinValue>>>>;

pub fn bind_recording_sink(ctx: &mut EvaluationContext, terminal: Uuid) -> Writes {
    let writes: Writes = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&writes);
    ctx.bind_terminal(
        terminal,
        move |_node: Uuid, values: &BTreeMap<String, PinValue>| -> Result<(), DataflowError> {
            sink.borrow_mut().push(values.clone());
            Ok(())
        },
    )
    .unwrap();
    writes
}
