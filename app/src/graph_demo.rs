use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use dataflow::evaluation::{
    EvaluationContext, EvaluationMode, EvaluationScheduler, EvaluatorRegistry, TerminalSink,
};
use dataflow::model::{Graph, GraphNode, PinId, PinValue};
use dataflow::DataflowError;
use log::info;
use uuid::Uuid;

use crate::config::EvaluationSection;

/// Stand-in for the asset a terminal writes to.
#[derive(Clone, Default)]
pub struct InMemoryAsset {
    contents: Rc<RefCell<BTreeMap<String, PinValue>>>,
    revisions: Rc<RefCell<usize>>,
}

impl InMemoryAsset {
    pub fn value(&self, output: &str) -> Option<PinValue> {
        self.contents.borrow().get(output).cloned()
    }

    pub fn revisions(&self) -> usize {
        *self.revisions.borrow()
    }
}

impl TerminalSink for InMemoryAsset {
    fn write(
        &mut self,
        node_id: Uuid,
        values: &BTreeMap<String, PinValue>,
    ) -> Result<(), DataflowError> {
        *self.contents.borrow_mut() = values.clone();
        *self.revisions.borrow_mut() += 1;
        info!("Asset of terminal {} updated: {:?}", node_id, values);
        Ok(())
    }
}

struct DemoGraph {
    a: Uuid,
    sum: Uuid,
    asset_node: Uuid,
}

/// a + b -> * 10 -> asset
fn build_graph() -> Result<(Graph, DemoGraph)> {
    let mut graph = Graph::new();
    let a = graph.add_node(
        GraphNode::new("a", "value.constant")
            .with_output("value")
            .with_property("value", PinValue::Scalar(2.0)),
    );
    let b = graph.add_node(
        GraphNode::new("b", "value.constant")
            .with_output("value")
            .with_property("value", PinValue::Scalar(3.0)),
    );
    let sum = graph.add_node(
        GraphNode::new("sum", "math.add")
            .with_input("a")
            .with_input("b")
            .with_output("value"),
    );
    let scaled = graph.add_node(
        GraphNode::new("scaled", "math.multiply")
            .with_input("a")
            .with_input("b")
            .with_output("value")
            .with_property("b", PinValue::Scalar(10.0)),
    );
    let asset_node = graph.add_node(
        GraphNode::terminal("asset", "passthrough")
            .with_input("value")
            .with_output("value"),
    );

    graph.connect(PinId::new(a, "value"), PinId::new(sum, "a"))?;
    graph.connect(PinId::new(b, "value"), PinId::new(sum, "b"))?;
    graph.connect(PinId::new(sum, "value"), PinId::new(scaled, "a"))?;
    graph.connect(PinId::new(scaled, "value"), PinId::new(asset_node, "value"))?;

    Ok((graph, DemoGraph { a, sum, asset_node }))
}

/// Evaluate the terminal the way the configured mode would, then wait for
/// any threaded work to land.
fn settle(
    scheduler: &mut EvaluationScheduler,
    ctx: &mut EvaluationContext,
    terminal: Uuid,
) -> Result<()> {
    if scheduler.mode() == EvaluationMode::Manual {
        scheduler.request_evaluation(ctx, terminal, None)?;
    }
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        scheduler.tick(ctx);
        if scheduler.num_queued() == 0 && !ctx.has_pending_evaluations() {
            return Ok(());
        }
        if Instant::now() > deadline {
            return Err(anyhow!("graph evaluation did not finish within 10 s"));
        }
        thread::sleep(Duration::from_millis(1));
    }
}

fn set_a(
    scheduler: &mut EvaluationScheduler,
    ctx: &mut EvaluationContext,
    demo: &DemoGraph,
    value: f64,
) -> Result<()> {
    ctx.graph_mut()
        .set_property(demo.a, "value", PinValue::Scalar(value))?;
    scheduler.on_node_invalidated(ctx, demo.a);
    Ok(())
}

pub fn run(section: &EvaluationSection) -> Result<()> {
    let (graph, demo) = build_graph()?;
    info!("Demo graph:\n{}", graph.save()?);

    let mut ctx = EvaluationContext::new(
        graph,
        EvaluatorRegistry::with_default_evaluators(),
        section.settings(),
    );
    let asset = InMemoryAsset::default();
    ctx.bind_terminal(demo.asset_node, asset.clone())?;

    let mut scheduler = EvaluationScheduler::new(section.mode);
    scheduler.evaluate_graph(&ctx);
    settle(&mut scheduler, &mut ctx, demo.asset_node)?;
    info!("Asset value: {:?}", asset.value("value"));

    set_a(&mut scheduler, &mut ctx, &demo, 5.0)?;
    settle(&mut scheduler, &mut ctx, demo.asset_node)?;
    info!("After a = 5: {:?}", asset.value("value"));

    ctx.freeze(demo.sum)?;
    set_a(&mut scheduler, &mut ctx, &demo, 100.0)?;
    settle(&mut scheduler, &mut ctx, demo.asset_node)?;
    info!(
        "With sum frozen, a = 100 leaves the asset at {:?} (graph dirty: {})",
        asset.value("value"),
        scheduler.is_graph_dirty(&ctx)
    );

    ctx.refreeze(demo.sum)?;
    scheduler.on_node_invalidated(&ctx, demo.sum);
    settle(&mut scheduler, &mut ctx, demo.asset_node)?;
    info!("After refreeze: {:?}", asset.value("value"));

    ctx.unfreeze(demo.sum)?;
    info!(
        "Asset written {} time(s); {} warning(s), {} error(s)",
        asset.revisions(),
        ctx.num_warnings(),
        ctx.num_errors()
    );
    Ok(())
}
