mod common;

use common::{bind_recording_sink, fixture, record_events};
use dataflow::evaluation::{
    EvaluationEvent, EvaluationMode, EvaluationScheduler, EvaluationSettings, EvaluationStatus,
    FnEvaluator, NodeContext,
};
use dataflow::model::{GraphNode, PinValue};

#[test]
fn test_automatic_mode_evaluates_after_invalidation() {
    let mut f = fixture(EvaluationSettings::default());
    let writes = bind_recording_sink(&mut f.ctx, f.terminal);
    let events = record_events(&mut f.ctx);
    let mut scheduler = EvaluationScheduler::new(EvaluationMode::Automatic);

    scheduler.invalidate(&mut f.ctx, f.source).unwrap();
    assert!(scheduler.is_queued(f.terminal));
    assert!(scheduler.is_graph_dirty(&f.ctx));

    assert_eq!(scheduler.tick(&mut f.ctx), 1);
    assert_eq!(scheduler.num_queued(), 0);
    assert_eq!(writes.borrow().len(), 1);
    assert!(!scheduler.is_graph_dirty(&f.ctx));
    assert!(events.borrow().iter().any(|e| matches!(
        e,
        EvaluationEvent::Info { message, .. } if message.starts_with("Evaluation time")
    )));

    // Nothing queued, nothing to do.
    assert_eq!(scheduler.tick(&mut f.ctx), 0);
}

#[test]
fn test_manual_mode_waits_for_explicit_request() {
    let mut f = fixture(EvaluationSettings::default());
    let writes = bind_recording_sink(&mut f.ctx, f.terminal);
    let mut scheduler = EvaluationScheduler::new(EvaluationMode::Manual);

    scheduler.invalidate(&mut f.ctx, f.source).unwrap();
    assert!(!scheduler.is_queued(f.terminal));
    assert_eq!(scheduler.tick(&mut f.ctx), 0);
    assert!(writes.borrow().is_empty());
    assert!(scheduler.is_graph_dirty(&f.ctx));

    let status = scheduler
        .request_evaluation(&mut f.ctx, f.terminal, None)
        .unwrap();
    assert!(matches!(status, Some(EvaluationStatus::Completed(_))));
    assert_eq!(writes.borrow().len(), 1);
    assert!(!scheduler.is_graph_dirty(&f.ctx));
}

#[test]
fn test_explicit_terminal_request_ignored_in_automatic_mode() {
    let mut f = fixture(EvaluationSettings::default());
    let mut scheduler = EvaluationScheduler::new(EvaluationMode::Automatic);

    let status = scheduler
        .request_evaluation(&mut f.ctx, f.terminal, None)
        .unwrap();
    assert!(status.is_none());

    let status = scheduler
        .request_evaluation(&mut f.ctx, f.doubled, Some("value"))
        .unwrap();
    match status {
        Some(EvaluationStatus::Completed(outcome)) => {
            assert_eq!(outcome.value("value"), Some(&PinValue::Scalar(6.0)));
        }
        other => panic!("unexpected status {:?}", other),
    }
}

#[test]
fn test_inactive_terminals_are_skipped() {
    let mut f = fixture(EvaluationSettings::default());
    let writes = bind_recording_sink(&mut f.ctx, f.terminal);
    f.ctx.graph_mut().set_active(f.terminal, false).unwrap();
    let mut scheduler = EvaluationScheduler::new(EvaluationMode::Automatic);

    scheduler.invalidate(&mut f.ctx, f.source).unwrap();
    assert!(!scheduler.is_queued(f.terminal));

    scheduler.evaluate_graph(&f.ctx);
    assert_eq!(scheduler.tick(&mut f.ctx), 0);
    assert!(writes.borrow().is_empty());
}

#[test]
fn test_switching_to_automatic_evaluates_whole_graph() {
    let mut f = fixture(EvaluationSettings::default());
    let writes = bind_recording_sink(&mut f.ctx, f.terminal);
    let mut scheduler = EvaluationScheduler::new(EvaluationMode::Manual);

    scheduler.set_mode(&f.ctx, EvaluationMode::Automatic);
    assert_eq!(scheduler.mode(), EvaluationMode::Automatic);
    assert!(scheduler.is_queued(f.terminal));

    scheduler.tick(&mut f.ctx);
    assert_eq!(writes.borrow().len(), 1);
}

#[test]
fn test_tick_completes_threaded_evaluations() {
    let mut f = fixture(EvaluationSettings {
        threaded: true,
        ..EvaluationSettings::default()
    });
    let writes = bind_recording_sink(&mut f.ctx, f.terminal);
    let mut scheduler = EvaluationScheduler::new(EvaluationMode::Automatic);

    scheduler.evaluate_graph(&f.ctx);
    assert_eq!(scheduler.tick(&mut f.ctx), 1);
    assert!(writes.borrow().is_empty());

    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    while f.ctx.has_pending_evaluations() {
        assert!(std::time::Instant::now() < deadline, "evaluation did not finish in time");
        std::thread::sleep(std::time::Duration::from_millis(1));
        scheduler.tick(&mut f.ctx);
    }
    assert_eq!(writes.borrow().len(), 1);
}

#[test]
fn test_run_summary_counts_only_the_current_run() {
    let mut f = fixture(EvaluationSettings::default());
    f.ctx
        .registry_mut()
        .register(FnEvaluator::new("test.noisy", |ctx: &mut NodeContext| {
            ctx.warning("approximated");
            Ok(PinValue::Scalar(1.0))
        }));
    f.ctx
        .graph_mut()
        .add_node(GraphNode::terminal("noisy", "test.noisy").with_output("value"));
    f.ctx
        .graph_mut()
        .add_node(GraphNode::terminal("broken", "test.missing").with_output("value"));
    let events = record_events(&mut f.ctx);
    let mut scheduler = EvaluationScheduler::new(EvaluationMode::Automatic);

    scheduler.evaluate_graph(&f.ctx);
    assert_eq!(scheduler.tick(&mut f.ctx), 3);
    assert!(events.borrow().iter().any(|e| matches!(
        e,
        EvaluationEvent::Warning { message, .. }
            if message == "Finished graph evaluation Warning(s): 1 Error(s): 1"
    )));

    events.borrow_mut().clear();
    scheduler.invalidate(&mut f.ctx, f.source).unwrap();
    assert_eq!(scheduler.tick(&mut f.ctx), 1);
    assert_eq!(f.ctx.num_warnings(), 0);
    assert_eq!(f.ctx.num_errors(), 0);
    assert!(!events.borrow().iter().any(|e| e.is_warning()));
    assert!(events.borrow().iter().any(|e| matches!(
        e,
        EvaluationEvent::Info { message, .. } if message.starts_with("Evaluation time")
    )));
}
