// End-to-end model scenarios over the page fixture and hand-built captures

use serde_json::json;
use std::path::PathBuf;
use tracemodel::call_tree::{group_by_category, id_by_name, TopDownQuery};
use tracemodel::filter::{EventFilter, FilterExpr};
use tracemodel::{
    CancelFlag, DiagnosticKind, EventId, ModelConfig, ModelError, PerformanceModel, Phase,
    RawEvent, ThreadKey, ThreadRole, ThreadSelector,
};

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn page_model() -> PerformanceModel {
    let text = std::fs::read_to_string(fixture("page.json")).unwrap();
    let mut model = PerformanceModel::new(ModelConfig::default());
    assert_eq!(model.add_trace_json(&text).unwrap(), 16);
    model.tracing_complete().unwrap();
    model
}

fn find_event(model: &PerformanceModel, name: &str) -> EventId {
    let index = model
        .trace_data()
        .events
        .iter()
        .position(|e| e.name == name)
        .unwrap();
    EventId(index)
}

fn by_name() -> TopDownQuery<'static> {
    TopDownQuery {
        id_fn: Some(&id_by_name),
        ..TopDownQuery::default()
    }
}

#[test]
fn test_page_session_and_threads() {
    let model = page_model();
    assert_eq!(model.session_id(), Some("s1"));
    assert_eq!(model.main_thread(), Some(ThreadKey::new(1, 1)));
    assert_eq!(model.minimum_record_time(), Some(0.0));
    assert_eq!(model.maximum_record_time(), Some(32.0));

    let compositor = model
        .threads()
        .find(|t| t.key == ThreadKey::new(1, 2))
        .unwrap();
    assert_eq!(compositor.name.as_deref(), Some("Compositor"));
    assert_eq!(compositor.role, ThreadRole::Compositor);
    assert_eq!(model.records(&ThreadSelector::Main).len(), 6);
    assert!(model.diagnostics().is_empty());
}

#[test]
fn test_page_frames() {
    let model = page_model();
    let frames = model.frames(None, None);
    assert_eq!(frames.len(), 2);
    assert_eq!((frames[0].start, frames[0].end), (0.0, 16.0));
    assert_eq!((frames[1].start, frames[1].end), (16.0, 32.0));
    assert_eq!(frames[0].time_by_category.get("rendering"), Some(&3.0));
    assert_eq!(frames[1].time_by_category.get("painting"), Some(&2.0));
    assert!(!model.frame_index().is_threaded());

    assert_eq!(model.frames(Some(20.0), Some(25.0)).len(), 1);
    assert!(model.frames(Some(40.0), None).is_empty());
}

#[test]
fn test_page_initiators_and_async_groups() {
    let model = page_model();
    let install = find_event(&model, "TimerInstall");
    let fire = find_event(&model, "TimerFire");
    assert_eq!(model.initiator_of(fire), Some(install));
    assert_eq!(model.effects_of(install), &[fire]);

    assert_eq!(model.async_group_names(), vec!["network"]);
    let requests = model.async_events("network");
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].name, "URLRequest");
    assert_eq!(requests[0].start, 0.5);
    assert_eq!(requests[0].end, Some(30.0));
}

#[test]
fn test_page_call_trees() {
    let model = page_model();
    let top_down = model.build_top_down_tree(&ThreadSelector::Main, &by_name());
    let run_task = top_down.find_path(&["RunTask"]).unwrap();
    assert_eq!(run_task.total_time, 15.0);
    assert_eq!(run_task.self_time, 5.0);
    assert_eq!(top_down.find_path(&["RunTask", "Layout"]).unwrap().total_time, 3.0);
    assert!(top_down.find_path(&["RunTask", "TimerInstall"]).is_none());
    assert_eq!(top_down.root().total_time, 15.0);

    let bottom_up = model.build_bottom_up_tree(&top_down, None);
    let paint = bottom_up.find_path(&["Paint", "RunTask"]).unwrap();
    assert_eq!(paint.self_time, 2.0);

    let group = group_by_category(model.config().category_map());
    let grouped = model.build_bottom_up_tree(&top_down, Some(&group));
    let scripting = grouped.find_path(&["group:scripting"]).unwrap();
    assert!(scripting.is_group);
    assert_eq!(scripting.self_time, 5.0);
}

#[test]
fn test_page_filters_and_windows() {
    let model = page_model();
    let categories = model.config().category_map();
    let filters: Vec<Box<dyn EventFilter>> = vec![FilterExpr::from_expr("!toplevel")
        .unwrap()
        .into_filter(&categories)];
    let query = TopDownQuery {
        filters: &filters,
        ..by_name()
    };
    let tree = model.build_top_down_tree(&ThreadSelector::Main, &query);
    assert!(tree.find_path(&["RunTask"]).is_none());
    assert_eq!(tree.find_path(&["FunctionCall"]).unwrap().total_time, 4.0);
    assert_eq!(tree.root().total_time, 10.0);

    let window = TopDownQuery {
        start: 16.0,
        end: 32.0,
        ..by_name()
    };
    let tree = model.build_top_down_tree(&ThreadSelector::All, &window);
    assert_eq!(tree.find_path(&["RunTask"]).unwrap().total_time, 5.0);
    assert!(tree.find_path(&["RunTask", "Layout"]).is_none());
}

#[test]
fn test_style_invalidation_attributed_through_model() {
    let main = |e: RawEvent| e.with_thread(1, 1);
    let mut model = PerformanceModel::new(ModelConfig::default());
    model
        .add_events(vec![
            main(RawEvent::instant("TracingStartedInPage", 0.0)),
            main(RawEvent::instant("StyleRecalcInvalidationTracking", 1.0).with_args(json!({
                "data": {"frame": "F", "nodeId": 11, "reason": "Class changed"}
            }))),
            main(
                RawEvent::complete("RecalculateStyles", 2.0, 3.0)
                    .with_args(json!({"beginData": {"frame": "F"}})),
            ),
        ])
        .unwrap();
    model.tracing_complete().unwrap();

    let recalc = EventId(2);
    let attributed = model.invalidations_for(recalc);
    assert_eq!(attributed.len(), 1);
    let (id, invalidation) = attributed[0];
    assert_eq!(invalidation.node_id, Some(11));
    assert_eq!(invalidation.cause.reason.as_deref(), Some("Class changed"));
    assert_eq!(model.invalidation(id), Some(invalidation));
}

#[test]
fn test_unterminated_events_and_diagnostics() {
    let mut model = PerformanceModel::new(ModelConfig::default());
    model
        .add_trace_json(
            r#"[
                {"name": "Task", "ph": "B", "ts": 0, "pid": 1, "tid": 1},
                {"name": "Inner", "ph": "X", "ts": 1000, "dur": 2000, "pid": 1, "tid": 1},
                {"name": "Stray", "ph": "E", "ts": 4000, "pid": 1, "tid": 1},
                {"ph": "X", "ts": 5000, "pid": 1, "tid": 1},
                {"name": "Late", "ph": "X", "ts": 9000, "dur": 1000, "pid": 1, "tid": 1}
            ]"#,
        )
        .unwrap();
    model.tracing_complete().unwrap();

    let diags = model.diagnostics();
    assert_eq!(diags.count(DiagnosticKind::MalformedEvent), 1);
    assert!(diags.count(DiagnosticKind::ConsistencyViolation) >= 1);

    // The open begin event runs to the end of the capture
    let roots = model.records(&ThreadSelector::Key(ThreadKey::new(1, 1)));
    assert_eq!(roots.len(), 1);
    let task = model.record(roots[0]);
    assert_eq!(task.name, "Task");
    assert_eq!(task.end, 10.0);
    assert_eq!(task.children.len(), 2);
}

#[test]
fn test_cancel_then_rebuild() {
    let text = std::fs::read_to_string(fixture("page.json")).unwrap();
    let mut model = PerformanceModel::new(ModelConfig::default());
    model.add_trace_json(&text).unwrap();
    let cancel = CancelFlag::new();
    cancel.cancel();
    assert!(matches!(
        model.tracing_complete_with(&cancel),
        Err(ModelError::Cancelled(_))
    ));
    assert!(!model.is_complete());

    model.add_trace_json(&text).unwrap();
    model.tracing_complete().unwrap();
    assert_eq!(model.frames(None, None).len(), 2);
}

#[test]
fn test_invalid_times_in_batch_dropped() {
    let main = |e: RawEvent| e.with_thread(1, 1);
    let mut model = PerformanceModel::new(ModelConfig::default());
    model
        .add_events(vec![
            main(RawEvent::complete("A", 0.0, 10.0)),
            main(RawEvent::complete("Bad", f64::NAN, 3.0)),
            main(RawEvent::complete("Neg", 2.0, -5.0)),
        ])
        .unwrap();
    model.tracing_complete().unwrap();

    assert_eq!(model.diagnostics().count(DiagnosticKind::MalformedEvent), 2);
    let roots = model.records(&ThreadSelector::Key(ThreadKey::new(1, 1)));
    assert_eq!(roots.len(), 1);
    let a = model.record(roots[0]);
    assert_eq!(a.name, "A");
    assert_eq!(a.self_time, 10.0);
    assert!(a.children.is_empty());
    for (_, record) in model.record_tree().iter() {
        assert!(record.start.is_finite() && record.end.is_finite());
        assert!(record.self_time >= 0.0);
    }
    assert_eq!(model.minimum_record_time(), Some(0.0));
    assert_eq!(model.maximum_record_time(), Some(10.0));
}

#[test]
fn test_deeply_nested_open_begins() {
    const DEPTH: usize = 100_000;
    let mut events: Vec<RawEvent> = (0..DEPTH)
        .map(|i| RawEvent::new("Task", Phase::Begin, i as f64).with_thread(1, 1))
        .collect();
    events.push(RawEvent::complete("Flush", DEPTH as f64, 10.0).with_thread(1, 1));
    let mut model = PerformanceModel::new(ModelConfig::default());
    model.add_events(events).unwrap();
    model.tracing_complete().unwrap();

    let roots = model.records(&ThreadSelector::Key(ThreadKey::new(1, 1)));
    assert_eq!(roots.len(), 1);
    let outer = model.record(roots[0]);
    assert_eq!(outer.end, (DEPTH + 10) as f64);
    assert_eq!(model.record_tree().descendants(roots[0]).len(), DEPTH + 1);

    let tree = model.build_top_down_tree(&ThreadSelector::All, &by_name());
    assert_eq!(tree.len(), DEPTH + 2);
    assert_eq!(tree.root().total_time, (DEPTH + 10) as f64);
}
