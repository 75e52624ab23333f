//! Property-based tests for the model passes
//!
//! Properties covered:
//! 1. Record containment and self-time conservation
//! 2. Call tree self/total consistency and permutation invariance
//! 3. Frame partition and window queries in both frame models
//! 4. Code map lookups against a naive range list after adds and moves
//! 5. Deterministic async chains

use proptest::prelude::*;
use serde_json::json;
use tracemodel::call_tree::{id_by_name, ProfileNodeId, ProfileTree, TopDownQuery};
use tracemodel::code_map::CodeMap;
use tracemodel::event::CallFrame;
use tracemodel::hierarchy::{RecordKind, RecordTree};
use tracemodel::{ModelConfig, PerformanceModel, Phase, RawEvent, ThreadKey, ThreadSelector};

const EPSILON: f64 = 1e-6;

fn main_thread() -> ThreadSelector {
    ThreadSelector::Key(ThreadKey::new(1, 1))
}

fn build(events: Vec<RawEvent>) -> PerformanceModel {
    let mut model = PerformanceModel::new(ModelConfig::default());
    model.add_events(events).unwrap();
    model.tracing_complete().unwrap();
    model
}

fn complete_events() -> impl Strategy<Value = Vec<RawEvent>> {
    prop::collection::vec(
        (prop::sample::select(vec!["A", "B", "C"]), 0u32..1000, 0u32..300),
        1..40,
    )
    .prop_map(|specs| {
        specs
            .into_iter()
            .map(|(name, ts, dur)| {
                RawEvent::complete(name, f64::from(ts), f64::from(dur)).with_thread(1, 1)
            })
            .collect()
    })
}

/// (path, self, total) of every node, sorted
fn flatten(tree: &ProfileTree) -> Vec<(String, i64, i64)> {
    fn walk(
        tree: &ProfileTree,
        id: ProfileNodeId,
        path: &str,
        out: &mut Vec<(String, i64, i64)>,
    ) {
        for child in tree.children(id) {
            let node = tree.get(*child);
            let path = format!("{path}/{}", node.id);
            // Times are whole milliseconds in these tests; round away float noise
            out.push((
                path.clone(),
                (node.self_time * 1000.0).round() as i64,
                (node.total_time * 1000.0).round() as i64,
            ));
            walk(tree, *child, &path, out);
        }
    }
    let mut out = Vec::new();
    walk(tree, ProfileTree::ROOT, "", &mut out);
    out.sort();
    out
}

fn check_records(records: &RecordTree) {
    for (_, record) in records.iter() {
        let covered: f64 = record
            .children
            .iter()
            .map(|c| records.get(*c).duration())
            .sum();
        for child in &record.children {
            let child = records.get(*child);
            assert!(child.start >= record.start - EPSILON);
            assert!(child.end <= record.end + EPSILON);
        }
        for pair in record.children.windows(2) {
            assert!(records.get(pair[0]).end <= records.get(pair[1]).start + EPSILON);
        }
        assert!(record.self_time >= 0.0);
        if record.kind != RecordKind::Coalesced {
            assert!((record.self_time + covered - record.duration()).abs() < EPSILON);
        }
    }
}

#[derive(Debug, Clone)]
enum CodeOp {
    Add { address: u64, size: u64 },
    Move { pick: u64, to: u64, size: u64 },
}

fn code_op() -> impl Strategy<Value = CodeOp> {
    prop_oneof![
        2 => (0u64..4096, 1u64..300).prop_map(|(address, size)| CodeOp::Add { address, size }),
        1 => (0u64..4096, 0u64..4096, 1u64..300)
            .prop_map(|(pick, to, size)| CodeOp::Move { pick, to, size }),
    ]
}

/// Insert into a plain range list, evicting every overlapped range
fn naive_insert(naive: &mut Vec<(u64, u64, String)>, address: u64, size: u64, name: String) {
    let end = address + size;
    naive.retain(|(start, stop, _)| *stop <= address || *start >= end);
    naive.push((address, end, name));
}

/// Optional query bounds, ordered when both are present
fn window() -> impl Strategy<Value = (Option<f64>, Option<f64>)> {
    (prop::option::of(0u32..11_000), prop::option::of(0u32..11_000)).prop_map(|(a, b)| {
        let (a, b) = match (a, b) {
            (Some(a), Some(b)) if a > b => (Some(b), Some(a)),
            other => other,
        };
        (a.map(f64::from), b.map(f64::from))
    })
}

/// A window query returns exactly the frames overlapping `[start, end)`
fn check_window(
    model: &PerformanceModel,
    start: Option<f64>,
    end: Option<f64>,
) -> Result<(), TestCaseError> {
    let expected: Vec<(f64, f64)> = model
        .frames(None, None)
        .iter()
        .filter(|f| start.map_or(true, |s| f.end > s) && end.map_or(true, |e| f.start < e))
        .map(|f| (f.start, f.end))
        .collect();
    let found: Vec<(f64, f64)> = model
        .frames(start, end)
        .iter()
        .map(|f| (f.start, f.end))
        .collect();
    prop_assert_eq!(found, expected);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_records_contained_and_self_time_conserved(events in complete_events()) {
        let model = build(events);
        check_records(model.record_tree());
    }

    #[test]
    fn prop_top_down_self_and_total_consistent(events in complete_events()) {
        let model = build(events);
        let query = TopDownQuery { id_fn: Some(&id_by_name), ..TopDownQuery::default() };
        let tree = model.build_top_down_tree(&main_thread(), &query);
        for index in 1..tree.len() {
            let node = tree.get(ProfileNodeId(index));
            let children: f64 = node.children.iter().map(|c| tree.get(*c).total_time).sum();
            prop_assert!(node.self_time >= 0.0);
            prop_assert!((node.self_time + children - node.total_time).abs() < EPSILON);
        }
        let first_level: f64 = tree
            .children(ProfileTree::ROOT)
            .iter()
            .map(|c| tree.get(*c).total_time)
            .sum();
        prop_assert!((tree.root().total_time - first_level).abs() < EPSILON);
    }

    #[test]
    fn prop_bottom_up_self_time_matches_top_down(events in complete_events()) {
        let model = build(events);
        let query = TopDownQuery { id_fn: Some(&id_by_name), ..TopDownQuery::default() };
        let top_down = model.build_top_down_tree(&main_thread(), &query);
        let bottom_up = model.build_bottom_up_tree(&top_down, None);
        let td_self: f64 = (1..top_down.len())
            .map(|i| top_down.get(ProfileNodeId(i)).self_time)
            .sum();
        let bu_self: f64 = bottom_up
            .children(ProfileTree::ROOT)
            .iter()
            .map(|c| bottom_up.get(*c).self_time)
            .sum();
        prop_assert!((td_self - bu_self).abs() < EPSILON);
    }

    #[test]
    fn prop_arrival_order_does_not_matter(
        (events, shuffled) in complete_events()
            .prop_flat_map(|events| (Just(events.clone()), Just(events).prop_shuffle()))
    ) {
        let query = TopDownQuery { id_fn: Some(&id_by_name), ..TopDownQuery::default() };
        let a = build(events);
        let b = build(shuffled);
        prop_assert_eq!(
            flatten(&a.build_top_down_tree(&main_thread(), &query)),
            flatten(&b.build_top_down_tree(&main_thread(), &query))
        );
        prop_assert_eq!(a.minimum_record_time(), b.minimum_record_time());
        prop_assert_eq!(a.maximum_record_time(), b.maximum_record_time());
    }

    #[test]
    fn prop_frames_partition_markers(
        markers in prop::collection::btree_set(0u32..10_000, 2..30),
        windows in prop::collection::vec(window(), 1..10),
    ) {
        let mut events = vec![RawEvent::instant("TracingStartedInPage", 0.0).with_thread(1, 1)];
        events.extend(markers.iter().map(|t| {
            RawEvent::instant("BeginMainThreadFrame", f64::from(*t)).with_thread(1, 1)
        }));
        let model = build(events);
        let frames = model.frames(None, None);
        let times: Vec<f64> = markers.iter().map(|t| f64::from(*t)).collect();

        // The frame opened by the last marker stays open
        prop_assert_eq!(frames.len(), times.len() - 1);
        for (frame, bounds) in frames.iter().zip(times.windows(2)) {
            prop_assert_eq!(frame.start, bounds[0]);
            prop_assert_eq!(frame.end, bounds[1]);
        }
        for pair in frames.windows(2) {
            prop_assert_eq!(pair[0].end, pair[1].start);
        }
        for (start, end) in windows {
            check_window(&model, start, end)?;
        }
    }

    #[test]
    fn prop_compositor_frames_ordered(
        markers in prop::collection::vec((0usize..4, 0u32..5_000), 1..60),
        windows in prop::collection::vec(window(), 1..10),
    ) {
        let events: Vec<RawEvent> = markers
            .iter()
            .map(|(kind, t)| {
                let time = f64::from(*t);
                let event = match kind {
                    0 => RawEvent::instant("BeginFrame", time),
                    1 => RawEvent::instant("DrawFrame", time),
                    2 => RawEvent::instant("RequestMainThreadFrame", time),
                    _ => RawEvent::instant("NeedsBeginFrameChanged", time)
                        .with_args(json!({"data": {"needsBeginFrame": true}})),
                };
                event.with_thread(1, 2)
            })
            .collect();
        let model = build(events);
        let frames = model.frames(None, None);
        for frame in frames {
            prop_assert!(frame.start <= frame.end);
        }
        for pair in frames.windows(2) {
            prop_assert!(pair[0].start <= pair[1].start);
            prop_assert!(pair[0].end <= pair[1].start);
        }
        for (start, end) in windows {
            check_window(&model, start, end)?;
        }
    }

    #[test]
    fn prop_code_map_matches_naive_ranges(
        ops in prop::collection::vec(code_op(), 1..60),
        probes in prop::collection::vec(0u64..4500, 1..60),
    ) {
        let mut map = CodeMap::new(8);
        let mut naive: Vec<(u64, u64, String)> = Vec::new();
        for (i, op) in ops.into_iter().enumerate() {
            match op {
                CodeOp::Add { address, size } => {
                    let name = format!("f{i}");
                    map.add_entry(address, size, CallFrame::new(name.clone()));
                    naive_insert(&mut naive, address, size, name);
                }
                CodeOp::Move { pick, to, size } => {
                    // Mostly move a live range; with none left, a stray address
                    let from = match naive.len() {
                        0 => pick,
                        n => naive[(pick as usize) % n].0,
                    };
                    let position = naive.iter().position(|(start, _, _)| *start == from);
                    prop_assert_eq!(map.move_entry(from, to, size), position.is_some());
                    if let Some(position) = position {
                        let (_, _, name) = naive.remove(position);
                        naive_insert(&mut naive, to, size, name);
                    }
                }
            }
        }
        prop_assert_eq!(map.len(), naive.len());
        for probe in probes {
            let expected = naive
                .iter()
                .find(|(start, stop, _)| *start <= probe && probe < *stop)
                .map(|(_, _, name)| name.as_str());
            let found = map.lookup(probe).map(|frame| frame.function_name.as_str());
            prop_assert_eq!(found, expected);
        }
    }

    #[test]
    fn prop_async_chains_deterministic(
        spans in prop::collection::vec((0u32..8, 0u32..1000, 1u32..500), 1..20)
    ) {
        let events: Vec<RawEvent> = spans
            .iter()
            .flat_map(|(id, ts, dur)| {
                let begin = RawEvent::new("Request", Phase::NestableAsyncBegin, f64::from(*ts))
                    .with_thread(1, 1)
                    .with_id(id.to_string())
                    .with_categories(&["netlog"]);
                let end = RawEvent::new("Request", Phase::NestableAsyncEnd, f64::from(ts + dur))
                    .with_thread(1, 1)
                    .with_id(id.to_string())
                    .with_categories(&["netlog"]);
                [begin, end]
            })
            .collect();
        let a = build(events.clone());
        let b = build(events);
        prop_assert_eq!(a.async_events("network"), b.async_events("network"));
        for chain in a.async_events("network") {
            if let Some(end) = chain.end {
                prop_assert!(end >= chain.start);
            }
        }
    }
}
