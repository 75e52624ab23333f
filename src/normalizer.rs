//! Event normalizer and thread demultiplexer
//!
//! Turns the concatenation of all ingested batches into per-thread streams
//! ordered by timestamp (ties keep arrival order), establishes the capture
//! session, resolves `B`/`E` pairs into events with a duration and derives the
//! synthetic `url`, `backend_node_id` and `stack_trace` fields.

use crate::config::ModelConfig;
use crate::diagnostics::Diagnostics;
use crate::event::{CallFrame, EventId, EventKind, Phase, RawEvent, ThreadKey};
use crate::thread::{Thread, ThreadRegistry};
use serde_json::Value;
use std::collections::BTreeMap;

/// Capture session established by the tracing-started marker
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub id: Option<String>,
    pub main_thread: Option<ThreadKey>,
    pub layer_tree_id: Option<i64>,
    pub started_at: Option<f64>,
}

/// Event store plus per-thread streams; the input of every later pass
#[derive(Debug, Clone, Default)]
pub struct TraceData {
    /// Indexed by [`EventId`]; arrival order, synthetic events appended
    pub events: Vec<RawEvent>,
    pub threads: BTreeMap<ThreadKey, Thread>,
    pub registry: ThreadRegistry,
    pub session: Session,
    pub min_time: Option<f64>,
    pub max_time: Option<f64>,
}

impl TraceData {
    pub fn event(&self, id: EventId) -> &RawEvent {
        &self.events[id.0]
    }

    /// All thread-stream events ordered by (timestamp, arrival)
    pub fn events_in_time_order(&self) -> Vec<EventId> {
        let mut ids: Vec<EventId> = self
            .threads
            .values()
            .flat_map(|thread| thread.events().iter().copied())
            .collect();
        sort_by_time(&self.events, &mut ids);
        ids
    }

    /// Append synthetic events to a thread and restore its ordering
    pub fn append_events(&mut self, key: ThreadKey, events: Vec<RawEvent>) -> Vec<EventId> {
        let mut ids = Vec::with_capacity(events.len());
        for event in events {
            let id = EventId(self.events.len());
            widen_bounds(&mut self.min_time, &mut self.max_time, &event);
            self.events.push(event);
            ids.push(id);
        }
        let thread = self.threads.entry(key).or_default();
        thread.events_mut().extend(ids.iter().copied());
        sort_by_time(&self.events, thread.events_mut());
        self.registry.register(key);
        ids
    }
}

fn widen_bounds(min: &mut Option<f64>, max: &mut Option<f64>, event: &RawEvent) {
    if event.phase == Phase::Metadata {
        return;
    }
    *min = Some(min.map_or(event.timestamp, |t| t.min(event.timestamp)));
    *max = Some(max.map_or(event.end_time(), |t| t.max(event.end_time())));
}

/// Stable sort by timestamp; event ids are arrival order so ties keep it
fn sort_by_time(events: &[RawEvent], ids: &mut [EventId]) {
    ids.sort_by(|a, b| {
        events[a.0]
            .timestamp
            .total_cmp(&events[b.0].timestamp)
            .then(a.cmp(b))
    });
}

pub struct Normalizer<'a> {
    config: &'a ModelConfig,
    diagnostics: &'a mut Diagnostics,
}

impl<'a> Normalizer<'a> {
    pub fn new(config: &'a ModelConfig, diagnostics: &'a mut Diagnostics) -> Self {
        Self {
            config,
            diagnostics,
        }
    }

    pub fn normalize(mut self, events: Vec<RawEvent>) -> TraceData {
        let mut data = TraceData {
            events,
            ..TraceData::default()
        };

        self.apply_metadata(&mut data);
        data.session = self.detect_session(&data);
        if let Some(main) = data.session.main_thread {
            data.registry.set_main_thread(main);
        }

        let mut streams: BTreeMap<ThreadKey, Vec<EventId>> = BTreeMap::new();
        for (index, event) in data.events.iter().enumerate() {
            if event.phase == Phase::Metadata {
                continue;
            }
            if !event.timestamp.is_finite() {
                self.diagnostics.malformed(
                    format!("'{}' has non-finite timestamp {}", event.name, event.timestamp),
                    None,
                );
                continue;
            }
            if let Some(dur) = event.duration.filter(|d| !d.is_finite() || *d < 0.0) {
                self.diagnostics.malformed(
                    format!("'{}' has invalid duration {dur}", event.name),
                    Some(event.timestamp),
                );
                continue;
            }
            if let (Some(session), Some(carried)) = (&data.session.id, event.session_id()) {
                if *session != carried {
                    self.diagnostics.consistency(
                        format!("'{}' belongs to foreign session {carried}", event.name),
                        Some(event.timestamp),
                    );
                    continue;
                }
            }
            streams.entry(event.thread()).or_default().push(EventId(index));
        }

        let capture_end = streams
            .values()
            .flatten()
            .map(|id| data.events[id.0].end_time())
            .fold(None, |acc: Option<f64>, t| Some(acc.map_or(t, |a| a.max(t))));

        for (key, mut ids) in streams {
            sort_by_time(&data.events, &mut ids);
            let ids = self.pair_begin_end(&mut data.events, ids, capture_end);
            data.registry.register(key);
            let thread = data.threads.entry(key).or_default();
            thread.events_mut().extend(ids);
        }

        let mut layer_tree_id = None;
        for id in data.events_in_time_order() {
            let event = &data.events[id.0];
            if event.kind() == Some(EventKind::SetLayerTreeId) {
                layer_tree_id = event.layer_tree_id().or(layer_tree_id);
            }
        }
        data.session.layer_tree_id = layer_tree_id;

        let stream_ids: Vec<EventId> = data
            .threads
            .values()
            .flat_map(|thread| thread.events().iter().copied())
            .collect();
        for id in stream_ids {
            self.derive_fields(&mut data.events[id.0]);
            widen_bounds(&mut data.min_time, &mut data.max_time, &data.events[id.0]);
        }

        tracing::info!(
            events = data.events.len(),
            threads = data.threads.len(),
            session = ?data.session.id,
            "normalized trace"
        );
        data
    }

    fn apply_metadata(&mut self, data: &mut TraceData) {
        let config = self.config;
        let rules = &config.threads.roles;
        for event in data.events.iter().filter(|e| e.phase == Phase::Metadata) {
            let key = event.thread();
            match event.kind() {
                Some(EventKind::ThreadName) => match event.arg_string("name") {
                    Some(name) => data.registry.set_thread_name(key, &name, rules),
                    None => self
                        .diagnostics
                        .malformed("thread_name metadata without args.name", None),
                },
                Some(EventKind::ProcessName) => {
                    if let Some(name) = event.arg_string("name") {
                        data.registry.set_process_name(event.pid, &name);
                    }
                }
                Some(EventKind::ThreadSortIndex) => {
                    if let Some(index) = event.arg_i64("sort_index") {
                        data.registry.set_sort_index(key, index);
                    }
                }
                _ => {}
            }
        }
    }

    /// The earliest tracing-started marker wins
    fn detect_session(&self, data: &TraceData) -> Session {
        let marker = data
            .events
            .iter()
            .filter(|e| {
                e.timestamp.is_finite()
                    && matches!(
                        e.kind(),
                        Some(EventKind::TracingStartedInPage | EventKind::TracingStartedInBrowser)
                    )
            })
            .min_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

        let Some(marker) = marker else {
            return Session {
                main_thread: data.registry.main_thread(),
                ..Session::default()
            };
        };
        let main_thread = match marker.kind() {
            Some(EventKind::TracingStartedInPage) => Some(marker.thread()),
            _ => data.registry.main_thread(),
        };
        Session {
            id: marker.session_id(),
            main_thread,
            layer_tree_id: None,
            started_at: Some(marker.timestamp),
        }
    }

    /// Resolve `B`/`E` pairs on one ordered stream; `E` events leave the stream
    fn pair_begin_end(
        &mut self,
        events: &mut [RawEvent],
        ids: Vec<EventId>,
        capture_end: Option<f64>,
    ) -> Vec<EventId> {
        let mut open: Vec<EventId> = Vec::new();
        let mut kept = Vec::with_capacity(ids.len());

        for id in ids {
            match events[id.0].phase {
                Phase::Begin => {
                    open.push(id);
                    kept.push(id);
                }
                Phase::End => {
                    let end = events[id.0].timestamp;
                    let name = events[id.0].name.clone();
                    let Some(position) = open.iter().rposition(|b| events[b.0].name == name)
                    else {
                        self.diagnostics
                            .consistency(format!("unmatched end of '{name}' dropped"), Some(end));
                        continue;
                    };
                    if position + 1 != open.len() {
                        self.diagnostics.consistency(
                            format!("end of '{name}' closes {} unfinished events", open.len() - position - 1),
                            Some(end),
                        );
                    }
                    for unfinished in open.drain(position + 1..).rev() {
                        let begin = &mut events[unfinished.0];
                        begin.duration = Some((end - begin.timestamp).max(0.0));
                        begin.incomplete = true;
                    }
                    if let Some(begin_id) = open.pop() {
                        let end_args = std::mem::take(&mut events[id.0].args);
                        let begin = &mut events[begin_id.0];
                        begin.duration = Some((end - begin.timestamp).max(0.0));
                        for (key, value) in end_args {
                            begin.args.entry(key).or_insert(value);
                        }
                    }
                }
                _ => kept.push(id),
            }
        }

        for unfinished in open {
            let begin = &mut events[unfinished.0];
            let end = capture_end.unwrap_or(begin.timestamp).max(begin.timestamp);
            begin.duration = Some(end - begin.timestamp);
            begin.incomplete = true;
            tracing::debug!(name = %begin.name, "begin event left open; closed at capture end");
        }
        kept
    }

    fn derive_fields(&mut self, event: &mut RawEvent) {
        if event.url.is_none() {
            event.url = ["data.url", "beginData.url", "data.scriptName"]
                .iter()
                .find_map(|path| event.arg_string(path))
                .filter(|url| !url.is_empty());
        }
        if event.backend_node_id.is_none() {
            event.backend_node_id = ["data.nodeId", "data.backendNodeId", "endData.rootNode"]
                .iter()
                .find_map(|path| event.arg_i64(path));
        }
        if event.stack_trace.is_none() {
            let raw = ["data.stackTrace", "beginData.stackTrace"]
                .iter()
                .find_map(|path| event.arg_path(path).and_then(Value::as_array));
            if let Some(entries) = raw {
                let frames: Vec<CallFrame> =
                    entries.iter().filter_map(CallFrame::from_value).collect();
                if frames.len() != entries.len() {
                    self.diagnostics.unresolved(
                        format!(
                            "'{}' stack trace had {} unusable frames",
                            event.name,
                            entries.len() - frames.len()
                        ),
                        Some(event.timestamp),
                    );
                }
                event.stack_trace = Some(frames);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticKind;
    use crate::thread::ThreadRole;
    use serde_json::json;

    fn normalize(events: Vec<RawEvent>) -> (TraceData, Diagnostics) {
        let config = ModelConfig::default();
        let mut diags = Diagnostics::default();
        let data = Normalizer::new(&config, &mut diags).normalize(events);
        (data, diags)
    }

    fn names(data: &TraceData, key: ThreadKey) -> Vec<String> {
        data.threads[&key]
            .events()
            .iter()
            .map(|id| data.event(*id).name.clone())
            .collect()
    }

    #[test]
    fn test_demux_and_stable_order() {
        let (data, _) = normalize(vec![
            RawEvent::instant("late", 5.0).with_thread(1, 1),
            RawEvent::instant("other", 1.0).with_thread(1, 2),
            RawEvent::instant("first", 2.0).with_thread(1, 1),
            RawEvent::instant("second", 2.0).with_thread(1, 1),
        ]);
        assert_eq!(data.threads.len(), 2);
        assert_eq!(names(&data, ThreadKey::new(1, 1)), vec!["first", "second", "late"]);
        assert_eq!(data.min_time, Some(1.0));
        assert_eq!(data.max_time, Some(5.0));
    }

    #[test]
    fn test_invalid_times_dropped() {
        let (data, diags) = normalize(vec![
            RawEvent::complete("A", 0.0, 10.0),
            RawEvent::complete("Bad", f64::NAN, 3.0),
            RawEvent::complete("Neg", 2.0, -5.0),
            RawEvent::complete("Inf", 3.0, f64::INFINITY),
            RawEvent::instant("Far", f64::NEG_INFINITY),
        ]);
        assert_eq!(names(&data, ThreadKey::new(0, 0)), vec!["A"]);
        assert_eq!(diags.count(DiagnosticKind::MalformedEvent), 4);
        assert_eq!(data.min_time, Some(0.0));
        assert_eq!(data.max_time, Some(10.0));
    }

    #[test]
    fn test_begin_end_pairing() {
        let (data, diags) = normalize(vec![
            RawEvent::new("A", Phase::Begin, 0.0),
            RawEvent::new("B", Phase::Begin, 1.0),
            RawEvent::new("B", Phase::End, 3.0).with_args(json!({"endData": {"rootNode": 4}})),
            RawEvent::new("A", Phase::End, 10.0),
            RawEvent::new("Z", Phase::End, 11.0),
        ]);
        let key = ThreadKey::new(0, 0);
        assert_eq!(names(&data, key), vec!["A", "B"]);
        let b = data.event(data.threads[&key].events()[1]);
        assert_eq!(b.duration, Some(2.0));
        assert_eq!(b.backend_node_id, Some(4));
        assert_eq!(diags.count(DiagnosticKind::ConsistencyViolation), 1);
    }

    #[test]
    fn test_mismatched_end_closes_inner() {
        let (data, diags) = normalize(vec![
            RawEvent::new("A", Phase::Begin, 0.0),
            RawEvent::new("B", Phase::Begin, 1.0),
            RawEvent::new("A", Phase::End, 4.0),
        ]);
        let ids = data.threads[&ThreadKey::new(0, 0)].events();
        assert_eq!(data.event(ids[0]).duration, Some(4.0));
        assert_eq!(data.event(ids[1]).duration, Some(3.0));
        assert!(data.event(ids[1]).incomplete);
        assert_eq!(diags.count(DiagnosticKind::ConsistencyViolation), 1);
    }

    #[test]
    fn test_open_begin_closed_at_capture_end() {
        let (data, _) = normalize(vec![
            RawEvent::new("Open", Phase::Begin, 2.0),
            RawEvent::complete("Late", 5.0, 3.0).with_thread(0, 1),
        ]);
        let open = data.event(data.threads[&ThreadKey::new(0, 0)].events()[0]);
        assert_eq!(open.duration, Some(6.0));
        assert!(open.incomplete);
    }

    #[test]
    fn test_session_and_foreign_events() {
        let (data, diags) = normalize(vec![
            RawEvent::new("thread_name", Phase::Metadata, 0.0)
                .with_thread(1, 7)
                .with_args(json!({"name": "Compositor"})),
            RawEvent::instant("TracingStartedInPage", 1.0)
                .with_thread(1, 1)
                .with_args(json!({"data": {"sessionId": "s1"}})),
            RawEvent::instant("TracingStartedInPage", 3.0)
                .with_thread(2, 1)
                .with_args(json!({"data": {"sessionId": "s2"}})),
            RawEvent::instant("SetLayerTreeId", 2.0)
                .with_thread(1, 1)
                .with_args(json!({"data": {"sessionId": "s1", "layerTreeId": 5}})),
            RawEvent::instant("SetLayerTreeId", 4.0)
                .with_thread(2, 1)
                .with_args(json!({"data": {"sessionId": "s2", "layerTreeId": 9}})),
        ]);
        assert_eq!(data.session.id.as_deref(), Some("s1"));
        assert_eq!(data.session.main_thread, Some(ThreadKey::new(1, 1)));
        assert_eq!(data.session.layer_tree_id, Some(5));
        assert_eq!(data.registry.role(ThreadKey::new(1, 1)), ThreadRole::Main);
        assert_eq!(data.registry.role(ThreadKey::new(1, 7)), ThreadRole::Compositor);
        assert_eq!(diags.count(DiagnosticKind::ConsistencyViolation), 2);
        assert!(!data.threads.contains_key(&ThreadKey::new(2, 1)));
    }

    #[test]
    fn test_derived_fields() {
        let (data, diags) = normalize(vec![RawEvent::complete("EvaluateScript", 0.0, 1.0)
            .with_args(json!({"data": {
                "url": "app.js",
                "nodeId": 12,
                "stackTrace": [
                    {"functionName": "f", "url": "app.js", "scriptId": "3", "lineNumber": 1, "columnNumber": 2},
                    {"bogus": true}
                ]
            }}))]);
        let event = data.event(EventId(0));
        assert_eq!(event.url.as_deref(), Some("app.js"));
        assert_eq!(event.backend_node_id, Some(12));
        assert_eq!(event.stack_trace.as_ref().map(Vec::len), Some(1));
        assert_eq!(diags.count(DiagnosticKind::UnresolvedReference), 1);
    }

    #[test]
    fn test_append_events_resorts() {
        let (mut data, _) = normalize(vec![
            RawEvent::instant("a", 1.0),
            RawEvent::instant("c", 3.0),
        ]);
        let key = ThreadKey::new(0, 0);
        data.append_events(key, vec![RawEvent::instant("b", 2.0)]);
        assert_eq!(names(&data, key), vec!["a", "b", "c"]);
    }
}
