// Stack-based nesting of one thread's events into records

use super::record::{Record, RecordId, RecordKind, RecordTree};
use crate::config::ModelConfig;
use crate::diagnostics::Diagnostics;
use crate::event::{EventId, EventKind, RawEvent, ThreadKey};
use crate::normalizer::TraceData;

pub struct HierarchyBuilder<'a> {
    config: &'a ModelConfig,
    diagnostics: &'a mut Diagnostics,
    tree: RecordTree,
}

/// Build records for every thread of the trace
pub fn build_records(
    data: &TraceData,
    config: &ModelConfig,
    diagnostics: &mut Diagnostics,
) -> RecordTree {
    let mut builder = HierarchyBuilder::new(config, diagnostics);
    for (key, thread) in &data.threads {
        builder.add_thread(*key, &data.events, thread.events());
    }
    let tree = builder.finish();
    tracing::info!(records = tree.len(), "built record hierarchy");
    tree
}

/// Durations and instants nest; the sampling profiler's own bookkeeping
/// does not
fn takes_part(event: &RawEvent) -> bool {
    event.phase.nests()
        && !matches!(
            event.kind(),
            Some(
                EventKind::JitCodeAdded
                    | EventKind::JitCodeMoved
                    | EventKind::V8Sample
                    | EventKind::JsSample
            )
        )
}

impl<'a> HierarchyBuilder<'a> {
    pub fn new(config: &'a ModelConfig, diagnostics: &'a mut Diagnostics) -> Self {
        Self {
            config,
            diagnostics,
            tree: RecordTree::new(),
        }
    }

    pub fn finish(self) -> RecordTree {
        self.tree
    }

    /// Nest the events `ids` (indices into `events`) of one thread
    pub fn add_thread(&mut self, thread: ThreadKey, events: &[RawEvent], ids: &[EventId]) {
        let mut ordered: Vec<EventId> = ids
            .iter()
            .copied()
            .filter(|id| takes_part(&events[id.0]))
            .collect();
        if ordered.is_empty() {
            return;
        }
        // Start ascending, longest first, then name and arrival so that any
        // permutation of the same events nests identically.
        ordered.sort_by(|a, b| {
            let (ea, eb) = (&events[a.0], &events[b.0]);
            ea.timestamp
                .total_cmp(&eb.timestamp)
                .then(eb.duration.unwrap_or(0.0).total_cmp(&ea.duration.unwrap_or(0.0)))
                .then_with(|| ea.name.cmp(&eb.name))
                .then(a.cmp(b))
        });

        let start = events[ordered[0].0].timestamp;
        let end = ordered
            .iter()
            .map(|id| events[id.0].end_time())
            .fold(start, f64::max);
        let root = self.tree.push(Record {
            kind: RecordKind::Root,
            event: None,
            name: "(root)".to_string(),
            thread,
            start,
            end,
            self_time: end - start,
            parent: None,
            children: Vec::new(),
        });

        let mut stack = vec![root];
        for id in ordered {
            let event = &events[id.0];
            while stack.len() > 1 {
                let top = self.tree.get(stack[stack.len() - 1]);
                if top.end > event.timestamp {
                    break;
                }
                stack.pop();
            }
            let parent = stack[stack.len() - 1];
            let record = self.attach(parent, id, event);
            if event.duration.is_some() {
                stack.push(record);
            }
        }

        self.coalesce(root);
    }

    fn attach(&mut self, parent: RecordId, id: EventId, event: &RawEvent) -> RecordId {
        let start = event.timestamp;
        let mut end = event.end_time();
        let parent_record = self.tree.get(parent);
        if end > parent_record.end {
            self.diagnostics.consistency(
                format!(
                    "'{}' ends {:.3}ms after its parent '{}'; clamped",
                    event.name,
                    end - parent_record.end,
                    parent_record.name
                ),
                Some(start),
            );
            end = parent_record.end;
        }
        let record = self.tree.push(Record {
            kind: RecordKind::Sync,
            event: Some(id),
            name: event.name.clone(),
            thread: event.thread(),
            start,
            end,
            self_time: end - start,
            parent: Some(parent),
            children: Vec::new(),
        });

        let epsilon = self.config.self_time_epsilon;
        let parent_record = self.tree.get_mut(parent);
        parent_record.children.push(record);
        parent_record.self_time -= end - start;
        if parent_record.self_time < 0.0 {
            let deficit = -parent_record.self_time;
            parent_record.self_time = 0.0;
            if deficit > epsilon {
                let name = parent_record.name.clone();
                self.diagnostics.consistency(
                    format!("negative self time ({deficit:.3}ms) in '{name}'; clamped to zero"),
                    Some(start),
                );
            }
        }
        record
    }

    /// Wrap runs of coalescable siblings in synthetic records, children
    /// before their parents
    fn coalesce(&mut self, root: RecordId) {
        for id in self.tree.descendants(root).into_iter().rev() {
            self.coalesce_children(id);
        }
    }

    fn coalesce_children(&mut self, id: RecordId) {
        let children = self.tree.get(id).children.clone();
        let config = self.config;
        let coalescable = &config.hierarchy.coalescable;
        let gap = config.hierarchy.coalesce_gap;
        let mut rebuilt = Vec::with_capacity(children.len());
        let mut index = 0;
        let mut changed = false;
        while index < children.len() {
            let first = self.tree.get(children[index]);
            let mut run_end = index + 1;
            if first.kind == RecordKind::Sync && coalescable.contains(&first.name) {
                while run_end < children.len() {
                    let previous = self.tree.get(children[run_end - 1]);
                    let next = self.tree.get(children[run_end]);
                    if next.name != first.name || next.start - previous.end > gap {
                        break;
                    }
                    run_end += 1;
                }
            }
            if run_end - index >= 2 {
                rebuilt.push(self.wrap_run(id, &children[index..run_end]));
                changed = true;
            } else {
                rebuilt.push(children[index]);
            }
            index = run_end;
        }

        if changed {
            let covered: f64 = rebuilt.iter().map(|c| self.tree.get(*c).duration()).sum();
            let record = self.tree.get_mut(id);
            record.self_time = (record.duration() - covered).max(0.0);
            record.children = rebuilt;
        }
    }

    fn wrap_run(&mut self, parent: RecordId, run: &[RecordId]) -> RecordId {
        let first = self.tree.get(run[0]);
        let (event, name, thread, start) =
            (first.event, first.name.clone(), first.thread, first.start);
        let end = self.tree.get(run[run.len() - 1]).end;
        let covered: f64 = run.iter().map(|c| self.tree.get(*c).duration()).sum();
        let wrapper = self.tree.push(Record {
            kind: RecordKind::Coalesced,
            event,
            name,
            thread,
            start,
            end,
            self_time: (end - start - covered).max(0.0),
            parent: Some(parent),
            children: run.to_vec(),
        });
        for child in run {
            self.tree.get_mut(*child).parent = Some(wrapper);
        }
        wrapper
    }
}
