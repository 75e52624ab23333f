// Feeds the capture, in time order, through the frame state machine

use super::frame::{FrameIndex, LayerPaint};
use super::state_machine::FrameStateMachine;
use crate::config::{CategoryMap, ModelConfig};
use crate::event::{EventId, EventKind, Phase, RawEvent, ThreadKey};
use crate::hierarchy::RecordTree;
use crate::invalidation::InvalidationIndex;
use crate::normalizer::TraceData;
use std::collections::BTreeMap;

/// Segment the capture into frames
pub fn build_frames(
    data: &TraceData,
    records: &RecordTree,
    invalidations: &InvalidationIndex,
    config: &ModelConfig,
) -> FrameIndex {
    let mut feeder = FrameFeeder {
        data,
        records,
        invalidations,
        categories: config.category_map(),
        main_thread: data.session.main_thread.or_else(|| data.registry.main_thread()),
        layer_tree_id: data.session.layer_tree_id,
        machine: FrameStateMachine::new(),
        task_times: BTreeMap::new(),
        last_task_begin: None,
    };
    for id in data.events_in_time_order() {
        feeder.add_event(id);
    }
    let index = feeder.machine.finish();
    tracing::info!(
        frames = index.len(),
        threaded = index.is_threaded(),
        "segmented frames"
    );
    index
}

struct FrameFeeder<'a> {
    data: &'a TraceData,
    records: &'a RecordTree,
    invalidations: &'a InvalidationIndex,
    categories: CategoryMap,
    main_thread: Option<ThreadKey>,
    layer_tree_id: Option<i64>,
    machine: FrameStateMachine,
    /// Category time of the current main-thread task before any main frame
    task_times: BTreeMap<String, f64>,
    last_task_begin: Option<f64>,
}

/// Snapshot object ids are written either as hex (`0x1f`) or decimal
fn parse_snapshot_id(id: &str) -> Option<i64> {
    match id.strip_prefix("0x").or_else(|| id.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16).ok(),
        None => id.parse().ok(),
    }
}

impl FrameFeeder<'_> {
    fn add_event(&mut self, id: EventId) {
        let data = self.data;
        let event = data.event(id);
        let kind = event.kind();

        if kind == Some(EventKind::LayerTreeHostImplSnapshot) {
            if event.phase == Phase::SnapshotObject
                && event.id.as_deref().and_then(parse_snapshot_id) == self.layer_tree_id
            {
                self.machine.handle_layer_tree_snapshot(id);
            }
            return;
        }

        if let Some(kind) = kind.filter(|k| k.is_background_frame_marker()) {
            if event.layer_tree_id() == self.layer_tree_id {
                self.machine.switch_to_threaded();
                self.compositor_event(kind, event);
            }
        }

        let self_time = self
            .records
            .record_for_event(id)
            .map_or(0.0, |record| self.records.get(record).self_time);
        let on_main = self.main_thread.map_or(true, |main| main == event.thread());
        if on_main {
            self.main_thread_event(id, event, kind, self_time);
        } else if self_time > 0.0 && !self.categories.is_top_level(event) {
            let category = self.categories.category_of(event);
            self.machine.add_time(category, self_time);
        }
    }

    fn compositor_event(&mut self, kind: EventKind, event: &RawEvent) {
        let time = event.timestamp;
        match kind {
            EventKind::BeginFrame => self.machine.handle_begin_frame(time),
            EventKind::DrawFrame => self.machine.handle_draw_frame(time),
            EventKind::ActivateLayerTree => self.machine.handle_activate_layer_tree(),
            EventKind::RequestMainThreadFrame => self.machine.handle_request_main_thread_frame(),
            EventKind::NeedsBeginFrameChanged => {
                let needs = event.arg_bool("data.needsBeginFrame").unwrap_or(false);
                self.machine.handle_needs_begin_frame_changed(time, needs);
            }
            _ => {}
        }
    }

    fn main_thread_event(
        &mut self,
        id: EventId,
        event: &RawEvent,
        kind: Option<EventKind>,
        self_time: f64,
    ) {
        let top_level = self.categories.is_top_level(event);
        if top_level {
            self.task_times.clear();
            self.last_task_begin = Some(event.timestamp);
        }
        let category = self.categories.category_of(event);
        let paint = self.layer_paint(id, event, kind);

        if !self.machine.is_threaded() {
            if kind == Some(EventKind::BeginMainThreadFrame) {
                self.machine.handle_main_frame_marker(event.timestamp);
            }
            if self_time > 0.0 && !top_level {
                self.machine.add_time(category, self_time);
            }
            if let Some(paint) = paint {
                self.machine.add_paint(paint);
            }
            return;
        }

        if !self.machine.has_pending_commit() && kind.is_some_and(|k| k.is_main_frame_marker()) {
            let trigger = self.last_task_begin.unwrap_or(event.timestamp);
            let task_times = std::mem::take(&mut self.task_times);
            self.machine.begin_pending_frame(trigger, task_times);
        }
        let Some(pending) = self.machine.pending_commit_mut() else {
            if self_time > 0.0 {
                *self.task_times.entry(category.to_string()).or_default() += self_time;
            }
            return;
        };
        if self_time > 0.0 {
            pending.add_time(category, self_time);
        }
        match kind {
            Some(EventKind::BeginMainThreadFrame) => {
                if let Some(frame_id) = event.arg_i64("data.frameId") {
                    pending.main_frame_id = Some(frame_id);
                }
            }
            Some(EventKind::Paint) => pending.paints.extend(paint),
            Some(EventKind::CompositeLayers) if event.layer_tree_id() == self.layer_tree_id => {
                self.machine.handle_composite_layers();
            }
            _ => {}
        }
    }

    /// Paint of a composited layer whose picture was recorded
    fn layer_paint(&self, id: EventId, event: &RawEvent, kind: Option<EventKind>) -> Option<LayerPaint> {
        if kind != Some(EventKind::Paint) {
            return None;
        }
        let layer_id = event.arg_string("data.layerId")?;
        let picture = self.invalidations.picture_for(id)?;
        Some(LayerPaint {
            paint: id,
            layer_id,
            picture,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_snapshot_id() {
        assert_eq!(parse_snapshot_id("0x1f"), Some(31));
        assert_eq!(parse_snapshot_id("12"), Some(12));
        assert_eq!(parse_snapshot_id("layer"), None);
    }
}
