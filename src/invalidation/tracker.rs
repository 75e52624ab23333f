// Per-cycle correlation of invalidations with the work they caused

use super::kinds::{Invalidation, InvalidationId, InvalidationIndex, InvalidationKind};
use crate::config::ModelConfig;
use crate::diagnostics::Diagnostics;
use crate::event::{EventId, EventKind};
use crate::hierarchy::{RecordKind, RecordTree};
use crate::normalizer::TraceData;
use std::collections::HashMap;

/// Correlate every invalidation-tracking event of the capture
pub fn track_invalidations(
    data: &TraceData,
    records: &RecordTree,
    config: &ModelConfig,
    diagnostics: &mut Diagnostics,
) -> InvalidationIndex {
    let mut tracker = InvalidationTracker::new(data, records, config, diagnostics);
    for id in data.events_in_time_order() {
        tracker.process(id);
    }
    let index = tracker.finish();
    tracing::info!(
        invalidations = index.len(),
        pictures = index.pictures.len(),
        "tracked invalidations"
    );
    index
}

#[derive(Debug, Clone)]
struct RecalcWindow {
    event: EventId,
    start: f64,
    end: f64,
    frame: Option<String>,
}

pub struct InvalidationTracker<'a> {
    data: &'a TraceData,
    records: &'a RecordTree,
    config: &'a ModelConfig,
    diagnostics: &'a mut Diagnostics,
    index: InvalidationIndex,

    // Rendering-cycle state, cleared by the first invalidation after a paint
    pending: Vec<InvalidationId>,
    by_node: HashMap<i64, Vec<InvalidationId>>,
    last_recalc: Option<RecalcWindow>,
    last_paint_with_layer: Option<EventId>,
    did_paint: bool,

    last_paint_for_layer: HashMap<String, EventId>,
}

impl<'a> InvalidationTracker<'a> {
    pub fn new(
        data: &'a TraceData,
        records: &'a RecordTree,
        config: &'a ModelConfig,
        diagnostics: &'a mut Diagnostics,
    ) -> Self {
        Self {
            data,
            records,
            config,
            diagnostics,
            index: InvalidationIndex::default(),
            pending: Vec::new(),
            by_node: HashMap::new(),
            last_recalc: None,
            last_paint_with_layer: None,
            did_paint: false,
            last_paint_for_layer: HashMap::new(),
        }
    }

    pub fn finish(self) -> InvalidationIndex {
        self.index
    }

    /// Feed one event; must be called in time order
    pub fn process(&mut self, id: EventId) {
        let data = self.data;
        let event = data.event(id);
        let Some(kind) = event.kind() else {
            return;
        };
        if let Some(invalidation_kind) = InvalidationKind::from_event_kind(kind) {
            self.start_new_cycle_if_needed();
            let invalidation = Invalidation::from_event(invalidation_kind, id, event);
            self.record(invalidation);
            return;
        }
        match kind {
            EventKind::RecalculateStyles => self.did_recalc_style(id),
            EventKind::Layout => self.did_layout(id),
            EventKind::Paint => self.did_paint(id),
            EventKind::PictureSnapshot | EventKind::DisplayItemListSnapshot => {
                self.link_picture(id)
            }
            _ => {}
        }
    }

    fn start_new_cycle_if_needed(&mut self) {
        if !self.did_paint {
            return;
        }
        self.pending.clear();
        self.by_node.clear();
        self.last_recalc = None;
        self.last_paint_with_layer = None;
        self.did_paint = false;
    }

    fn record(&mut self, invalidation: Invalidation) -> Option<InvalidationId> {
        if invalidation.node_id.is_none() && invalidation.paint_id.is_none() {
            self.diagnostics.unresolved(
                format!(
                    "{} lacks both node and paint id; dropped",
                    invalidation.kind.event_name()
                ),
                Some(invalidation.timestamp),
            );
            return None;
        }
        if self.config.is_invalidation_noise(
            invalidation.kind.event_name(),
            invalidation.cause.reason.as_deref(),
        ) {
            return None;
        }

        if invalidation.kind == InvalidationKind::Paint {
            if let (Some(node), Some(paint)) = (invalidation.node_id, invalidation.paint_id) {
                for earlier in self.by_node.get(&node).into_iter().flatten() {
                    self.index.invalidations[earlier.0].paint_id = Some(paint);
                }
            }
        }

        let id = InvalidationId(self.index.invalidations.len());
        let during_recalc = self.last_recalc.as_ref().is_some_and(|recalc| {
            invalidation.timestamp >= recalc.start && invalidation.timestamp <= recalc.end
        });
        let is_style = invalidation.kind.is_style();
        if let Some(node) = invalidation.node_id {
            self.by_node.entry(node).or_default().push(id);
        }
        self.index.invalidations.push(invalidation);
        self.pending.push(id);

        if is_style && during_recalc {
            self.associate_with_last_recalc(id);
        }
        Some(id)
    }

    fn did_recalc_style(&mut self, id: EventId) {
        let event = self.data.event(id);
        self.last_recalc = Some(RecalcWindow {
            event: id,
            start: event.timestamp,
            end: event.end_time(),
            frame: event.frame_id(),
        });
        let style: Vec<InvalidationId> = self
            .pending
            .iter()
            .copied()
            .filter(|i| self.index.invalidations[i.0].kind.is_style())
            .collect();
        for invalidation in style {
            self.associate_with_last_recalc(invalidation);
        }
    }

    fn associate_with_last_recalc(&mut self, id: InvalidationId) {
        let Some(recalc) = self.last_recalc.clone() else {
            return;
        };
        let invalidation = &self.index.invalidations[id.0];
        if invalidation.linked_recalc || invalidation.timestamp > recalc.end {
            return;
        }
        match invalidation.kind {
            InvalidationKind::StyleInvalidator => {
                self.index.invalidations[id.0].linked_recalc = true;
                self.replay_invalidation_sets(&recalc, id);
            }
            // Only consulted while replaying invalidation sets
            InvalidationKind::ScheduleStyle => {}
            _ => {
                if invalidation.frame == recalc.frame {
                    self.index.invalidations[id.0].linked_recalc = true;
                    self.attribute(recalc.event, id);
                }
            }
        }
    }

    /// Turn a style-invalidator entry into style-recalc entries, one per
    /// invalidation set, rooted at the schedule entry that created the set
    fn replay_invalidation_sets(&mut self, recalc: &RecalcWindow, id: InvalidationId) {
        let source = self.index.invalidations[id.0].clone();
        if source.invalidation_list.is_empty() {
            self.add_synthetic(source.event, &source);
            return;
        }
        let Some(node) = source.node_id else {
            self.diagnostics.unresolved(
                "style invalidator entry lists invalidation sets but has no node",
                Some(source.timestamp),
            );
            return;
        };
        for set_id in &source.invalidation_list {
            let scheduled = self.by_node.get(&node).and_then(|ids| {
                ids.iter().rev().copied().find(|candidate| {
                    let candidate = &self.index.invalidations[candidate.0];
                    candidate.kind == InvalidationKind::ScheduleStyle
                        && candidate.frame == recalc.frame
                        && candidate.invalidation_set.as_deref() == Some(set_id.as_str())
                })
            });
            match scheduled {
                Some(scheduled) => {
                    let base = self.index.invalidations[scheduled.0].event;
                    self.add_synthetic(base, &source);
                }
                None => self.diagnostics.unresolved(
                    format!("no schedule entry for invalidation set {set_id} on node {node}"),
                    Some(source.timestamp),
                ),
            }
        }
    }

    fn add_synthetic(&mut self, base: EventId, source: &Invalidation) {
        let mut invalidation =
            Invalidation::from_event(InvalidationKind::StyleRecalc, base, self.data.event(base));
        invalidation.synthetic = true;
        if source.cause.reason.is_some() {
            invalidation.cause.reason = source.cause.reason.clone();
        }
        if source.selector_part.is_some() {
            invalidation.selector_part = source.selector_part.clone();
        }
        if let Some(id) = self.record(invalidation) {
            self.associate_with_last_recalc(id);
        }
    }

    fn did_layout(&mut self, id: EventId) {
        let frame = self.data.event(id).frame_id();
        for index in 0..self.pending.len() {
            let invalidation_id = self.pending[index];
            let invalidation = &mut self.index.invalidations[invalidation_id.0];
            if invalidation.kind != InvalidationKind::Layout
                || invalidation.linked_layout
                || invalidation.frame != frame
            {
                continue;
            }
            invalidation.linked_layout = true;
            self.attribute(id, invalidation_id);
        }
    }

    fn did_paint(&mut self, id: EventId) {
        self.did_paint = true;
        let data = self.data;
        let event = data.event(id);
        if let Some(layer) = event.arg_string("data.layerId") {
            self.last_paint_with_layer = Some(id);
            self.last_paint_for_layer.insert(layer, id);
        }
        // Paints without a layer draw into the last layered paint
        let Some(layered) = self.last_paint_with_layer else {
            return;
        };
        let Some(effective_paint_id) = self.data.event(layered).arg_i64("data.nodeId") else {
            return;
        };
        let frame = event.frame_id();
        for index in 0..self.pending.len() {
            let invalidation_id = self.pending[index];
            let invalidation = &mut self.index.invalidations[invalidation_id.0];
            let paint_related = matches!(
                invalidation.kind,
                InvalidationKind::StyleRecalc
                    | InvalidationKind::Layout
                    | InvalidationKind::Paint
                    | InvalidationKind::Scroll
            );
            if !paint_related
                || invalidation.linked_paint
                || invalidation.paint_id != Some(effective_paint_id)
                || invalidation.frame != frame
            {
                continue;
            }
            invalidation.linked_paint = true;
            self.attribute(id, invalidation_id);
        }
    }

    /// Link a picture snapshot to the last paint of the layer being updated
    fn link_picture(&mut self, id: EventId) {
        let Some(record) = self.records.record_for_event(id) else {
            return;
        };
        let update = self.records.ancestors(record).find_map(|ancestor| {
            let ancestor = self.records.get(ancestor);
            let event = ancestor.event?;
            let is_update = ancestor.kind == RecordKind::Sync
                && self.data.event(event).kind() == Some(EventKind::UpdateLayer);
            is_update.then_some(event)
        });
        let Some(update) = update else {
            return;
        };
        let update = self.data.event(update);
        if update.layer_tree_id() != self.data.session.layer_tree_id {
            return;
        }
        let layer = update
            .arg_string("layerId")
            .or_else(|| update.arg_string("data.layerId"));
        if let Some(paint) = layer.and_then(|layer| self.last_paint_for_layer.get(&layer)) {
            self.index.pictures.insert(*paint, id);
        }
    }

    fn attribute(&mut self, event: EventId, invalidation: InvalidationId) {
        self.index
            .attributed
            .entry(event)
            .or_default()
            .push(invalidation);
    }
}
