// Invalidation records and the index produced by the tracker

use crate::event::{CallFrame, EventId, EventKind, RawEvent};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum InvalidationKind {
    StyleRecalc,
    StyleInvalidator,
    ScheduleStyle,
    Layout,
    Paint,
    Scroll,
}

impl InvalidationKind {
    pub fn from_event_kind(kind: EventKind) -> Option<Self> {
        let kind = match kind {
            EventKind::StyleRecalcInvalidationTracking => InvalidationKind::StyleRecalc,
            EventKind::StyleInvalidatorInvalidationTracking => InvalidationKind::StyleInvalidator,
            EventKind::ScheduleStyleInvalidationTracking => InvalidationKind::ScheduleStyle,
            EventKind::LayoutInvalidationTracking => InvalidationKind::Layout,
            EventKind::PaintInvalidationTracking => InvalidationKind::Paint,
            EventKind::ScrollInvalidationTracking => InvalidationKind::Scroll,
            _ => return None,
        };
        Some(kind)
    }

    /// Trace event name of this kind
    pub fn event_name(self) -> &'static str {
        match self {
            InvalidationKind::StyleRecalc => "StyleRecalcInvalidationTracking",
            InvalidationKind::StyleInvalidator => "StyleInvalidatorInvalidationTracking",
            InvalidationKind::ScheduleStyle => "ScheduleStyleInvalidationTracking",
            InvalidationKind::Layout => "LayoutInvalidationTracking",
            InvalidationKind::Paint => "PaintInvalidationTracking",
            InvalidationKind::Scroll => "ScrollInvalidationTracking",
        }
    }

    pub fn is_style(self) -> bool {
        matches!(
            self,
            InvalidationKind::StyleRecalc
                | InvalidationKind::StyleInvalidator
                | InvalidationKind::ScheduleStyle
        )
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct InvalidationCause {
    pub reason: Option<String>,
    pub stack_trace: Option<Vec<CallFrame>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct InvalidationId(pub usize);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Invalidation {
    pub kind: InvalidationKind,
    /// Tracking event this invalidation was read from
    pub event: EventId,
    pub timestamp: f64,
    pub frame: Option<String>,
    pub node_id: Option<i64>,
    pub node_name: Option<String>,
    pub paint_id: Option<i64>,
    pub invalidation_set: Option<String>,
    /// Invalidation-set ids listed by a style-invalidator entry
    pub invalidation_list: Vec<String>,
    pub selector_part: Option<String>,
    pub cause: InvalidationCause,
    /// Replayed from a schedule entry on behalf of a style-invalidator entry
    pub synthetic: bool,
    pub linked_recalc: bool,
    pub linked_layout: bool,
    pub linked_paint: bool,
}

impl Invalidation {
    pub fn from_event(kind: InvalidationKind, id: EventId, event: &RawEvent) -> Self {
        let invalidation_list = event
            .arg_path("data.invalidationList")
            .and_then(|v| v.as_array())
            .map(|list| {
                list.iter()
                    .filter_map(|entry| match entry.get("id")? {
                        serde_json::Value::String(s) => Some(s.clone()),
                        serde_json::Value::Number(n) => Some(n.to_string()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        let mut cause = InvalidationCause {
            reason: event.arg_string("data.reason"),
            stack_trace: event.stack_trace.clone(),
        };
        if kind == InvalidationKind::Layout && cause.reason.is_none() && cause.stack_trace.is_some()
        {
            cause.reason = Some("Layout forced".to_string());
        }
        Self {
            kind,
            event: id,
            timestamp: event.timestamp,
            frame: event.arg_string("data.frame"),
            node_id: event.arg_i64("data.nodeId"),
            node_name: event.arg_string("data.nodeName"),
            paint_id: event.arg_i64("data.paintId"),
            invalidation_set: event.arg_string("data.invalidationSet"),
            invalidation_list,
            selector_part: event.arg_string("data.selectorPart"),
            cause,
            synthetic: false,
            linked_recalc: false,
            linked_layout: false,
            linked_paint: false,
        }
    }
}

/// All invalidations of a capture plus their attributions
#[derive(Debug, Clone, Default)]
pub struct InvalidationIndex {
    pub(crate) invalidations: Vec<Invalidation>,
    pub(crate) attributed: HashMap<EventId, Vec<InvalidationId>>,
    pub(crate) pictures: HashMap<EventId, EventId>,
}

impl InvalidationIndex {
    pub fn invalidation(&self, id: InvalidationId) -> Option<&Invalidation> {
        self.invalidations.get(id.0)
    }

    /// Invalidations attributed to a recalc-style, layout or paint event
    pub fn invalidations_for(&self, event: EventId) -> Vec<(InvalidationId, &Invalidation)> {
        self.attributed
            .get(&event)
            .map(|ids| {
                ids.iter()
                    .map(|id| (*id, &self.invalidations[id.0]))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Picture snapshot linked to a paint event
    pub fn picture_for(&self, paint: EventId) -> Option<EventId> {
        self.pictures.get(&paint).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (InvalidationId, &Invalidation)> {
        self.invalidations
            .iter()
            .enumerate()
            .map(|(index, invalidation)| (InvalidationId(index), invalidation))
    }

    /// Every (attributed event, invalidation) pair
    pub fn attributions(&self) -> impl Iterator<Item = (EventId, InvalidationId)> + '_ {
        self.attributed
            .iter()
            .flat_map(|(event, ids)| ids.iter().map(move |id| (*event, *id)))
    }

    pub fn len(&self) -> usize {
        self.invalidations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invalidations.is_empty()
    }
}
