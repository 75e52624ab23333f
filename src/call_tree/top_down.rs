// Top-down (call path) aggregation over the record hierarchy

use super::keys::{id_unique, IdFn};
use super::tree::{ProfileNodeId, ProfileTree};
use crate::filter::{is_visible, EventFilter};
use crate::hierarchy::{RecordId, RecordKind, RecordTree};
use crate::normalizer::TraceData;

/// Window, filters and id function of a top-down build
pub struct TopDownQuery<'a> {
    pub start: f64,
    pub end: f64,
    pub filters: &'a [Box<dyn EventFilter>],
    /// `None` keeps every call distinct
    pub id_fn: Option<&'a IdFn<'a>>,
}

impl Default for TopDownQuery<'_> {
    fn default() -> Self {
        Self {
            start: f64::NEG_INFINITY,
            end: f64::INFINITY,
            filters: &[],
            id_fn: None,
        }
    }
}

/// Build a top-down tree from the subtrees rooted at `roots`
pub fn build_top_down_tree(
    data: &TraceData,
    records: &RecordTree,
    roots: &[RecordId],
    query: &TopDownQuery<'_>,
) -> ProfileTree {
    let mut builder = TopDownBuilder {
        data,
        records,
        query,
        tree: ProfileTree::new(),
    };
    for &root in roots {
        builder.visit(root, ProfileTree::ROOT);
    }
    let mut tree = builder.tree;
    let total: f64 = tree
        .children(ProfileTree::ROOT)
        .iter()
        .map(|child| tree.get(*child).total_time)
        .sum();
    let root = tree.get_mut(ProfileTree::ROOT);
    root.total_time = total;
    root.self_time = 0.0;
    tree
}

struct TopDownBuilder<'a> {
    data: &'a TraceData,
    records: &'a RecordTree,
    query: &'a TopDownQuery<'a>,
    tree: ProfileTree,
}

impl TopDownBuilder<'_> {
    /// Fold the subtree at `root` under `parent`, pre-order
    fn visit(&mut self, root: RecordId, parent: ProfileNodeId) {
        let records = self.records;
        let mut work = vec![(root, parent)];
        while let Some((id, parent)) = work.pop() {
            if let Some(below) = self.fold(id, parent) {
                let children = &records.get(id).children;
                work.extend(children.iter().rev().map(|&child| (child, below)));
            }
        }
    }

    /// Add one record under `parent`; returns the node its children fold
    /// under, or `None` when the whole subtree is skipped
    fn fold(&mut self, id: RecordId, parent: ProfileNodeId) -> Option<ProfileNodeId> {
        let records = self.records;
        let record = records.get(id);
        let event_id = match (record.kind, record.event) {
            (RecordKind::Sync, Some(event)) => event,
            // Root and coalesced records are transparent
            _ => return Some(parent),
        };

        let instant = record.is_instant();
        let (start, end) = (self.query.start, self.query.end);
        let in_window = if instant {
            record.start >= start && record.start < end
        } else {
            record.end > start && record.start < end
        };
        if !in_window {
            return None;
        }

        let data = self.data;
        let event = data.event(event_id);
        if !is_visible(self.query.filters, event) {
            return Some(parent);
        }
        // Instants carry no time and only clutter aggregated trees
        if instant && self.query.id_fn.is_some() {
            return None;
        }

        let time = if instant {
            0.0
        } else {
            record.end.min(end) - record.start.max(start)
        };
        let key = match self.query.id_fn {
            Some(id_fn) => id_fn(event_id, event),
            None => id_unique(event_id, event),
        };
        let node = self.tree.child_or_insert(parent, &key, &record.name);
        {
            let node = self.tree.get_mut(node);
            node.self_time += time;
            node.total_time += time;
            node.event.get_or_insert(event_id);
            node.record.get_or_insert(id);
        }
        if parent != ProfileTree::ROOT {
            let parent = self.tree.get_mut(parent);
            parent.self_time -= time;
            if parent.self_time < 0.0 {
                parent.self_time = 0.0;
            }
        }
        Some(node)
    }
}
