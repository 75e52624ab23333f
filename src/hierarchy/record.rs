// Record arena and queries

use crate::event::{EventId, ThreadKey};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Index of a record in its [`RecordTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RecordId(pub usize);

/// Closed set of record variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    /// Synthetic per-thread record spanning the whole stream
    Root,
    /// Wraps exactly one event
    Sync,
    /// Synthetic wrapper around a run of same-named siblings
    Coalesced,
}

/// A node of the record hierarchy
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub kind: RecordKind,
    /// Wrapped event; for coalesced records the first event of the run
    pub event: Option<EventId>,
    pub name: String,
    pub thread: ThreadKey,
    pub start: f64,
    pub end: f64,
    /// Own duration minus time covered by children
    pub self_time: f64,
    pub parent: Option<RecordId>,
    /// Temporal order
    pub children: Vec<RecordId>,
}

impl Record {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn is_instant(&self) -> bool {
        self.kind == RecordKind::Sync && self.end == self.start && self.children.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordTree {
    records: Vec<Record>,
    thread_roots: BTreeMap<ThreadKey, RecordId>,
    by_event: HashMap<EventId, RecordId>,
}

impl RecordTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, record: Record) -> RecordId {
        let id = RecordId(self.records.len());
        if let (RecordKind::Sync, Some(event)) = (record.kind, record.event) {
            self.by_event.insert(event, id);
        }
        if record.kind == RecordKind::Root {
            self.thread_roots.insert(record.thread, id);
        }
        self.records.push(record);
        id
    }

    pub(crate) fn get_mut(&mut self, id: RecordId) -> &mut Record {
        &mut self.records[id.0]
    }

    pub fn get(&self, id: RecordId) -> &Record {
        &self.records[id.0]
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The synthetic root record of a thread
    pub fn thread_root(&self, thread: ThreadKey) -> Option<RecordId> {
        self.thread_roots.get(&thread).copied()
    }

    /// Top-level records of a thread, in temporal order
    pub fn roots(&self, thread: ThreadKey) -> &[RecordId] {
        match self.thread_root(thread) {
            Some(root) => &self.get(root).children,
            None => &[],
        }
    }

    pub fn threads(&self) -> impl Iterator<Item = ThreadKey> + '_ {
        self.thread_roots.keys().copied()
    }

    /// Record wrapping `event`, if the event took part in nesting
    pub fn record_for_event(&self, event: EventId) -> Option<RecordId> {
        self.by_event.get(&event).copied()
    }

    /// Parent chain from the direct parent up to (and including) the root
    pub fn ancestors(&self, id: RecordId) -> Ancestors<'_> {
        Ancestors {
            tree: self,
            next: self.get(id).parent,
        }
    }

    /// Pre-order walk of the subtree rooted at `id`, `id` included
    pub fn descendants(&self, id: RecordId) -> Vec<RecordId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.get(current).children.iter().rev().copied());
        }
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = (RecordId, &Record)> {
        self.records
            .iter()
            .enumerate()
            .map(|(index, record)| (RecordId(index), record))
    }
}

pub struct Ancestors<'a> {
    tree: &'a RecordTree,
    next: Option<RecordId>,
}

impl Iterator for Ancestors<'_> {
    type Item = RecordId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = self.tree.get(current).parent;
        Some(current)
    }
}
