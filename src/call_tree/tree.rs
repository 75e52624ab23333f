// Profile tree arena

use super::keys::GroupFn;
use crate::event::EventId;
use crate::hierarchy::RecordId;
use crate::normalizer::TraceData;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ProfileNodeId(pub usize);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileNode {
    /// Grouping key; siblings never share one
    pub id: String,
    pub name: String,
    pub self_time: f64,
    pub total_time: f64,
    /// First event folded into this node
    pub event: Option<EventId>,
    pub record: Option<RecordId>,
    pub is_group: bool,
    #[serde(skip)]
    pub parent: Option<ProfileNodeId>,
    #[serde(skip)]
    pub children: Vec<ProfileNodeId>,
    #[serde(skip)]
    child_index: HashMap<String, ProfileNodeId>,
}

impl ProfileNode {
    fn new(id: String, name: String, parent: Option<ProfileNodeId>) -> Self {
        Self {
            id,
            name,
            self_time: 0.0,
            total_time: 0.0,
            event: None,
            record: None,
            is_group: false,
            parent,
            children: Vec::new(),
            child_index: HashMap::new(),
        }
    }
}

/// Node 0 is the root and stands for the whole query window
#[derive(Debug, Clone)]
pub struct ProfileTree {
    nodes: Vec<ProfileNode>,
}

impl Default for ProfileTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfileTree {
    pub const ROOT: ProfileNodeId = ProfileNodeId(0);

    pub fn new() -> Self {
        Self {
            nodes: vec![ProfileNode::new(String::new(), "(root)".to_string(), None)],
        }
    }

    pub fn root(&self) -> &ProfileNode {
        &self.nodes[0]
    }

    pub fn get(&self, id: ProfileNodeId) -> &ProfileNode {
        &self.nodes[id.0]
    }

    pub(crate) fn get_mut(&mut self, id: ProfileNodeId) -> &mut ProfileNode {
        &mut self.nodes[id.0]
    }

    pub fn children(&self, id: ProfileNodeId) -> &[ProfileNodeId] {
        &self.nodes[id.0].children
    }

    /// Child of `parent` with grouping key `key`
    pub fn child(&self, parent: ProfileNodeId, key: &str) -> Option<ProfileNodeId> {
        self.nodes[parent.0].child_index.get(key).copied()
    }

    /// Walk down from the root along a path of keys
    pub fn find_path(&self, keys: &[&str]) -> Option<&ProfileNode> {
        let mut current = Self::ROOT;
        for key in keys {
            current = self.child(current, key)?;
        }
        Some(self.get(current))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    pub(crate) fn child_or_insert(
        &mut self,
        parent: ProfileNodeId,
        key: &str,
        name: &str,
    ) -> ProfileNodeId {
        if let Some(existing) = self.child(parent, key) {
            return existing;
        }
        let id = ProfileNodeId(self.nodes.len());
        self.nodes
            .push(ProfileNode::new(key.to_string(), name.to_string(), Some(parent)));
        let parent = &mut self.nodes[parent.0];
        parent.children.push(id);
        parent.child_index.insert(key.to_string(), id);
        id
    }

    /// Same tree with a synthetic group level between the root and the
    /// first-level entries
    pub fn grouped(&self, data: &TraceData, group_fn: &GroupFn) -> ProfileTree {
        let mut out = ProfileTree::new();
        for &child in self.children(Self::ROOT) {
            let node = self.get(child);
            let key = node
                .event
                .map(|event| group_fn(data.event(event)))
                .unwrap_or_default();
            let group = out.child_or_insert(Self::ROOT, &format!("group:{key}"), &key);
            {
                let group = out.get_mut(group);
                group.is_group = true;
                group.self_time += node.self_time;
                group.total_time += node.total_time;
            }
            self.copy_subtree(child, &mut out, group);
        }
        let root = out.get_mut(Self::ROOT);
        root.self_time = self.root().self_time;
        root.total_time = self.root().total_time;
        out
    }

    fn copy_subtree(&self, source: ProfileNodeId, out: &mut ProfileTree, parent: ProfileNodeId) {
        let mut work = vec![(source, parent)];
        while let Some((source, parent)) = work.pop() {
            let node = self.get(source);
            let copy = out.child_or_insert(parent, &node.id, &node.name);
            let target = out.get_mut(copy);
            target.self_time += node.self_time;
            target.total_time += node.total_time;
            target.event = target.event.or(node.event);
            target.record = target.record.or(node.record);
            work.extend(node.children.iter().rev().map(|&child| (child, copy)));
        }
    }
}
