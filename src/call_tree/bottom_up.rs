// Bottom-up aggregation: self time per activity, expanded by callers

use super::keys::GroupFn;
use super::tree::{ProfileNodeId, ProfileTree};
use crate::normalizer::TraceData;
use std::collections::HashMap;

/// Invert a top-down tree
///
/// Every top-down node contributes its self time to a chain that starts at
/// a first-level node keyed by its own id and continues through its callers.
/// A node whose id already occurs on its top-down path (recursion) adds self
/// time but not its total time a second time.
pub fn build_bottom_up_tree(
    top_down: &ProfileTree,
    data: &TraceData,
    group_fn: Option<&GroupFn<'_>>,
) -> ProfileTree {
    let mut inverter = Inverter {
        top_down,
        tree: ProfileTree::new(),
        on_path: HashMap::new(),
    };
    for &child in top_down.children(ProfileTree::ROOT) {
        inverter.process(child);
    }
    let mut tree = inverter.tree;
    tree.get_mut(ProfileTree::ROOT).total_time = top_down.root().total_time;
    match group_fn {
        Some(group_fn) => tree.grouped(data, group_fn),
        None => tree,
    }
}

enum Step {
    Enter(ProfileNodeId),
    Leave(ProfileNodeId),
}

struct Inverter<'a> {
    top_down: &'a ProfileTree,
    tree: ProfileTree,
    on_path: HashMap<&'a str, usize>,
}

impl<'a> Inverter<'a> {
    /// Pre-order walk of the top-down subtree at `root`, tracking which ids
    /// are on the current path
    fn process(&mut self, root: ProfileNodeId) {
        let top_down = self.top_down;
        let mut work = vec![Step::Enter(root)];
        while let Some(step) = work.pop() {
            match step {
                Step::Enter(id) => {
                    let node = top_down.get(id);
                    let recursive = self.on_path.get(node.id.as_str()).is_some_and(|n| *n > 0);
                    self.append_chain(id, recursive);
                    *self.on_path.entry(node.id.as_str()).or_default() += 1;
                    work.push(Step::Leave(id));
                    work.extend(node.children.iter().rev().map(|&child| Step::Enter(child)));
                }
                Step::Leave(id) => {
                    if let Some(count) = self.on_path.get_mut(top_down.get(id).id.as_str()) {
                        *count -= 1;
                    }
                }
            }
        }
    }

    fn append_chain(&mut self, id: ProfileNodeId, recursive: bool) {
        let top_down = self.top_down;
        let origin = top_down.get(id);
        let self_time = origin.self_time;
        let total_time = if recursive { 0.0 } else { origin.total_time };

        let mut parent = ProfileTree::ROOT;
        let mut current = Some(id);
        while let Some(step) = current.filter(|step| *step != ProfileTree::ROOT) {
            let node = top_down.get(step);
            let target = self.tree.child_or_insert(parent, &node.id, &node.name);
            let target_node = self.tree.get_mut(target);
            target_node.self_time += self_time;
            target_node.total_time += total_time;
            if target_node.event.is_none() {
                target_node.event = node.event;
            }
            if target_node.record.is_none() {
                target_node.record = node.record;
            }
            parent = target;
            current = node.parent;
        }
    }
}
