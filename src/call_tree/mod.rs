// Call tree aggregation
//
// Folds the record hierarchy into a top-down tree (call paths) and a
// bottom-up tree (self time per activity, expanded by caller). Both trees
// live in one arena type; an id function decides which records fold into
// the same node and an optional group function inserts a synthetic level
// below the root.

mod bottom_up;
mod keys;
mod top_down;
mod tree;

pub use bottom_up::build_bottom_up_tree;
pub use keys::{
    group_by_category, group_by_thread, group_by_url, id_by_function, id_by_name, id_by_url,
    id_unique, GroupFn, IdFn,
};
pub use top_down::{build_top_down_tree, TopDownQuery};
pub use tree::{ProfileNode, ProfileNodeId, ProfileTree};
