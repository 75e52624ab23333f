// Record hierarchy
//
// Nests each thread's ordered events into a tree of records with a bounded
// stack. Records live in one arena (`RecordTree`) and refer to each other by
// index, so parent links cost nothing and ancestor walks are O(depth).
//
// Every thread owns a synthetic root record spanning all of its events; the
// "roots" a consumer sees are the root record's children.

mod builder;
mod record;

pub use builder::{build_records, HierarchyBuilder};
pub use record::{Ancestors, Record, RecordId, RecordKind, RecordTree};
