// Invalidation causality
//
// Attaches "why" to recalculate-style, layout and paint events by
// correlating invalidation-tracking events with them inside one rendering
// cycle. A cycle ends when a paint completes; the next invalidation starts a
// fresh one. Attribution only moves forward in time and never crosses a
// document frame boundary.

mod kinds;
mod tracker;

pub use kinds::{Invalidation, InvalidationCause, InvalidationId, InvalidationIndex, InvalidationKind};
pub use tracker::{track_invalidations, InvalidationTracker};
