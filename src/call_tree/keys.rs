// Node id and grouping functions

use crate::config::CategoryMap;
use crate::event::{EventId, RawEvent};
use crate::stack_reconstructor::js_frame_of;

/// Maps an event to the key under which it folds into a tree node
pub type IdFn<'a> = dyn Fn(EventId, &RawEvent) -> String + 'a;

/// Maps a first-level event to its synthetic group
pub type GroupFn<'a> = dyn Fn(&RawEvent) -> String + 'a;

/// Every call stays distinct
pub fn id_unique(id: EventId, _event: &RawEvent) -> String {
    format!("#{}", id.0)
}

pub fn id_by_name(_id: EventId, event: &RawEvent) -> String {
    event.name.clone()
}

/// Sampled script frames fold by function identity; other events by name
pub fn id_by_function(id: EventId, event: &RawEvent) -> String {
    match js_frame_of(event) {
        Some(frame) => format!(
            "js:{}@{}:{}",
            frame.function_name, frame.url, frame.script_id
        ),
        None => id_by_name(id, event),
    }
}

pub fn id_by_url(_id: EventId, event: &RawEvent) -> String {
    event.url.clone().unwrap_or_default()
}

pub fn group_by_category(map: CategoryMap) -> impl Fn(&RawEvent) -> String {
    move |event| map.category_of(event).to_string()
}

pub fn group_by_url(event: &RawEvent) -> String {
    event.url.clone().unwrap_or_default()
}

pub fn group_by_thread(event: &RawEvent) -> String {
    event.thread().to_string()
}
