//! Asynchronous pairing
//!
//! Two independent jobs, both keyed rather than nested:
//!
//! - initiator links: an event named as an effect in an [`InitiatorRule`] is
//!   linked to the most recent in-flight initiator with the same join key
//!   (last writer wins; consumed rules forget the initiator after one match);
//! - async chains: `S`/`T`/`p`/`F` and `b`/`n`/`e` events sharing an id are
//!   collected into [`AsyncEvent`] chains grouped by causal group.

use crate::config::{InitiatorRule, ModelConfig};
use crate::diagnostics::Diagnostics;
use crate::event::{EventId, Phase, RawEvent, ThreadKey};
use crate::normalizer::TraceData;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// One step of an async chain
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AsyncStep {
    pub event: EventId,
    pub name: String,
    pub phase: Phase,
    pub timestamp: f64,
}

/// A causally linked chain of async events
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AsyncEvent {
    pub name: String,
    pub category: String,
    pub id: String,
    pub group: String,
    pub thread: ThreadKey,
    pub begin: EventId,
    pub start: f64,
    /// Start of the terminating step; `None` while unterminated
    pub end: Option<f64>,
    pub steps: Vec<AsyncStep>,
    pub nestable: bool,
}

impl AsyncEvent {
    fn open(id: EventId, event: &RawEvent, key_id: String, group: String) -> Self {
        Self {
            name: event.name.clone(),
            category: first_category(event).to_string(),
            id: key_id,
            group,
            thread: event.thread(),
            begin: id,
            start: event.timestamp,
            end: None,
            steps: vec![AsyncStep {
                event: id,
                name: event.name.clone(),
                phase: event.phase,
                timestamp: event.timestamp,
            }],
            nestable: event.phase.is_nestable_async(),
        }
    }

    fn add_step(&mut self, id: EventId, event: &RawEvent) {
        self.steps.push(AsyncStep {
            event: id,
            name: event.name.clone(),
            phase: event.phase,
            timestamp: event.timestamp,
        });
    }

    pub fn duration(&self) -> Option<f64> {
        self.end.map(|end| end - self.start)
    }
}

fn first_category(event: &RawEvent) -> &str {
    event.categories.first().map(String::as_str).unwrap_or("")
}

/// Results of the async pass
#[derive(Debug, Clone, Default)]
pub struct AsyncIndex {
    groups: BTreeMap<String, Vec<AsyncEvent>>,
    initiator_of: HashMap<EventId, EventId>,
    effects_of: HashMap<EventId, Vec<EventId>>,
}

impl AsyncIndex {
    /// Chains of a causal group ordered by start time
    pub fn events(&self, group: &str) -> &[AsyncEvent] {
        self.groups.get(group).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    pub fn all(&self) -> impl Iterator<Item = &AsyncEvent> {
        self.groups.values().flatten()
    }

    pub fn initiator_of(&self, effect: EventId) -> Option<EventId> {
        self.initiator_of.get(&effect).copied()
    }

    pub fn effects_of(&self, initiator: EventId) -> &[EventId] {
        self.effects_of
            .get(&initiator)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn link_count(&self) -> usize {
        self.initiator_of.len()
    }
}

/// Role of an event name in the rule table
#[derive(Debug, Clone, Copy)]
enum RuleRole {
    Initiator,
    Effect,
}

/// In-flight initiators per rule, keyed by join key
struct InitiatorPairer<'a> {
    rules: &'a [InitiatorRule],
    by_name: HashMap<&'a str, Vec<(usize, RuleRole)>>,
    in_flight: Vec<HashMap<String, EventId>>,
}

impl<'a> InitiatorPairer<'a> {
    fn new(rules: &'a [InitiatorRule]) -> Self {
        let mut by_name: HashMap<&str, Vec<(usize, RuleRole)>> = HashMap::new();
        for (index, rule) in rules.iter().enumerate() {
            for effect in &rule.effects {
                by_name
                    .entry(effect.as_str())
                    .or_default()
                    .push((index, RuleRole::Effect));
            }
            by_name
                .entry(rule.initiator.as_str())
                .or_default()
                .push((index, RuleRole::Initiator));
        }
        Self {
            rules,
            by_name,
            in_flight: vec![HashMap::new(); rules.len()],
        }
    }

    /// Returns the initiator linked to `event`, if any
    fn process(
        &mut self,
        id: EventId,
        event: &RawEvent,
        diagnostics: &mut Diagnostics,
    ) -> Option<EventId> {
        let roles = self.by_name.get(event.name.as_str())?;
        let mut linked = None;
        // Effects first, so an event that is both never links to itself
        for &(index, _) in roles.iter().filter(|(_, r)| matches!(r, RuleRole::Effect)) {
            let rule = &self.rules[index];
            let Some(key) = event.arg_string(&rule.effect_key) else {
                continue;
            };
            let found = if rule.consume {
                self.in_flight[index].remove(&key)
            } else {
                self.in_flight[index].get(&key).copied()
            };
            match found {
                Some(initiator) => {
                    linked = Some(initiator);
                    break;
                }
                None => diagnostics.unresolved(
                    format!("no '{}' initiator with key {key} for '{}'", rule.initiator, event.name),
                    Some(event.timestamp),
                ),
            }
        }
        for &(index, _) in roles.iter().filter(|(_, r)| matches!(r, RuleRole::Initiator)) {
            let rule = &self.rules[index];
            if let Some(key) = event.arg_string(&rule.initiator_key) {
                self.in_flight[index].insert(key, id);
            }
        }
        linked
    }
}

/// Pair initiators with their effects and collect async chains
pub fn pair_async(
    data: &mut TraceData,
    config: &ModelConfig,
    diagnostics: &mut Diagnostics,
) -> AsyncIndex {
    let mut index = AsyncIndex::default();
    let mut pairer = InitiatorPairer::new(&config.async_rules);
    let mut flat: HashMap<(String, String, String), AsyncEvent> = HashMap::new();
    let mut nestable: HashMap<(String, String), Vec<AsyncEvent>> = HashMap::new();
    let mut finished: Vec<AsyncEvent> = Vec::new();

    for id in data.events_in_time_order() {
        let event = data.event(id);
        if let Some(initiator) = pairer.process(id, event, diagnostics) {
            index.initiator_of.insert(id, initiator);
            index.effects_of.entry(initiator).or_default().push(id);
        }
        if !event.phase.is_async() {
            continue;
        }
        let Some(key_id) = event.id.clone() else {
            diagnostics.malformed(
                format!("async event '{}' without id", event.name),
                Some(event.timestamp),
            );
            continue;
        };
        let category = first_category(event).to_string();

        if event.phase.is_flat_async() {
            let key = (category.clone(), key_id.clone(), event.name.clone());
            match event.phase {
                Phase::AsyncBegin => {
                    let group = group_for(config, &category);
                    let chain = AsyncEvent::open(id, event, key_id, group);
                    if let Some(previous) = flat.insert(key, chain) {
                        diagnostics.consistency(
                            format!("async '{}' restarted before it ended", previous.name),
                            Some(event.timestamp),
                        );
                        finished.push(previous);
                    }
                }
                Phase::AsyncEnd => match flat.remove(&key) {
                    Some(mut chain) => {
                        chain.add_step(id, event);
                        chain.end = Some(event.timestamp);
                        finished.push(chain);
                    }
                    None => diagnostics.unresolved(
                        format!("async end of '{}' without begin", event.name),
                        Some(event.timestamp),
                    ),
                },
                _ => match flat.get_mut(&key) {
                    Some(chain) => chain.add_step(id, event),
                    None => diagnostics.unresolved(
                        format!("async step of '{}' without begin", event.name),
                        Some(event.timestamp),
                    ),
                },
            }
        } else {
            let stack = nestable.entry((category.clone(), key_id.clone())).or_default();
            match event.phase {
                Phase::NestableAsyncBegin => {
                    let group = group_for(config, &category);
                    stack.push(AsyncEvent::open(id, event, key_id, group));
                }
                Phase::NestableAsyncEnd => {
                    match stack.iter().rposition(|chain| chain.name == event.name) {
                        Some(position) => {
                            let mut chain = stack.remove(position);
                            chain.add_step(id, event);
                            chain.end = Some(event.timestamp);
                            finished.push(chain);
                        }
                        None => diagnostics.unresolved(
                            format!("nestable async end of '{}' without begin", event.name),
                            Some(event.timestamp),
                        ),
                    }
                }
                _ => match stack.last_mut() {
                    Some(chain) => chain.add_step(id, event),
                    None => diagnostics.unresolved(
                        format!("nestable async instant '{}' outside a chain", event.name),
                        Some(event.timestamp),
                    ),
                },
            }
        }
    }

    finished.extend(flat.into_values());
    finished.extend(nestable.into_values().flatten());
    for chain in finished {
        index.groups.entry(chain.group.clone()).or_default().push(chain);
    }
    for chains in index.groups.values_mut() {
        chains.sort_by(|a, b| a.start.total_cmp(&b.start).then(a.begin.cmp(&b.begin)));
    }

    propagate_urls(data, &index);
    tracing::info!(
        links = index.initiator_of.len(),
        groups = index.groups.len(),
        "paired async events"
    );
    index
}

fn group_for(config: &ModelConfig, category: &str) -> String {
    if category.is_empty() {
        "other".to_string()
    } else {
        config.async_group_for(category)
    }
}

/// Effects without a url inherit their initiator's
fn propagate_urls(data: &mut TraceData, index: &AsyncIndex) {
    let mut inherited = Vec::new();
    for (effect, initiator) in &index.initiator_of {
        if data.event(*effect).url.is_none() {
            if let Some(url) = data.event(*initiator).url.clone() {
                inherited.push((*effect, url));
            }
        }
    }
    for (effect, url) in inherited {
        data.events[effect.0].url = Some(url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticKind;
    use crate::normalizer::Normalizer;
    use serde_json::json;

    fn pair(events: Vec<RawEvent>) -> (TraceData, AsyncIndex, Diagnostics) {
        let config = ModelConfig::default();
        let mut diags = Diagnostics::default();
        let mut data = Normalizer::new(&config, &mut diags).normalize(events);
        let index = pair_async(&mut data, &config, &mut diags);
        (data, index, diags)
    }

    fn timer(name: &str, ts: f64, timer_id: i64) -> RawEvent {
        RawEvent::instant(name, ts).with_args(json!({"data": {"timerId": timer_id}}))
    }

    #[test]
    fn test_timer_links_and_url_propagation() {
        let (data, index, _) = pair(vec![
            timer("TimerInstall", 1.0, 5).with_args(json!({"data": {"timerId": 5, "url": "app.js"}})),
            RawEvent::complete("TimerFire", 10.0, 1.0).with_args(json!({"data": {"timerId": 5}})),
            timer("TimerFire", 20.0, 5),
        ]);
        assert_eq!(index.initiator_of(EventId(1)), Some(EventId(0)));
        assert_eq!(index.initiator_of(EventId(2)), Some(EventId(0)));
        assert_eq!(index.effects_of(EventId(0)), &[EventId(1), EventId(2)]);
        assert_eq!(data.event(EventId(1)).url.as_deref(), Some("app.js"));
    }

    #[test]
    fn test_last_writer_wins() {
        let (_, index, _) = pair(vec![
            timer("TimerInstall", 1.0, 5),
            timer("TimerInstall", 2.0, 5),
            timer("TimerFire", 3.0, 5),
        ]);
        assert_eq!(index.initiator_of(EventId(2)), Some(EventId(1)));
    }

    #[test]
    fn test_consumed_rule_links_once() {
        let frame = json!({"frame": "F1"});
        let (_, index, diags) = pair(vec![
            RawEvent::instant("ScheduleStyleRecalculation", 1.0).with_args(json!({"data": frame})),
            RawEvent::complete("RecalculateStyles", 2.0, 1.0).with_args(json!({"beginData": frame})),
            RawEvent::complete("RecalculateStyles", 4.0, 1.0).with_args(json!({"beginData": frame})),
        ]);
        assert_eq!(index.initiator_of(EventId(1)), Some(EventId(0)));
        assert_eq!(index.initiator_of(EventId(2)), None);
        assert_eq!(diags.count(DiagnosticKind::UnresolvedReference), 1);
    }

    #[test]
    fn test_missing_initiator_leaves_link_absent() {
        let (_, index, diags) = pair(vec![timer("TimerFire", 3.0, 9)]);
        assert_eq!(index.initiator_of(EventId(0)), None);
        assert_eq!(diags.count(DiagnosticKind::UnresolvedReference), 1);
    }

    #[test]
    fn test_flat_async_chain() {
        let (_, index, _) = pair(vec![
            RawEvent::new("Load", Phase::AsyncBegin, 1.0)
                .with_id("7")
                .with_categories(&["blink.user_timing"]),
            RawEvent::new("Load", Phase::AsyncStepInto, 3.0)
                .with_id("7")
                .with_categories(&["blink.user_timing"]),
            RawEvent::new("Load", Phase::AsyncEnd, 6.0)
                .with_id("7")
                .with_categories(&["blink.user_timing"]),
            RawEvent::new("Open", Phase::AsyncBegin, 2.0)
                .with_id("8")
                .with_categories(&["blink.user_timing"]),
        ]);
        let chains = index.events("user_timing");
        assert_eq!(chains.len(), 2);
        assert_eq!(chains[0].name, "Load");
        assert_eq!(chains[0].steps.len(), 3);
        assert_eq!(chains[0].end, Some(6.0));
        assert_eq!(chains[0].duration(), Some(5.0));
        assert_eq!(chains[1].name, "Open");
        assert_eq!(chains[1].end, None);
        assert_eq!(index.group_names().collect::<Vec<_>>(), vec!["user_timing"]);
    }

    #[test]
    fn test_nestable_chains_match_by_name() {
        let (_, index, _) = pair(vec![
            RawEvent::new("outer", Phase::NestableAsyncBegin, 0.0)
                .with_id("1")
                .with_categories(&["custom"]),
            RawEvent::new("inner", Phase::NestableAsyncBegin, 1.0)
                .with_id("1")
                .with_categories(&["custom"]),
            RawEvent::new("outer", Phase::NestableAsyncEnd, 5.0)
                .with_id("1")
                .with_categories(&["custom"]),
            RawEvent::new("inner", Phase::NestableAsyncEnd, 3.0)
                .with_id("1")
                .with_categories(&["custom"]),
        ]);
        let chains = index.events("custom");
        assert_eq!(chains.len(), 2);
        assert_eq!((chains[0].name.as_str(), chains[0].end), ("outer", Some(5.0)));
        assert_eq!((chains[1].name.as_str(), chains[1].end), ("inner", Some(3.0)));
        assert!(chains[0].nestable);
    }
}
