//! Threads and the registry of thread roles
//!
//! A [`Thread`] is created lazily the first time an event for its
//! `(pid, tid)` is seen and owns the ids of its events in arrival order.
//! The [`ThreadRegistry`] records what each thread *is* (renderer main,
//! compositor, raster worker, ...) so that later passes can special-case
//! them without string matching on thread names.

use crate::config::ThreadRoleRule;
use crate::event::{EventId, ThreadKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Role a thread plays in the target process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadRole {
    Main,
    Compositor,
    Raster,
    Browser,
    Gpu,
    Other,
}

impl fmt::Display for ThreadRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ThreadRole::Main => "main",
            ThreadRole::Compositor => "compositor",
            ThreadRole::Raster => "raster",
            ThreadRole::Browser => "browser",
            ThreadRole::Gpu => "gpu",
            ThreadRole::Other => "other",
        };
        f.write_str(name)
    }
}

/// Selects which thread(s) a query applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadSelector {
    /// The session's main thread
    Main,
    Key(ThreadKey),
    Role(ThreadRole),
    /// Exact thread name from metadata
    Name(String),
    All,
}

impl std::str::FromStr for ThreadSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "main" => Ok(ThreadSelector::Main),
            "all" => Ok(ThreadSelector::All),
            "compositor" => Ok(ThreadSelector::Role(ThreadRole::Compositor)),
            "raster" => Ok(ThreadSelector::Role(ThreadRole::Raster)),
            "browser" => Ok(ThreadSelector::Role(ThreadRole::Browser)),
            "gpu" => Ok(ThreadSelector::Role(ThreadRole::Gpu)),
            other if other.contains(':') => other.parse().map(ThreadSelector::Key),
            other => Ok(ThreadSelector::Name(other.to_string())),
        }
    }
}

/// Per-thread ordered event stream
#[derive(Debug, Clone, Default)]
pub struct Thread {
    events: Vec<EventId>,
}

impl Thread {
    pub fn push(&mut self, id: EventId) {
        self.events.push(id);
    }

    pub fn events(&self) -> &[EventId] {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut Vec<EventId> {
        &mut self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// What is known about a thread from metadata
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadInfo {
    pub key: ThreadKey,
    pub name: Option<String>,
    pub role: ThreadRole,
    pub sort_index: Option<i64>,
}

/// Mapping thread identity → human-readable role
#[derive(Debug, Clone, Default)]
pub struct ThreadRegistry {
    threads: BTreeMap<ThreadKey, ThreadInfo>,
    process_names: BTreeMap<u64, String>,
    main_thread: Option<ThreadKey>,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, key: ThreadKey) -> &mut ThreadInfo {
        self.threads.entry(key).or_insert_with(|| ThreadInfo {
            key,
            name: None,
            role: ThreadRole::Other,
            sort_index: None,
        })
    }

    pub fn register(&mut self, key: ThreadKey) {
        self.entry(key);
    }

    /// Record a thread name and derive its role from the role table
    pub fn set_thread_name(&mut self, key: ThreadKey, name: &str, rules: &[ThreadRoleRule]) {
        let role = rules
            .iter()
            .find(|rule| name.starts_with(&rule.name_prefix))
            .map(|rule| rule.role)
            .unwrap_or(ThreadRole::Other);
        let is_main = self.main_thread == Some(key);
        let info = self.entry(key);
        info.name = Some(name.to_string());
        if !is_main {
            info.role = role;
        }
    }

    pub fn set_sort_index(&mut self, key: ThreadKey, index: i64) {
        self.entry(key).sort_index = Some(index);
    }

    pub fn set_process_name(&mut self, pid: u64, name: &str) {
        self.process_names.insert(pid, name.to_string());
    }

    /// Mark the session's main thread; it keeps the `Main` role for good
    pub fn set_main_thread(&mut self, key: ThreadKey) {
        self.main_thread = Some(key);
        self.entry(key).role = ThreadRole::Main;
    }

    /// Main thread of the session, falling back to the first thread whose
    /// name mapped to the main role
    pub fn main_thread(&self) -> Option<ThreadKey> {
        self.main_thread.or_else(|| {
            self.threads
                .values()
                .find(|info| info.role == ThreadRole::Main)
                .map(|info| info.key)
        })
    }

    pub fn role(&self, key: ThreadKey) -> ThreadRole {
        if self.main_thread() == Some(key) {
            return ThreadRole::Main;
        }
        self.threads
            .get(&key)
            .map(|info| info.role)
            .unwrap_or(ThreadRole::Other)
    }

    pub fn info(&self, key: ThreadKey) -> Option<&ThreadInfo> {
        self.threads.get(&key)
    }

    pub fn process_name(&self, pid: u64) -> Option<&str> {
        self.process_names.get(&pid).map(String::as_str)
    }

    pub fn threads(&self) -> impl Iterator<Item = &ThreadInfo> {
        self.threads.values()
    }

    /// Threads matching a selector, in key order
    pub fn select(&self, selector: &ThreadSelector) -> Vec<ThreadKey> {
        match selector {
            ThreadSelector::Main => self.main_thread().into_iter().collect(),
            ThreadSelector::Key(key) => self
                .threads
                .contains_key(key)
                .then_some(*key)
                .into_iter()
                .collect(),
            ThreadSelector::Role(role) => self
                .threads
                .keys()
                .filter(|key| self.role(**key) == *role)
                .copied()
                .collect(),
            ThreadSelector::Name(name) => self
                .threads
                .values()
                .filter(|info| info.name.as_deref() == Some(name.as_str()))
                .map(|info| info.key)
                .collect(),
            ThreadSelector::All => self.threads.keys().copied().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;

    #[test]
    fn test_roles_from_names() {
        let config = ModelConfig::default();
        let mut registry = ThreadRegistry::new();
        registry.set_thread_name(ThreadKey::new(1, 1), "CrRendererMain", &config.threads.roles);
        registry.set_thread_name(ThreadKey::new(1, 2), "Compositor", &config.threads.roles);
        registry.set_thread_name(
            ThreadKey::new(1, 3),
            "CompositorTileWorker2/3",
            &config.threads.roles,
        );
        registry.set_thread_name(ThreadKey::new(1, 4), "Chrome_ChildIOThread", &config.threads.roles);

        assert_eq!(registry.role(ThreadKey::new(1, 1)), ThreadRole::Main);
        assert_eq!(registry.role(ThreadKey::new(1, 2)), ThreadRole::Compositor);
        assert_eq!(registry.role(ThreadKey::new(1, 3)), ThreadRole::Raster);
        assert_eq!(registry.role(ThreadKey::new(1, 4)), ThreadRole::Other);
        assert_eq!(registry.main_thread(), Some(ThreadKey::new(1, 1)));
    }

    #[test]
    fn test_explicit_main_thread_wins() {
        let config = ModelConfig::default();
        let mut registry = ThreadRegistry::new();
        registry.set_thread_name(ThreadKey::new(1, 1), "CrRendererMain", &config.threads.roles);
        registry.set_main_thread(ThreadKey::new(2, 9));
        registry.set_thread_name(ThreadKey::new(2, 9), "Worker", &config.threads.roles);

        assert_eq!(registry.main_thread(), Some(ThreadKey::new(2, 9)));
        assert_eq!(registry.role(ThreadKey::new(2, 9)), ThreadRole::Main);
    }

    #[test]
    fn test_select() {
        let config = ModelConfig::default();
        let mut registry = ThreadRegistry::new();
        registry.set_thread_name(ThreadKey::new(1, 2), "Compositor", &config.threads.roles);
        registry.register(ThreadKey::new(1, 5));

        assert_eq!(
            registry.select(&ThreadSelector::Role(ThreadRole::Compositor)),
            vec![ThreadKey::new(1, 2)]
        );
        assert_eq!(registry.select(&ThreadSelector::All).len(), 2);
        assert!(registry
            .select(&ThreadSelector::Key(ThreadKey::new(9, 9)))
            .is_empty());
        assert_eq!(
            registry.select(&ThreadSelector::Name("Compositor".into())),
            vec![ThreadKey::new(1, 2)]
        );
    }

    #[test]
    fn test_selector_parse() {
        assert_eq!("main".parse::<ThreadSelector>(), Ok(ThreadSelector::Main));
        assert_eq!(
            "3:4".parse::<ThreadSelector>(),
            Ok(ThreadSelector::Key(ThreadKey::new(3, 4)))
        );
        assert_eq!(
            "compositor".parse::<ThreadSelector>(),
            Ok(ThreadSelector::Role(ThreadRole::Compositor))
        );
    }
}
