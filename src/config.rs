//! Model configuration
//!
//! Every table the passes consult (thread roles, event categories, initiator
//! pairing rules, invalidation noise) lives in one explicitly constructed
//! [`ModelConfig`] that is passed by reference. Extensible via TOML without
//! recompilation.
//!
//! # Example TOML
//! ```toml
//! timestamp_unit = "micros"
//!
//! [[async_rules]]
//! initiator = "TimerInstall"
//! effects = ["TimerFire"]
//! initiator_key = "data.timerId"
//! effect_key = "data.timerId"
//! ```

use crate::error::{ModelError, Result};
use crate::event::RawEvent;
use crate::thread::ThreadRole;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

/// Unit of `ts`/`dur` on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampUnit {
    Micros,
    Millis,
}

impl TimestampUnit {
    pub fn to_millis(self, value: f64) -> f64 {
        match self {
            TimestampUnit::Micros => value / 1000.0,
            TimestampUnit::Millis => value,
        }
    }
}

/// Thread name prefix → role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadRoleRule {
    pub name_prefix: String,
    pub role: ThreadRole,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadConfig {
    /// First matching prefix wins
    pub roles: Vec<ThreadRoleRule>,
}

impl Default for ThreadConfig {
    fn default() -> Self {
        let rule = |prefix: &str, role| ThreadRoleRule {
            name_prefix: prefix.to_string(),
            role,
        };
        Self {
            roles: vec![
                rule("CrRendererMain", ThreadRole::Main),
                rule("CompositorTileWorker", ThreadRole::Raster),
                rule("Compositor", ThreadRole::Compositor),
                rule("CrBrowserMain", ThreadRole::Browser),
                rule("CrGpuMain", ThreadRole::Gpu),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryConfig {
    /// Category name → event names accounted to it
    pub groups: BTreeMap<String, Vec<String>>,
    /// Event names that delimit one task on a thread's message loop
    pub top_level: Vec<String>,
    /// Trace category that also marks an event as top-level
    pub top_level_category: String,
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for CategoryConfig {
    fn default() -> Self {
        let mut groups = BTreeMap::new();
        groups.insert(
            "loading".to_string(),
            names(&[
                "ParseHTML",
                "ParseAuthorStyleSheet",
                "ResourceSendRequest",
                "ResourceReceiveResponse",
                "ResourceReceivedData",
                "ResourceFinish",
            ]),
        );
        groups.insert(
            "scripting".to_string(),
            names(&[
                "FunctionCall",
                "EvaluateScript",
                "v8.evaluateModule",
                "RunMicrotasks",
                "EventDispatch",
                "TimerInstall",
                "TimerRemove",
                "TimerFire",
                "RequestAnimationFrame",
                "FireAnimationFrame",
                "RequestIdleCallback",
                "FireIdleCallback",
                "XHRReadyStateChange",
                "XHRLoad",
                "V8.Execute",
                "JSFrame",
                "MinorGC",
                "MajorGC",
                "GCEvent",
            ]),
        );
        groups.insert(
            "rendering".to_string(),
            names(&[
                "ScheduleStyleRecalculation",
                "RecalculateStyles",
                "UpdateLayoutTree",
                "InvalidateLayout",
                "Layout",
                "UpdateLayerTree",
                "ScrollLayer",
                "HitTest",
            ]),
        );
        groups.insert(
            "painting".to_string(),
            names(&[
                "Paint",
                "PaintSetup",
                "PaintImage",
                "UpdateLayer",
                "CompositeLayers",
                "Rasterize",
                "RasterTask",
                "DecodeImage",
                "ResizeImage",
            ]),
        );
        groups.insert("gpu".to_string(), names(&["GPUTask"]));
        Self {
            groups,
            top_level: names(&[
                "Program",
                "RunTask",
                "MessageLoop::RunTask",
                "ThreadControllerImpl::RunTask",
                "ThreadControllerImpl::DoWork",
                "TaskQueueManager::ProcessTaskFromWorkQueue",
            ]),
            top_level_category: "toplevel".to_string(),
        }
    }
}

/// Links an initiating event to the events it causes through a join key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitiatorRule {
    pub initiator: String,
    pub effects: Vec<String>,
    /// Dotted argument path holding the key on the initiator
    pub initiator_key: String,
    /// Dotted argument path holding the key on the effects
    pub effect_key: String,
    /// Forget the initiator once an effect has been linked to it
    #[serde(default)]
    pub consume: bool,
}

fn default_async_rules() -> Vec<InitiatorRule> {
    let rule = |initiator: &str, effects: &[&str], key: &str| InitiatorRule {
        initiator: initiator.to_string(),
        effects: names(effects),
        initiator_key: key.to_string(),
        effect_key: key.to_string(),
        consume: false,
    };
    vec![
        rule("TimerInstall", &["TimerFire", "TimerRemove"], "data.timerId"),
        rule("RequestAnimationFrame", &["FireAnimationFrame", "CancelAnimationFrame"], "data.id"),
        rule("RequestIdleCallback", &["FireIdleCallback", "CancelIdleCallback"], "data.id"),
        rule(
            "ResourceSendRequest",
            &["ResourceReceiveResponse", "ResourceReceivedData", "ResourceFinish"],
            "data.requestId",
        ),
        rule(
            "WebSocketCreate",
            &[
                "WebSocketSendHandshakeRequest",
                "WebSocketReceiveHandshakeResponse",
                "WebSocketDestroy",
            ],
            "data.identifier",
        ),
        InitiatorRule {
            initiator: "ScheduleStyleRecalculation".to_string(),
            effects: names(&["RecalculateStyles", "UpdateLayoutTree"]),
            initiator_key: "data.frame".to_string(),
            effect_key: "beginData.frame".to_string(),
            consume: true,
        },
        InitiatorRule {
            initiator: "InvalidateLayout".to_string(),
            effects: names(&["Layout"]),
            initiator_key: "data.frame".to_string(),
            effect_key: "beginData.frame".to_string(),
            consume: true,
        },
    ]
}

fn default_async_groups() -> BTreeMap<String, String> {
    [
        ("blink.user_timing", "user_timing"),
        ("blink.console", "console"),
        ("blink.animations", "animation"),
        ("latencyInfo", "input"),
        ("netlog", "network"),
        ("benchmark", "benchmark"),
    ]
    .iter()
    .map(|(cat, group)| (cat.to_string(), group.to_string()))
    .collect()
}

/// An invalidation kind/reason pair that carries no information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoiseRule {
    pub kind: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvalidationConfig {
    pub noise: Vec<NoiseRule>,
}

impl Default for InvalidationConfig {
    fn default() -> Self {
        Self {
            noise: vec![NoiseRule {
                kind: "StyleRecalcInvalidationTracking".to_string(),
                reason: "StyleInvalidator".to_string(),
            }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HierarchyConfig {
    /// Sibling runs of these names are wrapped in one coalesced record
    pub coalescable: Vec<String>,
    /// Maximum gap (ms) between siblings of one coalesced run
    pub coalesce_gap: f64,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            coalescable: names(&["MinorGC", "MajorGC", "GCEvent", "DecodeImage", "ResizeImage"]),
            coalesce_gap: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Starting estimate of the sampling interval (ms)
    pub initial_interval: f64,
    /// Gaps above this (ms) are profiling pauses and do not feed the estimate
    pub pause_threshold: f64,
    /// Window of the exponential moving average, in samples
    pub ema_window: f64,
    /// Code kinds (prefix before `:` in code names) that are VM internals
    pub native_kinds: Vec<String>,
    /// Keep VM-internal frames in resolved stacks
    pub keep_native_frames: bool,
    /// Drop samples taken in the `js` VM state that resolved to no frame
    pub skip_empty_js_samples: bool,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            initial_interval: 0.1,
            pause_threshold: 10.0,
            ema_window: 10.0,
            native_kinds: names(&[
                "Builtin",
                "Stub",
                "BytecodeHandler",
                "Handler",
                "RegExp",
                "CodeStub",
            ]),
            keep_native_frames: false,
            skip_empty_js_samples: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeMapConfig {
    /// Low address bits covered by one bank
    pub bank_bits: u32,
}

impl Default for CodeMapConfig {
    fn default() -> Self {
        Self { bank_bits: 52 }
    }
}

/// Complete configuration of a model build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub timestamp_unit: TimestampUnit,
    /// Tolerance (ms) before a negative self time is reported
    pub self_time_epsilon: f64,
    /// Stored diagnostics cap (counts stay exact past it)
    pub max_diagnostics: usize,
    pub threads: ThreadConfig,
    pub categories: CategoryConfig,
    pub async_rules: Vec<InitiatorRule>,
    /// Trace category → causal group name for async chains
    pub async_groups: BTreeMap<String, String>,
    pub invalidation: InvalidationConfig,
    pub hierarchy: HierarchyConfig,
    pub sampling: SamplingConfig,
    pub code_map: CodeMapConfig,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            timestamp_unit: TimestampUnit::Micros,
            self_time_epsilon: 1e-3,
            max_diagnostics: 1000,
            threads: ThreadConfig::default(),
            categories: CategoryConfig::default(),
            async_rules: default_async_rules(),
            async_groups: default_async_groups(),
            invalidation: InvalidationConfig::default(),
            hierarchy: HierarchyConfig::default(),
            sampling: SamplingConfig::default(),
            code_map: CodeMapConfig::default(),
        }
    }
}

impl ModelConfig {
    /// Load configuration from a TOML file; missing keys keep their defaults
    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ModelConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !(self.self_time_epsilon >= 0.0) {
            return Err(ModelError::Config(format!(
                "self_time_epsilon must be >= 0, got {}",
                self.self_time_epsilon
            )));
        }
        if !(self.sampling.ema_window >= 1.0) {
            return Err(ModelError::Config(format!(
                "sampling.ema_window must be >= 1, got {}",
                self.sampling.ema_window
            )));
        }
        if !(self.sampling.initial_interval > 0.0) {
            return Err(ModelError::Config(format!(
                "sampling.initial_interval must be > 0, got {}",
                self.sampling.initial_interval
            )));
        }
        if !(1..=63).contains(&self.code_map.bank_bits) {
            return Err(ModelError::Config(format!(
                "code_map.bank_bits must be in 1..=63, got {}",
                self.code_map.bank_bits
            )));
        }
        if !(self.hierarchy.coalesce_gap >= 0.0) {
            return Err(ModelError::Config(format!(
                "hierarchy.coalesce_gap must be >= 0, got {}",
                self.hierarchy.coalesce_gap
            )));
        }
        for rule in &self.async_rules {
            if rule.initiator_key.is_empty() || rule.effect_key.is_empty() {
                return Err(ModelError::Config(format!(
                    "async rule for '{}' needs both key paths",
                    rule.initiator
                )));
            }
        }
        Ok(())
    }

    pub fn category_map(&self) -> CategoryMap {
        CategoryMap::new(&self.categories)
    }

    /// Causal group for an async chain whose first category is `category`
    pub fn async_group_for(&self, category: &str) -> String {
        self.async_groups
            .get(category)
            .cloned()
            .unwrap_or_else(|| category.to_string())
    }

    pub fn is_invalidation_noise(&self, kind: &str, reason: Option<&str>) -> bool {
        let Some(reason) = reason else {
            return false;
        };
        self.invalidation
            .noise
            .iter()
            .any(|rule| rule.kind == kind && rule.reason == reason)
    }
}

/// Reverse index event name → category, plus top-level task detection
#[derive(Debug, Clone)]
pub struct CategoryMap {
    by_name: HashMap<String, String>,
    top_level: Vec<String>,
    top_level_category: String,
}

pub const OTHER_CATEGORY: &str = "other";
pub const IDLE_CATEGORY: &str = "idle";

impl CategoryMap {
    pub fn new(config: &CategoryConfig) -> Self {
        let mut by_name = HashMap::new();
        for (category, events) in &config.groups {
            for name in events {
                by_name.insert(name.clone(), category.clone());
            }
        }
        Self {
            by_name,
            top_level: config.top_level.clone(),
            top_level_category: config.top_level_category.clone(),
        }
    }

    pub fn category_of(&self, event: &RawEvent) -> &str {
        self.by_name
            .get(&event.name)
            .map(String::as_str)
            .unwrap_or(OTHER_CATEGORY)
    }

    pub fn is_top_level(&self, event: &RawEvent) -> bool {
        self.top_level.iter().any(|name| *name == event.name)
            || event.has_category(&self.top_level_category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_validates() {
        assert!(ModelConfig::default().validate().is_ok());
    }

    #[test]
    fn test_shipped_default_toml_matches_code_defaults() {
        let shipped =
            ModelConfig::from_toml_str(include_str!("../timeline-default.toml")).unwrap();
        assert_eq!(shipped, ModelConfig::default());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ModelConfig::from_toml_str(
            r#"
            timestamp_unit = "millis"

            [sampling]
            pause_threshold = 20.0
            "#,
        )
        .unwrap();
        assert_eq!(config.timestamp_unit, TimestampUnit::Millis);
        assert_eq!(config.sampling.pause_threshold, 20.0);
        assert_eq!(config.sampling.ema_window, 10.0);
        assert_eq!(config.async_rules, default_async_rules());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = ModelConfig::from_toml_str("self_time_epsilon = -1.0").unwrap_err();
        assert!(matches!(err, ModelError::Config(_)));

        let err = ModelConfig::from_toml_str("[code_map]\nbank_bits = 0").unwrap_err();
        assert!(err.to_string().contains("bank_bits"));
    }

    #[test]
    fn test_bad_toml_syntax() {
        let err = ModelConfig::from_toml_str("timestamp_unit = ").unwrap_err();
        assert!(matches!(err, ModelError::Toml(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "max_diagnostics = 5").unwrap();
        let config = ModelConfig::from_toml(file.path()).unwrap();
        assert_eq!(config.max_diagnostics, 5);
    }

    #[test]
    fn test_missing_file() {
        let err = ModelConfig::from_toml("/nonexistent/tracemodel.toml").unwrap_err();
        assert!(matches!(err, ModelError::Io(_)));
    }

    #[test]
    fn test_category_map() {
        let map = ModelConfig::default().category_map();
        assert_eq!(map.category_of(&RawEvent::instant("Layout", 0.0)), "rendering");
        assert_eq!(map.category_of(&RawEvent::instant("Unknown", 0.0)), OTHER_CATEGORY);
        assert!(map.is_top_level(&RawEvent::instant("RunTask", 0.0)));
        assert!(map.is_top_level(
            &RawEvent::instant("Whatever", 0.0).with_categories(&["toplevel"])
        ));
    }

    #[test]
    fn test_noise_rule() {
        let config = ModelConfig::default();
        assert!(config.is_invalidation_noise("StyleRecalcInvalidationTracking", Some("StyleInvalidator")));
        assert!(!config.is_invalidation_noise("StyleRecalcInvalidationTracking", Some("Class")));
        assert!(!config.is_invalidation_noise("StyleRecalcInvalidationTracking", None));
    }

    #[test]
    fn test_async_group_fallback() {
        let config = ModelConfig::default();
        assert_eq!(config.async_group_for("blink.user_timing"), "user_timing");
        assert_eq!(config.async_group_for("custom"), "custom");
    }
}
