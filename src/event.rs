//! Raw trace events, phases and the closed table of well-known event kinds
//!
//! A [`RawEvent`] is the immutable unit of input. Timestamps and durations are
//! stored in milliseconds regardless of the unit used on the wire.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Index of an event in the model's event store (arrival order)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct EventId(pub usize);

/// Identity of a thread inside a capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ThreadKey {
    pub pid: u64,
    pub tid: u64,
}

impl ThreadKey {
    pub fn new(pid: u64, tid: u64) -> Self {
        Self { pid, tid }
    }
}

impl fmt::Display for ThreadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.pid, self.tid)
    }
}

impl FromStr for ThreadKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (pid, tid) = s
            .split_once(':')
            .ok_or_else(|| format!("expected PID:TID, got '{s}'"))?;
        let pid = pid
            .trim()
            .parse()
            .map_err(|_| format!("invalid pid in '{s}'"))?;
        let tid = tid
            .trim()
            .parse()
            .map_err(|_| format!("invalid tid in '{s}'"))?;
        Ok(Self { pid, tid })
    }
}

/// Event phase, following the trace event format phase codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Begin,
    End,
    Complete,
    Instant,
    AsyncBegin,
    AsyncStepInto,
    AsyncStepPast,
    AsyncEnd,
    NestableAsyncBegin,
    NestableAsyncInstant,
    NestableAsyncEnd,
    SnapshotObject,
    ObjectCreated,
    ObjectDestroyed,
    Metadata,
    Sample,
    Counter,
}

impl Phase {
    /// Parse a wire phase code (`ph` field)
    pub fn from_code(code: &str) -> Option<Self> {
        let phase = match code {
            "B" => Phase::Begin,
            "E" => Phase::End,
            "X" => Phase::Complete,
            "I" | "i" | "R" => Phase::Instant,
            "S" => Phase::AsyncBegin,
            "T" => Phase::AsyncStepInto,
            "p" => Phase::AsyncStepPast,
            "F" => Phase::AsyncEnd,
            "b" => Phase::NestableAsyncBegin,
            "n" => Phase::NestableAsyncInstant,
            "e" => Phase::NestableAsyncEnd,
            "O" => Phase::SnapshotObject,
            "N" => Phase::ObjectCreated,
            "D" => Phase::ObjectDestroyed,
            "M" => Phase::Metadata,
            "P" => Phase::Sample,
            "C" => Phase::Counter,
            _ => return None,
        };
        Some(phase)
    }

    pub fn code(self) -> &'static str {
        match self {
            Phase::Begin => "B",
            Phase::End => "E",
            Phase::Complete => "X",
            Phase::Instant => "I",
            Phase::AsyncBegin => "S",
            Phase::AsyncStepInto => "T",
            Phase::AsyncStepPast => "p",
            Phase::AsyncEnd => "F",
            Phase::NestableAsyncBegin => "b",
            Phase::NestableAsyncInstant => "n",
            Phase::NestableAsyncEnd => "e",
            Phase::SnapshotObject => "O",
            Phase::ObjectCreated => "N",
            Phase::ObjectDestroyed => "D",
            Phase::Metadata => "M",
            Phase::Sample => "P",
            Phase::Counter => "C",
        }
    }

    /// Flat async phases (`S`/`T`/`p`/`F`)
    pub fn is_flat_async(self) -> bool {
        matches!(
            self,
            Phase::AsyncBegin | Phase::AsyncStepInto | Phase::AsyncStepPast | Phase::AsyncEnd
        )
    }

    /// Nestable async phases (`b`/`n`/`e`)
    pub fn is_nestable_async(self) -> bool {
        matches!(
            self,
            Phase::NestableAsyncBegin | Phase::NestableAsyncInstant | Phase::NestableAsyncEnd
        )
    }

    pub fn is_async(self) -> bool {
        self.is_flat_async() || self.is_nestable_async()
    }

    /// Phases that take part in per-thread nesting
    pub fn nests(self) -> bool {
        matches!(self, Phase::Begin | Phase::Complete | Phase::Instant)
    }
}

/// A symbolic call frame, as found in stack traces and resolved samples
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
    pub function_name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub script_id: String,
    #[serde(default = "unknown_position")]
    pub line_number: i64,
    #[serde(default = "unknown_position")]
    pub column_number: i64,
    /// Frame belongs to VM internals (builtins, stubs) rather than user code
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub native: bool,
}

fn unknown_position() -> i64 {
    -1
}

impl CallFrame {
    pub fn new(function_name: impl Into<String>) -> Self {
        Self {
            function_name: function_name.into(),
            url: String::new(),
            script_id: String::new(),
            line_number: -1,
            column_number: -1,
            native: false,
        }
    }

    /// Lenient conversion from a JSON stack-trace entry; `None` if the entry
    /// is not an object or has no usable function name field
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let function_name = obj.get("functionName")?.as_str()?.to_string();
        let url = obj
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let script_id = match obj.get("scriptId") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };
        let line_number = obj.get("lineNumber").and_then(Value::as_i64).unwrap_or(-1);
        let column_number = obj
            .get("columnNumber")
            .and_then(Value::as_i64)
            .unwrap_or(-1);
        Some(Self {
            function_name,
            url,
            script_id,
            line_number,
            column_number,
            native: false,
        })
    }

    /// Two frames denote the same function activation site
    pub fn same_function(&self, other: &CallFrame) -> bool {
        self.script_id == other.script_id
            && self.function_name == other.function_name
            && self.url == other.url
    }

    pub fn display_name(&self) -> &str {
        if self.function_name.is_empty() {
            "(anonymous)"
        } else {
            &self.function_name
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Immutable input event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawEvent {
    pub name: String,
    pub categories: Vec<String>,
    pub phase: Phase,
    /// Start time in milliseconds
    pub timestamp: f64,
    /// Duration in milliseconds (complete events, or begin events after pairing)
    pub duration: Option<f64>,
    pub pid: u64,
    pub tid: u64,
    /// Async / object id
    pub id: Option<String>,
    pub args: Map<String, Value>,
    /// Derived during normalization
    pub url: Option<String>,
    pub backend_node_id: Option<i64>,
    pub stack_trace: Option<Vec<CallFrame>>,
    /// Begin event that never saw its end; closed at the capture end
    pub incomplete: bool,
}

impl RawEvent {
    pub fn new(name: impl Into<String>, phase: Phase, timestamp: f64) -> Self {
        Self {
            name: name.into(),
            categories: Vec::new(),
            phase,
            timestamp,
            duration: None,
            pid: 0,
            tid: 0,
            id: None,
            args: Map::new(),
            url: None,
            backend_node_id: None,
            stack_trace: None,
            incomplete: false,
        }
    }

    /// Complete (`X`) event with a duration
    pub fn complete(name: impl Into<String>, timestamp: f64, duration: f64) -> Self {
        Self::new(name, Phase::Complete, timestamp).with_duration(duration)
    }

    pub fn instant(name: impl Into<String>, timestamp: f64) -> Self {
        Self::new(name, Phase::Instant, timestamp)
    }

    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_thread(mut self, pid: u64, tid: u64) -> Self {
        self.pid = pid;
        self.tid = tid;
        self
    }

    pub fn with_categories(mut self, categories: &[&str]) -> Self {
        self.categories = categories.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Replace the argument payload; non-object values are ignored
    pub fn with_args(mut self, args: Value) -> Self {
        if let Value::Object(map) = args {
            self.args = map;
        }
        self
    }

    pub fn thread(&self) -> ThreadKey {
        ThreadKey::new(self.pid, self.tid)
    }

    pub fn end_time(&self) -> f64 {
        self.timestamp + self.duration.unwrap_or(0.0)
    }

    pub fn has_category(&self, category: &str) -> bool {
        self.categories.iter().any(|c| c == category)
    }

    pub fn kind(&self) -> Option<EventKind> {
        EventKind::from_name(&self.name)
    }

    /// Look up a dotted path (`data.frame`) inside the argument payload
    pub fn arg_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.args.get(parts.next()?)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    /// String view of an argument; numbers are rendered to strings so that
    /// join keys compare equal regardless of their JSON type
    pub fn arg_string(&self, path: &str) -> Option<String> {
        match self.arg_path(path)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn arg_i64(&self, path: &str) -> Option<i64> {
        match self.arg_path(path)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn arg_bool(&self, path: &str) -> Option<bool> {
        match self.arg_path(path)? {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_i64().map(|v| v != 0),
            _ => None,
        }
    }

    /// Session id carried by the event, if any
    pub fn session_id(&self) -> Option<String> {
        self.arg_string("sessionId")
            .or_else(|| self.arg_string("data.sessionId"))
    }

    /// Layer tree id carried by the event, if any
    pub fn layer_tree_id(&self) -> Option<i64> {
        self.arg_i64("layerTreeId")
            .or_else(|| self.arg_i64("data.layerTreeId"))
    }

    /// Document frame id from `data.frame` or `beginData.frame`
    pub fn frame_id(&self) -> Option<String> {
        self.arg_string("data.frame")
            .or_else(|| self.arg_string("beginData.frame"))
    }
}

/// Closed enumeration of the event names the passes react to
///
/// Dispatch goes through [`EventKind::from_name`] so that a new marker name is
/// added in exactly one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // Session and metadata
    TracingStartedInPage,
    TracingStartedInBrowser,
    SetLayerTreeId,
    ThreadName,
    ProcessName,
    ThreadSortIndex,

    // Compositor frame markers
    BeginFrame,
    DrawFrame,
    ActivateLayerTree,
    RequestMainThreadFrame,
    NeedsBeginFrameChanged,
    LayerTreeHostImplSnapshot,

    // Main thread rendering
    BeginMainThreadFrame,
    CompositeLayers,
    ScheduleStyleRecalculation,
    InvalidateLayout,
    RecalculateStyles,
    Layout,
    UpdateLayer,
    UpdateLayerTree,
    Paint,
    ScrollLayer,
    PictureSnapshot,
    DisplayItemListSnapshot,

    // Invalidation tracking
    StyleRecalcInvalidationTracking,
    StyleInvalidatorInvalidationTracking,
    ScheduleStyleInvalidationTracking,
    LayoutInvalidationTracking,
    PaintInvalidationTracking,
    ScrollInvalidationTracking,

    // Sampling profiler
    JitCodeAdded,
    JitCodeMoved,
    V8Sample,
    JsSample,
    JsFrame,

    // Script invocation
    FunctionCall,
    EvaluateScript,
    EvaluateModule,
    RunMicrotasks,
    EventDispatch,
    V8Execute,
}

impl EventKind {
    pub fn from_name(name: &str) -> Option<Self> {
        let kind = match name {
            "TracingStartedInPage" => EventKind::TracingStartedInPage,
            "TracingStartedInBrowser" => EventKind::TracingStartedInBrowser,
            "SetLayerTreeId" => EventKind::SetLayerTreeId,
            "thread_name" => EventKind::ThreadName,
            "process_name" => EventKind::ProcessName,
            "thread_sort_index" => EventKind::ThreadSortIndex,

            "BeginFrame" => EventKind::BeginFrame,
            "DrawFrame" => EventKind::DrawFrame,
            "ActivateLayerTree" => EventKind::ActivateLayerTree,
            "RequestMainThreadFrame" => EventKind::RequestMainThreadFrame,
            "NeedsBeginFrameChanged" => EventKind::NeedsBeginFrameChanged,
            "cc::LayerTreeHostImpl" => EventKind::LayerTreeHostImplSnapshot,

            "BeginMainThreadFrame" => EventKind::BeginMainThreadFrame,
            "CompositeLayers" => EventKind::CompositeLayers,
            "ScheduleStyleRecalculation" => EventKind::ScheduleStyleRecalculation,
            "InvalidateLayout" => EventKind::InvalidateLayout,
            "RecalculateStyles" | "UpdateLayoutTree" => EventKind::RecalculateStyles,
            "Layout" => EventKind::Layout,
            "UpdateLayer" => EventKind::UpdateLayer,
            "UpdateLayerTree" => EventKind::UpdateLayerTree,
            "Paint" => EventKind::Paint,
            "ScrollLayer" => EventKind::ScrollLayer,
            "cc::Picture" | "PictureSnapshot" => EventKind::PictureSnapshot,
            "cc::DisplayItemList" | "DisplayItemListSnapshot" => {
                EventKind::DisplayItemListSnapshot
            }

            "StyleRecalcInvalidationTracking" => EventKind::StyleRecalcInvalidationTracking,
            "StyleInvalidatorInvalidationTracking" => {
                EventKind::StyleInvalidatorInvalidationTracking
            }
            "ScheduleStyleInvalidationTracking" => EventKind::ScheduleStyleInvalidationTracking,
            "LayoutInvalidationTracking" => EventKind::LayoutInvalidationTracking,
            "PaintInvalidationTracking" => EventKind::PaintInvalidationTracking,
            "ScrollInvalidationTracking" => EventKind::ScrollInvalidationTracking,

            "JitCodeAdded" | "V8.JitCodeAdded" => EventKind::JitCodeAdded,
            "JitCodeMoved" | "V8.JitCodeMoved" => EventKind::JitCodeMoved,
            "V8Sample" | "V8.Sample" => EventKind::V8Sample,
            "JSSample" => EventKind::JsSample,
            "JSFrame" => EventKind::JsFrame,

            "FunctionCall" => EventKind::FunctionCall,
            "EvaluateScript" => EventKind::EvaluateScript,
            "v8.evaluateModule" | "EvaluateModule" => EventKind::EvaluateModule,
            "RunMicrotasks" => EventKind::RunMicrotasks,
            "EventDispatch" => EventKind::EventDispatch,
            "V8.Execute" => EventKind::V8Execute,
            _ => return None,
        };
        Some(kind)
    }

    /// Compositor-side markers that drive the threaded frame model
    pub fn is_background_frame_marker(self) -> bool {
        matches!(
            self,
            EventKind::BeginFrame
                | EventKind::DrawFrame
                | EventKind::ActivateLayerTree
                | EventKind::RequestMainThreadFrame
                | EventKind::NeedsBeginFrameChanged
        )
    }

    /// Main-thread events that begin a pending main frame
    pub fn is_main_frame_marker(self) -> bool {
        matches!(
            self,
            EventKind::ScheduleStyleRecalculation
                | EventKind::InvalidateLayout
                | EventKind::BeginMainThreadFrame
                | EventKind::ScrollLayer
        )
    }

    /// Events inside which sampled script frames are attributed
    pub fn is_script_invocation(self) -> bool {
        matches!(
            self,
            EventKind::FunctionCall
                | EventKind::EvaluateScript
                | EventKind::EvaluateModule
                | EventKind::RunMicrotasks
                | EventKind::EventDispatch
                | EventKind::V8Execute
        )
    }
}
