//! Call-stack reconstruction from raw program-counter samples
//!
//! Two steps, both per capture:
//!
//! 1. [`replay_raw_samples`] replays `JitCodeAdded`/`JitCodeMoved` into a
//!    [`CodeMap`] per process and resolves every `V8Sample` address list into
//!    a synthetic `JSSample` instant carrying the symbolic stack.
//! 2. [`generate_frame_events`] walks one thread's events and turns runs of
//!    samples sharing a frame at some depth into `JSFrame` complete events.
//!
//! The sampling interval is estimated on the fly with an exponential moving
//! average of inter-sample gaps; gaps above the pause threshold are profiler
//! pauses and leave the estimate untouched.

use crate::code_map::{parse_address, CodeMap};
use crate::config::{ModelConfig, SamplingConfig};
use crate::diagnostics::Diagnostics;
use crate::event::{CallFrame, EventId, EventKind, Phase, RawEvent, ThreadKey};
use crate::normalizer::TraceData;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};

pub const JS_SAMPLE: &str = "JSSample";
pub const JS_FRAME: &str = "JSFrame";
const TIMELINE_CATEGORY: &str = "devtools.timeline";

/// Parse a compiled-code name such as `LazyCompile:*render app.js:10:5`
///
/// Line and column are converted to zero-based positions. A frame is native
/// when its kind prefix is one of `native_kinds`.
pub fn parse_code_name(name: &str, native_kinds: &[String]) -> CallFrame {
    let (kind, rest) = match name.split_once(':') {
        Some((kind, rest))
            if !kind.is_empty() && kind.chars().all(|c| c.is_alphanumeric() || c == '_') =>
        {
            (Some(kind), rest)
        }
        _ => (None, name),
    };
    let rest = rest.trim_start_matches(|c| c == '*' || c == '~');

    let mut frame = CallFrame::new(rest);
    if let Some((function, location)) = rest.rsplit_once(' ') {
        let mut parts = location.rsplitn(3, ':');
        let column = parts.next().and_then(|c| c.parse::<i64>().ok());
        let line = parts.next().and_then(|l| l.parse::<i64>().ok());
        let url = parts.next();
        if let (Some(column), Some(line), Some(url)) = (column, line, url) {
            frame.function_name = function.to_string();
            frame.url = url.to_string();
            frame.line_number = line.saturating_sub(1);
            frame.column_number = column.saturating_sub(1);
        } else {
            frame.function_name = function.to_string();
            frame.url = location.to_string();
        }
    }
    frame.native = kind.is_some_and(|k| native_kinds.iter().any(|n| n == k));
    frame
}

/// Per-process replay state
struct ProcessReplay {
    code_map: CodeMap,
    missing: BTreeSet<u64>,
}

/// Resolve raw samples into `JSSample` events appended to their threads.
/// Returns the number of samples emitted.
pub fn replay_raw_samples(
    data: &mut TraceData,
    config: &ModelConfig,
    diagnostics: &mut Diagnostics,
) -> usize {
    let sampling = &config.sampling;
    let mut processes: BTreeMap<u64, ProcessReplay> = BTreeMap::new();
    let mut produced: BTreeMap<ThreadKey, Vec<RawEvent>> = BTreeMap::new();

    for id in data.events_in_time_order() {
        let event = data.event(id);
        let kind = event.kind();
        if !matches!(
            kind,
            Some(EventKind::JitCodeAdded | EventKind::JitCodeMoved | EventKind::V8Sample)
        ) {
            continue;
        }
        let replay = processes.entry(event.pid).or_insert_with(|| ProcessReplay {
            code_map: CodeMap::new(config.code_map.bank_bits),
            missing: BTreeSet::new(),
        });

        match kind {
            Some(EventKind::JitCodeAdded) => {
                let start = event.arg_path("data.code_start").and_then(parse_address);
                let size = event.arg_path("data.code_len").and_then(parse_address);
                let (Some(start), Some(size)) = (start, size) else {
                    diagnostics.malformed("JitCodeAdded without code_start/code_len", Some(event.timestamp));
                    continue;
                };
                let name = event.arg_string("data.name").unwrap_or_default();
                let mut frame = parse_code_name(&name, &sampling.native_kinds);
                if let Some(script_id) = event.arg_string("data.script_id") {
                    frame.script_id = script_id;
                }
                replay.code_map.add_entry(start, size, frame);
            }
            Some(EventKind::JitCodeMoved) => {
                let old = event.arg_path("data.code_start").and_then(parse_address);
                let new = event.arg_path("data.new_code_start").and_then(parse_address);
                let size = event.arg_path("data.code_len").and_then(parse_address);
                let (Some(old), Some(new), Some(size)) = (old, new, size) else {
                    diagnostics.malformed("JitCodeMoved without addresses", Some(event.timestamp));
                    continue;
                };
                if !replay.code_map.move_entry(old, new, size) {
                    diagnostics.unresolved(
                        format!("code move from unknown address {old:#x}"),
                        Some(event.timestamp),
                    );
                }
            }
            _ => {
                let raw_stack: Vec<&Value> = event
                    .arg_path("data.stack")
                    .and_then(Value::as_array)
                    .map(|stack| stack.iter().collect())
                    .unwrap_or_default();
                let vm_state = event.arg_string("data.vm_state");
                if sampling.skip_empty_js_samples
                    && raw_stack.is_empty()
                    && vm_state.as_deref() == Some("js")
                {
                    continue;
                }
                // Raw stacks are bottom frame first; resolved stacks are top first.
                let mut stack = Vec::with_capacity(raw_stack.len());
                for value in raw_stack.iter().rev() {
                    let Some(address) = parse_address(value) else {
                        continue;
                    };
                    match replay.code_map.lookup(address) {
                        Some(frame) if frame.native && !sampling.keep_native_frames => {}
                        Some(frame) => stack.push(frame.clone()),
                        None => {
                            replay.missing.insert(address);
                        }
                    }
                }
                let mut sample = RawEvent::instant(JS_SAMPLE, event.timestamp)
                    .with_thread(event.pid, event.tid)
                    .with_categories(&[TIMELINE_CATEGORY]);
                if let Some(vm_state) = vm_state {
                    sample.args.insert("data".to_string(), json!({ "vmState": vm_state }));
                }
                sample.stack_trace = Some(stack);
                produced.entry(event.thread()).or_default().push(sample);
            }
        }
    }

    for (pid, replay) in &processes {
        if !replay.missing.is_empty() {
            diagnostics.unresolved(
                format!(
                    "{} sampled addresses in process {pid} matched no code range",
                    replay.missing.len()
                ),
                None,
            );
        }
    }

    let mut count = 0;
    for (key, samples) in produced {
        count += samples.len();
        data.append_events(key, samples);
    }
    if count > 0 {
        tracing::info!(samples = count, "resolved raw stack samples");
    }
    count
}

/// One open synthetic frame
struct OpenFrame {
    frame: CallFrame,
    start: f64,
    end: f64,
    thread: ThreadKey,
}

/// Turns per-thread stack samples into nested `JSFrame` events
pub struct FrameEventGenerator<'a> {
    config: &'a SamplingConfig,
    diagnostics: &'a mut Diagnostics,
    stack: Vec<OpenFrame>,
    locked_depth: Vec<usize>,
    interval: f64,
    last_sample_time: Option<f64>,
    finished: Vec<OpenFrame>,
}

impl<'a> FrameEventGenerator<'a> {
    pub fn new(config: &'a SamplingConfig, diagnostics: &'a mut Diagnostics) -> Self {
        Self {
            config,
            diagnostics,
            stack: Vec::new(),
            locked_depth: Vec::new(),
            interval: config.initial_interval,
            last_sample_time: None,
            finished: Vec::new(),
        }
    }

    /// Current estimate of the sampling interval (ms)
    pub fn sampling_interval(&self) -> f64 {
        self.interval
    }

    fn on_start(&mut self, event: &RawEvent) {
        self.extract_stack(event, None);
        self.locked_depth.push(self.stack.len());
    }

    fn on_end(&mut self, end: f64) {
        let depth = self.locked_depth.pop().unwrap_or(0);
        self.truncate(depth, end);
    }

    fn on_instant(&mut self, event: &RawEvent, inside_script: bool) {
        if event.name != JS_SAMPLE || !inside_script {
            return;
        }
        let Some(stack) = event.stack_trace.as_ref() else {
            return;
        };
        self.update_interval(event.timestamp);
        let bottom_first: Vec<CallFrame> = stack
            .iter()
            .rev()
            .filter(|frame| self.config.keep_native_frames || !frame.native)
            .cloned()
            .collect();
        self.extract_stack(event, Some(bottom_first));
    }

    fn update_interval(&mut self, time: f64) {
        if let Some(last) = self.last_sample_time {
            let delta = time - last;
            if delta >= 0.0 && delta < self.config.pause_threshold {
                self.interval += (delta - self.interval) / self.config.ema_window;
            }
        }
        self.last_sample_time = Some(time);
    }

    /// Extend frames shared with `frames` (bottom first); `None` means the
    /// current stack, which only stretches open frames over `event`
    fn extract_stack(&mut self, event: &RawEvent, frames: Option<Vec<CallFrame>>) {
        let end = event.end_time();
        let frames = match frames {
            Some(frames) => frames,
            None => self.stack.iter().map(|open| open.frame.clone()).collect(),
        };
        let locked = self.locked_depth.last().copied().unwrap_or(0);
        let shared = frames.len().min(self.stack.len());
        let mut depth = locked.min(shared);
        while depth < shared && frames[depth].same_function(&self.stack[depth].frame) {
            let open = &mut self.stack[depth];
            open.end = open.end.max(end);
            depth += 1;
        }
        self.truncate(depth, event.timestamp);
        for frame in frames.into_iter().skip(self.stack.len()) {
            self.stack.push(OpenFrame {
                frame,
                start: event.timestamp,
                end,
                thread: event.thread(),
            });
        }
    }

    fn truncate(&mut self, depth: usize, time: f64) {
        let mut depth = depth;
        if let Some(&locked) = self.locked_depth.last() {
            if depth < locked {
                self.diagnostics.consistency(
                    format!("sampled stack shallower ({depth}) than enclosing event ({locked})"),
                    Some(time),
                );
                depth = locked;
            }
        }
        if depth >= self.stack.len() {
            return;
        }
        let floor = self.interval / 2.0;
        for mut open in self.stack.drain(depth..) {
            open.end = (open.end + floor).min(time).max(open.start);
            self.finished.push(open);
        }
    }

    /// Walk one thread's ordered events and produce `JSFrame` events
    pub fn generate(mut self, events: &[&RawEvent]) -> Vec<RawEvent> {
        // (end time, is script invocation) of the open enclosing events
        let mut open: Vec<(f64, bool)> = Vec::new();
        for event in events {
            if event.name == JS_FRAME || event.phase.is_async() || event.phase == Phase::Metadata
            {
                continue;
            }
            while let Some(&(end, _)) = open.last() {
                if end > event.timestamp {
                    break;
                }
                open.pop();
                self.on_end(end);
            }
            if event.duration.is_some() {
                self.on_start(event);
                let script = event.kind().is_some_and(EventKind::is_script_invocation);
                open.push((event.end_time(), script));
            } else {
                let inside_script = open.iter().any(|&(_, script)| script);
                self.on_instant(event, inside_script);
            }
        }
        while let Some((end, _)) = open.pop() {
            self.on_end(end);
        }
        let last = self.stack.last().map(|open| open.end);
        if let Some(last) = last {
            self.truncate(0, last);
        }

        let mut finished = self.finished;
        // Enclosing frames first when starts tie
        finished.sort_by(|a, b| {
            a.start
                .total_cmp(&b.start)
                .then((b.end - b.start).total_cmp(&(a.end - a.start)))
        });
        finished
            .into_iter()
            .map(|open| {
                let mut event = RawEvent::complete(JS_FRAME, open.start, open.end - open.start)
                    .with_thread(open.thread.pid, open.thread.tid)
                    .with_categories(&[TIMELINE_CATEGORY]);
                event.args.insert("data".to_string(), open.frame.to_value());
                if !open.frame.url.is_empty() {
                    event.url = Some(open.frame.url.clone());
                }
                event
            })
            .collect()
    }
}

/// The call frame a `JSFrame` event stands for
pub fn js_frame_of(event: &RawEvent) -> Option<CallFrame> {
    if event.name != JS_FRAME {
        return None;
    }
    CallFrame::from_value(event.args.get("data")?)
}

/// Generate `JSFrame` events for every thread that carries samples
pub fn generate_frame_events(
    data: &mut TraceData,
    config: &ModelConfig,
    diagnostics: &mut Diagnostics,
) -> usize {
    let sampled: Vec<ThreadKey> = data
        .threads
        .iter()
        .filter(|(_, thread)| {
            thread
                .events()
                .iter()
                .any(|id| data.event(*id).name == JS_SAMPLE)
        })
        .map(|(key, _)| *key)
        .collect();

    let mut total = 0;
    for key in sampled {
        let ids: Vec<EventId> = data.threads[&key].events().to_vec();
        let events: Vec<&RawEvent> = ids.iter().map(|id| data.event(*id)).collect();
        let frames = FrameEventGenerator::new(&config.sampling, diagnostics).generate(&events);
        total += frames.len();
        data.append_events(key, frames);
    }
    if total > 0 {
        tracing::info!(frames = total, "generated sampled frame events");
    }
    total
}
