// Frame boundary state machine

use super::frame::{Frame, FrameIndex, FrameState, LayerPaint};
use crate::event::EventId;
use std::collections::{BTreeMap, HashMap};

/// Main-thread work waiting to be committed and activated on the compositor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingFrame {
    /// Start of the task that triggered the main frame
    pub trigger_time: f64,
    pub time_by_category: BTreeMap<String, f64>,
    pub paints: Vec<LayerPaint>,
    pub main_frame_id: Option<i64>,
}

impl PendingFrame {
    pub fn add_time(&mut self, category: &str, time: f64) {
        *self.time_by_category.entry(category.to_string()).or_default() += time;
    }
}

#[derive(Debug, Default)]
pub struct FrameStateMachine {
    frames: Vec<Frame>,
    by_main_frame_id: HashMap<i64, usize>,
    open: Option<Frame>,
    last_layer_tree: Option<EventId>,
    threaded: bool,

    main_frame_requested: bool,
    main_frame_committed: bool,
    pending_commit: Option<PendingFrame>,
    pending_activation: Option<PendingFrame>,
    last_begin_frame: Option<f64>,
    last_needs_begin_frame: Option<f64>,
}

impl FrameStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> FrameState {
        if self.pending_activation.is_some() {
            FrameState::MainFrameActivationPending
        } else if self.pending_commit.is_some() {
            FrameState::MainFrameCommitPending
        } else if self.open.is_some() {
            FrameState::BackgroundFrameOpen
        } else {
            FrameState::Idle
        }
    }

    pub fn is_threaded(&self) -> bool {
        self.threaded
    }

    /// Enter the compositor-threaded model; there is no way back
    pub fn switch_to_threaded(&mut self) {
        if !self.threaded {
            tracing::debug!("frame model switched to compositor-threaded");
        }
        self.threaded = true;
    }

    pub fn open_frame(&self) -> Option<&Frame> {
        self.open.as_ref()
    }

    pub fn closed_frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn handle_begin_frame(&mut self, time: f64) {
        if self.open.is_none() {
            self.start_frame(time);
        }
        self.last_begin_frame = Some(time);
    }

    pub fn handle_draw_frame(&mut self, time: f64) {
        if self.open.is_none() {
            self.start_frame(time);
            return;
        }
        // Only frames that did not wait for the main thread, or had its
        // commit land, become visible.
        if self.main_frame_committed || !self.main_frame_requested {
            if let Some(needs_begin_frame) = self.last_needs_begin_frame.take() {
                let idle_end = match &self.pending_activation {
                    Some(pending) => pending.trigger_time,
                    None => self.last_begin_frame.unwrap_or(needs_begin_frame),
                };
                let open_start = self.open.as_ref().map_or(f64::INFINITY, |f| f.start);
                if idle_end > open_start && idle_end <= time {
                    if let Some(open) = self.open.as_mut() {
                        open.idle = true;
                    }
                    self.start_frame(idle_end);
                    if self.pending_activation.is_some() {
                        self.commit_pending_frame();
                    }
                    self.last_begin_frame = None;
                }
            }
            self.start_frame(time);
        }
        self.main_frame_committed = false;
    }

    pub fn handle_activate_layer_tree(&mut self) {
        if self.open.is_none() {
            return;
        }
        if self.pending_activation.is_some() && self.last_needs_begin_frame.is_none() {
            self.commit_pending_frame();
        }
    }

    pub fn handle_request_main_thread_frame(&mut self) {
        if self.open.is_some() {
            self.main_frame_requested = true;
        }
    }

    pub fn handle_composite_layers(&mut self) {
        let Some(pending) = self.pending_commit.take() else {
            return;
        };
        self.pending_activation = Some(pending);
        self.main_frame_requested = false;
        self.main_frame_committed = true;
    }

    pub fn handle_layer_tree_snapshot(&mut self, snapshot: EventId) {
        self.last_layer_tree = Some(snapshot);
    }

    pub fn handle_needs_begin_frame_changed(&mut self, time: f64, needs_begin_frame: bool) {
        if needs_begin_frame {
            self.last_needs_begin_frame = Some(time);
        }
    }

    /// Single-threaded model: each main-frame marker closes the open frame
    pub fn handle_main_frame_marker(&mut self, time: f64) {
        self.start_frame(time);
    }

    pub fn has_pending_commit(&self) -> bool {
        self.pending_commit.is_some()
    }

    pub fn begin_pending_frame(&mut self, trigger_time: f64, task_times: BTreeMap<String, f64>) {
        self.pending_commit = Some(PendingFrame {
            trigger_time,
            time_by_category: task_times,
            ..PendingFrame::default()
        });
    }

    pub fn pending_commit_mut(&mut self) -> Option<&mut PendingFrame> {
        self.pending_commit.as_mut()
    }

    /// Attribute off-main-thread (or single-threaded) work to the open frame
    pub fn add_time(&mut self, category: &str, time: f64) {
        if let Some(open) = self.open.as_mut() {
            open.add_time(category, time);
        }
    }

    pub fn add_paint(&mut self, paint: LayerPaint) {
        if let Some(open) = self.open.as_mut() {
            open.paints.push(paint);
        }
    }

    /// Closed frames; the still-open frame has no known end and is dropped
    pub fn finish(self) -> FrameIndex {
        let state = self.state();
        FrameIndex {
            frames: self.frames,
            by_main_frame_id: self.by_main_frame_id,
            state,
            threaded: self.threaded,
        }
    }

    fn start_frame(&mut self, time: f64) {
        if let Some(open) = self.open.take() {
            self.flush_frame(open, time);
        }
        self.open = Some(Frame::open(time));
    }

    fn flush_frame(&mut self, mut frame: Frame, end: f64) {
        frame.layer_tree = self.last_layer_tree;
        frame.end = end;
        if let Some(last) = self.frames.last() {
            if frame.start != last.end || frame.start > frame.end {
                tracing::warn!(
                    index = self.frames.len(),
                    start = frame.start,
                    end = frame.end,
                    "inconsistent frame bounds"
                );
            }
        }
        if let Some(id) = frame.main_frame_id {
            self.by_main_frame_id.insert(id, self.frames.len());
        }
        self.frames.push(frame);
    }

    fn commit_pending_frame(&mut self) {
        let Some(pending) = self.pending_activation.take() else {
            return;
        };
        if let Some(open) = self.open.as_mut() {
            open.add_times(&pending.time_by_category);
            open.paints = pending.paints;
            open.main_frame_id = pending.main_frame_id;
        }
    }
}
