// Frame values and the finished frame list

use crate::event::EventId;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameState {
    #[default]
    Idle,
    BackgroundFrameOpen,
    MainFrameCommitPending,
    MainFrameActivationPending,
}

/// A paint of a composited layer with its recorded picture
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerPaint {
    pub paint: EventId,
    pub layer_id: String,
    pub picture: EventId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    pub start: f64,
    /// Exclusive
    pub end: f64,
    pub time_by_category: BTreeMap<String, f64>,
    /// Sum of `time_by_category`
    pub cpu_time: f64,
    pub idle: bool,
    /// Layer tree snapshot current when the frame closed
    pub layer_tree: Option<EventId>,
    pub paints: Vec<LayerPaint>,
    pub main_frame_id: Option<i64>,
}

impl Frame {
    pub(crate) fn open(start: f64) -> Self {
        Self {
            start,
            end: start,
            time_by_category: BTreeMap::new(),
            cpu_time: 0.0,
            idle: false,
            layer_tree: None,
            paints: Vec::new(),
            main_frame_id: None,
        }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub(crate) fn add_time(&mut self, category: &str, time: f64) {
        *self.time_by_category.entry(category.to_string()).or_default() += time;
        self.cpu_time += time;
    }

    pub(crate) fn add_times(&mut self, times: &BTreeMap<String, f64>) {
        for (category, time) in times {
            self.add_time(category, *time);
        }
    }
}

/// Closed frames in time order
#[derive(Debug, Clone, Default)]
pub struct FrameIndex {
    pub(crate) frames: Vec<Frame>,
    pub(crate) by_main_frame_id: HashMap<i64, usize>,
    pub(crate) state: FrameState,
    pub(crate) threaded: bool,
}

impl FrameIndex {
    pub fn all(&self) -> &[Frame] {
        &self.frames
    }

    /// Frames overlapping `[start, end)`; open bounds extend to the capture
    pub fn frames(&self, start: Option<f64>, end: Option<f64>) -> &[Frame] {
        let first = match start {
            Some(start) => self.frames.partition_point(|f| f.end <= start),
            None => 0,
        };
        let last = match end {
            Some(end) => self.frames.partition_point(|f| f.start < end),
            None => self.frames.len(),
        };
        if first >= last {
            return &[];
        }
        &self.frames[first..last]
    }

    /// Frame whose interval contains `time`
    pub fn frame_at(&self, time: f64) -> Option<&Frame> {
        let index = self.frames.partition_point(|f| f.end <= time);
        self.frames.get(index).filter(|f| f.start <= time)
    }

    pub fn frame_by_main_frame_id(&self, id: i64) -> Option<&Frame> {
        self.by_main_frame_id.get(&id).map(|index| &self.frames[*index])
    }

    /// State the machine was left in when the capture ended
    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Whether the compositor-threaded model was in effect
    pub fn is_threaded(&self) -> bool {
        self.threaded
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
