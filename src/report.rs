//! Summary report over a completed model
//!
//! Collects capture bounds, per-thread record counts, frame statistics,
//! the heaviest bottom-up activities, async group sizes and diagnostic
//! counts. Rendered as JSON or as plain text.

use crate::call_tree::{id_by_function, GroupFn, ProfileTree, TopDownQuery};
use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::error::Result;
use crate::filter::EventFilter;
use crate::frames::FrameState;
use crate::model::PerformanceModel;
use crate::thread::{ThreadRole, ThreadSelector};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;

/// Number of diagnostics reproduced verbatim in a report
const DIAGNOSTIC_SAMPLES: usize = 10;

/// What a report covers
pub struct ReportOptions<'a> {
    pub selector: ThreadSelector,
    pub window: Option<(f64, f64)>,
    pub top: usize,
    pub filters: &'a [Box<dyn EventFilter>],
    pub group_fn: Option<&'a GroupFn<'a>>,
}

impl Default for ReportOptions<'_> {
    fn default() -> Self {
        Self {
            selector: ThreadSelector::Main,
            window: None,
            top: 15,
            filters: &[],
            group_fn: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CaptureSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub start: Option<f64>,
    pub end: Option<f64>,
    pub duration: f64,
    pub events: usize,
    pub records: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main_thread: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThreadSummary {
    pub thread: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub role: ThreadRole,
    pub top_level_records: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameSummary {
    pub count: usize,
    pub idle: usize,
    pub mean_duration: f64,
    pub longest: f64,
    pub threaded: bool,
    pub state: FrameState,
    pub time_by_category: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivitySummary {
    pub name: String,
    pub self_time: f64,
    pub total_time: f64,
    pub is_group: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticSummary {
    pub total: usize,
    pub by_kind: BTreeMap<String, usize>,
    pub samples: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub capture: CaptureSummary,
    pub threads: Vec<ThreadSummary>,
    pub frames: FrameSummary,
    pub activities: Vec<ActivitySummary>,
    pub async_groups: BTreeMap<String, usize>,
    pub diagnostics: DiagnosticSummary,
}

impl Report {
    pub fn build(model: &PerformanceModel, options: &ReportOptions<'_>) -> Self {
        let (start, end) = options.window.unzip();

        let capture = CaptureSummary {
            session_id: model.session_id().map(str::to_string),
            start: model.minimum_record_time(),
            end: model.maximum_record_time(),
            duration: match (model.minimum_record_time(), model.maximum_record_time()) {
                (Some(min), Some(max)) => max - min,
                _ => 0.0,
            },
            events: model.trace_data().events.len(),
            records: model.record_tree().len(),
            main_thread: model.main_thread().map(|key| key.to_string()),
        };

        let threads = model
            .threads()
            .map(|info| ThreadSummary {
                thread: info.key.to_string(),
                name: info.name.clone(),
                role: info.role,
                top_level_records: model.records(&ThreadSelector::Key(info.key)).len(),
            })
            .collect();

        let frames = frame_summary(model, start, end);

        let query = TopDownQuery {
            start: start.unwrap_or(f64::NEG_INFINITY),
            end: end.unwrap_or(f64::INFINITY),
            filters: options.filters,
            id_fn: Some(&id_by_function),
        };
        let top_down = model.build_top_down_tree(&options.selector, &query);
        let bottom_up = model.build_bottom_up_tree(&top_down, options.group_fn);
        let activities = heaviest(&bottom_up, options.top);

        let async_groups = model
            .async_group_names()
            .into_iter()
            .map(|group| (group.to_string(), model.async_events(group).len()))
            .collect();

        let diags = model.diagnostics();
        let by_kind = [
            DiagnosticKind::MalformedEvent,
            DiagnosticKind::ConsistencyViolation,
            DiagnosticKind::UnresolvedReference,
        ]
        .into_iter()
        .map(|kind| (kind.to_string(), diags.count(kind)))
        .collect();
        let diagnostics = DiagnosticSummary {
            total: diags.total(),
            by_kind,
            samples: diags.entries().iter().take(DIAGNOSTIC_SAMPLES).cloned().collect(),
        };

        Self {
            capture,
            threads,
            frames,
            activities,
            async_groups,
            diagnostics,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail
        let _ = self.write_text(&mut out);
        out
    }

    fn write_text(&self, out: &mut String) -> std::fmt::Result {
        let capture = &self.capture;
        writeln!(out, "Capture")?;
        if let Some(session) = &capture.session_id {
            writeln!(out, "  session      {session}")?;
        }
        if let (Some(start), Some(end)) = (capture.start, capture.end) {
            writeln!(
                out,
                "  window       {start:.3} .. {end:.3} ms ({:.3} ms)",
                capture.duration
            )?;
        }
        writeln!(out, "  events       {}", capture.events)?;
        writeln!(out, "  records      {}", capture.records)?;
        if let Some(main) = &capture.main_thread {
            writeln!(out, "  main thread  {main}")?;
        }

        writeln!(out)?;
        writeln!(out, "Threads")?;
        for thread in &self.threads {
            writeln!(
                out,
                "  {:<12} {:<11} {:>7} records  {}",
                thread.thread,
                thread.role.to_string(),
                thread.top_level_records,
                thread.name.as_deref().unwrap_or("")
            )?;
        }

        let frames = &self.frames;
        writeln!(out)?;
        writeln!(
            out,
            "Frames ({} model)",
            if frames.threaded { "threaded" } else { "single-thread" }
        )?;
        writeln!(
            out,
            "  {} frames, {} idle, mean {:.3} ms, longest {:.3} ms",
            frames.count, frames.idle, frames.mean_duration, frames.longest
        )?;
        for (category, time) in &frames.time_by_category {
            writeln!(out, "  {category:<12} {time:>10.3} ms")?;
        }

        writeln!(out)?;
        writeln!(out, "Heaviest activities (self time)")?;
        writeln!(out, "  {:>10}  {:>10}  name", "self ms", "total ms")?;
        for activity in &self.activities {
            let marker = if activity.is_group { "[group] " } else { "" };
            writeln!(
                out,
                "  {:>10.3}  {:>10.3}  {marker}{}",
                activity.self_time, activity.total_time, activity.name
            )?;
        }

        if !self.async_groups.is_empty() {
            writeln!(out)?;
            writeln!(out, "Async groups")?;
            for (group, count) in &self.async_groups {
                writeln!(out, "  {group:<16} {count:>6}")?;
            }
        }

        let diags = &self.diagnostics;
        writeln!(out)?;
        writeln!(out, "Diagnostics: {}", diags.total)?;
        for (kind, count) in diags.by_kind.iter().filter(|(_, count)| **count > 0) {
            writeln!(out, "  {kind:<22} {count:>6}")?;
        }
        for diag in &diags.samples {
            match diag.timestamp {
                Some(ts) => writeln!(out, "  - [{ts:.3}] {}", diag.message)?,
                None => writeln!(out, "  - {}", diag.message)?,
            }
        }
        Ok(())
    }
}

fn frame_summary(model: &PerformanceModel, start: Option<f64>, end: Option<f64>) -> FrameSummary {
    let index = model.frame_index();
    let frames = model.frames(start, end);
    let mut time_by_category: BTreeMap<String, f64> = BTreeMap::new();
    for frame in frames {
        for (category, time) in &frame.time_by_category {
            *time_by_category.entry(category.clone()).or_default() += time;
        }
    }
    let total: f64 = frames.iter().map(|f| f.duration()).sum();
    FrameSummary {
        count: frames.len(),
        idle: frames.iter().filter(|f| f.idle).count(),
        mean_duration: if frames.is_empty() {
            0.0
        } else {
            total / frames.len() as f64
        },
        longest: frames.iter().map(|f| f.duration()).fold(0.0, f64::max),
        threaded: index.is_threaded(),
        state: index.state(),
        time_by_category,
    }
}

/// First-level bottom-up entries by descending self time
fn heaviest(bottom_up: &ProfileTree, top: usize) -> Vec<ActivitySummary> {
    let mut entries: Vec<ActivitySummary> = bottom_up
        .children(ProfileTree::ROOT)
        .iter()
        .map(|id| {
            let node = bottom_up.get(*id);
            ActivitySummary {
                name: node.name.clone(),
                self_time: node.self_time,
                total_time: node.total_time,
                is_group: node.is_group,
            }
        })
        .collect();
    entries.sort_by(|a, b| {
        b.self_time
            .total_cmp(&a.self_time)
            .then_with(|| a.name.cmp(&b.name))
    });
    entries.truncate(top);
    entries
}
