//! Performance model lifecycle and query surface
//!
//! Batches are collected with [`PerformanceModel::add_events`] (or
//! [`PerformanceModel::add_trace_json`]) and interpreted in one go by
//! [`PerformanceModel::tracing_complete`]. Once complete the model is
//! read-only until [`PerformanceModel::reset`].

use crate::async_events::{pair_async, AsyncEvent, AsyncIndex};
use crate::call_tree::{
    build_bottom_up_tree, build_top_down_tree, GroupFn, ProfileTree, TopDownQuery,
};
use crate::config::ModelConfig;
use crate::diagnostics::Diagnostics;
use crate::error::{ModelError, Result};
use crate::event::{EventId, RawEvent, ThreadKey};
use crate::frames::{build_frames, Frame, FrameIndex};
use crate::hierarchy::{build_records, Record, RecordId, RecordTree};
use crate::invalidation::{track_invalidations, Invalidation, InvalidationId, InvalidationIndex};
use crate::normalizer::{Normalizer, TraceData};
use crate::stack_reconstructor::{generate_frame_events, replay_raw_samples};
use crate::thread::{ThreadInfo, ThreadSelector};
use crate::trace_format::parse_trace_json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation, observed only between passes
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct Built {
    data: TraceData,
    records: RecordTree,
    async_index: AsyncIndex,
    invalidations: InvalidationIndex,
    frames: FrameIndex,
}

pub struct PerformanceModel {
    config: ModelConfig,
    pending: Vec<RawEvent>,
    diagnostics: Diagnostics,
    built: Built,
    complete: bool,
}

impl PerformanceModel {
    pub fn new(config: ModelConfig) -> Self {
        let diagnostics = Diagnostics::with_cap(config.max_diagnostics);
        Self {
            config,
            pending: Vec::new(),
            diagnostics,
            built: Built::default(),
            complete: false,
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Discard all state, keeping the configuration
    pub fn reset(&mut self) {
        self.pending.clear();
        self.diagnostics = Diagnostics::with_cap(self.config.max_diagnostics);
        self.built = Built::default();
        self.complete = false;
    }

    /// Ingest one batch; events need not be sorted
    pub fn add_events(&mut self, batch: Vec<RawEvent>) -> Result<()> {
        if self.complete {
            return Err(ModelError::Sealed);
        }
        tracing::debug!(events = batch.len(), "ingesting batch");
        self.pending.extend(batch);
        Ok(())
    }

    /// Parse a trace-event JSON document and ingest its events
    pub fn add_trace_json(&mut self, text: &str) -> Result<usize> {
        if self.complete {
            return Err(ModelError::Sealed);
        }
        let events = parse_trace_json(text, self.config.timestamp_unit, &mut self.diagnostics)?;
        let count = events.len();
        self.add_events(events)?;
        Ok(count)
    }

    pub fn tracing_complete(&mut self) -> Result<()> {
        self.tracing_complete_with(&CancelFlag::new())
    }

    /// Run every pass over the ingested events
    ///
    /// A cancellation observed before a pass discards the partial model and
    /// returns [`ModelError::Cancelled`].
    pub fn tracing_complete_with(&mut self, cancel: &CancelFlag) -> Result<()> {
        if self.complete {
            return Err(ModelError::Sealed);
        }
        match self.run_passes(cancel) {
            Ok(built) => {
                self.built = built;
                self.complete = true;
                tracing::info!(
                    events = self.built.data.events.len(),
                    records = self.built.records.len(),
                    frames = self.built.frames.len(),
                    diagnostics = self.diagnostics.total(),
                    "model complete"
                );
                Ok(())
            }
            Err(err) => {
                tracing::warn!("model build aborted: {}", err);
                self.reset();
                Err(err)
            }
        }
    }

    fn run_passes(&mut self, cancel: &CancelFlag) -> Result<Built> {
        let checkpoint = |pass: &'static str| {
            if cancel.is_cancelled() {
                Err(ModelError::Cancelled(pass))
            } else {
                Ok(())
            }
        };
        let config = &self.config;
        let diagnostics = &mut self.diagnostics;

        checkpoint("normalize")?;
        let events = std::mem::take(&mut self.pending);
        let mut data = Normalizer::new(config, diagnostics).normalize(events);

        checkpoint("async")?;
        let async_index = pair_async(&mut data, config, diagnostics);

        checkpoint("samples")?;
        replay_raw_samples(&mut data, config, diagnostics);
        generate_frame_events(&mut data, config, diagnostics);

        checkpoint("hierarchy")?;
        let records = build_records(&data, config, diagnostics);

        checkpoint("invalidation")?;
        let invalidations = track_invalidations(&data, &records, config, diagnostics);

        checkpoint("frames")?;
        let frames = build_frames(&data, &records, &invalidations, config);

        Ok(Built {
            data,
            records,
            async_index,
            invalidations,
            frames,
        })
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn event(&self, id: EventId) -> Option<&RawEvent> {
        self.built.data.events.get(id.0)
    }

    pub fn trace_data(&self) -> &TraceData {
        &self.built.data
    }

    pub fn threads(&self) -> impl Iterator<Item = &ThreadInfo> {
        self.built.data.registry.threads()
    }

    pub fn main_thread(&self) -> Option<ThreadKey> {
        self.built.data.registry.main_thread()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.built.data.session.id.as_deref()
    }

    /// Top-level records of the selected threads, thread by thread
    pub fn records(&self, selector: &ThreadSelector) -> Vec<RecordId> {
        self.built
            .data
            .registry
            .select(selector)
            .into_iter()
            .flat_map(|thread| self.built.records.roots(thread).iter().copied())
            .collect()
    }

    pub fn record(&self, id: RecordId) -> &Record {
        self.built.records.get(id)
    }

    pub fn record_tree(&self) -> &RecordTree {
        &self.built.records
    }

    /// Frames overlapping the window, in time order
    pub fn frames(&self, start: Option<f64>, end: Option<f64>) -> &[Frame] {
        self.built.frames.frames(start, end)
    }

    pub fn frame_index(&self) -> &FrameIndex {
        &self.built.frames
    }

    pub fn async_events(&self, group: &str) -> &[AsyncEvent] {
        self.built.async_index.events(group)
    }

    pub fn async_group_names(&self) -> Vec<&str> {
        self.built.async_index.group_names().collect()
    }

    pub fn initiator_of(&self, effect: EventId) -> Option<EventId> {
        self.built.async_index.initiator_of(effect)
    }

    pub fn effects_of(&self, initiator: EventId) -> &[EventId] {
        self.built.async_index.effects_of(initiator)
    }

    pub fn invalidations_for(&self, event: EventId) -> Vec<(InvalidationId, &Invalidation)> {
        self.built.invalidations.invalidations_for(event)
    }

    pub fn invalidation(&self, id: InvalidationId) -> Option<&Invalidation> {
        self.built.invalidations.invalidation(id)
    }

    pub fn invalidation_index(&self) -> &InvalidationIndex {
        &self.built.invalidations
    }

    pub fn picture_for(&self, paint: EventId) -> Option<EventId> {
        self.built.invalidations.picture_for(paint)
    }

    pub fn build_top_down_tree(
        &self,
        selector: &ThreadSelector,
        query: &TopDownQuery<'_>,
    ) -> ProfileTree {
        let roots = self.records(selector);
        build_top_down_tree(&self.built.data, &self.built.records, &roots, query)
    }

    pub fn build_bottom_up_tree(
        &self,
        top_down: &ProfileTree,
        group_fn: Option<&GroupFn<'_>>,
    ) -> ProfileTree {
        build_bottom_up_tree(top_down, &self.built.data, group_fn)
    }

    pub fn minimum_record_time(&self) -> Option<f64> {
        self.built.data.min_time
    }

    pub fn maximum_record_time(&self) -> Option<f64> {
        self.built.data.max_time
    }
}
