//! tracemodel - performance model builder for trace-event captures
//!
//! Ingests batches of Chrome trace-event records and builds a navigable
//! model: per-thread record hierarchies, causally paired async chains, a
//! frame timeline, style/layout/paint invalidation attribution, call
//! stacks reconstructed from raw samples, and top-down/bottom-up call trees.
//!
//! ```no_run
//! use tracemodel::{ModelConfig, PerformanceModel, ThreadSelector};
//! use tracemodel::call_tree::TopDownQuery;
//!
//! let mut model = PerformanceModel::new(ModelConfig::default());
//! model.add_trace_json(r#"{"traceEvents": []}"#)?;
//! model.tracing_complete()?;
//! let tree = model.build_top_down_tree(&ThreadSelector::Main, &TopDownQuery::default());
//! println!("{} ms", tree.root().total_time);
//! # Ok::<(), tracemodel::ModelError>(())
//! ```

pub mod async_events;
pub mod call_tree;
pub mod cli;
pub mod code_map;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod event;
pub mod filter;
pub mod frames;
pub mod hierarchy;
pub mod invalidation;
pub mod model;
pub mod normalizer;
pub mod report;
pub mod stack_reconstructor;
pub mod thread;
pub mod trace_format;

pub use config::ModelConfig;
pub use diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
pub use error::{ModelError, Result};
pub use event::{EventId, EventKind, Phase, RawEvent, ThreadKey};
pub use model::{CancelFlag, PerformanceModel};
pub use thread::{ThreadRole, ThreadSelector};
