//! Recoverable input defects collected while building a model
//!
//! A capture log is defective by nature (dropped packets, truncated files,
//! mixed producer versions). Every pass keeps going and reports what it had
//! to skip, clamp or leave unresolved here.

use serde::Serialize;
use std::fmt;

/// Class of a recoverable defect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// Missing required field; the event was dropped
    MalformedEvent,
    /// Inconsistent nesting, negative self time, foreign session; clamped or ignored
    ConsistencyViolation,
    /// A reference could not be resolved; the derived field stays empty
    UnresolvedReference,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiagnosticKind::MalformedEvent => "malformed event",
            DiagnosticKind::ConsistencyViolation => "consistency violation",
            DiagnosticKind::UnresolvedReference => "unresolved reference",
        };
        f.write_str(name)
    }
}

/// A single recorded defect
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    /// Timestamp (ms) of the offending event, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

/// Bounded collector of diagnostics with exact per-kind counts
#[derive(Debug, Clone)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
    cap: usize,
    malformed: usize,
    consistency: usize,
    unresolved: usize,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::with_cap(1000)
    }
}

impl Diagnostics {
    pub fn with_cap(cap: usize) -> Self {
        Self {
            entries: Vec::new(),
            cap,
            malformed: 0,
            consistency: 0,
            unresolved: 0,
        }
    }

    pub fn malformed(&mut self, message: impl Into<String>, timestamp: Option<f64>) {
        let message = message.into();
        tracing::warn!(?timestamp, "malformed event dropped: {}", message);
        self.push(DiagnosticKind::MalformedEvent, message, timestamp);
    }

    pub fn consistency(&mut self, message: impl Into<String>, timestamp: Option<f64>) {
        let message = message.into();
        tracing::warn!(?timestamp, "consistency violation: {}", message);
        self.push(DiagnosticKind::ConsistencyViolation, message, timestamp);
    }

    pub fn unresolved(&mut self, message: impl Into<String>, timestamp: Option<f64>) {
        let message = message.into();
        tracing::debug!(?timestamp, "unresolved reference: {}", message);
        self.push(DiagnosticKind::UnresolvedReference, message, timestamp);
    }

    fn push(&mut self, kind: DiagnosticKind, message: String, timestamp: Option<f64>) {
        match kind {
            DiagnosticKind::MalformedEvent => self.malformed += 1,
            DiagnosticKind::ConsistencyViolation => self.consistency += 1,
            DiagnosticKind::UnresolvedReference => self.unresolved += 1,
        }
        if self.entries.len() < self.cap {
            self.entries.push(Diagnostic {
                kind,
                message,
                timestamp,
            });
        }
    }

    /// Number of defects of `kind`, including those past the storage cap
    pub fn count(&self, kind: DiagnosticKind) -> usize {
        match kind {
            DiagnosticKind::MalformedEvent => self.malformed,
            DiagnosticKind::ConsistencyViolation => self.consistency,
            DiagnosticKind::UnresolvedReference => self.unresolved,
        }
    }

    pub fn total(&self) -> usize {
        self.malformed + self.consistency + self.unresolved
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.malformed = 0;
        self.consistency = 0;
        self.unresolved = 0;
    }
}
