//! CLI argument parsing for tracemodel

use crate::thread::ThreadSelector;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::str::FromStr;

/// Output format for the report
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format (default)
    Text,
    /// JSON format for machine parsing
    Json,
}

/// Grouping level inserted above the heaviest activities
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GroupBy {
    None,
    Category,
    Url,
    Thread,
}

/// Time window `START:END` in milliseconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window {
    pub start: f64,
    pub end: f64,
}

impl FromStr for Window {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s
            .split_once(':')
            .ok_or_else(|| format!("expected START:END, got '{s}'"))?;
        let start: f64 = start
            .trim()
            .parse()
            .map_err(|_| format!("invalid window start in '{s}'"))?;
        let end: f64 = end
            .trim()
            .parse()
            .map_err(|_| format!("invalid window end in '{s}'"))?;
        if end < start {
            return Err(format!("window end precedes start in '{s}'"));
        }
        Ok(Self { start, end })
    }
}

#[derive(Parser, Debug)]
#[command(name = "tracemodel")]
#[command(version)]
#[command(about = "Performance model builder for trace-event captures", long_about = None)]
pub struct Cli {
    /// Trace-event JSON file (array or object with traceEvents)
    #[arg(value_name = "TRACE")]
    pub trace: PathBuf,

    /// TOML model configuration overriding the built-in tables
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Thread to aggregate: main, all, compositor, raster, PID:TID or a thread name
    #[arg(short = 't', long = "thread", value_name = "THREAD", default_value = "main")]
    pub thread: ThreadSelector,

    /// Restrict aggregation and frames to START:END (ms)
    #[arg(short = 'w', long = "window", value_name = "START:END")]
    pub window: Option<Window>,

    /// Number of activities listed
    #[arg(long = "top", value_name = "N", default_value = "15")]
    pub top: usize,

    /// Group the activity list
    #[arg(short = 'g', long = "group-by", value_enum, default_value = "none")]
    pub group_by: GroupBy,

    /// Event filter (e.g. -e '!toplevel', -e 'cat=scripting', -e 'name=/^Layout/')
    #[arg(short = 'e', long = "filter", value_name = "EXPR")]
    pub filters: Vec<String>,

    /// Enable debug tracing output (to stderr)
    #[arg(long = "debug")]
    pub debug: bool,
}
