//! Reports, progress display and summaries.
//!
//! - `records`: CSV schemas and the flush-after-write sink
//! - `PhaseProgressBar` for per-phase progress
//! - `render_summary` and `export_json` for the end-of-run overview

pub mod export;
pub mod progress;
pub mod records;
pub mod summary;

pub use export::{export_json, SweepReport};
pub use progress::PhaseProgressBar;
pub use records::{
    parse_boolean, read_records, CodeSizeRecord, ExecutionRecord, ProbeRecord, Report, ReportSink,
};
pub use summary::{render_summary, OutcomeTallies, OutcomeTally, PipelineSummary};
