//! Error types for the benchmark harness.
//!
//! Two families of errors end a sweep:
//!
//! - [`ConsistencyError`]: the harness itself is broken. The launcher or tool
//!   output no longer matches the contract the parsers were written against.
//! - [`ConfigError`]: the environment is not usable (missing corpus, old
//!   toolchain, bad configuration, gate queried before it was probed).
//!
//! Everything a benchmarked program can do wrong (time out, crash) is not an
//! error here; it becomes a [`RunOutcome`](crate::bench::RunOutcome).

use crate::config::Platform;
use std::path::PathBuf;
use thiserror::Error;

/// The output of a launcher or the noise filter drifted from its contract.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConsistencyError {
    /// More than one stderr line survived noise filtering.
    #[error("Too many error lines after filtering noise: {lines:?}")]
    AmbiguousFailure { lines: Vec<String> },

    /// The number of report lines on stdout does not match the expected shape.
    #[error("Expected {expected} report lines but captured {found}: {lines:?}")]
    ReportLineCount {
        expected: usize,
        found: usize,
        lines: Vec<String>,
    },

    /// A stdout line is neither a performance nor a memory report.
    #[error("Malformed report line: '{line}'")]
    MalformedReportLine { line: String },

    /// A report line names a different program than the one being run.
    #[error("Report line for '{found}' while running '{expected}'")]
    ProgramMismatch { expected: String, found: String },

    /// A performance line reports a run index outside `1..=runs`.
    #[error("Report for run {index} but only {runs} intra-process runs were configured")]
    RunIndexOutOfRange { index: usize, runs: usize },
}

/// Conditions that make the whole pipeline unusable.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to prepare working directory {path}: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Benchmark corpus not found at {0}")]
    MissingCorpus(PathBuf),

    #[error("Benchmark corpus at {0} contains no benchmarks")]
    EmptyCorpus(PathBuf),

    #[error("Failed to list benchmark corpus at {path}: {source}")]
    UnreadableCorpus {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Benchmark corpus at {path} is at revision {found}, expected {expected}")]
    CorpusRevision {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("Failed to inspect corpus revision at {path}: {source}")]
    CorpusRepository {
        path: PathBuf,
        #[source]
        source: git2::Error,
    },

    #[error("Version of {tool} {found} too low; requires major version {minimum}")]
    ToolchainTooOld {
        tool: String,
        found: String,
        minimum: u64,
    },

    #[error("Could not determine version of {tool}: {reason}")]
    ToolchainVersion { tool: String, reason: String },

    #[error("Failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Success gate queried for ({program}, {platform}) which was never probed")]
    UnprobedIdentity { program: String, platform: Platform },

    #[error("Malformed gate file {path}: {reason}")]
    MalformedGateFile { path: PathBuf, reason: String },
}

/// An instrumentation tool could not produce its binary.
#[derive(Debug, Error)]
pub enum InstrumentError {
    #[error("{tool} failed for {program} ({status}): {stderr}")]
    ToolFailed {
        tool: String,
        program: String,
        status: String,
        stderr: String,
    },

    #[error("{tool} exited successfully but produced no binary at {path}")]
    MissingArtifact { tool: String, path: PathBuf },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error while instrumenting: {0}")]
    Io(#[from] std::io::Error),
}

impl InstrumentError {
    /// Whether the failure is environmental rather than specific to one program.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Io(_))
    }
}

/// Top-level error for the sweep.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Consistency(#[from] ConsistencyError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Instrument(#[from] InstrumentError),

    #[error("Report I/O failed: {0}")]
    Report(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
