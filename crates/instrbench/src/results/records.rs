//! Report schemas and the CSV sink.
//!
//! Each report has one record type whose field order is the column order.
//! Booleans use the literals `True`/`False` so existing analysis notebooks
//! keep reading the files.

use crate::bench::{BenchmarkIdentity, RunOutcome};
use crate::config::{Platform, Runtime, TimeUnit};
use crate::error::HarnessError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// Parse a boolean cell. Only `True` and `False` are accepted.
pub fn parse_boolean(cell: &str) -> Option<bool> {
    match cell {
        "True" => Some(true),
        "False" => Some(false),
        _ => None,
    }
}

pub(crate) fn format_boolean(value: bool) -> &'static str {
    if value { "True" } else { "False" }
}

mod boolean_literal {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(super::format_boolean(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        let cell = String::deserialize(deserializer)?;
        super::parse_boolean(&cell).ok_or_else(|| {
            serde::de::Error::custom(format!("expected True or False, found '{cell}'"))
        })
    }
}

/// A report schema with a fixed header.
pub trait Report: Serialize + DeserializeOwned {
    const HEADER: &'static [&'static str];
}

/// One row of the execution report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub runtime: Runtime,
    pub platform: Platform,
    pub analysis: Option<String>,
    pub input_program: String,
    pub memory_usage: Option<u64>,
    pub completion_time: Option<f64>,
    pub runtime_iteration: usize,
    pub time_unit: Option<TimeUnit>,
    #[serde(with = "boolean_literal")]
    pub exception: bool,
    pub exception_reason: Option<String>,
    #[serde(with = "boolean_literal")]
    pub timeout: bool,
    pub timeout_amount: u64,
}

impl Report for ExecutionRecord {
    const HEADER: &'static [&'static str] = &[
        "runtime",
        "platform",
        "analysis",
        "input_program",
        "memory_usage",
        "completion_time",
        "runtime_iteration",
        "time_unit",
        "exception",
        "exception_reason",
        "timeout",
        "timeout_amount",
    ];
}

impl ExecutionRecord {
    /// Rows for one attempt: one per iteration on success, one otherwise.
    ///
    /// `timeout_seconds` is the budget the attempt ran under.
    pub fn from_outcome(
        identity: &BenchmarkIdentity,
        outcome: &RunOutcome,
        timeout_seconds: u64,
    ) -> Vec<Self> {
        let probe = ProbeRecord::from_outcome(identity, outcome, timeout_seconds);
        let row = |runtime_iteration, memory_usage, completion_time| Self {
            runtime: probe.runtime,
            platform: probe.platform,
            analysis: probe.analysis.clone(),
            input_program: probe.input_program.clone(),
            memory_usage,
            completion_time,
            runtime_iteration,
            time_unit: probe.time_unit,
            exception: probe.exception,
            exception_reason: probe.exception_reason.clone(),
            timeout: probe.timeout,
            timeout_amount: probe.timeout_amount,
        };

        match outcome {
            RunOutcome::Success { iterations, .. } => iterations
                .iter()
                .enumerate()
                .map(|(i, sample)| row(i, sample.memory_usage_bytes, Some(sample.completion_time)))
                .collect(),
            _ => vec![row(0, None, None)],
        }
    }
}

/// One row of the probe report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeRecord {
    pub runtime: Runtime,
    pub platform: Platform,
    pub analysis: Option<String>,
    pub input_program: String,
    pub memory_usage: Option<u64>,
    pub completion_time: Option<f64>,
    pub time_unit: Option<TimeUnit>,
    #[serde(with = "boolean_literal")]
    pub exception: bool,
    pub exception_reason: Option<String>,
    #[serde(with = "boolean_literal")]
    pub timeout: bool,
    pub timeout_amount: u64,
}

impl Report for ProbeRecord {
    const HEADER: &'static [&'static str] = &[
        "runtime",
        "platform",
        "analysis",
        "input_program",
        "memory_usage",
        "completion_time",
        "time_unit",
        "exception",
        "exception_reason",
        "timeout",
        "timeout_amount",
    ];
}

impl ProbeRecord {
    pub fn from_outcome(
        identity: &BenchmarkIdentity,
        outcome: &RunOutcome,
        timeout_seconds: u64,
    ) -> Self {
        let mut record = Self {
            runtime: identity.runtime,
            platform: identity.platform,
            analysis: identity.analysis.clone(),
            input_program: identity.program.clone(),
            memory_usage: None,
            completion_time: None,
            time_unit: None,
            exception: false,
            exception_reason: None,
            timeout: false,
            timeout_amount: timeout_seconds,
        };

        match outcome {
            RunOutcome::Success {
                completion_time,
                time_unit,
                memory_usage_bytes,
                ..
            } => {
                record.completion_time = Some(*completion_time);
                record.time_unit = Some(*time_unit);
                record.memory_usage = *memory_usage_bytes;
            }
            RunOutcome::Timeout {
                configured_timeout_seconds,
            } => {
                record.timeout = true;
                record.timeout_amount = *configured_timeout_seconds;
            }
            RunOutcome::Crash { classified_reason } => {
                record.exception = true;
                record.exception_reason = Some(classified_reason.to_report_cell());
            }
        }
        record
    }

    pub fn identity(&self) -> BenchmarkIdentity {
        BenchmarkIdentity::new(
            self.input_program.clone(),
            self.platform,
            self.analysis.as_deref(),
        )
        .with_runtime(self.runtime)
    }

    /// Whether the probed run succeeded.
    pub fn succeeded(&self) -> bool {
        !self.exception && !self.timeout
    }
}

/// One row of the code-size report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSizeRecord {
    pub platform: Platform,
    pub analysis: Option<String>,
    pub input_program: String,
    pub size_bytes: u64,
}

impl Report for CodeSizeRecord {
    const HEADER: &'static [&'static str] = &["platform", "analysis", "input_program", "size_bytes"];
}

impl CodeSizeRecord {
    pub fn new(identity: &BenchmarkIdentity, size_bytes: u64) -> Self {
        Self {
            platform: identity.platform,
            analysis: identity.analysis.clone(),
            input_program: identity.program.clone(),
            size_bytes,
        }
    }
}

/// Append-only CSV file for one report, flushed after every record.
pub struct ReportSink<T: Report> {
    writer: csv::Writer<File>,
    path: PathBuf,
    written: usize,
    _record: PhantomData<fn(&T)>,
}

impl<T: Report> ReportSink<T> {
    /// Create (truncate) the report file and write its header.
    pub fn create(path: &Path) -> Result<Self, HarnessError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(path)?;
        writer.write_record(T::HEADER)?;
        writer.flush()?;

        Ok(Self {
            writer,
            path: path.to_path_buf(),
            written: 0,
            _record: PhantomData,
        })
    }

    pub fn write(&mut self, record: &T) -> Result<(), HarnessError> {
        self.writer.serialize(record)?;
        self.writer.flush()?;
        self.written += 1;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records written so far.
    pub fn written(&self) -> usize {
        self.written
    }
}

/// Read every record of a report file.
pub fn read_records<T: Report>(path: &Path) -> Result<Vec<T>, csv::Error> {
    csv::Reader::from_path(path)?
        .deserialize()
        .collect()
}
