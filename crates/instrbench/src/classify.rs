//! Failure classification for crashed benchmark runs.
//!
//! A crashed launcher leaves a diagnostic on stderr surrounded by host-runtime
//! scaffolding (version banners, uncaught-exception frames, error pointers).
//! The classifier strips that scaffolding and matches what is left against a
//! catalog of known failure signatures.

use crate::config::Runtime;
use crate::error::ConsistencyError;
use regex::Regex;
use std::fmt;

/// Prefix used when an unknown reason is serialized into a report cell.
const UNKNOWN_PREFIX: &str = "Unknown reason::";

/// Classified cause of a crashed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Matched a signature in the catalog.
    Known(String),
    /// Nothing matched; the significant stderr text, verbatim.
    Unknown(String),
}

impl FailureReason {
    pub fn known(name: impl Into<String>) -> Self {
        Self::Known(name.into())
    }

    /// Text written to the `exception_reason` report column.
    pub fn to_report_cell(&self) -> String {
        match self {
            Self::Known(name) => name.clone(),
            Self::Unknown(raw) => format!("{UNKNOWN_PREFIX}{raw}"),
        }
    }

    /// Inverse of [`to_report_cell`](Self::to_report_cell).
    pub fn from_report_cell(cell: &str) -> Self {
        match cell.strip_prefix(UNKNOWN_PREFIX) {
            Some(raw) => Self::Unknown(raw.to_string()),
            None => Self::Known(cell.to_string()),
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Self::Known(_))
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_report_cell())
    }
}

/// Noise filter plus ordered table of known failure signatures.
#[derive(Debug, Clone)]
pub struct FailureClassifier {
    noise: Vec<Regex>,
    known: Vec<(String, Regex)>,
}

impl FailureClassifier {
    /// Build a classifier from pattern sources.
    pub fn new(noise: &[&str], known: &[(&str, &str)]) -> Result<Self, regex::Error> {
        Ok(Self {
            noise: noise
                .iter()
                .map(|p| Regex::new(&format!("^(?:{p})$")))
                .collect::<Result<_, _>>()?,
            known: known
                .iter()
                .map(|(name, p)| Ok(((*name).to_string(), Regex::new(&format!("^(?:{p})$"))?)))
                .collect::<Result<_, regex::Error>>()?,
        })
    }

    /// Catalog for launchers running under Node.js.
    pub fn node() -> Self {
        Self::from_static(
            &[
                r"Node\.js v(\d+)\.(\d+)\.(\d+)",
                r"node:internal/process/promises:(\d+)",
                r"triggerUncaughtException\(err, true /\* fromPromise \*/\);",
                r"\^",
            ],
            &[
                (
                    "Invalid data segment",
                    r#"\[CompileError: WebAssembly\.instantiate\(\): Compiling function #(\d+)(:"[a-z_]+")? failed: invalid data segment index: (\d+) @\+(\d+)\]"#,
                ),
                (
                    "Local count too large",
                    r#"\[CompileError: WebAssembly\.instantiate\(\): Compiling function #(\d+)(:"[a-z0-9_]+")? failed: local count too large @\+(\d+)\]"#,
                ),
            ],
        )
    }

    /// Catalog for the standalone engine runner.
    pub fn wasmtime() -> Self {
        Self::from_static(
            &[
                r"Finished `release` profile \[optimized\] target\(s\) in .*",
                r"Running `target/release/wasmtime-benchmarks.*`",
                r"note: run with `RUST_BACKTRACE=1` environment variable to display a backtrace",
                r"thread 'main' panicked at .*",
            ],
            &[(
                "Wasmtime assertion failure",
                r"assertion failed: \(label_offset - offset\) <= kind\.max_pos_range\(\)",
            )],
        )
    }

    /// Catalog matching the given host runtime.
    pub fn for_runtime(runtime: Runtime) -> Self {
        match runtime {
            Runtime::NodeJs => Self::node(),
            Runtime::Wasmtime => Self::wasmtime(),
        }
    }

    fn from_static(noise: &[&str], known: &[(&str, &str)]) -> Self {
        // Built-in tables are fixed at compile time and covered by tests.
        match Self::new(noise, known) {
            Ok(classifier) => classifier,
            Err(e) => unreachable!("built-in failure pattern does not compile: {e}"),
        }
    }

    fn is_noise(&self, line: &str) -> bool {
        self.noise.iter().any(|re| re.is_match(line))
    }

    /// Lines of `raw_stderr` that survive noise filtering.
    pub fn significant_lines<'a>(&self, raw_stderr: &'a str) -> Vec<&'a str> {
        raw_stderr
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !self.is_noise(line))
            .collect()
    }

    /// Classify the stderr of a crashed run.
    ///
    /// Zero significant lines yields `Unknown("")`. More than one means the
    /// noise filter is incomplete and is reported as a consistency error.
    pub fn classify(&self, raw_stderr: &str) -> Result<FailureReason, ConsistencyError> {
        let lines = self.significant_lines(raw_stderr);
        match lines.as_slice() {
            [] => Ok(FailureReason::Unknown(String::new())),
            [line] => Ok(self
                .known
                .iter()
                .find(|(_, re)| re.is_match(line))
                .map_or_else(
                    || FailureReason::Unknown((*line).to_string()),
                    |(name, _)| FailureReason::Known(name.clone()),
                )),
            _ => Err(ConsistencyError::AmbiguousFailure {
                lines: lines.iter().map(|l| (*l).to_string()).collect(),
            }),
        }
    }
}
