//! Benchmark identities, run outcomes and execution.

mod controller;
mod executor;
mod gate;
mod instrument;
mod phases;
mod report;

pub use controller::{run_repeated, AbortReason, RepeatedRun};
pub use executor::Executor;
pub use gate::{is_stale, rerun_stale, GateKey, SuccessGate};
pub use instrument::{
    ensure_instrumented, InstrumentRequest, InstrumentStatus, Instrumenter, WasabiInstrumenter,
    WastrumentationInstrumenter,
};
pub use phases::{PhaseSequencer, Runners, INSTRUMENTATION_FAILED, MISSING_LAUNCHER};
pub use report::{parse_report, ReportShape};

use crate::classify::FailureReason;
use crate::config::{Platform, Runtime, TimeUnit};
use crate::error::HarnessError;
use std::fmt;
use std::path::Path;

/// Key of one row of the execution matrix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BenchmarkIdentity {
    pub program: String,
    pub platform: Platform,
    /// `None` for the uninstrumented baseline.
    pub analysis: Option<String>,
    /// Host runtime named in reports.
    pub runtime: Runtime,
}

impl BenchmarkIdentity {
    pub fn new(program: impl Into<String>, platform: Platform, analysis: Option<&str>) -> Self {
        Self {
            program: program.into(),
            platform,
            analysis: analysis.map(str::to_string),
            runtime: Runtime::default(),
        }
    }

    pub fn with_runtime(mut self, runtime: Runtime) -> Self {
        self.runtime = runtime;
        self
    }

    /// `platform-analysis` label used in progress messages and summaries.
    pub fn label(&self) -> String {
        match &self.analysis {
            Some(analysis) => format!("{}-{analysis}", self.platform),
            None => self.platform.to_string(),
        }
    }
}

impl fmt::Display for BenchmarkIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.program, self.label())
    }
}

/// One intra-process iteration reported by a launcher.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationSample {
    /// 1-based index printed by the launcher.
    pub run_index: usize,
    pub completion_time: f64,
    pub memory_usage_bytes: Option<u64>,
}

/// Result of one launcher process.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Success {
        /// Sum of the iteration times.
        completion_time: f64,
        time_unit: TimeUnit,
        /// Peak over the iterations, when memory is tracked.
        memory_usage_bytes: Option<u64>,
        iterations: Vec<IterationSample>,
    },
    Timeout {
        configured_timeout_seconds: u64,
    },
    Crash {
        classified_reason: FailureReason,
    },
}

impl RunOutcome {
    /// Aggregate the iterations of a successful run.
    pub fn success(iterations: Vec<IterationSample>, time_unit: TimeUnit) -> Self {
        let completion_time = iterations.iter().map(|s| s.completion_time).sum();
        let memory_usage_bytes = iterations.iter().filter_map(|s| s.memory_usage_bytes).max();
        Self::Success {
            completion_time,
            time_unit,
            memory_usage_bytes,
            iterations,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Timeout { .. } => "timeout",
            Self::Crash { .. } => "crash",
        }
    }
}

/// Runs one launcher process for an identity.
///
/// Operational failures of the benchmarked program come back as
/// [`RunOutcome`] variants; `Err` is reserved for harness failures.
pub trait RunOnce {
    fn run_once(
        &self,
        identity: &BenchmarkIdentity,
        executable_path: &Path,
        timeout_seconds: u64,
    ) -> Result<RunOutcome, HarnessError>;
}

impl<T: RunOnce + ?Sized> RunOnce for &T {
    fn run_once(
        &self,
        identity: &BenchmarkIdentity,
        executable_path: &Path,
        timeout_seconds: u64,
    ) -> Result<RunOutcome, HarnessError> {
        (**self).run_once(identity, executable_path, timeout_seconds)
    }
}
