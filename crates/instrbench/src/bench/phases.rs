//! Phase sequencer: instrument, probe, gate, measure code size and runtime.
//!
//! Runs sequentially over the identity matrix. Operational failures of a
//! single identity become report rows; consistency and configuration errors
//! end the pipeline.

use crate::bench::gate::{is_stale, rerun_stale};
use crate::bench::instrument::{ensure_instrumented, InstrumentRequest};
use crate::bench::{
    run_repeated, BenchmarkIdentity, InstrumentStatus, Instrumenter, RunOnce, RunOutcome,
    SuccessGate,
};
use crate::classify::FailureReason;
use crate::config::{HarnessConfig, Phase, Platform};
use crate::corpus;
use crate::error::{ConfigError, HarnessError};
use crate::results::records::{read_records, CodeSizeRecord, ExecutionRecord, ProbeRecord, ReportSink};
use crate::results::{PhaseProgressBar, PipelineSummary};
use std::collections::HashSet;
use std::path::Path;

/// Failure category recorded for identities whose instrumentation failed.
pub const INSTRUMENTATION_FAILED: &str = "Instrumentation failed";

/// Failure category recorded when a probe finds no launcher to run.
pub const MISSING_LAUNCHER: &str = "Missing launcher";

/// Executors for the probe and measurement phases.
///
/// They differ in how many iterations a launcher performs per process.
#[derive(Clone, Copy)]
pub struct Runners<'a> {
    pub probe: &'a dyn RunOnce,
    pub measure: &'a dyn RunOnce,
}

/// Drives a declarative list of phases over programs × platforms × analyses.
pub struct PhaseSequencer<'a> {
    config: &'a HarnessConfig,
    runners: Runners<'a>,
    wasabi: &'a dyn Instrumenter,
    wastrumentation: &'a dyn Instrumenter,
    show_progress: bool,
    programs: Vec<String>,
    failed_instrumentation: HashSet<BenchmarkIdentity>,
    gate: Option<SuccessGate>,
    summary: PipelineSummary,
}

impl<'a> PhaseSequencer<'a> {
    pub fn new(
        config: &'a HarnessConfig,
        runners: Runners<'a>,
        wasabi: &'a dyn Instrumenter,
        wastrumentation: &'a dyn Instrumenter,
    ) -> Self {
        Self {
            config,
            runners,
            wasabi,
            wastrumentation,
            show_progress: false,
            programs: Vec::new(),
            failed_instrumentation: HashSet::new(),
            gate: None,
            summary: PipelineSummary::default(),
        }
    }

    /// Draw a progress bar per phase.
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// The gate built or loaded by the last run, if any.
    pub fn gate(&self) -> Option<&SuccessGate> {
        self.gate.as_ref()
    }

    /// Check workspace and corpus, then run `phases` in order.
    pub fn run(&mut self, phases: &[Phase]) -> Result<PipelineSummary, HarnessError> {
        corpus::ensure_workspace(self.config)?;
        self.programs = corpus::ensure_corpus(self.config)?;

        self.summary = PipelineSummary {
            phases: phases.iter().map(ToString::to_string).collect(),
            programs: self.programs.len(),
            ..PipelineSummary::default()
        };
        self.failed_instrumentation.clear();
        self.gate = None;

        for &phase in phases {
            tracing::info!("Starting phase {phase}");
            if phase.needs_gate() && self.gate.is_none() {
                let gate = self.load_gate()?;
                self.set_gate(gate);
            }
            match phase {
                Phase::Instrument => self.instrument()?,
                Phase::Probe => self.probe()?,
                Phase::RerunProbes => self.rerun_probes()?,
                Phase::CodeSize => self.code_size()?,
                Phase::Measure => self.measure()?,
            }
        }

        Ok(std::mem::take(&mut self.summary))
    }

    fn progress(&self, phase: Phase, total: usize) -> PhaseProgressBar {
        if self.show_progress {
            PhaseProgressBar::new(phase, total, self.config.color)
        } else {
            PhaseProgressBar::hidden()
        }
    }

    fn instrumenter(&self, platform: Platform) -> Option<&'a dyn Instrumenter> {
        match platform {
            Platform::Wasabi => Some(self.wasabi),
            Platform::Wastrumentation => Some(self.wastrumentation),
            Platform::Uninstrumented => None,
        }
    }

    fn baseline(&self, program: &str) -> BenchmarkIdentity {
        BenchmarkIdentity::new(program, Platform::Uninstrumented, None)
            .with_runtime(self.config.runtime)
    }

    /// Instrumented identities, for each (analysis, program) both platforms.
    fn instrumented_identities(&self) -> Vec<BenchmarkIdentity> {
        let mut identities = Vec::new();
        for analysis in self.config.analyses() {
            for program in &self.programs {
                for platform in Platform::instrumented() {
                    identities.push(
                        BenchmarkIdentity::new(program.as_str(), platform, Some(&analysis.name))
                            .with_runtime(self.config.runtime),
                    );
                }
            }
        }
        identities
    }

    /// Baselines first, then every instrumented identity.
    fn all_identities(&self) -> Vec<BenchmarkIdentity> {
        self.programs
            .iter()
            .map(|p| self.baseline(p))
            .chain(self.instrumented_identities())
            .collect()
    }

    fn instrument(&mut self) -> Result<(), HarnessError> {
        let identities = self.instrumented_identities();
        let progress = self.progress(Phase::Instrument, identities.len());

        for identity in identities {
            progress.start(&identity);
            let (Some(instrumenter), Some(analysis_name)) =
                (self.instrumenter(identity.platform), identity.analysis.as_deref())
            else {
                progress.advance();
                continue;
            };
            let Some(analysis) = self
                .config
                .analyses
                .iter()
                .find(|a| a.name == analysis_name)
            else {
                progress.advance();
                continue;
            };

            let input = self.config.binary_path(&self.baseline(&identity.program));
            let output = self.config.binary_path(&identity);
            let analysis_path = self.config.analysis_path(identity.platform, analysis_name);
            let request = InstrumentRequest {
                program: &identity.program,
                input: &input,
                output: &output,
                hooks: analysis.hooks(identity.platform),
                analysis_path: &analysis_path,
            };

            match ensure_instrumented(instrumenter, &request) {
                Ok(InstrumentStatus::Instrumented) => {
                    tracing::info!("Instrumented {identity}");
                    self.summary.instrumented += 1;
                }
                Ok(InstrumentStatus::Skipped) => self.summary.instrumentation_skipped += 1,
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    tracing::warn!("Instrumentation of {identity} failed: {e}");
                    self.summary.instrumentation_failed += 1;
                    self.failed_instrumentation.insert(identity);
                }
            }
            progress.advance();
        }

        progress.finish();
        Ok(())
    }

    /// Single attempt for one identity, without consulting the gate.
    fn probe_one(&self, identity: &BenchmarkIdentity) -> Result<RunOutcome, HarnessError> {
        if self.failed_instrumentation.contains(identity) {
            return Ok(RunOutcome::Crash {
                classified_reason: FailureReason::known(INSTRUMENTATION_FAILED),
            });
        }

        let launcher = self.config.launcher_path(identity);
        if !launcher.is_file() {
            tracing::warn!("No launcher for {identity} at {}", launcher.display());
            return Ok(RunOutcome::Crash {
                classified_reason: FailureReason::known(MISSING_LAUNCHER),
            });
        }

        let timeout = self.config.per_run_timeout_seconds;
        let mut sweep = run_repeated(
            self.runners.probe,
            identity,
            &launcher,
            1,
            timeout,
            self.config.timeout_abort_threshold,
        );
        match sweep.next() {
            Some(result) => result.map(|(_, outcome)| outcome),
            None => Ok(RunOutcome::Timeout {
                configured_timeout_seconds: timeout,
            }),
        }
    }

    fn log_probe(identity: &BenchmarkIdentity, outcome: &RunOutcome) {
        match outcome {
            RunOutcome::Success { .. } => tracing::info!("Probe {identity}: success"),
            RunOutcome::Timeout {
                configured_timeout_seconds,
            } => tracing::warn!("Probe {identity}: timeout after {configured_timeout_seconds}s"),
            RunOutcome::Crash { classified_reason } => {
                tracing::warn!("Probe {identity}: crash ({classified_reason})");
            }
        }
    }

    fn probe(&mut self) -> Result<(), HarnessError> {
        let identities = self.all_identities();
        let progress = self.progress(Phase::Probe, identities.len());
        let mut sink = ReportSink::<ProbeRecord>::create(&self.config.probe_report_path())?;
        let mut outcomes = Vec::with_capacity(identities.len());

        // A rerun report refreshes an older probe report; it must not outlive it.
        let rerun = self.config.rerun_probe_report_path();
        if rerun.is_file() {
            tracing::info!("Removing outdated {}", rerun.display());
            std::fs::remove_file(&rerun)?;
        }

        for identity in identities {
            progress.start(&identity);
            let outcome = self.probe_one(&identity)?;
            Self::log_probe(&identity, &outcome);
            sink.write(&ProbeRecord::from_outcome(
                &identity,
                &outcome,
                self.config.per_run_timeout_seconds,
            ))?;
            self.summary.probe_outcomes.record(&identity, &outcome);
            outcomes.push((identity, outcome));
            progress.advance();
        }
        progress.finish();

        self.summary.probes += sink.written();
        self.set_gate(SuccessGate::from_outcomes(
            &self.config.reference_analysis_name,
            outcomes.iter().map(|(i, o)| (i, o)),
        ));
        Ok(())
    }

    fn rerun_probes(&mut self) -> Result<(), HarnessError> {
        let source = self.config.probe_report_path();
        let previous: Vec<ProbeRecord> =
            read_records(&source).map_err(|e| ConfigError::MalformedGateFile {
                path: source.clone(),
                reason: e.to_string(),
            })?;

        let timeout = self.config.per_run_timeout_seconds;
        let stale = previous.iter().filter(|r| is_stale(r, timeout)).count();
        let progress = self.progress(Phase::RerunProbes, stale);
        let mut sink =
            ReportSink::<ProbeRecord>::create(&self.config.rerun_probe_report_path())?;
        let mut reprobed = 0;

        let refreshed = rerun_stale(previous, timeout, &mut sink, |record| {
            let identity = record.identity();
            progress.start(&identity);
            let outcome = self.probe_one(&identity)?;
            Self::log_probe(&identity, &outcome);
            reprobed += 1;
            progress.advance();
            Ok(ProbeRecord::from_outcome(&identity, &outcome, timeout))
        })?;
        progress.finish();

        self.summary.probes += refreshed.len();
        self.summary.reprobed += reprobed;
        self.set_gate(SuccessGate::from_records(
            &self.config.reference_analysis_name,
            &refreshed,
        ));
        Ok(())
    }

    fn set_gate(&mut self, gate: SuccessGate) {
        let decisions = gate.decisions();
        self.summary.viable_pairs = decisions.iter().filter(|(_, ok)| *ok).count();
        self.summary.non_viable_pairs = decisions.len() - self.summary.viable_pairs;
        self.gate = Some(gate);
    }

    /// Gate from the newest probe report on disk.
    fn load_gate(&self) -> Result<SuccessGate, ConfigError> {
        let probe = self.config.probe_report_path();
        let rerun = self.config.rerun_probe_report_path();
        let path = if modified_no_earlier(&rerun, &probe) {
            rerun
        } else {
            probe
        };
        tracing::info!("Loading success gate from {}", path.display());
        SuccessGate::load(&self.config.reference_analysis_name, &path)
    }

    /// Viable identities; counts the rest as gated out.
    fn viable_identities(&mut self) -> Result<Vec<BenchmarkIdentity>, HarnessError> {
        let Some(gate) = &self.gate else {
            return Err(ConfigError::Invalid("success gate used before it was built".to_string()).into());
        };

        let mut viable = Vec::new();
        for identity in self.all_identities() {
            if gate.is_viable(&identity.program, identity.platform)? {
                viable.push(identity);
            } else {
                tracing::debug!("Skipping non-viable {identity}");
                self.summary.gated_out += 1;
            }
        }
        Ok(viable)
    }

    fn code_size(&mut self) -> Result<(), HarnessError> {
        let identities = self.viable_identities()?;
        let progress = self.progress(Phase::CodeSize, identities.len());
        let mut sink = ReportSink::<CodeSizeRecord>::create(&self.config.code_size_report_path())?;

        for identity in identities {
            progress.start(&identity);
            let binary = self.config.binary_path(&identity);
            match std::fs::metadata(&binary) {
                Ok(meta) => sink.write(&CodeSizeRecord::new(&identity, meta.len()))?,
                Err(e) => {
                    tracing::warn!("No binary for {identity} at {}: {e}", binary.display());
                    self.summary.missing_artifacts += 1;
                }
            }
            progress.advance();
        }
        progress.finish();

        self.summary.code_sizes += sink.written();
        Ok(())
    }

    fn measure(&mut self) -> Result<(), HarnessError> {
        let identities = self.viable_identities()?;
        let progress = self.progress(Phase::Measure, identities.len());
        let mut sink = ReportSink::<ExecutionRecord>::create(&self.config.execution_report_path())?;
        let total_runs = self.config.total_runs_per_sweep;
        let timeout = self.config.per_run_timeout_seconds;

        for identity in identities {
            progress.start(&identity);
            let launcher = self.config.launcher_path(&identity);
            if !launcher.is_file() {
                tracing::warn!("No launcher for {identity} at {}", launcher.display());
                self.summary.missing_artifacts += 1;
                progress.advance();
                continue;
            }
            self.measure_one(&identity, &launcher, &mut sink, &progress, total_runs, timeout)?;
            progress.advance();
        }
        progress.finish();
        Ok(())
    }

    fn measure_one(
        &mut self,
        identity: &BenchmarkIdentity,
        launcher: &Path,
        sink: &mut ReportSink<ExecutionRecord>,
        progress: &PhaseProgressBar,
        total_runs: usize,
        timeout: u64,
    ) -> Result<(), HarnessError> {
        let mut sweep = run_repeated(
            self.runners.measure,
            identity,
            launcher,
            total_runs,
            timeout,
            self.config.timeout_abort_threshold,
        );

        loop {
            if sweep.attempted() < total_runs {
                progress.attempt(identity, sweep.attempted() + 1, total_runs);
            }
            let Some(result) = sweep.next() else {
                break;
            };
            let (attempt, outcome) = result?;
            tracing::info!(
                "[BENCHMARK PROGRESS {}]: PROGRAM '{}' - RUN [{attempt}/{total_runs}] {}",
                identity.label(),
                identity.program,
                outcome.kind()
            );
            if let RunOutcome::Crash { classified_reason } = &outcome {
                tracing::warn!("{identity} crashed: {classified_reason}");
            }
            for record in ExecutionRecord::from_outcome(identity, &outcome, timeout) {
                sink.write(&record)?;
            }
            self.summary.measure_outcomes.record(identity, &outcome);
        }
        Ok(())
    }
}

/// Whether `path` exists and was last written no earlier than `than`.
fn modified_no_earlier(path: &Path, than: &Path) -> bool {
    let modified = |p: &Path| std::fs::metadata(p).and_then(|m| m.modified()).ok();
    match (modified(path), modified(than)) {
        (Some(a), Some(b)) => a >= b,
        (Some(_), None) => true,
        (None, _) => false,
    }
}
