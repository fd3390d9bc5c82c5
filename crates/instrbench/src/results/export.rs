//! JSON export of the pipeline summary.

use crate::config::HarnessConfig;
use crate::results::summary::{OutcomeTally, PipelineSummary};
use serde::Serialize;
use std::path::Path;

/// JSON-serializable sweep report.
#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub metadata: ReportMetadata,
    pub counters: Counters,
    pub probe_outcomes: Vec<OutcomeTally>,
    pub measure_outcomes: Vec<OutcomeTally>,
}

/// Report metadata
#[derive(Debug, Clone, Serialize)]
pub struct ReportMetadata {
    pub timestamp: String,
    pub host: String,
    pub instrbench_version: String,
    pub runtime: String,
    pub phases: Vec<String>,
    pub total_runs_per_sweep: usize,
    pub intra_process_runs: usize,
    pub per_run_timeout_seconds: u64,
    pub timeout_abort_threshold: usize,
    pub reference_analysis: String,
    pub analyses: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corpus_revision: Option<String>,
    pub reports: Reports,
}

/// Paths of the CSV reports of this sweep.
#[derive(Debug, Clone, Serialize)]
pub struct Reports {
    pub probe: String,
    pub code_size: String,
    pub execution: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Counters {
    pub programs: usize,
    pub instrumented: usize,
    pub instrumentation_skipped: usize,
    pub instrumentation_failed: usize,
    pub probes: usize,
    pub reprobed: usize,
    pub viable_pairs: usize,
    pub non_viable_pairs: usize,
    pub code_sizes: usize,
    pub gated_out: usize,
    pub missing_artifacts: usize,
}

impl SweepReport {
    pub fn new(summary: &PipelineSummary, config: &HarnessConfig) -> Self {
        Self {
            metadata: ReportMetadata {
                timestamp: chrono::Utc::now().to_rfc3339(),
                host: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
                instrbench_version: env!("CARGO_PKG_VERSION").to_string(),
                runtime: config.runtime.to_string(),
                phases: summary.phases.clone(),
                total_runs_per_sweep: config.total_runs_per_sweep,
                intra_process_runs: config.intra_process_runs,
                per_run_timeout_seconds: config.per_run_timeout_seconds,
                timeout_abort_threshold: config.timeout_abort_threshold,
                reference_analysis: config.reference_analysis_name.clone(),
                analyses: config.analyses().iter().map(|a| a.name.clone()).collect(),
                corpus_revision: config.corpus_revision.clone(),
                reports: Reports {
                    probe: config.probe_report_path().display().to_string(),
                    code_size: config.code_size_report_path().display().to_string(),
                    execution: config.execution_report_path().display().to_string(),
                },
            },
            counters: Counters {
                programs: summary.programs,
                instrumented: summary.instrumented,
                instrumentation_skipped: summary.instrumentation_skipped,
                instrumentation_failed: summary.instrumentation_failed,
                probes: summary.probes,
                reprobed: summary.reprobed,
                viable_pairs: summary.viable_pairs,
                non_viable_pairs: summary.non_viable_pairs,
                code_sizes: summary.code_sizes,
                gated_out: summary.gated_out,
                missing_artifacts: summary.missing_artifacts,
            },
            probe_outcomes: summary.probe_outcomes.rows(),
            measure_outcomes: summary.measure_outcomes.rows(),
        }
    }
}

/// Export the summary to a JSON file
pub fn export_json(
    summary: &PipelineSummary,
    config: &HarnessConfig,
    path: &Path,
) -> anyhow::Result<()> {
    let report = SweepReport::new(summary, config);
    let json = serde_json::to_string_pretty(&report)?;
    std::fs::write(path, json)?;
    Ok(())
}
