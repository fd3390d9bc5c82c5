//! Command-line interface for the benchmark harness.

#![allow(clippy::struct_excessive_bools)]

use crate::config::{HarnessConfig, Phase};
use anyhow::{Context, Result};
use clap::Parser;
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Benchmark harness comparing WebAssembly instrumentation platforms.
///
/// Instruments every program of the corpus with Wasabi and Wastrumentation
/// for each analysis, probes every combination once, then measures code size
/// and runtime of the combinations whose reference probe succeeded.
#[derive(Parser, Debug)]
#[command(name = "instrbench")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// TOML file with the harness configuration.
    ///
    /// Command-line flags override values from the file.
    #[arg(short = 'c', long, value_name = "PATH", env = "INSTRBENCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Root for instrumented builds and reports.
    #[arg(short = 'd', long, value_name = "DIR")]
    pub working_dir: Option<PathBuf>,

    /// Launcher processes per identity in the measurement phase.
    #[arg(long, value_name = "N")]
    pub runs: Option<usize>,

    /// Iterations each launcher process performs in the measurement phase.
    #[arg(long, value_name = "N")]
    pub intra_runs: Option<usize>,

    /// Wall-clock budget for one launcher process, in seconds.
    #[arg(short = 't', long, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// Stop sweeping an identity after this many timeouts.
    #[arg(long, value_name = "N")]
    pub abort_threshold: Option<usize>,

    /// Analysis whose probe decides whether a (program, platform) pair is viable.
    #[arg(long, value_name = "NAME")]
    pub reference_analysis: Option<String>,

    /// Run only the given analysis.
    ///
    /// Can be specified multiple times. The reference analysis must be among them.
    #[arg(short = 'a', long = "analysis", value_name = "NAME")]
    pub analyses: Vec<String>,

    /// Run only the given program.
    ///
    /// Can be specified multiple times. Overrides the program status table.
    #[arg(short = 'p', long = "program", value_name = "NAME")]
    pub programs: Vec<String>,

    /// Phases to run, in order.
    ///
    /// Valid values: instrument, probe, rerun-probes, code-size, measure
    /// Example: --phase probe,code-size
    #[arg(long = "phase", value_name = "PHASE", value_delimiter = ',')]
    pub phases: Vec<String>,

    /// Re-execute timed-out probes instead of probing from scratch.
    #[arg(long, conflicts_with = "phases")]
    pub rerun_probes: bool,

    /// Export the run summary to a JSON file.
    #[arg(long, value_name = "PATH")]
    pub json: Option<PathBuf>,

    /// Disable colored output.
    #[arg(long, conflicts_with = "color")]
    pub no_color: bool,

    /// Force colored output (even when not a TTY).
    #[arg(long, conflicts_with = "no_color")]
    pub color: bool,

    /// Verbose output.
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

impl Cli {
    /// Build the configuration and the phase list.
    pub fn into_config(self) -> Result<(HarnessConfig, Vec<Phase>)> {
        let mut config = match &self.config {
            Some(path) => HarnessConfig::load(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => HarnessConfig::default(),
        };

        if let Some(dir) = self.working_dir {
            config.working_dir = dir;
        }
        if let Some(runs) = self.runs {
            config.total_runs_per_sweep = runs;
        }
        if let Some(intra_runs) = self.intra_runs {
            config.intra_process_runs = intra_runs;
        }
        if let Some(timeout) = self.timeout {
            config.per_run_timeout_seconds = timeout;
        }
        if let Some(threshold) = self.abort_threshold {
            config.timeout_abort_threshold = threshold;
        }
        if let Some(reference) = self.reference_analysis {
            config.reference_analysis_name = reference;
        }
        if !self.analyses.is_empty() {
            config.enabled_analyses = Some(self.analyses.into_iter().collect::<BTreeSet<_>>());
        }
        if !self.programs.is_empty() {
            config.enabled_programs = Some(self.programs.into_iter().collect::<BTreeSet<_>>());
        }

        // --color forces it on, --no-color forces it off
        config.color = self.color || (!self.no_color && supports_color());

        let phases = if self.rerun_probes {
            Phase::rerun_pipeline()
        } else if self.phases.is_empty() {
            Phase::default_pipeline()
        } else {
            parse_phases(&self.phases)?
        };

        config.validate()?;

        Ok((config, phases))
    }
}

/// Parse phase names, dropping repeats.
fn parse_phases(names: &[String]) -> Result<Vec<Phase>> {
    let mut phases = Vec::new();
    for name in names {
        let phase: Phase = name.trim().parse().map_err(|e: String| anyhow::anyhow!(e))?;
        if !phases.contains(&phase) {
            phases.push(phase);
        }
    }
    Ok(phases)
}

/// Check if the terminal supports colors.
fn supports_color() -> bool {
    // https://no-color.org/
    if std::env::var("NO_COLOR").is_ok() {
        return false;
    }

    if std::env::var("FORCE_COLOR").is_ok() {
        return true;
    }

    // Progress and logs go to stderr
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        unsafe { libc::isatty(std::io::stderr().as_raw_fd()) != 0 }
    }

    #[cfg(not(unix))]
    {
        true
    }
}
