//! Configuration types for the benchmark harness.

use crate::bench::BenchmarkIdentity;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Instrumentation platform a program is run under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Platform {
    /// The program as found in the corpus
    #[serde(rename = "uninstrumented")]
    Uninstrumented,
    /// JavaScript-embedded dynamic instrumentation (Wasabi)
    Wasabi,
    /// Source-to-source instrumenting compiler (Wastrumentation)
    Wastrumentation,
}

impl Platform {
    /// Get the name used in reports and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Uninstrumented => "uninstrumented",
            Self::Wasabi => "Wasabi",
            Self::Wastrumentation => "Wastrumentation",
        }
    }

    /// Get a short name (for compact displays).
    pub fn short_name(&self) -> &'static str {
        match self {
            Self::Uninstrumented => "base",
            Self::Wasabi => "wasabi",
            Self::Wastrumentation => "wastr",
        }
    }

    /// Platforms that apply an analysis.
    pub fn instrumented() -> [Self; 2] {
        [Self::Wasabi, Self::Wastrumentation]
    }

    /// Whether this platform runs an analysis.
    pub fn is_instrumented(&self) -> bool {
        !matches!(self, Self::Uninstrumented)
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "uninstrumented" | "none" | "baseline" => Ok(Self::Uninstrumented),
            "wasabi" => Ok(Self::Wasabi),
            "wastrumentation" => Ok(Self::Wastrumentation),
            _ => Err(format!(
                "Unknown platform: {s}. Valid options: uninstrumented, wasabi, wastrumentation"
            )),
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Host runtime executing the launcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Runtime {
    #[default]
    #[serde(rename = "NodeJS", alias = "nodejs", alias = "node")]
    NodeJs,
    #[serde(rename = "Wasmtime", alias = "wasmtime")]
    Wasmtime,
}

impl Runtime {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NodeJs => "NodeJS",
            Self::Wasmtime => "Wasmtime",
        }
    }

    /// Unit the launcher reports completion times in.
    pub fn time_unit(&self) -> TimeUnit {
        match self {
            Self::NodeJs => TimeUnit::Ms,
            Self::Wasmtime => TimeUnit::Ns,
        }
    }
}

impl std::fmt::Display for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Unit of a reported completion time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Ms,
    S,
    Ns,
}

impl TimeUnit {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ms => "ms",
            Self::S => "s",
            Self::Ns => "ns",
        }
    }

    /// Convert a value in this unit to milliseconds.
    pub fn to_millis(&self, value: f64) -> f64 {
        match self {
            Self::Ms => value,
            Self::S => value * 1_000.0,
            Self::Ns => value / 1_000_000.0,
        }
    }
}

impl std::fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Whether a corpus program takes part in the sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgramStatus {
    /// Runs under every platform
    Included,
    /// Crashes under at least one platform
    ExcludedCrash,
    /// Exceeds the time budget
    ExcludedSlow,
}

/// Pipeline phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Instrument every (analysis, program) for both platforms
    Instrument,
    /// Execute every identity once and build the success gate
    Probe,
    /// Re-execute timed-out probes whose timeout budget was smaller
    RerunProbes,
    /// Record binary sizes of viable identities
    CodeSize,
    /// Timed runs of viable identities
    Measure,
}

impl Phase {
    /// The full pipeline, in order.
    pub fn default_pipeline() -> Vec<Self> {
        vec![Self::Instrument, Self::Probe, Self::CodeSize, Self::Measure]
    }

    /// Pipeline that refreshes stale probes instead of probing from scratch.
    pub fn rerun_pipeline() -> Vec<Self> {
        vec![Self::Instrument, Self::RerunProbes, Self::CodeSize, Self::Measure]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Instrument => "instrument",
            Self::Probe => "probe",
            Self::RerunProbes => "rerun-probes",
            Self::CodeSize => "code-size",
            Self::Measure => "measure",
        }
    }

    /// Whether this phase consults the success gate.
    pub fn needs_gate(&self) -> bool {
        matches!(self, Self::CodeSize | Self::Measure)
    }
}

impl std::str::FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "instrument" => Ok(Self::Instrument),
            "probe" | "executes-once" => Ok(Self::Probe),
            "rerun-probes" | "rerun" => Ok(Self::RerunProbes),
            "code-size" | "size" => Ok(Self::CodeSize),
            "measure" | "execution" => Ok(Self::Measure),
            _ => Err(format!(
                "Unknown phase: {s}. Valid options: instrument, probe, rerun-probes, code-size, measure"
            )),
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// An external command: executable plus leading arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| (*a).to_string()).collect(),
        }
    }

    /// Render for log messages.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Hook configuration of one analysis for both platforms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub name: String,
    pub wasabi_hooks: Vec<String>,
    pub wastrumentation_hooks: Vec<String>,
}

impl AnalysisConfig {
    fn new(name: &str, wasabi_hooks: &[&str], wastrumentation_hooks: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            wasabi_hooks: wasabi_hooks.iter().map(|h| (*h).to_string()).collect(),
            wastrumentation_hooks: wastrumentation_hooks.iter().map(|h| (*h).to_string()).collect(),
        }
    }

    /// Hooks requested from the given platform.
    pub fn hooks(&self, platform: Platform) -> &[String] {
        match platform {
            Platform::Wasabi => &self.wasabi_hooks,
            Platform::Wastrumentation => &self.wastrumentation_hooks,
            Platform::Uninstrumented => &[],
        }
    }
}

const WASABI_ALL_HOOKS: &[&str] = &[
    "nop", "unreachable", "if", "br", "br_if", "br_table", "drop", "select", "memory_size",
    "memory_grow", "unary", "binary", "load", "store", "local", "global", "call", "const",
    "begin", "return",
];

const WASTRUMENTATION_ALL_HOOKS: &[&str] = &[
    "if-then", "if-then-post", "if-then-else", "if-then-else-post", "branch", "branch-if",
    "branch-table", "drop", "select", "memory-size", "memory-grow", "unary", "binary", "load",
    "store", "local", "global", "call-pre", "call-post", "call-indirect-pre",
    "call-indirect-post", "const", "return", "block-pre", "block-post", "loop-pre", "loop-post",
];

/// Default analysis catalog.
pub fn default_analyses() -> Vec<AnalysisConfig> {
    vec![
        AnalysisConfig::new("instruction-mix", WASABI_ALL_HOOKS, WASTRUMENTATION_ALL_HOOKS),
        AnalysisConfig::new("coverage-instruction", WASABI_ALL_HOOKS, WASTRUMENTATION_ALL_HOOKS),
        AnalysisConfig::new(
            "coverage-branch",
            &["if", "br_if", "br_table", "select"],
            &["if-then-else", "if-then", "branch-if", "branch-table", "select"],
        ),
        AnalysisConfig::new("call-graph", &["call"], &["call-pre"]),
        AnalysisConfig::new("memory-tracing", &["load", "store"], &["load", "store"]),
        AnalysisConfig::new("cryptominer-detection", &["binary"], &["binary"]),
        AnalysisConfig::new(
            "block-profiling",
            &["begin"],
            &[
                "if-then", "if-then-else", "branch", "branch-if", "branch-table", "call-pre",
                "call-indirect-pre", "block-pre", "loop-pre",
            ],
        ),
        AnalysisConfig::new("forward", WASABI_ALL_HOOKS, WASTRUMENTATION_ALL_HOOKS),
    ]
}

/// Default program status table.
pub fn default_programs() -> BTreeMap<String, ProgramStatus> {
    let included = [
        "factorial", "figma-startpage", "game-of-life", "hydro", "rtexviewer", "jqkungfu",
        "parquet", "rtexpacker",
    ];
    let crashing = [
        "boa", "ffmpeg", "pathfinding", "sandspiel", "commanderkeen", "jsc", "pacalc",
        "rguilayout", "riconpacker", "bullet", "sqlgui", "funky-kart", "guiicons", "rfxgen",
        "rguistyler",
    ];
    let slow = ["multiplyDouble", "fib", "mandelbrot", "multiplyInt"];

    let mut programs = BTreeMap::new();
    for (names, status) in [
        (&included[..], ProgramStatus::Included),
        (&crashing[..], ProgramStatus::ExcludedCrash),
        (&slow[..], ProgramStatus::ExcludedSlow),
    ] {
        for name in names {
            programs.insert((*name).to_string(), status);
        }
    }
    programs
}

/// Configuration for a benchmark sweep.
///
/// Every field has a default, so a config file only needs to name what it
/// changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    /// Launcher processes per identity in the measurement phase.
    pub total_runs_per_sweep: usize,
    /// Iterations each launcher process performs in the measurement phase.
    pub intra_process_runs: usize,
    /// Iterations each launcher process performs in the probe phase.
    pub probe_intra_process_runs: usize,
    /// Wall-clock budget for one launcher process.
    pub per_run_timeout_seconds: u64,
    /// Stop sweeping an identity after this many timeouts.
    pub timeout_abort_threshold: usize,
    /// Expect a memory report line for every iteration.
    pub track_memory: bool,
    /// Analysis whose probe decides viability of a (program, platform) pair.
    pub reference_analysis_name: String,
    /// Analyses to run; `None` runs the whole catalog.
    pub enabled_analyses: Option<BTreeSet<String>>,
    /// Programs to run; `None` runs every program marked included.
    pub enabled_programs: Option<BTreeSet<String>>,
    /// Host runtime named in reports.
    pub runtime: Runtime,
    /// Command that runs a launcher script (the script path is appended).
    pub runtime_command: ToolCommand,
    /// Minimum major version of the runtime command, if checked.
    pub minimum_runtime_major_version: Option<u64>,
    pub wasabi_command: ToolCommand,
    pub wastrumentation_command: ToolCommand,
    /// Root for instrumented builds and reports.
    pub working_dir: PathBuf,
    /// Directory with `<program>/<program>.wasm` entries.
    pub corpus_dir: Option<PathBuf>,
    /// Git revision the corpus checkout must be at.
    pub corpus_revision: Option<String>,
    /// Directory with `javascript/<analysis>.cjs` and `rust/<analysis>/`.
    pub analyses_dir: PathBuf,
    pub analyses: Vec<AnalysisConfig>,
    pub programs: BTreeMap<String, ProgramStatus>,
    /// Enable colored output.
    #[serde(skip)]
    pub color: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            total_runs_per_sweep: 2,
            intra_process_runs: 2,
            probe_intra_process_runs: 1,
            per_run_timeout_seconds: 300,
            timeout_abort_threshold: 2,
            track_memory: true,
            reference_analysis_name: "forward".to_string(),
            enabled_analyses: None,
            enabled_programs: None,
            runtime: Runtime::NodeJs,
            runtime_command: ToolCommand::new("node", &["--experimental-wasm-multi-memory"]),
            minimum_runtime_major_version: Some(22),
            wasabi_command: ToolCommand::new("wasabi", &[]),
            wastrumentation_command: ToolCommand::new("wastrumentation-cli", &[]),
            working_dir: PathBuf::from("working-dir"),
            corpus_dir: None,
            corpus_revision: None,
            analyses_dir: PathBuf::from("input-analyses"),
            analyses: default_analyses(),
            programs: default_programs(),
            color: true,
        }
    }
}

impl HarnessConfig {
    /// Load a configuration file, filling omitted fields with defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check the numeric budgets and the analysis selection.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("total_runs_per_sweep", self.total_runs_per_sweep),
            ("intra_process_runs", self.intra_process_runs),
            ("probe_intra_process_runs", self.probe_intra_process_runs),
            ("timeout_abort_threshold", self.timeout_abort_threshold),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be at least 1")));
            }
        }
        if self.per_run_timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "per_run_timeout_seconds must be at least 1".to_string(),
            ));
        }

        if let Some(enabled) = &self.enabled_analyses {
            let unknown: Vec<_> = enabled
                .iter()
                .filter(|name| !self.analyses.iter().any(|a| &a.name == *name))
                .map(String::as_str)
                .collect();
            if !unknown.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "Unknown analysis(es): {}",
                    unknown.join(", ")
                )));
            }
        }

        if self.reference_analysis().is_none() {
            return Err(ConfigError::Invalid(format!(
                "Reference analysis '{}' is not an enabled analysis",
                self.reference_analysis_name
            )));
        }

        Ok(())
    }

    /// Analyses taking part in the sweep, in catalog order.
    pub fn analyses(&self) -> Vec<&AnalysisConfig> {
        self.analyses
            .iter()
            .filter(|a| {
                self.enabled_analyses
                    .as_ref()
                    .is_none_or(|enabled| enabled.contains(&a.name))
            })
            .collect()
    }

    /// The enabled analysis used for gating, if present.
    pub fn reference_analysis(&self) -> Option<&AnalysisConfig> {
        self.analyses()
            .into_iter()
            .find(|a| a.name == self.reference_analysis_name)
    }

    /// Programs taking part in the sweep.
    pub fn enabled_programs(&self) -> BTreeSet<String> {
        match &self.enabled_programs {
            Some(programs) => programs.clone(),
            None => self
                .programs
                .iter()
                .filter(|(_, status)| **status == ProgramStatus::Included)
                .map(|(name, _)| name.clone())
                .collect(),
        }
    }

    /// Status of a program in the table, if listed.
    pub fn program_status(&self, program: &str) -> Option<ProgramStatus> {
        self.programs.get(program).copied()
    }

    pub fn corpus_dir(&self) -> PathBuf {
        self.corpus_dir
            .clone()
            .unwrap_or_else(|| self.working_dir.join("wasm-r3").join("benchmarks"))
    }

    /// Directory holding all builds of a platform.
    pub fn platform_dir(&self, platform: Platform) -> PathBuf {
        match platform {
            Platform::Uninstrumented => self.corpus_dir(),
            Platform::Wasabi => self.working_dir.join("benchmarks_wasabi"),
            Platform::Wastrumentation => self.working_dir.join("benchmarks_wastrumentation"),
        }
    }

    /// Directory holding the binary and launcher of one identity.
    pub fn program_dir(&self, identity: &BenchmarkIdentity) -> PathBuf {
        let root = self.platform_dir(identity.platform);
        match &identity.analysis {
            Some(analysis) if identity.platform.is_instrumented() => {
                root.join(analysis).join(&identity.program)
            }
            _ => root.join(&identity.program),
        }
    }

    pub fn binary_path(&self, identity: &BenchmarkIdentity) -> PathBuf {
        self.program_dir(identity)
            .join(format!("{}.wasm", identity.program))
    }

    pub fn launcher_path(&self, identity: &BenchmarkIdentity) -> PathBuf {
        self.program_dir(identity)
            .join(format!("{}.cjs", identity.program))
    }

    /// Analysis implementation handed to the given platform's tool.
    pub fn analysis_path(&self, platform: Platform, analysis: &str) -> PathBuf {
        match platform {
            Platform::Wasabi => self
                .analyses_dir
                .join("javascript")
                .join(format!("{analysis}.cjs")),
            _ => self.analyses_dir.join("rust").join(analysis),
        }
    }

    pub fn probe_report_path(&self) -> PathBuf {
        self.working_dir.join("executes-once.csv")
    }

    pub fn rerun_probe_report_path(&self) -> PathBuf {
        self.working_dir.join("executes-once.csv.rerun.csv")
    }

    pub fn code_size_report_path(&self) -> PathBuf {
        self.working_dir.join("code-size.csv")
    }

    pub fn execution_report_path(&self) -> PathBuf {
        self.working_dir.join("execution-bench.csv")
    }

    /// Number of identities the sweep covers for the given program count.
    pub fn identity_count(&self, programs: usize) -> usize {
        programs * (1 + self.analyses().len() * Platform::instrumented().len())
    }

    /// Upper bound on the wall-clock time of probe and measurement phases.
    pub fn worst_case_duration(&self, programs: usize) -> Duration {
        let identities = self.identity_count(programs) as u64;
        let attempts_per_identity =
            1 + self.timeout_abort_threshold.min(self.total_runs_per_sweep) as u64;
        Duration::from_secs(identities * attempts_per_identity * self.per_run_timeout_seconds)
    }
}
