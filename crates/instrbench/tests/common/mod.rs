//! Shared fixtures for pipeline tests: a throwaway corpus, a fake
//! instrumentation tool and a scripted runner.

#![allow(dead_code)]

use instrbench::bench::{
    BenchmarkIdentity, InstrumentRequest, Instrumenter, IterationSample, RunOnce, RunOutcome,
};
use instrbench::classify::FailureReason;
use instrbench::config::{HarnessConfig, Platform, TimeUnit, ToolCommand};
use instrbench::error::{HarnessError, InstrumentError};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use tempfile::TempDir;

/// Smallest valid module header.
pub const WASM_HEADER: &[u8] = b"\0asm\x01\0\0\0";

/// A working directory with a corpus of empty modules.
pub struct TestWorkspace {
    pub dir: TempDir,
    pub config: HarnessConfig,
}

impl TestWorkspace {
    /// Corpus with the given programs, analyses `forward` and `call-graph`,
    /// no toolchain or revision checks.
    pub fn new(programs: &[&str]) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let corpus = dir.path().join("corpus");
        for program in programs {
            let program_dir = corpus.join(program);
            fs::create_dir_all(&program_dir).expect("create program dir");
            fs::write(program_dir.join(format!("{program}.wasm")), WASM_HEADER)
                .expect("write module");
            fs::write(program_dir.join(format!("{program}.cjs")), "").expect("write launcher");
        }

        let config = HarnessConfig {
            total_runs_per_sweep: 2,
            intra_process_runs: 1,
            probe_intra_process_runs: 1,
            per_run_timeout_seconds: 10,
            timeout_abort_threshold: 2,
            track_memory: true,
            enabled_analyses: Some(set(&["forward", "call-graph"])),
            enabled_programs: Some(set(programs)),
            runtime_command: ToolCommand::new("sh", &[]),
            minimum_runtime_major_version: None,
            working_dir: dir.path().join("work"),
            corpus_dir: Some(corpus),
            analyses_dir: dir.path().join("analyses"),
            color: false,
            ..HarnessConfig::default()
        };

        Self { dir, config }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

pub fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

pub fn success(ms: f64) -> RunOutcome {
    RunOutcome::success(
        vec![IterationSample {
            run_index: 1,
            completion_time: ms,
            memory_usage_bytes: Some(1024),
        }],
        TimeUnit::Ms,
    )
}

pub fn unknown_crash(line: &str) -> RunOutcome {
    RunOutcome::Crash {
        classified_reason: FailureReason::Unknown(line.to_string()),
    }
}

/// Runner whose outcome is a pure function of the identity.
pub struct ScriptedRunner<F> {
    script: F,
    calls: Mutex<Vec<BenchmarkIdentity>>,
}

impl<F> ScriptedRunner<F>
where
    F: Fn(&BenchmarkIdentity, u64) -> RunOutcome,
{
    pub fn new(script: F) -> Self {
        Self {
            script,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<BenchmarkIdentity> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, program: &str, platform: Platform) -> usize {
        self.calls()
            .iter()
            .filter(|id| id.program == program && id.platform == platform)
            .count()
    }
}

impl<F> RunOnce for ScriptedRunner<F>
where
    F: Fn(&BenchmarkIdentity, u64) -> RunOutcome,
{
    fn run_once(
        &self,
        identity: &BenchmarkIdentity,
        executable_path: &Path,
        timeout_seconds: u64,
    ) -> Result<RunOutcome, HarnessError> {
        assert!(executable_path.is_file(), "launcher missing: {}", executable_path.display());
        self.calls.lock().unwrap().push(identity.clone());
        Ok((self.script)(identity, timeout_seconds))
    }
}

/// Instrumenter that copies the input and writes an empty launcher,
/// failing for the listed programs.
pub struct FakeInstrumenter {
    platform: Platform,
    failing: BTreeSet<String>,
    runs: Mutex<usize>,
}

impl FakeInstrumenter {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            failing: BTreeSet::new(),
            runs: Mutex::new(0),
        }
    }

    pub fn failing(mut self, programs: &[&str]) -> Self {
        self.failing = set(programs);
        self
    }

    pub fn runs(&self) -> usize {
        *self.runs.lock().unwrap()
    }
}

impl Instrumenter for FakeInstrumenter {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn instrument(&self, request: &InstrumentRequest<'_>) -> Result<(), InstrumentError> {
        *self.runs.lock().unwrap() += 1;
        if self.failing.contains(request.program) {
            return Err(InstrumentError::ToolFailed {
                tool: "fake".to_string(),
                program: request.program.to_string(),
                status: "exit status: 1".to_string(),
                stderr: "unsupported instruction".to_string(),
            });
        }
        fs::copy(request.input, request.output)?;
        if let Some(dir) = request.output.parent() {
            fs::write(dir.join(format!("{}.cjs", request.program)), "")?;
        }
        Ok(())
    }
}
