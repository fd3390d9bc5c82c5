//! Instrumentation tools, driven as external processes.

use crate::config::{Platform, ToolCommand};
use crate::error::{ConfigError, InstrumentError};
use std::ffi::OsString;
use std::path::Path;
use std::process::Command;

/// What [`ensure_instrumented`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentStatus {
    /// The artifact already existed; no tool was run.
    Skipped,
    /// The tool ran and produced the artifact.
    Instrumented,
}

/// Inputs for instrumenting one (program, analysis) pair.
#[derive(Debug, Clone, Copy)]
pub struct InstrumentRequest<'a> {
    pub program: &'a str,
    /// Uninstrumented corpus binary.
    pub input: &'a Path,
    /// Where the instrumented binary must end up.
    pub output: &'a Path,
    pub hooks: &'a [String],
    /// Analysis implementation handed to the tool.
    pub analysis_path: &'a Path,
}

/// A tool that turns an uninstrumented binary into an instrumented one.
pub trait Instrumenter {
    fn platform(&self) -> Platform;

    /// Run the tool. On success the binary exists at `request.output`.
    fn instrument(&self, request: &InstrumentRequest<'_>) -> Result<(), InstrumentError>;
}

/// Instrument unless the artifact is already on disk.
pub fn ensure_instrumented(
    instrumenter: &dyn Instrumenter,
    request: &InstrumentRequest<'_>,
) -> Result<InstrumentStatus, InstrumentError> {
    if request.output.is_file() {
        tracing::debug!(
            "{} build of {} exists; skipping: {}",
            instrumenter.platform(),
            request.program,
            request.output.display()
        );
        return Ok(InstrumentStatus::Skipped);
    }

    if let Some(dir) = request.output.parent() {
        std::fs::create_dir_all(dir)?;
    }

    instrumenter.instrument(request)?;

    if !request.output.is_file() {
        return Err(InstrumentError::MissingArtifact {
            tool: instrumenter.platform().to_string(),
            path: request.output.to_path_buf(),
        });
    }
    Ok(InstrumentStatus::Instrumented)
}

/// Run a tool to completion, turning a non-zero exit into `ToolFailed`.
fn run_tool(
    command: &ToolCommand,
    args: Vec<OsString>,
    request: &InstrumentRequest<'_>,
) -> Result<(), InstrumentError> {
    tracing::debug!("Running {} for {}", command.display(), request.program);

    let output = Command::new(&command.program)
        .args(&command.args)
        .args(&args)
        .output()
        .map_err(|source| ConfigError::Spawn {
            command: command.display(),
            source,
        })?;

    if output.status.success() {
        Ok(())
    } else {
        Err(InstrumentError::ToolFailed {
            tool: command.program.clone(),
            program: request.program.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// JavaScript-embedded instrumentation via `wasabi --node`.
///
/// Writes `<program>.wasm` and its glue script `<program>.wasabi.cjs` into the
/// output directory.
#[derive(Debug, Clone)]
pub struct WasabiInstrumenter {
    command: ToolCommand,
}

impl WasabiInstrumenter {
    pub fn new(command: ToolCommand) -> Self {
        Self { command }
    }
}

impl Instrumenter for WasabiInstrumenter {
    fn platform(&self) -> Platform {
        Platform::Wasabi
    }

    fn instrument(&self, request: &InstrumentRequest<'_>) -> Result<(), InstrumentError> {
        let Some(output_dir) = request.output.parent() else {
            return Err(InstrumentError::MissingArtifact {
                tool: self.command.program.clone(),
                path: request.output.to_path_buf(),
            });
        };

        let mut args: Vec<OsString> = vec!["--node".into(), "--output-dir".into(), output_dir.into()];
        for hook in request.hooks {
            args.push("--hooks".into());
            args.push(hook.into());
        }
        args.push(request.input.into());

        run_tool(&self.command, args, request)?;

        // The launcher is CommonJS, so the glue script needs the .cjs extension.
        let glue = output_dir.join(format!("{}.wasabi.js", request.program));
        if glue.is_file() {
            std::fs::rename(&glue, glue.with_extension("cjs"))?;
        }
        Ok(())
    }
}

/// Source-to-source instrumentation via `wastrumentation-cli`.
#[derive(Debug, Clone)]
pub struct WastrumentationInstrumenter {
    command: ToolCommand,
}

impl WastrumentationInstrumenter {
    pub fn new(command: ToolCommand) -> Self {
        Self { command }
    }
}

impl Instrumenter for WastrumentationInstrumenter {
    fn platform(&self) -> Platform {
        Platform::Wastrumentation
    }

    fn instrument(&self, request: &InstrumentRequest<'_>) -> Result<(), InstrumentError> {
        let mut args: Vec<OsString> = vec![
            "--input-program-path".into(),
            request.input.into(),
            "--rust-analysis-toml-path".into(),
            request.analysis_path.join("Cargo.toml").into(),
            "--hooks".into(),
        ];
        args.extend(request.hooks.iter().map(OsString::from));
        args.push("--output-path".into());
        args.push(request.output.into());

        run_tool(&self.command, args, request)
    }
}
