//! Workspace, toolchain and corpus checks run before any phase.
//!
//! The corpus is expected to be checked out already; this module only
//! verifies it. Layout: `<corpus>/<program>/<program>.wasm`.

use crate::config::{HarnessConfig, ToolCommand};
use crate::error::ConfigError;
use git2::Repository;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::process::Command;

/// First four bytes of every WebAssembly binary.
const WASM_MAGIC: [u8; 4] = [0x00, 0x61, 0x73, 0x6D];

/// Create the working directory and check the runtime version.
pub fn ensure_workspace(config: &HarnessConfig) -> Result<(), ConfigError> {
    std::fs::create_dir_all(&config.working_dir).map_err(|source| ConfigError::Workspace {
        path: config.working_dir.clone(),
        source,
    })?;

    if let Some(minimum) = config.minimum_runtime_major_version {
        let version = check_runtime_version(&config.runtime_command, minimum)?;
        tracing::info!("Using {} {version}", config.runtime_command.program);
    }
    Ok(())
}

/// Verify the corpus and return the programs the sweep will cover.
pub fn ensure_corpus(config: &HarnessConfig) -> Result<Vec<String>, ConfigError> {
    let corpus_dir = config.corpus_dir();
    if !corpus_dir.is_dir() {
        return Err(ConfigError::MissingCorpus(corpus_dir));
    }

    if let Some(expected) = &config.corpus_revision {
        check_revision(&corpus_dir, expected)?;
    }

    let available = discover_programs(&corpus_dir)?;
    if available.is_empty() {
        return Err(ConfigError::EmptyCorpus(corpus_dir));
    }

    let enabled = config.enabled_programs();
    for program in enabled.iter().filter(|p| !available.contains(p)) {
        tracing::warn!("Program '{program}' not found in corpus; skipping");
    }
    let selected: Vec<String> = available
        .into_iter()
        .filter(|p| enabled.contains(p))
        .collect();

    if selected.is_empty() {
        return Err(ConfigError::Invalid(format!(
            "none of the enabled programs exist in {}",
            corpus_dir.display()
        )));
    }
    tracing::info!("Selected {} program(s) from {}", selected.len(), corpus_dir.display());
    Ok(selected)
}

/// Programs in the corpus directory, sorted by name.
///
/// An entry counts when `<name>/<name>.wasm` exists and starts with the
/// WebAssembly magic bytes.
pub fn discover_programs(corpus_dir: &Path) -> Result<Vec<String>, ConfigError> {
    let read_error = |source| ConfigError::UnreadableCorpus {
        path: corpus_dir.to_path_buf(),
        source,
    };

    let mut programs = Vec::new();
    for entry in std::fs::read_dir(corpus_dir).map_err(read_error)? {
        let entry = entry.map_err(read_error)?;
        if !entry.path().is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        let binary = entry.path().join(format!("{name}.wasm"));
        if is_wasm_binary(&binary) {
            programs.push(name);
        } else {
            tracing::debug!("Skipping corpus entry without binary: {}", binary.display());
        }
    }
    programs.sort();
    Ok(programs)
}

fn is_wasm_binary(path: &Path) -> bool {
    let mut magic = [0u8; 4];
    File::open(path)
        .and_then(|mut f| f.read_exact(&mut magic))
        .is_ok_and(|()| magic == WASM_MAGIC)
}

/// Check that the repository containing `path` has `expected` checked out.
///
/// `expected` may be an abbreviated hash.
pub fn check_revision(path: &Path, expected: &str) -> Result<String, ConfigError> {
    let repo_error = |source| ConfigError::CorpusRepository {
        path: path.to_path_buf(),
        source,
    };

    let repo = Repository::discover(path).map_err(repo_error)?;
    let found = repo
        .head()
        .and_then(|head| head.peel_to_commit())
        .map_err(repo_error)?
        .id()
        .to_string();

    if expected.is_empty() || !found.starts_with(expected) {
        return Err(ConfigError::CorpusRevision {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            found,
        });
    }
    Ok(found)
}

/// Parse `vMAJOR.MINOR.PATCH` as printed by `node --version`.
pub fn parse_version(output: &str) -> Option<(u64, u64, u64)> {
    let mut parts = output.trim().trim_start_matches('v').splitn(3, '.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next()?.parse().ok()?;
    Some((major, minor, patch))
}

/// Run the runtime command with `--version` appended and require at least
/// `minimum` as major version.
pub fn check_runtime_version(command: &ToolCommand, minimum: u64) -> Result<String, ConfigError> {
    let output = Command::new(&command.program)
        .args(&command.args)
        .arg("--version")
        .output()
        .map_err(|source| ConfigError::Spawn {
            command: format!("{} --version", command.display()),
            source,
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let Some((major, _, _)) = parse_version(&stdout) else {
        return Err(ConfigError::ToolchainVersion {
            tool: command.program.clone(),
            reason: format!("unrecognized version output '{stdout}'"),
        });
    };

    if major < minimum {
        return Err(ConfigError::ToolchainTooOld {
            tool: command.program.clone(),
            found: stdout,
            minimum,
        });
    }
    Ok(stdout)
}
