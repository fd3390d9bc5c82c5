//! Single-run executor: one launcher process under a wall-clock deadline.

use crate::bench::{parse_report, BenchmarkIdentity, ReportShape, RunOnce, RunOutcome};
use crate::classify::FailureClassifier;
use crate::config::{HarnessConfig, TimeUnit, ToolCommand};
use crate::error::{ConfigError, HarnessError};
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

#[cfg(unix)]
use std::os::unix::process::CommandExt;

/// Interval between exit-status polls while waiting on a launcher.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Environment variable telling the launcher how many iterations to run.
pub const RUNS_ENV_VAR: &str = "NODE_BENCHMARK_RUNS";

/// Output of a launcher process that was allowed to finish.
struct Finished {
    status: ExitStatus,
    stdout: String,
    stderr: String,
}

/// Runs launcher scripts under the host runtime.
#[derive(Debug, Clone)]
pub struct Executor {
    command: ToolCommand,
    classifier: FailureClassifier,
    shape: ReportShape,
    time_unit: TimeUnit,
}

impl Executor {
    pub fn new(
        command: ToolCommand,
        classifier: FailureClassifier,
        shape: ReportShape,
        time_unit: TimeUnit,
    ) -> Self {
        Self {
            command,
            classifier,
            shape,
            time_unit,
        }
    }

    /// Executor for the configured runtime with the given report shape.
    pub fn from_config(config: &HarnessConfig, shape: ReportShape) -> Self {
        Self::new(
            config.runtime_command.clone(),
            FailureClassifier::for_runtime(config.runtime),
            shape,
            config.runtime.time_unit(),
        )
    }

    pub fn shape(&self) -> ReportShape {
        self.shape
    }

    fn build_command(&self, executable_path: &Path) -> Command {
        let mut cmd = Command::new(&self.command.program);
        cmd.args(&self.command.args)
            .env(RUNS_ENV_VAR, self.shape.runs.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Launchers load their module relative to their own directory.
        match (executable_path.parent(), executable_path.file_name()) {
            (Some(dir), Some(file)) if !dir.as_os_str().is_empty() => {
                cmd.current_dir(dir).arg(file);
            }
            _ => {
                cmd.arg(executable_path);
            }
        }

        // New process group so a timeout can kill the whole tree.
        #[cfg(unix)]
        // SAFETY: the closure runs between fork and exec and only calls
        // setpgid, which is async-signal-safe.
        unsafe {
            cmd.pre_exec(|| {
                if libc::setpgid(0, 0) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        cmd
    }

    /// Spawn the launcher and wait for it, returning `None` on timeout.
    ///
    /// The deadline covers the launcher and everything holding its pipes:
    /// a background child that keeps stdout open past the deadline turns the
    /// run into a timeout. Leftovers of the process group are killed either way.
    fn spawn_and_wait(
        &self,
        executable_path: &Path,
        timeout: Duration,
    ) -> Result<Option<Finished>, HarnessError> {
        let spawn_error = |source| ConfigError::Spawn {
            command: format!("{} {}", self.command.display(), executable_path.display()),
            source,
        };

        let deadline = Instant::now() + timeout;
        let mut child = self.build_command(executable_path).spawn().map_err(spawn_error)?;

        // Drain both pipes in the background to avoid pipe buffer deadlock.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                kill_tree(&mut child);
                return Ok(None);
            }
            thread::sleep(POLL_INTERVAL);
        };

        let stdout = collect(stdout.as_ref(), deadline);
        let stderr = collect(stderr.as_ref(), deadline);
        kill_group(child.id());

        match (stdout, stderr) {
            (Some(stdout), Some(stderr)) => Ok(Some(Finished {
                status,
                stdout,
                stderr,
            })),
            _ => {
                tracing::debug!(
                    "{} exited but its pipes stayed open past the deadline",
                    executable_path.display()
                );
                Ok(None)
            }
        }
    }
}

impl RunOnce for Executor {
    fn run_once(
        &self,
        identity: &BenchmarkIdentity,
        executable_path: &Path,
        timeout_seconds: u64,
    ) -> Result<RunOutcome, HarnessError> {
        tracing::debug!(
            "Spawning {} {} for {identity}",
            self.command.display(),
            executable_path.display()
        );

        let Some(finished) =
            self.spawn_and_wait(executable_path, Duration::from_secs(timeout_seconds))?
        else {
            return Ok(RunOutcome::Timeout {
                configured_timeout_seconds: timeout_seconds,
            });
        };

        if !finished.status.success() {
            tracing::debug!("{identity} exited with {}", finished.status);
            let classified_reason = self.classifier.classify(&finished.stderr)?;
            return Ok(RunOutcome::Crash { classified_reason });
        }

        let iterations = parse_report(&identity.program, &finished.stdout, self.shape)?;
        Ok(RunOutcome::success(iterations, self.time_unit))
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<Receiver<String>> {
    pipe.map(|mut pipe| {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
        });
        rx
    })
}

/// Output of a drained pipe, or `None` if it is still open at `deadline`.
fn collect(output: Option<&Receiver<String>>, deadline: Instant) -> Option<String> {
    match output {
        Some(rx) => rx
            .recv_timeout(deadline.saturating_duration_since(Instant::now()))
            .ok(),
        None => Some(String::new()),
    }
}

/// Kill every process left in the launcher's group.
fn kill_group(pid: u32) {
    #[cfg(unix)]
    {
        if let Ok(pid) = i32::try_from(pid) {
            // SAFETY: signalling a process group we created; no memory is shared.
            unsafe {
                libc::kill(-pid, libc::SIGKILL);
            }
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
}

/// Kill the launcher's process group and reap the launcher.
fn kill_tree(child: &mut Child) {
    kill_group(child.id());
    let _ = child.kill();
    let _ = child.wait();
}
