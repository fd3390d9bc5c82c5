//! Repeated-run controller with a timeout abort rule.

use crate::bench::{BenchmarkIdentity, RunOnce, RunOutcome};
use crate::error::HarnessError;
use std::path::Path;

/// Why a sweep ended before `total_runs` attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The timeout threshold was reached.
    Timeouts,
    /// A run crashed; crashes are deterministic, so repeating them adds nothing.
    Crash,
}

/// Lazy sweep of up to `total_runs` attempts for one identity.
///
/// Each call to `next` spawns one process. The sweep ends after
/// `total_runs` attempts, once `timeout_abort_threshold` timeouts have been
/// seen, after the first crash, or after the first harness error.
pub struct RepeatedRun<'a, R: RunOnce + ?Sized> {
    runner: &'a R,
    identity: &'a BenchmarkIdentity,
    executable_path: &'a Path,
    total_runs: usize,
    timeout_per_run: u64,
    timeout_abort_threshold: usize,
    attempted: usize,
    timeouts: usize,
    crashed: bool,
    failed: bool,
}

impl<R: RunOnce + ?Sized> RepeatedRun<'_, R> {
    /// Attempts issued so far.
    pub fn attempted(&self) -> usize {
        self.attempted
    }

    /// Timeouts observed so far.
    pub fn timeouts(&self) -> usize {
        self.timeouts
    }

    /// Why the sweep stopped early, if it did.
    pub fn abort_reason(&self) -> Option<AbortReason> {
        if self.attempted >= self.total_runs {
            None
        } else if self.crashed {
            Some(AbortReason::Crash)
        } else if self.timeouts >= self.timeout_abort_threshold {
            Some(AbortReason::Timeouts)
        } else {
            None
        }
    }

    pub fn aborted(&self) -> bool {
        self.abort_reason().is_some()
    }
}

impl<R: RunOnce + ?Sized> Iterator for RepeatedRun<'_, R> {
    type Item = Result<(usize, RunOutcome), HarnessError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed
            || self.crashed
            || self.attempted >= self.total_runs
            || self.timeouts >= self.timeout_abort_threshold
        {
            return None;
        }

        self.attempted += 1;
        let result =
            self.runner
                .run_once(self.identity, self.executable_path, self.timeout_per_run);

        match result {
            Ok(outcome) => {
                match &outcome {
                    RunOutcome::Timeout { .. } => self.timeouts += 1,
                    RunOutcome::Crash { .. } => self.crashed = true,
                    RunOutcome::Success { .. } => {}
                }
                match self.abort_reason() {
                    Some(AbortReason::Timeouts) => tracing::warn!(
                        "{} timed out {} time(s); skipping remaining {} run(s)",
                        self.identity,
                        self.timeouts,
                        self.total_runs - self.attempted
                    ),
                    Some(AbortReason::Crash) => tracing::warn!(
                        "{} crashed at run {}; skipping remaining {} run(s)",
                        self.identity,
                        self.attempted,
                        self.total_runs - self.attempted
                    ),
                    None => {}
                }
                Some(Ok((self.attempted, outcome)))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Start a sweep of up to `total_runs` attempts.
///
/// Items are `(attempt, outcome)` with `attempt` counting from 1. A
/// `timeout_abort_threshold` of zero is treated as one, so a sweep always
/// stops on its first timeout at the latest.
pub fn run_repeated<'a, R: RunOnce + ?Sized>(
    runner: &'a R,
    identity: &'a BenchmarkIdentity,
    executable_path: &'a Path,
    total_runs: usize,
    timeout_per_run: u64,
    timeout_abort_threshold: usize,
) -> RepeatedRun<'a, R> {
    RepeatedRun {
        runner,
        identity,
        executable_path,
        total_runs,
        timeout_per_run,
        timeout_abort_threshold: timeout_abort_threshold.max(1),
        attempted: 0,
        timeouts: 0,
        crashed: false,
        failed: false,
    }
}
