//! Progress bar for one pipeline phase.
//!
//! Example output:
//! ```text
//! Phase: measure
//!   ⠋ Wasabi-call-graph / hydro (run 2/30)
//!   ██████░░░░░░░░░░░░░░ 12/40  ETA 00:14:08
//! ```

use crate::bench::BenchmarkIdentity;
use crate::config::Phase;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// Progress over the identities of one phase.
pub struct PhaseProgressBar {
    progress: ProgressBar,
}

impl PhaseProgressBar {
    /// Print the phase header and start a bar over `total` identities.
    pub fn new(phase: Phase, total: usize, color: bool) -> Self {
        use owo_colors::OwoColorize;

        if color {
            eprintln!("{}: {}", "Phase".bold(), phase.name().cyan());
        } else {
            eprintln!("Phase: {}", phase.name());
        }

        let template = if color {
            "  {spinner:.cyan} {msg}\n  {bar:40.cyan/dim} {pos}/{len}  ETA {eta}"
        } else {
            "  {spinner} {msg}\n  {bar:40} {pos}/{len}  ETA {eta}"
        };
        let style = ProgressStyle::with_template(template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░")
            .tick_strings(TICKS);

        let progress = ProgressBar::new(total as u64);
        progress.set_style(style);
        progress.enable_steady_tick(Duration::from_millis(100));
        Self { progress }
    }

    /// A bar that draws nothing.
    pub fn hidden() -> Self {
        Self {
            progress: ProgressBar::hidden(),
        }
    }

    /// Show which identity is being worked on.
    pub fn start(&self, identity: &BenchmarkIdentity) {
        self.progress
            .set_message(format!("{} / {}", identity.label(), identity.program));
    }

    /// Show which attempt of the identity is running.
    pub fn attempt(&self, identity: &BenchmarkIdentity, attempt: usize, total: usize) {
        self.progress.set_message(format!(
            "{} / {} (run {attempt}/{total})",
            identity.label(),
            identity.program
        ));
    }

    /// Mark one identity done.
    pub fn advance(&self) {
        self.progress.inc(1);
    }

    pub fn position(&self) -> u64 {
        self.progress.position()
    }

    pub fn finish(&self) {
        self.progress.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Platform;

    #[test]
    fn test_hidden_bar_tracks_position() {
        let bar = PhaseProgressBar::hidden();
        let id = BenchmarkIdentity::new("hydro", Platform::Wasabi, Some("forward"));
        bar.start(&id);
        bar.attempt(&id, 1, 2);
        bar.advance();
        bar.advance();
        assert_eq!(bar.position(), 2);
        bar.finish();
    }
}
