//! End-of-run summary: counters per phase and outcome tallies per
//! (platform, analysis), rendered with comfy-table.

use crate::bench::{BenchmarkIdentity, RunOutcome};
use crate::config::Platform;
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, ContentArrangement, Table};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;

/// Outcome counts for one (platform, analysis) pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OutcomeTally {
    pub platform: Option<Platform>,
    pub analysis: Option<String>,
    pub successes: usize,
    pub timeouts: usize,
    pub crashes: usize,
    /// Sum of successful completion times, in milliseconds.
    pub total_time_ms: f64,
}

impl OutcomeTally {
    pub fn attempts(&self) -> usize {
        self.successes + self.timeouts + self.crashes
    }

    /// Mean completion time of successful attempts, in milliseconds.
    pub fn mean_time_ms(&self) -> Option<f64> {
        (self.successes > 0).then(|| self.total_time_ms / self.successes as f64)
    }

    fn record(&mut self, outcome: &RunOutcome) {
        match outcome {
            RunOutcome::Success {
                completion_time,
                time_unit,
                ..
            } => {
                self.successes += 1;
                self.total_time_ms += time_unit.to_millis(*completion_time);
            }
            RunOutcome::Timeout { .. } => self.timeouts += 1,
            RunOutcome::Crash { .. } => self.crashes += 1,
        }
    }
}

/// Tallies keyed by (platform, analysis).
#[derive(Debug, Clone, Default)]
pub struct OutcomeTallies {
    tallies: BTreeMap<(Platform, Option<String>), OutcomeTally>,
}

impl OutcomeTallies {
    pub fn record(&mut self, identity: &BenchmarkIdentity, outcome: &RunOutcome) {
        self.tallies
            .entry((identity.platform, identity.analysis.clone()))
            .or_insert_with(|| OutcomeTally {
                platform: Some(identity.platform),
                analysis: identity.analysis.clone(),
                ..OutcomeTally::default()
            })
            .record(outcome);
    }

    /// Tallies in (platform, analysis) order.
    pub fn rows(&self) -> Vec<OutcomeTally> {
        self.tallies.values().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tallies.is_empty()
    }
}

/// What a pipeline invocation did.
#[derive(Debug, Clone, Default)]
pub struct PipelineSummary {
    pub phases: Vec<String>,
    pub programs: usize,
    pub instrumented: usize,
    pub instrumentation_skipped: usize,
    pub instrumentation_failed: usize,
    /// Probe rows written, including rows copied forward by a rerun.
    pub probes: usize,
    pub reprobed: usize,
    pub viable_pairs: usize,
    pub non_viable_pairs: usize,
    pub code_sizes: usize,
    /// Identities skipped because the gate marked them non-viable.
    pub gated_out: usize,
    /// Identities skipped because their binary or launcher was missing.
    pub missing_artifacts: usize,
    pub probe_outcomes: OutcomeTallies,
    pub measure_outcomes: OutcomeTallies,
}

fn outcome_table(tallies: &OutcomeTallies, color: bool) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let header = ["Platform", "Analysis", "Runs", "Success", "Timeout", "Crash", "Mean (ms)"];
    table.set_header(
        header
            .iter()
            .map(|h| Cell::new(h).add_attribute(Attribute::Bold)),
    );

    for tally in tallies.rows() {
        let colored = |value: usize, fg: Color| {
            if color && value > 0 {
                Cell::new(value).fg(fg)
            } else {
                Cell::new(value)
            }
        };
        table.add_row(vec![
            Cell::new(tally.platform.map_or("-", |p| p.name())),
            Cell::new(tally.analysis.as_deref().unwrap_or("-")),
            Cell::new(tally.attempts()),
            colored(tally.successes, Color::Green),
            colored(tally.timeouts, Color::Yellow),
            colored(tally.crashes, Color::Red),
            Cell::new(
                tally
                    .mean_time_ms()
                    .map_or_else(|| "-".to_string(), |mean| format!("{mean:.2}")),
            ),
        ]);
    }
    table
}

/// Print the counters and the outcome tables.
pub fn render_summary<W: Write>(
    writer: &mut W,
    summary: &PipelineSummary,
    color: bool,
) -> std::io::Result<()> {
    use owo_colors::OwoColorize;

    let title = " Summary ";
    if color {
        writeln!(writer, "{}", format!("{title:=^60}").bold().yellow())?;
    } else {
        writeln!(writer, "{title:=^60}")?;
    }
    writeln!(writer, "Phases:          {}", summary.phases.join(" -> "))?;
    writeln!(writer, "Programs:        {}", summary.programs)?;
    if summary.instrumented + summary.instrumentation_skipped + summary.instrumentation_failed > 0 {
        writeln!(
            writer,
            "Instrumentation: {} built, {} cached, {} failed",
            summary.instrumented, summary.instrumentation_skipped, summary.instrumentation_failed
        )?;
    }
    if summary.probes > 0 {
        writeln!(
            writer,
            "Probes:          {} ({} re-probed); {} viable, {} non-viable pair(s)",
            summary.probes, summary.reprobed, summary.viable_pairs, summary.non_viable_pairs
        )?;
    }
    if summary.code_sizes > 0 {
        writeln!(writer, "Code sizes:      {}", summary.code_sizes)?;
    }
    if summary.gated_out + summary.missing_artifacts > 0 {
        writeln!(
            writer,
            "Skipped:         {} gated out, {} missing artifact(s)",
            summary.gated_out, summary.missing_artifacts
        )?;
    }

    for (name, tallies) in [
        ("Probe outcomes", &summary.probe_outcomes),
        ("Measurement outcomes", &summary.measure_outcomes),
    ] {
        if tallies.is_empty() {
            continue;
        }
        writeln!(writer)?;
        writeln!(writer, "{name}:")?;
        writeln!(writer, "{}", outcome_table(tallies, color))?;
    }
    Ok(())
}
