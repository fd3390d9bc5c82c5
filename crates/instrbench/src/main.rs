//! instrbench - Benchmark harness for WebAssembly instrumentation platforms.

// Use mimalloc for reduced allocation latency (enabled by default).
#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::Parser;
use instrbench::{
    bench::{Executor, PhaseSequencer, ReportShape, Runners, WasabiInstrumenter, WastrumentationInstrumenter},
    cli::Cli,
    config::{HarnessConfig, Phase},
    results::{export_json, render_summary},
};
use std::time::Duration;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Log lines are printed above the progress bars instead of through them.
    // RUST_LOG wins over the verbose flag.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("info")
        } else {
            EnvFilter::new("warn")
        }
    });

    let indicatif_layer = IndicatifLayer::new();
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(indicatif_layer.get_stderr_writer()),
        )
        .with(indicatif_layer)
        .with(filter)
        .init();

    let json_output = cli.json.clone();

    let (config, phases) = cli.into_config().context("Failed to create harness config")?;

    print_banner(&config, &phases);

    let probe = Executor::from_config(
        &config,
        ReportShape::new(config.probe_intra_process_runs, config.track_memory),
    );
    let measure = Executor::from_config(
        &config,
        ReportShape::new(config.intra_process_runs, config.track_memory),
    );
    let wasabi = WasabiInstrumenter::new(config.wasabi_command.clone());
    let wastrumentation = WastrumentationInstrumenter::new(config.wastrumentation_command.clone());

    let runners = Runners {
        probe: &probe,
        measure: &measure,
    };
    let summary = PhaseSequencer::new(&config, runners, &wasabi, &wastrumentation)
        .with_progress(true)
        .run(&phases)
        .context("Benchmark pipeline failed")?;

    println!();
    render_summary(&mut std::io::stdout().lock(), &summary, config.color)
        .context("Failed to print summary")?;

    if let Some(path) = json_output {
        export_json(&summary, &config, &path).context("Failed to export JSON")?;
        println!("Summary exported to: {}", path.display());
    }

    // Let the indicatif tick threads wind down before exit.
    std::thread::sleep(Duration::from_millis(100));

    Ok(())
}

/// Print a compact banner with the sweep configuration and its worst-case duration.
fn print_banner(config: &HarnessConfig, phases: &[Phase]) {
    use owo_colors::OwoColorize;

    let phases = phases.iter().map(Phase::name).collect::<Vec<_>>().join(" -> ");
    let programs = config.enabled_programs().len();
    let worst_case = format_duration(config.worst_case_duration(programs));

    let details = format!(
        "{} programs x {} analyses on {} - {} runs x {} iterations, {}s timeout",
        programs,
        config.analyses().len(),
        config.runtime,
        config.total_runs_per_sweep,
        config.intra_process_runs,
        config.per_run_timeout_seconds,
    );

    println!();
    if config.color {
        println!("{}: {details}", "instrbench".cyan().bold());
        println!("  {} {phases}", "phases:".dimmed());
        println!("  {} {worst_case}", "worst case:".dimmed());
    } else {
        println!("instrbench: {details}");
        println!("  phases: {phases}");
        println!("  worst case: {worst_case}");
    }
    println!();
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        format!("{hours}h {minutes:02}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds:02}s")
    } else {
        format!("{seconds}s")
    }
}
