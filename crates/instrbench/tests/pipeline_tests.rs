//! End-to-end tests of the phase sequencer against a temporary corpus.
//!
//! Runners and instrumentation tools are faked; the reports on disk are real.

mod common;

use common::*;
use instrbench::bench::{BenchmarkIdentity, PhaseSequencer, RunOutcome, Runners, SuccessGate};
use instrbench::config::{Phase, Platform};
use instrbench::error::{ConfigError, HarnessError};
use instrbench::results::{read_records, CodeSizeRecord, ExecutionRecord, ProbeRecord};

fn all_success(_: &BenchmarkIdentity, _: u64) -> RunOutcome {
    success(5.0)
}

// =============================================================================
// Success gate
// =============================================================================

#[test]
fn test_failed_reference_probe_gates_out_platform() {
    let ws = TestWorkspace::new(&["boa", "factorial"]);
    let probe = ScriptedRunner::new(|id: &BenchmarkIdentity, _| {
        if id.program == "boa"
            && id.platform == Platform::Wasabi
            && id.analysis.as_deref() == Some("forward")
        {
            unknown_crash("CompileError: WebAssembly.Module(): invalid local index")
        } else {
            success(5.0)
        }
    });
    let measure = ScriptedRunner::new(all_success);
    let wasabi = FakeInstrumenter::new(Platform::Wasabi);
    let wastrumentation = FakeInstrumenter::new(Platform::Wastrumentation);

    let summary = PhaseSequencer::new(
        &ws.config,
        Runners {
            probe: &probe,
            measure: &measure,
        },
        &wasabi,
        &wastrumentation,
    )
    .run(&Phase::default_pipeline())
    .unwrap();

    // 2 baselines + 2 analyses x 2 programs x 2 platforms
    assert_eq!(summary.programs, 2);
    assert_eq!(summary.instrumented, 8);
    assert_eq!(summary.probes, 10);
    assert_eq!(probe.calls().len(), 10);
    assert_eq!(summary.viable_pairs, 5);
    assert_eq!(summary.non_viable_pairs, 1);

    // boa under Wasabi is skipped for every analysis, in both gated phases
    assert_eq!(summary.gated_out, 4);
    assert_eq!(measure.calls_for("boa", Platform::Wasabi), 0);
    assert_eq!(measure.calls_for("boa", Platform::Wastrumentation), 2 * 2);
    assert_eq!(measure.calls_for("boa", Platform::Uninstrumented), 2);

    let sizes: Vec<CodeSizeRecord> = read_records(&ws.config.code_size_report_path()).unwrap();
    assert_eq!(sizes.len(), 8);
    assert_eq!(summary.code_sizes, 8);
    assert!(sizes
        .iter()
        .all(|r| !(r.input_program == "boa" && r.platform == Platform::Wasabi)));
    assert!(sizes.iter().all(|r| r.size_bytes == WASM_HEADER.len() as u64));

    let rows: Vec<ExecutionRecord> = read_records(&ws.config.execution_report_path()).unwrap();
    assert_eq!(rows.len(), 8 * 2);
    assert!(rows.iter().all(|r| !r.exception && !r.timeout));

    let probes: Vec<ProbeRecord> = read_records(&ws.config.probe_report_path()).unwrap();
    let failed: Vec<_> = probes.iter().filter(|r| !r.succeeded()).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(
        failed[0].exception_reason.as_deref(),
        Some("Unknown reason::CompileError: WebAssembly.Module(): invalid local index")
    );
}

#[test]
fn test_non_reference_failure_does_not_gate() {
    let ws = TestWorkspace::new(&["hydro"]);
    let probe = ScriptedRunner::new(|id: &BenchmarkIdentity, timeout| {
        if id.analysis.as_deref() == Some("call-graph") {
            RunOutcome::Timeout {
                configured_timeout_seconds: timeout,
            }
        } else {
            success(1.0)
        }
    });
    let measure = ScriptedRunner::new(all_success);
    let wasabi = FakeInstrumenter::new(Platform::Wasabi);
    let wastrumentation = FakeInstrumenter::new(Platform::Wastrumentation);

    let summary = PhaseSequencer::new(
        &ws.config,
        Runners {
            probe: &probe,
            measure: &measure,
        },
        &wasabi,
        &wastrumentation,
    )
    .run(&Phase::default_pipeline())
    .unwrap();

    assert_eq!(summary.non_viable_pairs, 0);
    assert_eq!(summary.gated_out, 0);
    // The call-graph builds still get measured
    assert_eq!(measure.calls().len(), 5 * 2);
}

#[test]
fn test_gate_loaded_from_probe_report() {
    let ws = TestWorkspace::new(&["factorial"]);
    let probe = ScriptedRunner::new(|id: &BenchmarkIdentity, _| {
        if id.platform == Platform::Wastrumentation {
            unknown_crash("Error: unreachable")
        } else {
            success(2.0)
        }
    });
    let measure = ScriptedRunner::new(all_success);
    let wasabi = FakeInstrumenter::new(Platform::Wasabi);
    let wastrumentation = FakeInstrumenter::new(Platform::Wastrumentation);
    let runners = Runners {
        probe: &probe,
        measure: &measure,
    };

    PhaseSequencer::new(&ws.config, runners, &wasabi, &wastrumentation)
        .run(&[Phase::Instrument, Phase::Probe])
        .unwrap();

    let mut sequencer = PhaseSequencer::new(&ws.config, runners, &wasabi, &wastrumentation);
    let summary = sequencer.run(&[Phase::Measure]).unwrap();

    let gate = sequencer.gate().unwrap();
    assert!(gate.is_viable("factorial", Platform::Wasabi).unwrap());
    assert!(!gate.is_viable("factorial", Platform::Wastrumentation).unwrap());
    assert_eq!(summary.gated_out, 2);
    assert_eq!(measure.calls_for("factorial", Platform::Wastrumentation), 0);
    assert_eq!(measure.calls().len(), 3 * 2);
}

#[test]
fn test_gated_phase_without_probe_report_fails() {
    let ws = TestWorkspace::new(&["factorial"]);
    let runner = ScriptedRunner::new(all_success);
    let wasabi = FakeInstrumenter::new(Platform::Wasabi);
    let wastrumentation = FakeInstrumenter::new(Platform::Wastrumentation);

    let err = PhaseSequencer::new(
        &ws.config,
        Runners {
            probe: &runner,
            measure: &runner,
        },
        &wasabi,
        &wastrumentation,
    )
    .run(&[Phase::CodeSize])
    .unwrap_err();

    assert!(matches!(
        err,
        HarnessError::Config(ConfigError::MalformedGateFile { .. })
    ));
    assert!(runner.calls().is_empty());
}

// =============================================================================
// Instrumentation
// =============================================================================

#[test]
fn test_instrumentation_failure_recorded_as_probe_crash() {
    let ws = TestWorkspace::new(&["boa", "factorial"]);
    let runner = ScriptedRunner::new(all_success);
    let wasabi = FakeInstrumenter::new(Platform::Wasabi);
    let wastrumentation = FakeInstrumenter::new(Platform::Wastrumentation).failing(&["boa"]);

    let summary = PhaseSequencer::new(
        &ws.config,
        Runners {
            probe: &runner,
            measure: &runner,
        },
        &wasabi,
        &wastrumentation,
    )
    .run(&[Phase::Instrument, Phase::Probe])
    .unwrap();

    assert_eq!(summary.instrumented, 6);
    assert_eq!(summary.instrumentation_failed, 2);
    // The failed builds are never launched
    assert_eq!(runner.calls_for("boa", Platform::Wastrumentation), 0);
    assert_eq!(runner.calls().len(), 10 - 2);

    let probes: Vec<ProbeRecord> = read_records(&ws.config.probe_report_path()).unwrap();
    assert_eq!(probes.len(), 10);
    let failed: Vec<_> = probes.iter().filter(|r| r.exception).collect();
    assert_eq!(failed.len(), 2);
    assert!(failed.iter().all(|r| r.input_program == "boa"
        && r.platform == Platform::Wastrumentation
        && r.exception_reason.as_deref() == Some("Instrumentation failed")));

    let gate = SuccessGate::load("forward", &ws.config.probe_report_path()).unwrap();
    assert!(!gate.is_viable("boa", Platform::Wastrumentation).unwrap());
    assert!(gate.is_viable("boa", Platform::Wasabi).unwrap());
}

#[test]
fn test_existing_builds_are_not_reinstrumented() {
    let ws = TestWorkspace::new(&["factorial", "hydro"]);
    let runner = ScriptedRunner::new(all_success);
    let wasabi = FakeInstrumenter::new(Platform::Wasabi);
    let wastrumentation = FakeInstrumenter::new(Platform::Wastrumentation);
    let runners = Runners {
        probe: &runner,
        measure: &runner,
    };

    let first = PhaseSequencer::new(&ws.config, runners, &wasabi, &wastrumentation)
        .run(&[Phase::Instrument])
        .unwrap();
    let second = PhaseSequencer::new(&ws.config, runners, &wasabi, &wastrumentation)
        .run(&[Phase::Instrument])
        .unwrap();

    assert_eq!(first.instrumented, 8);
    assert_eq!(second.instrumented, 0);
    assert_eq!(second.instrumentation_skipped, 8);
    assert_eq!(wasabi.runs() + wastrumentation.runs(), 8);
}

#[test]
fn test_missing_launcher_probe_is_a_crash() {
    let ws = TestWorkspace::new(&["factorial"]);
    let runner = ScriptedRunner::new(all_success);
    let wasabi = FakeInstrumenter::new(Platform::Wasabi);
    let wastrumentation = FakeInstrumenter::new(Platform::Wastrumentation);

    // Probing without instrumenting first leaves only the baseline launcher
    let summary = PhaseSequencer::new(
        &ws.config,
        Runners {
            probe: &runner,
            measure: &runner,
        },
        &wasabi,
        &wastrumentation,
    )
    .run(&[Phase::Probe])
    .unwrap();

    assert_eq!(summary.probes, 5);
    assert_eq!(runner.calls().len(), 1);
    assert_eq!(summary.viable_pairs, 1);
    assert_eq!(summary.non_viable_pairs, 2);

    let probes: Vec<ProbeRecord> = read_records(&ws.config.probe_report_path()).unwrap();
    assert_eq!(
        probes
            .iter()
            .filter(|r| r.exception_reason.as_deref() == Some("Missing launcher"))
            .count(),
        4
    );
}

// =============================================================================
// Measurement sweep
// =============================================================================

#[test]
fn test_measure_stops_identity_after_timeout_threshold() {
    let mut ws = TestWorkspace::new(&["hydro"]);
    ws.config.total_runs_per_sweep = 5;
    ws.config.timeout_abort_threshold = 2;
    ws.config.enabled_analyses = Some(set(&["forward"]));

    let probe = ScriptedRunner::new(all_success);
    let measure = ScriptedRunner::new(|id: &BenchmarkIdentity, timeout| {
        if id.platform == Platform::Uninstrumented {
            RunOutcome::Timeout {
                configured_timeout_seconds: timeout,
            }
        } else {
            success(3.0)
        }
    });
    let wasabi = FakeInstrumenter::new(Platform::Wasabi);
    let wastrumentation = FakeInstrumenter::new(Platform::Wastrumentation);

    let summary = PhaseSequencer::new(
        &ws.config,
        Runners {
            probe: &probe,
            measure: &measure,
        },
        &wasabi,
        &wastrumentation,
    )
    .run(&Phase::default_pipeline())
    .unwrap();

    assert_eq!(measure.calls_for("hydro", Platform::Uninstrumented), 2);
    assert_eq!(measure.calls_for("hydro", Platform::Wasabi), 5);
    assert_eq!(measure.calls_for("hydro", Platform::Wastrumentation), 5);

    let rows: Vec<ExecutionRecord> = read_records(&ws.config.execution_report_path()).unwrap();
    let timeouts: Vec<_> = rows.iter().filter(|r| r.timeout).collect();
    assert_eq!(timeouts.len(), 2);
    assert!(timeouts.iter().all(|r| r.timeout_amount == 10 && r.runtime_iteration == 0));
    assert_eq!(rows.len(), 2 + 5 + 5);

    let baseline = summary
        .measure_outcomes
        .rows()
        .into_iter()
        .find(|t| t.platform == Some(Platform::Uninstrumented))
        .unwrap();
    assert_eq!(baseline.timeouts, 2);
    assert_eq!(baseline.successes, 0);
}

#[test]
fn test_measure_crash_ends_identity_sweep() {
    let mut ws = TestWorkspace::new(&["jqkungfu"]);
    ws.config.total_runs_per_sweep = 3;
    ws.config.enabled_analyses = Some(set(&["forward"]));

    let probe = ScriptedRunner::new(all_success);
    let measure = ScriptedRunner::new(|id: &BenchmarkIdentity, _| {
        if id.platform == Platform::Wasabi {
            unknown_crash("Error: flaky")
        } else {
            success(1.0)
        }
    });
    let wasabi = FakeInstrumenter::new(Platform::Wasabi);
    let wastrumentation = FakeInstrumenter::new(Platform::Wastrumentation);

    PhaseSequencer::new(
        &ws.config,
        Runners {
            probe: &probe,
            measure: &measure,
        },
        &wasabi,
        &wastrumentation,
    )
    .run(&Phase::default_pipeline())
    .unwrap();

    assert_eq!(measure.calls_for("jqkungfu", Platform::Wasabi), 1);
    assert_eq!(measure.calls_for("jqkungfu", Platform::Wastrumentation), 3);
    let rows: Vec<ExecutionRecord> = read_records(&ws.config.execution_report_path()).unwrap();
    let crashes: Vec<_> = rows.iter().filter(|r| r.exception).collect();
    assert_eq!(crashes.len(), 1);
    assert_eq!(crashes[0].platform, Platform::Wasabi);
}

// =============================================================================
// Re-probing
// =============================================================================

#[test]
fn test_rerun_probes_refreshes_stale_timeouts() {
    let mut ws = TestWorkspace::new(&["factorial"]);
    ws.config.per_run_timeout_seconds = 1;

    let slow = ScriptedRunner::new(|id: &BenchmarkIdentity, timeout| {
        if id.platform == Platform::Wasabi && id.analysis.as_deref() == Some("forward") {
            RunOutcome::Timeout {
                configured_timeout_seconds: timeout,
            }
        } else {
            success(4.0)
        }
    });
    let wasabi = FakeInstrumenter::new(Platform::Wasabi);
    let wastrumentation = FakeInstrumenter::new(Platform::Wastrumentation);

    let first = PhaseSequencer::new(
        &ws.config,
        Runners {
            probe: &slow,
            measure: &slow,
        },
        &wasabi,
        &wastrumentation,
    )
    .run(&[Phase::Instrument, Phase::Probe])
    .unwrap();
    assert_eq!(first.non_viable_pairs, 1);

    ws.config.per_run_timeout_seconds = 60;
    let fast = ScriptedRunner::new(all_success);
    let summary = PhaseSequencer::new(
        &ws.config,
        Runners {
            probe: &fast,
            measure: &fast,
        },
        &wasabi,
        &wastrumentation,
    )
    .run(&Phase::rerun_pipeline())
    .unwrap();

    assert_eq!(summary.reprobed, 1);
    assert_eq!(summary.probes, 5);
    assert_eq!(summary.non_viable_pairs, 0);
    assert_eq!(summary.gated_out, 0);

    let refreshed: Vec<ProbeRecord> =
        read_records(&ws.config.rerun_probe_report_path()).unwrap();
    assert_eq!(refreshed.len(), 5);
    assert!(refreshed.iter().all(ProbeRecord::succeeded));
    let rerun_row = refreshed
        .iter()
        .find(|r| r.platform == Platform::Wasabi && r.analysis.as_deref() == Some("forward"))
        .unwrap();
    assert_eq!(rerun_row.timeout_amount, 60);

    // Rows that were not stale keep the budget they were probed with
    assert!(refreshed
        .iter()
        .filter(|r| r.platform != Platform::Wasabi || r.analysis.as_deref() != Some("forward"))
        .all(|r| r.timeout_amount == 1));

    // A later gated phase picks up the refreshed report
    let mut sequencer = PhaseSequencer::new(
        &ws.config,
        Runners {
            probe: &fast,
            measure: &fast,
        },
        &wasabi,
        &wastrumentation,
    );
    sequencer.run(&[Phase::CodeSize]).unwrap();
    assert!(sequencer
        .gate()
        .unwrap()
        .is_viable("factorial", Platform::Wasabi)
        .unwrap());
}

// =============================================================================
// Corpus
// =============================================================================

#[test]
fn test_fresh_probe_discards_older_rerun_report() {
    let mut ws = TestWorkspace::new(&["factorial"]);
    ws.config.per_run_timeout_seconds = 1;
    ws.config.enabled_analyses = Some(set(&["forward"]));

    let slow = ScriptedRunner::new(|id: &BenchmarkIdentity, timeout| {
        if id.platform == Platform::Wasabi {
            RunOutcome::Timeout {
                configured_timeout_seconds: timeout,
            }
        } else {
            success(4.0)
        }
    });
    let wasabi = FakeInstrumenter::new(Platform::Wasabi);
    let wastrumentation = FakeInstrumenter::new(Platform::Wastrumentation);
    PhaseSequencer::new(
        &ws.config,
        Runners {
            probe: &slow,
            measure: &slow,
        },
        &wasabi,
        &wastrumentation,
    )
    .run(&[Phase::Instrument, Phase::Probe])
    .unwrap();

    ws.config.per_run_timeout_seconds = 60;
    let fast = ScriptedRunner::new(all_success);
    PhaseSequencer::new(
        &ws.config,
        Runners {
            probe: &fast,
            measure: &fast,
        },
        &wasabi,
        &wastrumentation,
    )
    .run(&[Phase::RerunProbes])
    .unwrap();
    assert!(ws.config.rerun_probe_report_path().is_file());

    // The newer probe finds Wasabi broken; the older rerun must not revive it
    let broken = ScriptedRunner::new(|id: &BenchmarkIdentity, _| {
        if id.platform == Platform::Wasabi {
            unknown_crash("Error: unreachable")
        } else {
            success(4.0)
        }
    });
    PhaseSequencer::new(
        &ws.config,
        Runners {
            probe: &broken,
            measure: &broken,
        },
        &wasabi,
        &wastrumentation,
    )
    .run(&[Phase::Probe])
    .unwrap();
    assert!(!ws.config.rerun_probe_report_path().exists());

    let measure = ScriptedRunner::new(all_success);
    let mut later = PhaseSequencer::new(
        &ws.config,
        Runners {
            probe: &measure,
            measure: &measure,
        },
        &wasabi,
        &wastrumentation,
    );
    later.run(&[Phase::Measure]).unwrap();

    assert!(!later
        .gate()
        .unwrap()
        .is_viable("factorial", Platform::Wasabi)
        .unwrap());
    assert_eq!(measure.calls_for("factorial", Platform::Wasabi), 0);
    assert_eq!(measure.calls_for("factorial", Platform::Wastrumentation), 2);
}

#[test]
fn test_missing_corpus_is_fatal() {
    let mut ws = TestWorkspace::new(&["factorial"]);
    ws.config.corpus_dir = Some(ws.path().join("nowhere"));
    let runner = ScriptedRunner::new(all_success);
    let wasabi = FakeInstrumenter::new(Platform::Wasabi);
    let wastrumentation = FakeInstrumenter::new(Platform::Wastrumentation);

    let err = PhaseSequencer::new(
        &ws.config,
        Runners {
            probe: &runner,
            measure: &runner,
        },
        &wasabi,
        &wastrumentation,
    )
    .run(&Phase::default_pipeline())
    .unwrap_err();

    assert!(matches!(
        err,
        HarnessError::Config(ConfigError::MissingCorpus(_))
    ));
}
