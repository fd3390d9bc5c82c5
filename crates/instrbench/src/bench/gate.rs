//! Success gate: per (program, platform) viability from the probe phase.

use crate::bench::{BenchmarkIdentity, RunOutcome};
use crate::config::Platform;
use crate::error::{ConfigError, HarnessError};
use crate::results::records::{read_records, ProbeRecord, ReportSink};
use std::collections::HashMap;
use std::path::Path;

/// Gate key: an identity without its analysis.
pub type GateKey = (String, Platform);

/// Viability of every probed (program, platform) pair.
///
/// Only probes of the reference analysis count for instrumented platforms;
/// the uninstrumented baseline counts its analysis-less probe. When a pair was
/// probed more than once, the last probe wins.
#[derive(Debug, Clone)]
pub struct SuccessGate {
    reference_analysis: String,
    viable: HashMap<GateKey, bool>,
}

impl SuccessGate {
    /// Build from probe outcomes, in probe order.
    pub fn from_outcomes<'a, I>(reference_analysis: &str, probes: I) -> Self
    where
        I: IntoIterator<Item = (&'a BenchmarkIdentity, &'a RunOutcome)>,
    {
        Self::build(
            reference_analysis,
            probes
                .into_iter()
                .map(|(identity, outcome)| (identity, outcome.is_success())),
        )
    }

    /// Build from rows of a probe report.
    pub fn from_records(reference_analysis: &str, records: &[ProbeRecord]) -> Self {
        let identities: Vec<_> = records.iter().map(|r| (r.identity(), r.succeeded())).collect();
        Self::build(
            reference_analysis,
            identities.iter().map(|(identity, ok)| (identity, *ok)),
        )
    }

    /// Load from a probe report on disk.
    pub fn load(reference_analysis: &str, path: &Path) -> Result<Self, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::MalformedGateFile {
                path: path.to_path_buf(),
                reason: "file does not exist; run the probe phase first".to_string(),
            });
        }
        let records: Vec<ProbeRecord> =
            read_records(path).map_err(|e| ConfigError::MalformedGateFile {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        Ok(Self::from_records(reference_analysis, &records))
    }

    fn build<'a>(
        reference_analysis: &str,
        probes: impl Iterator<Item = (&'a BenchmarkIdentity, bool)>,
    ) -> Self {
        let mut viable = HashMap::new();
        for (identity, ok) in probes {
            let counts = match identity.platform {
                Platform::Uninstrumented => identity.analysis.is_none(),
                _ => identity.analysis.as_deref() == Some(reference_analysis),
            };
            if counts {
                viable.insert((identity.program.clone(), identity.platform), ok);
            }
        }
        Self {
            reference_analysis: reference_analysis.to_string(),
            viable,
        }
    }

    pub fn reference_analysis(&self) -> &str {
        &self.reference_analysis
    }

    /// Whether the reference probe of (program, platform) succeeded.
    ///
    /// Asking about a pair that was never probed is an ordering bug upstream.
    pub fn is_viable(&self, program: &str, platform: Platform) -> Result<bool, ConfigError> {
        self.viable
            .get(&(program.to_string(), platform))
            .copied()
            .ok_or_else(|| ConfigError::UnprobedIdentity {
                program: program.to_string(),
                platform,
            })
    }

    /// Pairs known to the gate with their decision, sorted.
    pub fn decisions(&self) -> Vec<(&GateKey, bool)> {
        let mut decisions: Vec<_> = self.viable.iter().map(|(k, v)| (k, *v)).collect();
        decisions.sort_by(|a, b| a.0.cmp(b.0));
        decisions
    }

    pub fn len(&self) -> usize {
        self.viable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.viable.is_empty()
    }
}

/// Whether a probe row timed out under a smaller budget than `current_timeout`.
pub fn is_stale(record: &ProbeRecord, current_timeout: u64) -> bool {
    record.timeout && record.timeout_amount < current_timeout
}

/// Copy fresh probe rows forward and re-probe stale ones.
///
/// Every resulting row is written to `sink` in the order of `previous`.
pub fn rerun_stale<F>(
    previous: Vec<ProbeRecord>,
    current_timeout: u64,
    sink: &mut ReportSink<ProbeRecord>,
    mut rerun: F,
) -> Result<Vec<ProbeRecord>, HarnessError>
where
    F: FnMut(&ProbeRecord) -> Result<ProbeRecord, HarnessError>,
{
    let mut refreshed = Vec::with_capacity(previous.len());
    for record in previous {
        let record = if is_stale(&record, current_timeout) {
            tracing::info!(
                "Re-probing {} (timed out after {}s, budget now {}s)",
                record.identity(),
                record.timeout_amount,
                current_timeout
            );
            rerun(&record)?
        } else {
            record
        };
        sink.write(&record)?;
        refreshed.push(record);
    }
    Ok(refreshed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::FailureReason;
    use crate::config::TimeUnit;

    fn success() -> RunOutcome {
        RunOutcome::success(Vec::new(), TimeUnit::Ms)
    }

    fn timeout(seconds: u64) -> RunOutcome {
        RunOutcome::Timeout {
            configured_timeout_seconds: seconds,
        }
    }

    fn probes() -> Vec<(BenchmarkIdentity, RunOutcome)> {
        vec![
            (BenchmarkIdentity::new("boa", Platform::Uninstrumented, None), success()),
            (BenchmarkIdentity::new("boa", Platform::Wasabi, Some("forward")), timeout(300)),
            (BenchmarkIdentity::new("boa", Platform::Wasabi, Some("call-graph")), success()),
            (
                BenchmarkIdentity::new("boa", Platform::Wastrumentation, Some("forward")),
                success(),
            ),
            (
                BenchmarkIdentity::new("jsc", Platform::Wastrumentation, Some("forward")),
                RunOutcome::Crash {
                    classified_reason: FailureReason::known("Local count too large"),
                },
            ),
        ]
    }

    fn gate() -> SuccessGate {
        let probes = probes();
        SuccessGate::from_outcomes("forward", probes.iter().map(|(i, o)| (i, o)))
    }

    #[test]
    fn test_reference_analysis_decides() {
        let gate = gate();
        assert!(!gate.is_viable("boa", Platform::Wasabi).unwrap());
        assert!(gate.is_viable("boa", Platform::Wastrumentation).unwrap());
        assert!(gate.is_viable("boa", Platform::Uninstrumented).unwrap());
        assert!(!gate.is_viable("jsc", Platform::Wastrumentation).unwrap());
        assert_eq!(gate.len(), 4);
    }

    #[test]
    fn test_unprobed_pair_is_an_error() {
        let err = gate().is_viable("jsc", Platform::Wasabi).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UnprobedIdentity { program, platform: Platform::Wasabi } if program == "jsc"
        ));
    }

    #[test]
    fn test_non_reference_probe_alone_is_unprobed() {
        let probes = [(
            BenchmarkIdentity::new("hydro", Platform::Wasabi, Some("call-graph")),
            success(),
        )];
        let gate = SuccessGate::from_outcomes("forward", probes.iter().map(|(i, o)| (i, o)));
        assert!(gate.is_viable("hydro", Platform::Wasabi).is_err());
    }

    #[test]
    fn test_round_trip_through_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("executes-once.csv");
        let mut sink = ReportSink::<ProbeRecord>::create(&path).unwrap();
        for (identity, outcome) in probes() {
            sink.write(&ProbeRecord::from_outcome(&identity, &outcome, 300))
                .unwrap();
        }

        let original = gate();
        let reloaded = SuccessGate::load("forward", &path).unwrap();
        assert_eq!(original.decisions(), reloaded.decisions());
    }

    #[test]
    fn test_missing_gate_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = SuccessGate::load("forward", &dir.path().join("nope.csv")).unwrap_err();
        assert!(matches!(err, ConfigError::MalformedGateFile { .. }));
    }

    #[test]
    fn test_corrupt_gate_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("executes-once.csv");
        std::fs::write(&path, "runtime,platform\nNodeJS,Jalangi\n").unwrap();
        let err = SuccessGate::load("forward", &path).unwrap_err();
        assert!(matches!(err, ConfigError::MalformedGateFile { .. }));
    }

    #[test]
    fn test_rerun_only_stale_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink =
            ReportSink::<ProbeRecord>::create(&dir.path().join("rerun.csv")).unwrap();

        let short = BenchmarkIdentity::new("boa", Platform::Wasabi, Some("forward"));
        let long = BenchmarkIdentity::new("fib", Platform::Wasabi, Some("forward"));
        let ok = BenchmarkIdentity::new("hydro", Platform::Wasabi, Some("forward"));
        let previous = vec![
            ProbeRecord::from_outcome(&short, &timeout(60), 60),
            ProbeRecord::from_outcome(&long, &timeout(600), 600),
            ProbeRecord::from_outcome(&ok, &success(), 60),
        ];

        let mut rerun_programs = Vec::new();
        let refreshed = rerun_stale(previous.clone(), 300, &mut sink, |record| {
            rerun_programs.push(record.input_program.clone());
            Ok(ProbeRecord::from_outcome(&record.identity(), &success(), 300))
        })
        .unwrap();

        assert_eq!(rerun_programs, vec!["boa".to_string()]);
        assert!(refreshed[0].succeeded());
        assert_eq!(refreshed[1], previous[1]);
        assert_eq!(refreshed[2], previous[2]);
        assert_eq!(sink.written(), 3);
    }
}
