//! Strict parser for the launcher's stdout report.
//!
//! A launcher prints one performance line per intra-process iteration and,
//! when memory is tracked, one memory line per iteration:
//!
//! ```text
//! factorial (run 1): 12.5
//! factorial memory usage in bytes: 4096
//! ```
//!
//! Anything else (other than blank lines and the Wasabi fallback-hook notice)
//! means the launcher contract drifted.

use crate::bench::IterationSample;
use crate::error::ConsistencyError;
use regex::Regex;
use std::sync::LazyLock;

static PERFORMANCE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([\w-]+) \(run (\d+)\): (\d+(?:\.\d+)?)$").unwrap_or_else(|e| unreachable!("{e}"))
});

static MEMORY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([\w-]+) memory usage in bytes: (\d+)$").unwrap_or_else(|e| unreachable!("{e}"))
});

static FALLBACK_HOOK_NOTICE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^Wasabi: hook [\w-]+ not provided by Wasabi\.analysis, I will use an empty function as a fallback$",
    )
    .unwrap_or_else(|e| unreachable!("{e}"))
});

/// Lines a launcher is expected to print.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportShape {
    /// Intra-process iterations (`NODE_BENCHMARK_RUNS`).
    pub runs: usize,
    /// Whether every iteration also reports memory usage.
    pub memory: bool,
}

impl ReportShape {
    pub fn new(runs: usize, memory: bool) -> Self {
        Self { runs, memory }
    }

    pub fn expected_lines(&self) -> usize {
        if self.memory { self.runs * 2 } else { self.runs }
    }
}

#[derive(Debug)]
enum ReportLine<'a> {
    Performance {
        program: &'a str,
        run_index: usize,
        completion_time: f64,
    },
    Memory {
        program: &'a str,
        bytes: u64,
    },
}

fn parse_line(line: &str) -> Result<ReportLine<'_>, ConsistencyError> {
    let malformed = || ConsistencyError::MalformedReportLine {
        line: line.to_string(),
    };

    if let Some(caps) = PERFORMANCE_LINE.captures(line) {
        let (Some(program), Some(run), Some(time)) = (caps.get(1), caps.get(2), caps.get(3)) else {
            return Err(malformed());
        };
        return Ok(ReportLine::Performance {
            program: program.as_str(),
            run_index: run.as_str().parse().map_err(|_| malformed())?,
            completion_time: time.as_str().parse().map_err(|_| malformed())?,
        });
    }

    if let Some(caps) = MEMORY_LINE.captures(line) {
        let (Some(program), Some(bytes)) = (caps.get(1), caps.get(2)) else {
            return Err(malformed());
        };
        return Ok(ReportLine::Memory {
            program: program.as_str(),
            bytes: bytes.as_str().parse().map_err(|_| malformed())?,
        });
    }

    Err(malformed())
}

fn check_program(expected: &str, found: &str) -> Result<(), ConsistencyError> {
    if expected == found {
        Ok(())
    } else {
        Err(ConsistencyError::ProgramMismatch {
            expected: expected.to_string(),
            found: found.to_string(),
        })
    }
}

/// Parse the stdout of a successful launcher run into per-iteration samples.
///
/// Memory lines are paired with performance lines in order of appearance.
pub fn parse_report(
    program: &str,
    stdout: &str,
    shape: ReportShape,
) -> Result<Vec<IterationSample>, ConsistencyError> {
    let lines: Vec<&str> = stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !FALLBACK_HOOK_NOTICE.is_match(line))
        .collect();

    let line_count_error = || ConsistencyError::ReportLineCount {
        expected: shape.expected_lines(),
        found: lines.len(),
        lines: lines.iter().map(|l| (*l).to_string()).collect(),
    };

    if lines.len() != shape.expected_lines() {
        return Err(line_count_error());
    }

    let mut samples: Vec<IterationSample> = Vec::with_capacity(shape.runs);
    let mut memory = Vec::with_capacity(shape.runs);

    for line in &lines {
        match parse_line(line)? {
            ReportLine::Performance {
                program: found,
                run_index,
                completion_time,
            } => {
                check_program(program, found)?;
                if run_index == 0 || run_index > shape.runs {
                    return Err(ConsistencyError::RunIndexOutOfRange {
                        index: run_index,
                        runs: shape.runs,
                    });
                }
                if samples.iter().any(|s| s.run_index == run_index) {
                    return Err(ConsistencyError::MalformedReportLine {
                        line: (*line).to_string(),
                    });
                }
                samples.push(IterationSample {
                    run_index,
                    completion_time,
                    memory_usage_bytes: None,
                });
            }
            ReportLine::Memory {
                program: found,
                bytes,
            } => {
                check_program(program, found)?;
                memory.push(bytes);
            }
        }
    }

    let expected_memory = if shape.memory { shape.runs } else { 0 };
    if samples.len() != shape.runs || memory.len() != expected_memory {
        return Err(line_count_error());
    }

    for (sample, bytes) in samples.iter_mut().zip(memory) {
        sample.memory_usage_bytes = Some(bytes);
    }
    Ok(samples)
}
