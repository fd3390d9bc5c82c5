//! instrbench - Benchmark harness for WebAssembly instrumentation platforms.
//!
//! Drives instrumented and uninstrumented WebAssembly programs through a host
//! runtime, classifies every run (success, timeout, crash) and writes the
//! probe, code-size and execution reports used to compare the platforms.

pub mod bench;
pub mod classify;
pub mod cli;
pub mod config;
pub mod corpus;
pub mod error;
pub mod results;
