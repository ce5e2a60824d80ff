//! Component regression test-suite harness for the BDSIM beam-line simulator.
//!
//! This crate provides:
//! - **Parameter model**: per-component parameter tables and combination counting
//! - **Test writer**: one lattice file per parameter combination, deterministic names
//! - **Run executor**: simulator + comparator subprocesses with timeout and cleanup
//! - **Log parsing**: Geant4 exception blocks classified into diagnostics
//! - **Aggregation and reporting**: per-component counts, common factors, JSON persistence
//!
//! [`suite::TestSuite`] sequences the stages; `bdsim_regress` is the CLI runner.

pub mod component;
pub mod config;
pub mod executor;
pub mod log_parser;
pub mod params;
pub mod pool;
pub mod report;
pub mod results;
pub mod suite;
pub mod test_case;
pub mod writer;

pub use bdsim_regress_error::{RegressError, Result};
pub use component::{ComponentKind, ComponentSpec, Param, ParamValue};
pub use config::SuiteConfig;
pub use executor::{ProcessExecutor, RunMode, RunResult, RunStatus, TestExecutor, TestJob};
pub use log_parser::{Diagnostic, Geant4ExceptionClassifier, LogClassifier};
pub use params::{ParamAxis, ParameterSet};
pub use results::ResultsCollection;
pub use suite::{SuiteOutcome, TestSuite};
pub use test_case::TestCase;
