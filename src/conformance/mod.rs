//! Conformance suites: commands, the outcomes that count as conformant, and a runner that
//! drives each case `Pending -> Executing -> {Passed, Failed, Skipped}`.
//!
//! A conformance violation is not an error. It is a `Failed` case carrying the observed
//! reply in the [`SuiteReport`].
mod control_suite;
mod expectation;
mod monitor;
mod report;
mod runner;
pub use control_suite::*;
pub use expectation::*;
pub use report::*;
pub use runner::*;
