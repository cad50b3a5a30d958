//! Conformance harness for a distributed database exposing a CQL v4 (tabular) and a RESP
//! (key-value) front end.
//!
//! A run goes through [`SuiteLifecycle`]: [`ProcessClusterManager`] spawns the cluster,
//! [`ReadinessPoller`] waits for serving workers, the suite body opens sessions through
//! [`ProtocolSessionFactory`] and drives them with [`SchemaFixtureHelper`] or
//! [`ConformanceSuiteRunner`], and the cluster is stopped on the way out.

mod cluster;
mod config;
mod conformance;
mod constants;
mod errors;
mod fixture;
pub mod protocol;
mod readiness;
mod session;
mod suite;

pub use cluster::*;
pub use config::*;
pub use conformance::*;
pub use errors::*;
pub use fixture::*;
pub use readiness::*;
pub use session::*;
pub use suite::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
