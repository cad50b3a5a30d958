//! Conformance Harness Error Hierarchy
//!
//! Errors are split by the scope they abort:
//! - [`StartupError`] aborts the whole suite run (partial clusters are torn down first)
//! - [`ConnectError`] aborts only the test case that asked for the session
//! - [`CommandError`] is a server-side reply the conformance runner classifies
//! - [`EmptyResultError`] is a fixture precondition violation
//!
//! Readiness timeouts and conformance violations are deliberately not errors: the former is a
//! `false` from the poller, the latter a failed case state in the suite report.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use config::ConfigError;

use crate::CaseState;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Cluster could not be brought up
    #[error(transparent)]
    Startup(#[from] StartupError),

    /// Session could not be opened against any candidate endpoint
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// Malformed or unexpected wire traffic
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The server answered a command with an error reply
    #[error(transparent)]
    Command(#[from] CommandError),

    /// A query structurally returned nothing
    #[error(transparent)]
    EmptyResult(#[from] EmptyResultError),

    /// Harness configuration loading or validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Socket or filesystem failure outside of session establishment
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Coordinator status endpoint could not be queried or decoded
    #[error("Cluster status query failed: {0}")]
    StatusProbe(#[from] reqwest::Error),

    /// A conformance case was moved to a state its current state cannot reach
    #[error("Illegal case transition {from} -> {to}")]
    CaseTransition { from: CaseState, to: CaseState },

    /// Suite was cancelled before the body completed
    #[error("Suite cancelled: {0}")]
    Cancelled(String),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// Spec violates `coordinator_count >= 1` / `worker_count >= 1`
    #[error("Invalid cluster spec: {0}")]
    InvalidSpec(String),

    /// Could not reserve enough distinct local ports
    #[error("Port allocation failed: {0}")]
    PortAllocation(String),

    /// Binary missing or not executable
    #[error("Failed to spawn {name} from {binary}: {source}")]
    Spawn {
        name: String,
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Process died before its rpc port became reachable (typically a bind failure)
    #[error("Process {name} exited during startup with status {status}")]
    ProcessExited { name: String, status: String },

    /// Process alive but its rpc port never accepted connections
    #[error("Process {name} not reachable at {addr} after {waited:?}")]
    Unreachable {
        name: String,
        addr: SocketAddr,
        waited: Duration,
    },

    /// Per-process data directory could not be prepared
    #[error("Failed to prepare data directory {path}: {source}")]
    DataDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// No worker endpoint matches the request (host filter, empty health snapshot)
    #[error("No candidate endpoint for {protocol} session: {reason}")]
    NoEndpoint {
        protocol: &'static str,
        reason: String,
    },

    /// TCP connect failed or timed out
    #[error("Connect to {addr} failed: {source}")]
    Unreachable {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Every candidate was tried once and none accepted
    #[error("All {attempted} candidate endpoints refused {protocol} session")]
    Exhausted {
        protocol: &'static str,
        attempted: usize,
    },

    /// Protocol handshake (CQL STARTUP, keyspace selection) failed
    #[error("Handshake with {addr} failed: {reason}")]
    Handshake { addr: SocketAddr, reason: String },

    /// Server rejected the supplied credentials
    #[error("Authentication rejected by {addr}: {message}")]
    AuthRejected { addr: SocketAddr, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Peer closed the connection mid-frame or before replying
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// Frame could not be parsed
    #[error("Malformed {protocol} frame: {details}")]
    Malformed {
        protocol: &'static str,
        details: String,
    },

    /// Frame parsed but was not what the exchange expected
    #[error("Unexpected {protocol} response: {details}")]
    Unexpected {
        protocol: &'static str,
        details: String,
    },

    /// CQL ERROR response to a tabular statement
    #[error("Server error {code:#06x}: {message}")]
    Server { code: i32, message: String },

    /// Request did not complete within the configured request timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// An earlier exchange on this connection timed out; its reply may still be in flight
    #[error("Connection to {0} desynchronized by an earlier timeout")]
    Desynchronized(SocketAddr),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// RESP error reply, message preserved verbatim (including the `ERR` prefix)
    #[error("{0}")]
    Server(String),
}

#[derive(Debug, thiserror::Error)]
#[error("Query returned no rows: {statement}")]
pub struct EmptyResultError {
    pub statement: String,
}

impl Error {
    /// Server error text if this is a key-value error reply
    pub fn server_message(&self) -> Option<&str> {
        match self {
            Error::Command(CommandError::Server(message)) => Some(message),
            _ => None,
        }
    }

    /// True for failures that must abort the suite rather than a single case
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Error::Startup(_) | Error::Config(_) | Error::Fatal(_))
    }
}

impl ProtocolError {
    pub(crate) fn malformed(
        protocol: &'static str,
        details: impl Into<String>,
    ) -> Self {
        ProtocolError::Malformed {
            protocol,
            details: details.into(),
        }
    }

    pub(crate) fn unexpected(
        protocol: &'static str,
        details: impl Into<String>,
    ) -> Self {
        ProtocolError::Unexpected {
            protocol,
            details: details.into(),
        }
    }
}
