// -
// Protocol names used in logs and errors

pub(crate) const TABULAR: &str = "tabular";
pub(crate) const KEYVALUE: &str = "keyvalue";

// -
// Default cluster shape

pub(crate) const DEFAULT_COORDINATOR_COUNT: usize = 3;
pub(crate) const DEFAULT_WORKER_COUNT: usize = 3;
pub(crate) const DEFAULT_STARTUP_TIMEOUT_IN_MS: u64 = 50_000;

/// Ports reserved per process role: coordinator (rpc, http), worker (rpc, http, tabular, keyvalue)
pub(crate) const COORDINATOR_PORTS: usize = 2;
pub(crate) const WORKER_PORTS: usize = 4;

/// Interval between liveness probes of a freshly spawned process
pub(crate) const LAUNCH_PROBE_INTERVAL_IN_MS: u64 = 50;

/// Time a killed process is given to be reaped during stop
pub(crate) const TERMINATE_WAIT_IN_MS: u64 = 5_000;

// -
// Readiness

pub(crate) const DEFAULT_READINESS_POLL_INTERVAL_IN_MS: u64 = 200;
/// Floor applied to poll intervals handed to the poller directly
pub(crate) const MIN_READINESS_POLL_INTERVAL_IN_MS: u64 = 10;
pub(crate) const DEFAULT_STATUS_PATH: &str = "/api/v1/cluster-status";

// -
// CQL

pub(crate) const CQL_VERSION: &str = "3.0.0";
pub(crate) const DEFAULT_PAGE_SIZE: i32 = 100;
pub(crate) const DEFAULT_KEYSPACE: &str = "conformance";
