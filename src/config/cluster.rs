use std::collections::BTreeMap;
use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use super::invalid;
use super::validate_directory;
use crate::constants::DEFAULT_COORDINATOR_COUNT;
use crate::constants::DEFAULT_STARTUP_TIMEOUT_IN_MS;
use crate::constants::DEFAULT_WORKER_COUNT;
use crate::Result;

/// Shape of the ephemeral cluster to bring up.
///
/// Immutable once [`ProcessClusterManager::start`](crate::ProcessClusterManager::start)
/// begins: `start` only borrows the spec and copies what it needs into the handle.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClusterSpec {
    /// Number of coordinator (metadata/placement) processes, >= 1
    #[serde(default = "default_coordinator_count")]
    pub coordinator_count: usize,

    /// Number of worker (data-serving) processes, >= 1
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Upper bound for every process to become reachable during `start`
    #[serde(default = "default_startup_timeout_in_ms")]
    pub startup_timeout_in_ms: u64,

    /// Interface every process binds to
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// When set, ports are assigned sequentially from here instead of asking the OS
    #[serde(default)]
    pub base_port: Option<u16>,

    /// Root for per-process data dirs; a temp dir owned by the handle is used when unset
    #[serde(default)]
    pub data_root: Option<PathBuf>,

    #[serde(default = "default_coordinator_template")]
    pub coordinator: ProcessTemplate,

    #[serde(default = "default_worker_template")]
    pub worker: ProcessTemplate,
}

/// How to launch one class of process.
///
/// `args` are rendered per process; recognised placeholders are `{index}`, `{host}`,
/// `{rpc_port}`, `{http_port}`, `{data_dir}`, `{coordinator_addresses}`, `{tabular_port}`
/// and `{keyvalue_port}` (the last two only resolve for workers).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ProcessTemplate {
    pub binary: PathBuf,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Default for ClusterSpec {
    fn default() -> Self {
        Self {
            coordinator_count: default_coordinator_count(),
            worker_count: default_worker_count(),
            startup_timeout_in_ms: default_startup_timeout_in_ms(),
            host: default_host(),
            base_port: None,
            data_root: None,
            coordinator: default_coordinator_template(),
            worker: default_worker_template(),
        }
    }
}

impl ClusterSpec {
    /// Spec with the default process templates and the given shape
    pub fn new(
        coordinator_count: usize,
        worker_count: usize,
        startup_timeout: Duration,
    ) -> Self {
        Self {
            coordinator_count,
            worker_count,
            startup_timeout_in_ms: startup_timeout.as_millis() as u64,
            ..Default::default()
        }
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_in_ms)
    }

    /// Total number of processes `start` will launch
    pub fn process_count(&self) -> usize {
        self.coordinator_count + self.worker_count
    }

    pub fn validate(&self) -> Result<()> {
        if self.coordinator_count == 0 {
            return Err(invalid("cluster.coordinator_count must be >= 1"));
        }

        if self.worker_count == 0 {
            return Err(invalid("cluster.worker_count must be >= 1"));
        }

        if self.startup_timeout_in_ms == 0 {
            return Err(invalid("cluster.startup_timeout_in_ms must be > 0"));
        }

        if let Some(base) = self.base_port {
            let needed = self.coordinator_count * crate::constants::COORDINATOR_PORTS
                + self.worker_count * crate::constants::WORKER_PORTS;
            if base == 0 || (base as usize) + needed > u16::MAX as usize {
                return Err(invalid(format!(
                    "cluster.base_port {base} cannot fit {needed} sequential ports"
                )));
            }
        }

        self.coordinator.validate("coordinator")?;
        self.worker.validate("worker")?;

        if let Some(root) = &self.data_root {
            validate_directory(root, "data_root")?;
        }

        Ok(())
    }
}

impl ProcessTemplate {
    pub fn new(
        binary: impl Into<PathBuf>,
        args: Vec<String>,
    ) -> Self {
        Self {
            binary: binary.into(),
            args,
            env: BTreeMap::new(),
        }
    }

    fn validate(
        &self,
        role: &str,
    ) -> Result<()> {
        if self.binary.as_os_str().is_empty() {
            return Err(invalid(format!("cluster.{role}.binary cannot be empty")));
        }
        Ok(())
    }
}

fn default_coordinator_count() -> usize {
    DEFAULT_COORDINATOR_COUNT
}
fn default_worker_count() -> usize {
    DEFAULT_WORKER_COUNT
}
fn default_startup_timeout_in_ms() -> u64 {
    DEFAULT_STARTUP_TIMEOUT_IN_MS
}
fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}
fn default_coordinator_template() -> ProcessTemplate {
    ProcessTemplate::new(
        "yb-master",
        vec![
            "--master_addresses={coordinator_addresses}".into(),
            "--rpc_bind_addresses={host}:{rpc_port}".into(),
            "--webserver_interface={host}".into(),
            "--webserver_port={http_port}".into(),
            "--fs_data_dirs={data_dir}".into(),
        ],
    )
}
fn default_worker_template() -> ProcessTemplate {
    ProcessTemplate::new(
        "yb-tserver",
        vec![
            "--tserver_master_addrs={coordinator_addresses}".into(),
            "--rpc_bind_addresses={host}:{rpc_port}".into(),
            "--webserver_interface={host}".into(),
            "--webserver_port={http_port}".into(),
            "--fs_data_dirs={data_dir}".into(),
            "--cql_proxy_bind_address={host}:{tabular_port}".into(),
            "--redis_proxy_bind_address={host}:{keyvalue_port}".into(),
        ],
    )
}
