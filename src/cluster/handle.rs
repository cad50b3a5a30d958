use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use arc_swap::ArcSwapOption;
use tempfile::TempDir;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::launcher::NodeProcess;
use super::launcher::ProcessRole;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorEndpoint {
    pub index: usize,
    pub rpc: SocketAddr,
    pub http: SocketAddr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerEndpoint {
    pub index: usize,
    pub host: IpAddr,
    pub rpc_port: u16,
    pub http_port: u16,
    pub tabular_port: u16,
    pub keyvalue_port: u16,
}

/// Last known set of serving workers, published by the readiness poller
#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    /// Indexes into [`ClusterHandle::worker_endpoints`]
    pub serving: BTreeSet<usize>,
    pub observed_at: Instant,
}

pub(super) struct ManagedProcess {
    pub(super) name: String,
    pub(super) role: ProcessRole,
    pub(super) process: Box<dyn NodeProcess>,
}

pub(super) enum DataRoot {
    /// Removed together with the handle
    Owned(TempDir),
    /// Configured `data_root`; left in place
    External(PathBuf),
}

/// A running cluster.
///
/// Endpoint sets are fixed at creation and every address in them was reachable at that
/// time. Only the health snapshot changes afterwards. Dropping a handle that was never
/// stopped kills its processes.
pub struct ClusterHandle {
    coordinators: Vec<CoordinatorEndpoint>,
    workers: Vec<WorkerEndpoint>,
    processes: Vec<ManagedProcess>,
    data_root: Option<DataRoot>,
    health: ArcSwapOption<HealthSnapshot>,
    cursor: AtomicUsize,
    stopped: bool,
}

impl WorkerEndpoint {
    pub fn rpc_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.rpc_port)
    }

    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.http_port)
    }

    pub fn tabular_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.tabular_port)
    }

    pub fn keyvalue_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.keyvalue_port)
    }

    /// Whether a `host:port` string reported by a coordinator names this worker.
    ///
    /// Any of the worker's ports is accepted; the host must match [`host_matches`].
    pub fn matches_address(
        &self,
        reported: &str,
    ) -> bool {
        let Some((host, port)) = reported.trim().rsplit_once(':') else {
            return false;
        };
        let Ok(port) = port.parse::<u16>() else {
            return false;
        };
        let ports = [
            self.rpc_port,
            self.http_port,
            self.tabular_port,
            self.keyvalue_port,
        ];
        ports.contains(&port) && host_matches(host, &self.host)
    }
}

/// Host comparison treating `localhost`, `127.0.0.1` and `::1` as the same host
pub fn host_matches(
    host: &str,
    ip: &IpAddr,
) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.eq_ignore_ascii_case("localhost") {
        return ip.is_loopback();
    }
    match host.parse::<IpAddr>() {
        Ok(parsed) => parsed == *ip || (parsed.is_loopback() && ip.is_loopback()),
        Err(_) => false,
    }
}

impl ClusterHandle {
    pub(super) fn new(
        coordinators: Vec<CoordinatorEndpoint>,
        workers: Vec<WorkerEndpoint>,
        processes: Vec<ManagedProcess>,
        data_root: DataRoot,
    ) -> Self {
        Self {
            coordinators,
            workers,
            processes,
            data_root: Some(data_root),
            health: ArcSwapOption::empty(),
            cursor: AtomicUsize::new(0),
            stopped: false,
        }
    }

    /// Handle over endpoints whose processes are managed elsewhere (an already running
    /// cluster). `stop` only marks it stopped.
    pub fn external(
        coordinators: Vec<CoordinatorEndpoint>,
        workers: Vec<WorkerEndpoint>,
    ) -> Self {
        Self {
            coordinators,
            workers,
            processes: Vec::new(),
            data_root: None,
            health: ArcSwapOption::empty(),
            cursor: AtomicUsize::new(0),
            stopped: false,
        }
    }

    pub fn coordinator_endpoints(&self) -> &[CoordinatorEndpoint] {
        &self.coordinators
    }

    pub fn worker_endpoints(&self) -> &[WorkerEndpoint] {
        &self.workers
    }

    pub fn data_dir(&self) -> Option<&Path> {
        match self.data_root.as_ref()? {
            DataRoot::Owned(dir) => Some(dir.path()),
            DataRoot::External(path) => Some(path),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn process_ids(&self) -> Vec<Option<u32>> {
        self.processes.iter().map(|p| p.process.id()).collect()
    }

    pub fn health(&self) -> Option<Arc<HealthSnapshot>> {
        self.health.load_full()
    }

    /// Atomically replace the serving set
    pub fn publish_health(
        &self,
        serving: BTreeSet<usize>,
    ) {
        debug!(?serving, "health snapshot updated");
        self.health.store(Some(Arc::new(HealthSnapshot {
            serving,
            observed_at: Instant::now(),
        })));
    }

    /// Workers a new session may be opened against: the snapshot when one exists, else all
    pub fn candidate_workers(&self) -> Vec<&WorkerEndpoint> {
        match &*self.health.load() {
            Some(snapshot) => self
                .workers
                .iter()
                .filter(|w| snapshot.serving.contains(&w.index))
                .collect(),
            None => self.workers.iter().collect(),
        }
    }

    /// Rotating start offset for round-robin endpoint selection
    pub fn next_cursor(&self) -> usize {
        self.cursor.fetch_add(1, Ordering::Relaxed)
    }

    /// Terminate workers first, then coordinators, then drop the temp data dir.
    /// Safe to call more than once.
    pub(super) async fn shutdown(
        &mut self,
        wait: Duration,
    ) {
        if self.stopped {
            debug!("cluster already stopped");
            return;
        }

        for role in [ProcessRole::Worker, ProcessRole::Coordinator] {
            for managed in self.processes.iter_mut().rev().filter(|p| p.role == role) {
                debug!(name = %managed.name, "terminating");
                managed.process.terminate(wait).await;
            }
        }
        self.processes.clear();

        if let Some(DataRoot::Owned(dir)) = self.data_root.take() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                warn!(path = %path.display(), "failed to remove data dir: {e}");
            }
        }

        self.stopped = true;
        info!("cluster stopped");
    }
}

impl fmt::Debug for ClusterHandle {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ClusterHandle")
            .field("coordinators", &self.coordinators)
            .field("workers", &self.workers)
            .field("processes", &self.processes.len())
            .field("stopped", &self.stopped)
            .finish()
    }
}

impl Drop for ClusterHandle {
    fn drop(&mut self) {
        if self.stopped || self.processes.is_empty() {
            return;
        }
        warn!(
            processes = self.processes.len(),
            "cluster handle dropped without stop, killing processes"
        );
        for managed in self.processes.iter_mut() {
            managed.process.kill();
        }
    }
}

/// Terminate processes launched by a start attempt that is being abandoned
pub(super) async fn terminate_all(
    processes: &mut Vec<ManagedProcess>,
    wait: Duration,
) {
    while let Some(mut managed) = processes.pop() {
        warn!(name = %managed.name, "terminating after failed start");
        managed.process.terminate(wait).await;
    }
}
