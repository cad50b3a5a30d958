use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::debug;
use tracing::error;
use tracing::info;

use super::handle::terminate_all;
use super::handle::ClusterHandle;
use super::handle::CoordinatorEndpoint;
use super::handle::DataRoot;
use super::handle::ManagedProcess;
use super::handle::WorkerEndpoint;
use super::launcher::BinaryLauncher;
use super::launcher::LaunchPlan;
use super::launcher::NodeProcess;
use super::launcher::ProcessLauncher;
use super::launcher::ProcessPorts;
use super::launcher::ProcessRole;
use super::ports::allocate_ports;
use crate::constants::COORDINATOR_PORTS;
use crate::constants::LAUNCH_PROBE_INTERVAL_IN_MS;
use crate::constants::TERMINATE_WAIT_IN_MS;
use crate::constants::WORKER_PORTS;
use crate::ClusterSpec;
use crate::ProcessTemplate;
use crate::StartupError;

const CONNECT_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(500);

/// Brings up and tears down an ephemeral cluster.
///
/// `start` either returns a handle over a fully reachable cluster or terminates every
/// process it launched before returning the error.
#[derive(Clone)]
pub struct ProcessClusterManager {
    launcher: Arc<dyn ProcessLauncher>,
    terminate_wait: Duration,
}

impl Default for ProcessClusterManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessClusterManager {
    pub fn new() -> Self {
        Self::with_launcher(Arc::new(BinaryLauncher))
    }

    pub fn with_launcher(launcher: Arc<dyn ProcessLauncher>) -> Self {
        Self {
            launcher,
            terminate_wait: Duration::from_millis(TERMINATE_WAIT_IN_MS),
        }
    }

    pub async fn start(
        &self,
        spec: &ClusterSpec,
    ) -> Result<ClusterHandle, StartupError> {
        spec.validate()
            .map_err(|e| StartupError::InvalidSpec(e.to_string()))?;

        let deadline = Instant::now() + spec.startup_timeout();
        info!(
            coordinators = spec.coordinator_count,
            workers = spec.worker_count,
            timeout = ?spec.startup_timeout(),
            "starting cluster"
        );

        let needed = spec.coordinator_count * COORDINATOR_PORTS + spec.worker_count * WORKER_PORTS;
        let mut ports = allocate_ports(spec.host, spec.base_port, needed)?.into_iter();
        let mut next_port = || {
            ports
                .next()
                .ok_or_else(|| StartupError::PortAllocation("port pool exhausted".to_string()))
        };

        let data_root = prepare_data_root(spec.data_root.as_deref())?;
        let root_path = match &data_root {
            DataRoot::Owned(dir) => dir.path().to_path_buf(),
            DataRoot::External(path) => path.clone(),
        };

        let mut coordinators = Vec::with_capacity(spec.coordinator_count);
        for index in 0..spec.coordinator_count {
            coordinators.push(CoordinatorEndpoint {
                index,
                rpc: SocketAddr::new(spec.host, next_port()?),
                http: SocketAddr::new(spec.host, next_port()?),
            });
        }
        let mut workers = Vec::with_capacity(spec.worker_count);
        for index in 0..spec.worker_count {
            workers.push(WorkerEndpoint {
                index,
                host: spec.host,
                rpc_port: next_port()?,
                http_port: next_port()?,
                tabular_port: next_port()?,
                keyvalue_port: next_port()?,
            });
        }

        let coordinator_addresses = coordinators
            .iter()
            .map(|c| c.rpc.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let coordinator_plans = coordinators
            .iter()
            .map(|c| {
                build_plan(
                    ProcessRole::Coordinator,
                    c.index,
                    &spec.coordinator,
                    spec,
                    ProcessPorts {
                        rpc: c.rpc.port(),
                        http: c.http.port(),
                        tabular: None,
                        keyvalue: None,
                    },
                    &root_path,
                    &coordinator_addresses,
                )
            })
            .collect::<Vec<_>>();
        let worker_plans = workers
            .iter()
            .map(|w| {
                build_plan(
                    ProcessRole::Worker,
                    w.index,
                    &spec.worker,
                    spec,
                    ProcessPorts {
                        rpc: w.rpc_port,
                        http: w.http_port,
                        tabular: Some(w.tabular_port),
                        keyvalue: Some(w.keyvalue_port),
                    },
                    &root_path,
                    &coordinator_addresses,
                )
            })
            .collect::<Vec<_>>();

        let mut launched = Vec::with_capacity(spec.process_count());
        // Coordinators must be reachable before any worker is told where they are
        for group in [coordinator_plans, worker_plans] {
            if let Err(e) = self.launch_group(&group, deadline, &mut launched).await {
                error!("cluster start failed: {e}");
                terminate_all(&mut launched, self.terminate_wait).await;
                return Err(e);
            }
        }

        info!(
            coordinators = ?coordinators.iter().map(|c| c.rpc).collect::<Vec<_>>(),
            workers = ?workers.iter().map(|w| w.rpc_addr()).collect::<Vec<_>>(),
            "cluster processes reachable"
        );
        Ok(ClusterHandle::new(coordinators, workers, launched, data_root))
    }

    /// Idempotent, best-effort teardown
    pub async fn stop(
        &self,
        handle: &mut ClusterHandle,
    ) {
        handle.shutdown(self.terminate_wait).await;
    }

    async fn launch_group(
        &self,
        plans: &[LaunchPlan],
        deadline: Instant,
        launched: &mut Vec<ManagedProcess>,
    ) -> Result<(), StartupError> {
        let first = launched.len();
        for plan in plans {
            tokio::fs::create_dir_all(&plan.data_dir)
                .await
                .map_err(|source| StartupError::DataDir {
                    path: plan.data_dir.clone(),
                    source,
                })?;
            let process = self.launcher.launch(plan).await?;
            launched.push(ManagedProcess {
                name: plan.name.clone(),
                role: plan.role,
                process,
            });
        }

        for (plan, managed) in plans.iter().zip(launched[first..].iter_mut()) {
            wait_reachable(plan, managed.process.as_mut(), deadline).await?;
        }
        Ok(())
    }
}

/// Probe every address of `plan` until all accept, the process exits, or the deadline passes
async fn wait_reachable(
    plan: &LaunchPlan,
    process: &mut dyn NodeProcess,
    deadline: Instant,
) -> Result<(), StartupError> {
    let started = Instant::now();
    for addr in plan.addrs() {
        wait_accepting(plan, addr, process, deadline, started).await?;
    }
    debug!(name = %plan.name, "process reachable");
    Ok(())
}

async fn wait_accepting(
    plan: &LaunchPlan,
    addr: SocketAddr,
    process: &mut dyn NodeProcess,
    deadline: Instant,
    started: Instant,
) -> Result<(), StartupError> {
    let interval = Duration::from_millis(LAUNCH_PROBE_INTERVAL_IN_MS);

    loop {
        if let Some(status) = process.try_exit_status() {
            return Err(StartupError::ProcessExited {
                name: plan.name.clone(),
                status,
            });
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(StartupError::Unreachable {
                name: plan.name.clone(),
                addr,
                waited: started.elapsed(),
            });
        }

        let attempt = remaining.min(CONNECT_ATTEMPT_TIMEOUT);
        match tokio::time::timeout(attempt, TcpStream::connect(addr)).await {
            Ok(Ok(_)) => {
                debug!(name = %plan.name, %addr, "accepting");
                return Ok(());
            }
            Ok(Err(e)) => debug!(name = %plan.name, %addr, "not reachable yet: {e}"),
            Err(_) => debug!(name = %plan.name, %addr, "connect attempt timed out"),
        }

        tokio::time::sleep(interval.min(deadline.saturating_duration_since(Instant::now())))
            .await;
    }
}

fn prepare_data_root(configured: Option<&Path>) -> Result<DataRoot, StartupError> {
    match configured {
        Some(path) => {
            std::fs::create_dir_all(path).map_err(|source| StartupError::DataDir {
                path: path.to_path_buf(),
                source,
            })?;
            Ok(DataRoot::External(path.to_path_buf()))
        }
        None => tempfile::Builder::new()
            .prefix("wire-conformance-")
            .tempdir()
            .map(DataRoot::Owned)
            .map_err(|source| StartupError::DataDir {
                path: std::env::temp_dir(),
                source,
            }),
    }
}

fn build_plan(
    role: ProcessRole,
    index: usize,
    template: &ProcessTemplate,
    spec: &ClusterSpec,
    ports: ProcessPorts,
    root: &Path,
    coordinator_addresses: &str,
) -> LaunchPlan {
    let name = format!("{role}-{index}");
    let data_dir = root.join(&name);

    let mut vars: HashMap<&str, String> = HashMap::from([
        ("index", index.to_string()),
        ("host", spec.host.to_string()),
        ("rpc_port", ports.rpc.to_string()),
        ("http_port", ports.http.to_string()),
        ("data_dir", data_dir.display().to_string()),
        ("coordinator_addresses", coordinator_addresses.to_string()),
    ]);
    if let Some(port) = ports.tabular {
        vars.insert("tabular_port", port.to_string());
    }
    if let Some(port) = ports.keyvalue {
        vars.insert("keyvalue_port", port.to_string());
    }

    LaunchPlan {
        role,
        index,
        name,
        host: spec.host,
        ports,
        data_dir,
        binary: template.binary.clone(),
        args: template.args.iter().map(|a| render(a, &vars)).collect(),
        env: template
            .env
            .iter()
            .map(|(k, v)| (k.clone(), render(v, &vars)))
            .collect(),
    }
}

/// Substitute `{name}` placeholders; unknown names are left verbatim
pub(crate) fn render(
    template: &str,
    vars: &HashMap<&str, String>,
) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let key = &after[..close];
                match vars.get(key) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
