use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::process::Child;
use tokio::process::Command;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::StartupError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessRole {
    Coordinator,
    Worker,
}

impl fmt::Display for ProcessRole {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            ProcessRole::Coordinator => write!(f, "coordinator"),
            ProcessRole::Worker => write!(f, "worker"),
        }
    }
}

/// Ports assigned to one process; the protocol ports exist only for workers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessPorts {
    pub rpc: u16,
    pub http: u16,
    pub tabular: Option<u16>,
    pub keyvalue: Option<u16>,
}

/// Everything needed to launch one cluster process
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub role: ProcessRole,
    pub index: usize,
    /// `coordinator-0`, `worker-2`, ...
    pub name: String,
    pub host: IpAddr,
    pub ports: ProcessPorts,
    pub data_dir: PathBuf,
    pub binary: PathBuf,
    /// Template args with every placeholder already rendered
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl LaunchPlan {
    pub fn rpc_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.ports.rpc)
    }

    /// Every address the process must accept on before it counts as started:
    /// rpc, http and, for workers, the tabular and key-value ports
    pub fn addrs(&self) -> Vec<SocketAddr> {
        [
            Some(self.ports.rpc),
            Some(self.ports.http),
            self.ports.tabular,
            self.ports.keyvalue,
        ]
        .into_iter()
        .flatten()
        .map(|port| SocketAddr::new(self.host, port))
        .collect()
    }
}

/// Starts cluster processes.
///
/// The default [`BinaryLauncher`] spawns real binaries; tests substitute launchers that
/// bind in-process listeners instead.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProcessLauncher: Send + Sync + 'static {
    async fn launch(
        &self,
        plan: &LaunchPlan,
    ) -> Result<Box<dyn NodeProcess>, StartupError>;
}

/// A launched process as seen by the cluster manager
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NodeProcess: Send + Sync + 'static {
    /// OS pid, when there is one
    fn id(&self) -> Option<u32>;

    /// Exit status if the process has already exited; never blocks
    fn try_exit_status(&mut self) -> Option<String>;

    /// Request termination without waiting (used from `Drop`)
    fn kill(&mut self);

    /// Kill and wait up to `wait` for the process to be reaped. Already-dead is fine.
    async fn terminate(
        &mut self,
        wait: Duration,
    );
}

/// Spawns `plan.binary` with `tokio::process`
#[derive(Debug, Default, Clone)]
pub struct BinaryLauncher;

struct ChildProcess {
    name: String,
    child: Child,
}

#[async_trait]
impl ProcessLauncher for BinaryLauncher {
    async fn launch(
        &self,
        plan: &LaunchPlan,
    ) -> Result<Box<dyn NodeProcess>, StartupError> {
        let spawn_err = |source: std::io::Error| StartupError::Spawn {
            name: plan.name.clone(),
            binary: plan.binary.clone(),
            source,
        };

        let stdout = std::fs::File::create(plan.data_dir.join(format!("{}.out", plan.name)))
            .map_err(|source| StartupError::DataDir {
                path: plan.data_dir.clone(),
                source,
            })?;
        let stderr = stdout.try_clone().map_err(spawn_err)?;

        let child = Command::new(&plan.binary)
            .args(&plan.args)
            .envs(&plan.env)
            .current_dir(&plan.data_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_err)?;

        info!(
            name = %plan.name,
            pid = ?child.id(),
            binary = %plan.binary.display(),
            "spawned cluster process"
        );
        debug!(name = %plan.name, args = ?plan.args);

        Ok(Box::new(ChildProcess {
            name: plan.name.clone(),
            child,
        }))
    }
}

#[async_trait]
impl NodeProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn try_exit_status(&mut self) -> Option<String> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.to_string()),
            Ok(None) => None,
            Err(e) => Some(format!("unknown ({e})")),
        }
    }

    fn kill(&mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!(name = %self.name, "start_kill: {e}");
        }
    }

    async fn terminate(
        &mut self,
        wait: Duration,
    ) {
        if let Ok(Some(status)) = self.child.try_wait() {
            debug!(name = %self.name, %status, "process already exited");
            return;
        }
        self.kill();
        match tokio::time::timeout(wait, self.child.wait()).await {
            Ok(Ok(status)) => debug!(name = %self.name, %status, "process terminated"),
            Ok(Err(e)) => warn!(name = %self.name, "wait failed: {e}"),
            Err(_) => warn!(name = %self.name, ?wait, "process not reaped in time"),
        }
    }
}
