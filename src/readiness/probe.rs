use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use serde::Serialize;
use tracing::trace;

use crate::CoordinatorEndpoint;
use crate::ReadinessConfig;
use crate::Result;

/// Worker state as reported by a coordinator
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerState {
    Serving,
    Joining,
    Dead,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct WorkerStatus {
    /// `host:port` as the coordinator knows the worker
    pub address: String,
    pub state: WorkerState,
}

/// Body of the coordinator status endpoint:
/// `{"workers":[{"address":"127.0.0.1:9100","state":"SERVING"}]}`
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct ClusterStatus {
    #[serde(default)]
    pub workers: Vec<WorkerStatus>,
}

/// Asks one coordinator which workers it considers live
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterStatusProbe: Send + Sync + 'static {
    async fn query(
        &self,
        coordinator: &CoordinatorEndpoint,
    ) -> Result<ClusterStatus>;
}

/// GET `http://{coordinator.http}{status_path}` and decode the JSON body
#[derive(Debug, Clone)]
pub struct HttpStatusProbe {
    client: reqwest::Client,
    status_path: String,
}

impl HttpStatusProbe {
    pub fn new(
        status_path: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            status_path: status_path.into(),
        })
    }

    pub fn from_config(config: &ReadinessConfig) -> Result<Self> {
        Self::new(config.status_path.clone(), config.probe_timeout())
    }
}

#[async_trait]
impl ClusterStatusProbe for HttpStatusProbe {
    async fn query(
        &self,
        coordinator: &CoordinatorEndpoint,
    ) -> Result<ClusterStatus> {
        let url = format!("http://{}{}", coordinator.http, self.status_path);
        trace!(%url, "querying cluster status");
        let status = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json::<ClusterStatus>()
            .await?;
        Ok(status)
    }
}
