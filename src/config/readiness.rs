use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use super::invalid;
use super::ClusterSpec;
use crate::constants::DEFAULT_READINESS_POLL_INTERVAL_IN_MS;
use crate::constants::DEFAULT_STATUS_PATH;
use crate::Result;

/// Parameters of the gate between cluster start and suite start
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReadinessConfig {
    /// Fixed interval between two cluster-status queries
    #[serde(default = "default_poll_interval")]
    pub poll_interval_in_ms: u64,

    /// Timeout of a single status query against one coordinator
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_in_ms: u64,

    /// HTTP path of the coordinator status endpoint
    #[serde(default = "default_status_path")]
    pub status_path: String,

    /// Workers that must be serving; defaults to the whole `worker_count`
    #[serde(default)]
    pub min_workers: Option<usize>,

    /// Overall budget for the gate; defaults to the cluster startup timeout
    #[serde(default)]
    pub timeout_in_ms: Option<u64>,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            poll_interval_in_ms: default_poll_interval(),
            probe_timeout_in_ms: default_probe_timeout(),
            status_path: default_status_path(),
            min_workers: None,
            timeout_in_ms: None,
        }
    }
}

impl ReadinessConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_in_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_in_ms)
    }

    pub fn min_workers_for(
        &self,
        spec: &ClusterSpec,
    ) -> usize {
        self.min_workers.unwrap_or(spec.worker_count)
    }

    pub fn timeout_for(
        &self,
        spec: &ClusterSpec,
    ) -> Duration {
        self.timeout_in_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| spec.startup_timeout())
    }

    pub fn validate(
        &self,
        spec: &ClusterSpec,
    ) -> Result<()> {
        if self.poll_interval_in_ms == 0 {
            return Err(invalid("readiness.poll_interval_in_ms must be > 0"));
        }

        if self.probe_timeout_in_ms == 0 {
            return Err(invalid("readiness.probe_timeout_in_ms must be > 0"));
        }

        if !self.status_path.starts_with('/') {
            return Err(invalid(format!(
                "readiness.status_path '{}' must start with '/'",
                self.status_path
            )));
        }

        if let Some(min) = self.min_workers {
            if min == 0 || min > spec.worker_count {
                return Err(invalid(format!(
                    "readiness.min_workers {} must be within 1..={}",
                    min, spec.worker_count
                )));
            }
        }

        Ok(())
    }
}

fn default_poll_interval() -> u64 {
    DEFAULT_READINESS_POLL_INTERVAL_IN_MS
}
fn default_probe_timeout() -> u64 {
    1_000
}
fn default_status_path() -> String {
    DEFAULT_STATUS_PATH.to_string()
}
