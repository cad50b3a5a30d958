//! Gate between "processes reachable" and "cluster serving".
//!
//! [`ReadinessPoller::await_ready`] polls the coordinators on a fixed interval and reports
//! whether enough distinct workers are serving before the deadline. A timeout is a
//! `false`, never an error.

mod probe;
pub use probe::*;


use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::constants::MIN_READINESS_POLL_INTERVAL_IN_MS;
use crate::ClusterHandle;
use crate::ReadinessConfig;
use crate::Result;

pub struct ReadinessPoller {
    probe: Arc<dyn ClusterStatusProbe>,
    poll_interval: Duration,
}

impl ReadinessPoller {
    /// `poll_interval` is raised to a small floor; a zero interval would never tick
    pub fn new(
        probe: Arc<dyn ClusterStatusProbe>,
        poll_interval: Duration,
    ) -> Self {
        let floor = Duration::from_millis(MIN_READINESS_POLL_INTERVAL_IN_MS);
        if poll_interval < floor {
            warn!(?poll_interval, ?floor, "readiness poll interval raised to the floor");
        }
        Self {
            probe,
            poll_interval: poll_interval.max(floor),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Poller over the HTTP status endpoint
    pub fn from_config(config: &ReadinessConfig) -> Result<Self> {
        Ok(Self::new(
            Arc::new(HttpStatusProbe::from_config(config)?),
            config.poll_interval(),
        ))
    }

    /// True once at least `min_workers` distinct workers are serving; false at `timeout`.
    pub async fn await_ready(
        &self,
        handle: &ClusterHandle,
        min_workers: usize,
        timeout: Duration,
    ) -> bool {
        info!(min_workers, ?timeout, "waiting for cluster readiness");

        let poll = async {
            let mut ticker = tokio::time::interval(self.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.poll_once(handle).await {
                    Some(serving) if serving >= min_workers => {
                        info!(serving, min_workers, "cluster ready");
                        return;
                    }
                    Some(serving) => debug!(serving, min_workers, "cluster not ready yet"),
                    None => debug!("no coordinator answered the status query"),
                }
            }
        };

        match tokio::time::timeout(timeout, poll).await {
            Ok(()) => true,
            Err(_) => {
                warn!(min_workers, ?timeout, "cluster not ready before timeout");
                false
            }
        }
    }

    /// Query coordinators in order until one answers; publish and return its serving count.
    pub async fn poll_once(
        &self,
        handle: &ClusterHandle,
    ) -> Option<usize> {
        for coordinator in handle.coordinator_endpoints() {
            let status = match self.probe.query(coordinator).await {
                Ok(status) => status,
                Err(e) => {
                    debug!(coordinator = %coordinator.http, "status query failed: {e}");
                    continue;
                }
            };

            let mut serving = BTreeSet::new();
            for reported in status.workers.iter().filter(|w| w.state == WorkerState::Serving) {
                match handle
                    .worker_endpoints()
                    .iter()
                    .find(|w| w.matches_address(&reported.address))
                {
                    Some(worker) => {
                        serving.insert(worker.index);
                    }
                    None => debug!(address = %reported.address, "serving worker not in this cluster"),
                }
            }

            let count = serving.len();
            handle.publish_health(serving);
            return Some(count);
        }
        None
    }
}
