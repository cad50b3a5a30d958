//! One suite run: start the cluster, gate on readiness, run the body, always stop the cluster.
//!
//! The cluster handle is lent to the body through [`SuiteContext`] for the duration of the
//! run; nothing about the cluster is global.


use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

use crate::ClusterHandle;
use crate::Error;
use crate::HarnessConfig;
use crate::ProcessClusterManager;
use crate::ProtocolSessionFactory;
use crate::ReadinessPoller;
use crate::Result;

/// What the suite body gets to work with
#[derive(Clone, Copy)]
pub struct SuiteContext<'a> {
    pub handle: &'a ClusterHandle,
    pub factory: &'a ProtocolSessionFactory,
    pub config: &'a HarnessConfig,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SuiteOutcome<T> {
    Completed(T),
    /// The cluster started but did not serve enough workers in time; the body never ran
    NotReady,
}

pub struct SuiteLifecycle {
    config: HarnessConfig,
    manager: ProcessClusterManager,
    poller: ReadinessPoller,
    factory: ProtocolSessionFactory,
}

impl SuiteLifecycle {
    pub fn new(
        config: HarnessConfig,
        manager: ProcessClusterManager,
        poller: ReadinessPoller,
    ) -> Self {
        let factory = ProtocolSessionFactory::from_config(&config);
        Self {
            config,
            manager,
            poller,
            factory,
        }
    }

    /// Real binaries and the HTTP status probe
    pub fn from_config(config: HarnessConfig) -> Result<Self> {
        let poller = ReadinessPoller::from_config(&config.readiness)?;
        Ok(Self::new(config, ProcessClusterManager::new(), poller))
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Start, await readiness, run `body`. The cluster is stopped on every path out of here
    /// that returns; a panic in `body` leaves teardown to the handle's `Drop`.
    pub async fn run<T, F>(
        &self,
        cancel: &CancellationToken,
        body: F,
    ) -> Result<SuiteOutcome<T>>
    where
        F: for<'c> FnOnce(SuiteContext<'c>) -> BoxFuture<'c, Result<T>>,
    {
        let mut handle = tokio::select! {
            started = self.manager.start(&self.config.cluster) => started?,
            _ = cancel.cancelled() => {
                // processes launched so far are killed when the start future is dropped
                return Err(Error::Cancelled("during cluster startup".to_string()));
            }
        };

        let outcome = self.run_started(&handle, cancel, body).await;
        if let Err(e) = &outcome {
            warn!("suite aborted: {e}");
        }
        self.manager.stop(&mut handle).await;
        outcome
    }

    async fn run_started<T, F>(
        &self,
        handle: &ClusterHandle,
        cancel: &CancellationToken,
        body: F,
    ) -> Result<SuiteOutcome<T>>
    where
        F: for<'c> FnOnce(SuiteContext<'c>) -> BoxFuture<'c, Result<T>>,
    {
        let spec = &self.config.cluster;
        let min_workers = self.config.readiness.min_workers_for(spec);
        let timeout = self.config.readiness.timeout_for(spec);

        let ready = tokio::select! {
            ready = self.poller.await_ready(handle, min_workers, timeout) => ready,
            _ = cancel.cancelled() => {
                return Err(Error::Cancelled("while waiting for readiness".to_string()));
            }
        };
        if !ready {
            return Ok(SuiteOutcome::NotReady);
        }

        info!(?handle, "cluster ready, running suite body");
        let context = SuiteContext {
            handle,
            factory: &self.factory,
            config: &self.config,
        };
        tokio::select! {
            result = body(context) => result.map(SuiteOutcome::Completed),
            _ = cancel.cancelled() => Err(Error::Cancelled("during suite body".to_string())),
        }
    }
}
