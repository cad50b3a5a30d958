//! Protocol sessions against worker endpoints.
//!
//! A session owns exactly one TCP connection. The factory picks the endpoint:
//! round-robin over the handle's candidate workers (the health snapshot when the
//! readiness poller published one), each candidate tried at most once per open.
mod connection;
mod keyvalue;
mod tabular;
pub use keyvalue::*;
pub use tabular::*;


use std::fmt;
use std::future::Future;
use std::net::SocketAddr;

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use crate::constants::KEYVALUE;
use crate::constants::TABULAR;
use crate::host_matches;
use crate::ClusterHandle;
use crate::ConnectError;
use crate::HarnessConfig;
use crate::KeyValueConfig;
use crate::NetworkConfig;
use crate::TabularConfig;
use crate::WorkerEndpoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    /// CQL native protocol v4
    Tabular,
    /// RESP2
    KeyValue,
}

impl ProtocolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolKind::Tabular => TABULAR,
            ProtocolKind::KeyValue => KEYVALUE,
        }
    }

    /// Worker port serving this protocol
    pub fn addr_of(
        &self,
        worker: &WorkerEndpoint,
    ) -> SocketAddr {
        match self {
            ProtocolKind::Tabular => worker.tabular_addr(),
            ProtocolKind::KeyValue => worker.keyvalue_addr(),
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opens protocol sessions against a running cluster
#[derive(Debug, Clone, Default)]
pub struct ProtocolSessionFactory {
    network: NetworkConfig,
    tabular: TabularConfig,
    keyvalue: KeyValueConfig,
}

impl ProtocolSessionFactory {
    pub fn new(
        network: NetworkConfig,
        tabular: TabularConfig,
        keyvalue: KeyValueConfig,
    ) -> Self {
        Self {
            network,
            tabular,
            keyvalue,
        }
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(
            config.network.clone(),
            config.tabular.clone(),
            config.keyvalue.clone(),
        )
    }

    pub fn tabular_config(&self) -> &TabularConfig {
        &self.tabular
    }

    pub fn keyvalue_config(&self) -> &KeyValueConfig {
        &self.keyvalue
    }

    /// CQL session with STARTUP done and, when configured, the keyspace selected
    pub async fn open_tabular(
        &self,
        handle: &ClusterHandle,
    ) -> Result<TabularSession, ConnectError> {
        let candidates = self.candidates(handle, ProtocolKind::Tabular, None)?;
        connect_first(ProtocolKind::Tabular, candidates, |addr| {
            TabularSession::connect(addr, &self.network, &self.tabular)
        })
        .await
    }

    /// RESP session on a worker whose host matches `host`, authenticated when a token is given
    pub async fn open_key_value(
        &self,
        handle: &ClusterHandle,
        host: &str,
        auth_token: Option<&str>,
    ) -> Result<KvSession, ConnectError> {
        let candidates = self.candidates(handle, ProtocolKind::KeyValue, Some(host))?;
        connect_first(ProtocolKind::KeyValue, candidates, |addr| {
            KvSession::connect(addr, &self.network, auth_token)
        })
        .await
    }

    /// [`open_key_value`](Self::open_key_value) with the configured host and token
    pub async fn open_configured_key_value(
        &self,
        handle: &ClusterHandle,
    ) -> Result<KvSession, ConnectError> {
        self.open_key_value(
            handle,
            &self.keyvalue.host,
            self.keyvalue.auth_token.as_deref(),
        )
        .await
    }

    /// RESP session on exactly `addr`, with the configured token. No candidate selection
    /// or failover.
    pub async fn open_key_value_to(
        &self,
        addr: SocketAddr,
    ) -> Result<KvSession, ConnectError> {
        debug!(%addr, "opening pinned key-value session");
        KvSession::connect(addr, &self.network, self.keyvalue.auth_token.as_deref()).await
    }

    /// Protocol addresses in the order this open will try them
    fn candidates(
        &self,
        handle: &ClusterHandle,
        kind: ProtocolKind,
        host: Option<&str>,
    ) -> Result<Vec<SocketAddr>, ConnectError> {
        let workers = handle.candidate_workers();
        if workers.is_empty() {
            return Err(ConnectError::NoEndpoint {
                protocol: kind.as_str(),
                reason: "no serving worker in the health snapshot".to_string(),
            });
        }

        let workers: Vec<&WorkerEndpoint> = match host {
            Some(host) => workers
                .into_iter()
                .filter(|w| host_matches(host, &w.host))
                .collect(),
            None => workers,
        };
        if workers.is_empty() {
            return Err(ConnectError::NoEndpoint {
                protocol: kind.as_str(),
                reason: format!("no candidate worker on host '{}'", host.unwrap_or_default()),
            });
        }

        let start = handle.next_cursor() % workers.len();
        Ok(workers
            .iter()
            .cycle()
            .skip(start)
            .take(workers.len())
            .map(|w| kind.addr_of(w))
            .collect())
    }
}

/// Try each address once, in order, returning the first session that connects.
///
/// A credential rejection stops the walk since every worker shares the same auth
/// configuration.
async fn connect_first<S, F, Fut>(
    kind: ProtocolKind,
    candidates: Vec<SocketAddr>,
    mut connect: F,
) -> Result<S, ConnectError>
where
    F: FnMut(SocketAddr) -> Fut,
    Fut: Future<Output = Result<S, ConnectError>>,
{
    let attempted = candidates.len();
    let mut last_error = None;

    for addr in candidates {
        match connect(addr).await {
            Ok(session) => {
                debug!(protocol = %kind, %addr, "session opened");
                return Ok(session);
            }
            Err(e @ ConnectError::AuthRejected { .. }) => return Err(e),
            Err(e) => {
                warn!(protocol = %kind, %addr, "open failed: {e}");
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) if attempted == 1 => Err(e),
        _ => Err(ConnectError::Exhausted {
            protocol: kind.as_str(),
            attempted,
        }),
    }
}
