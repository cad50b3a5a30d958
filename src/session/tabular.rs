use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;
use bytes::BytesMut;
use tracing::debug;
use tracing::info;
use tracing::trace;

use super::connection::Connection;
use super::ProtocolKind;
use crate::constants::TABULAR;
use crate::protocol::cql::auth_response_body;
use crate::protocol::cql::startup_body;
use crate::protocol::cql::Consistency;
use crate::protocol::cql::Frame;
use crate::protocol::cql::Opcode;
use crate::protocol::cql::Query;
use crate::protocol::cql::QueryParams;
use crate::protocol::cql::QueryResult;
use crate::protocol::cql::Response;
use crate::protocol::cql::RowsResult;
use crate::ConnectError;
use crate::NetworkConfig;
use crate::ProtocolError;
use crate::Result;
use crate::TabularConfig;

/// A CQL v4 connection to one worker.
///
/// Requests are strictly sequential: one stream id is in flight at a time.
#[derive(Debug)]
pub struct TabularSession {
    conn: Connection,
    consistency: Consistency,
    next_stream: i16,
    keyspace: Option<String>,
}

impl TabularSession {
    pub(crate) async fn connect(
        addr: SocketAddr,
        network: &NetworkConfig,
        config: &TabularConfig,
    ) -> std::result::Result<Self, ConnectError> {
        let conn = Connection::connect(addr, network).await?;
        let mut session = Self {
            conn,
            consistency: config.consistency,
            next_stream: 0,
            keyspace: None,
        };

        session.startup(config).await?;
        if let Some(keyspace) = &config.keyspace {
            session
                .select_keyspace(keyspace, config.replication_factor)
                .await
                .map_err(|e| ConnectError::Handshake {
                    addr,
                    reason: format!("keyspace {keyspace}: {e}"),
                })?;
        }
        Ok(session)
    }

    pub fn kind(&self) -> ProtocolKind {
        ProtocolKind::Tabular
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.conn.peer()
    }

    /// True once a request timed out; every later request fails
    pub fn is_desynchronized(&self) -> bool {
        self.conn.is_desynchronized()
    }

    /// Keyspace selected by the last `USE`, if any
    pub fn keyspace(&self) -> Option<&str> {
        self.keyspace.as_deref()
    }

    /// Run one literal statement.
    ///
    /// An ERROR response is returned as [`ProtocolError::Server`].
    pub async fn execute(
        &mut self,
        statement: &str,
    ) -> Result<QueryResult> {
        let params = QueryParams {
            consistency: self.consistency,
            ..Default::default()
        };
        self.query(statement, params).await
    }

    /// Fetch one page of a SELECT, resuming from `paging_state`
    pub async fn query_page(
        &mut self,
        statement: &str,
        page_size: i32,
        paging_state: Option<Bytes>,
    ) -> Result<RowsResult> {
        let params = QueryParams {
            consistency: self.consistency,
            page_size: Some(page_size),
            paging_state,
        };
        match self.query(statement, params).await? {
            QueryResult::Rows(rows) => Ok(rows),
            other => Err(ProtocolError::unexpected(
                TABULAR,
                format!("expected rows for '{statement}', got {}", other.kind_name()),
            )
            .into()),
        }
    }

    /// OPTIONS round trip; the SUPPORTED map
    pub async fn options(&mut self) -> Result<HashMap<String, Vec<String>>> {
        match self.request(Opcode::Options, Bytes::new()).await? {
            Response::Supported(options) => Ok(options),
            other => Err(unexpected_response("OPTIONS", &other).into()),
        }
    }

    pub async fn close(mut self) -> Result<()> {
        self.conn.shutdown().await
    }

    async fn startup(
        &mut self,
        config: &TabularConfig,
    ) -> std::result::Result<(), ConnectError> {
        let addr = self.endpoint();
        let handshake = |e: crate::Error| ConnectError::Handshake {
            addr,
            reason: e.to_string(),
        };

        match self
            .request(Opcode::Startup, startup_body())
            .await
            .map_err(handshake)?
        {
            Response::Ready => {
                debug!(%addr, "cql startup ready");
                Ok(())
            }
            Response::Authenticate(authenticator) => {
                let Some((username, password)) = config.credentials() else {
                    return Err(ConnectError::Handshake {
                        addr,
                        reason: format!(
                            "server requires authentication ({authenticator}) but no credentials are configured"
                        ),
                    });
                };
                debug!(%addr, %authenticator, "cql authentication requested");
                match self
                    .request(Opcode::AuthResponse, auth_response_body(username, password))
                    .await
                    .map_err(handshake)?
                {
                    Response::AuthSuccess => Ok(()),
                    Response::Error(e) => Err(ConnectError::AuthRejected {
                        addr,
                        message: e.message,
                    }),
                    other => Err(ConnectError::Handshake {
                        addr,
                        reason: unexpected_response("AUTH_RESPONSE", &other).to_string(),
                    }),
                }
            }
            Response::Error(e) => Err(ConnectError::Handshake {
                addr,
                reason: ProtocolError::from(e).to_string(),
            }),
            other => Err(ConnectError::Handshake {
                addr,
                reason: unexpected_response("STARTUP", &other).to_string(),
            }),
        }
    }

    async fn select_keyspace(
        &mut self,
        keyspace: &str,
        replication_factor: u32,
    ) -> Result<()> {
        self.execute(&format!(
            "CREATE KEYSPACE IF NOT EXISTS {keyspace} WITH replication = \
             {{'class': 'SimpleStrategy', 'replication_factor': {replication_factor}}}"
        ))
        .await?;

        match self.execute(&format!("USE {keyspace}")).await? {
            QueryResult::SetKeyspace(selected) => {
                info!(endpoint = %self.endpoint(), keyspace = %selected, "keyspace selected");
                self.keyspace = Some(selected);
                Ok(())
            }
            other => Err(ProtocolError::unexpected(
                TABULAR,
                format!("USE returned {}", other.kind_name()),
            )
            .into()),
        }
    }

    async fn query(
        &mut self,
        statement: &str,
        params: QueryParams,
    ) -> Result<QueryResult> {
        debug!(endpoint = %self.endpoint(), %statement, "query");
        let body = Query::new(statement, params).encode();
        match self.request(Opcode::Query, body).await? {
            Response::Result(result) => Ok(result),
            Response::Error(e) => Err(ProtocolError::from(e).into()),
            other => Err(unexpected_response("QUERY", &other).into()),
        }
    }

    /// Send one request and wait for the response carrying the same stream id.
    /// Server pushed EVENT frames and responses to earlier streams are skipped.
    async fn request(
        &mut self,
        opcode: Opcode,
        body: Bytes,
    ) -> Result<Response> {
        let stream = self.allocate_stream();
        let mut out = BytesMut::new();
        Frame::request(stream, opcode, body).encode(&mut out);
        self.conn.write_all(&out).await?;

        let timeout = self.conn.request_timeout();
        loop {
            let frame = self.conn.read_with(timeout, Frame::decode).await?;
            trace!(stream = frame.stream, opcode = ?frame.opcode, "frame received");
            if frame.opcode == Opcode::Event || frame.stream < 0 {
                continue;
            }
            if frame.stream != stream {
                debug!(stream = frame.stream, waiting = stream, "skipping stale response");
                continue;
            }
            return Ok(Response::decode(&frame)?);
        }
    }

    fn allocate_stream(&mut self) -> i16 {
        let stream = self.next_stream;
        self.next_stream = if stream == i16::MAX { 0 } else { stream + 1 };
        stream
    }
}

fn unexpected_response(
    request: &str,
    response: &Response,
) -> ProtocolError {
    ProtocolError::unexpected(TABULAR, format!("{response:?} in reply to {request}"))
}
