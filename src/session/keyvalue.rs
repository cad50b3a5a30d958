use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tracing::debug;

use super::connection::Connection;
use super::ProtocolKind;
use crate::protocol::Command;
use crate::protocol::Reply;
use crate::CommandError;
use crate::CommandExecutor;
use crate::ConnectError;
use crate::NetworkConfig;
use crate::Result;

/// A RESP2 connection to one worker
#[derive(Debug)]
pub struct KvSession {
    conn: Connection,
    write_buf: BytesMut,
}

impl KvSession {
    pub(crate) async fn connect(
        addr: SocketAddr,
        network: &NetworkConfig,
        auth_token: Option<&str>,
    ) -> std::result::Result<Self, ConnectError> {
        let conn = Connection::connect(addr, network).await?;
        let mut session = Self {
            conn,
            write_buf: BytesMut::with_capacity(256),
        };

        if let Some(token) = auth_token {
            let auth = Command::new("AUTH").arg(token);
            match session.call(&auth).await {
                Ok(_) => debug!(%addr, "authenticated"),
                Err(crate::Error::Command(CommandError::Server(message))) => {
                    return Err(ConnectError::AuthRejected { addr, message });
                }
                Err(e) => {
                    return Err(ConnectError::Handshake {
                        addr,
                        reason: format!("AUTH: {e}"),
                    });
                }
            }
        }
        Ok(session)
    }

    pub fn kind(&self) -> ProtocolKind {
        ProtocolKind::KeyValue
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.conn.peer()
    }

    /// True once a command timed out; every later command fails
    pub fn is_desynchronized(&self) -> bool {
        self.conn.is_desynchronized()
    }

    /// Write a command without waiting for its reply
    pub async fn send(
        &mut self,
        command: &Command,
    ) -> Result<()> {
        debug!(endpoint = %self.endpoint(), command = %command.name(), "send");
        self.write_buf.clear();
        command.encode(&mut self.write_buf);
        self.conn.write_all(&self.write_buf).await
    }

    /// Next reply on the wire, error replies included as [`Reply::Error`]
    pub async fn read_reply(&mut self) -> Result<Reply> {
        let timeout = self.conn.request_timeout();
        self.read_reply_within(timeout).await
    }

    pub async fn read_reply_within(
        &mut self,
        timeout: Duration,
    ) -> Result<Reply> {
        self.conn.read_with(timeout, Reply::decode).await
    }

    /// Send and wait for the reply; an error reply becomes [`CommandError::Server`]
    /// with the server text unchanged
    pub async fn call(
        &mut self,
        command: &Command,
    ) -> Result<Reply> {
        self.send(command).await?;
        match self.read_reply().await? {
            Reply::Error(message) => Err(CommandError::Server(message).into()),
            reply => Ok(reply),
        }
    }

    pub async fn close(mut self) -> Result<()> {
        self.conn.shutdown().await
    }
}

#[async_trait]
impl CommandExecutor for KvSession {
    async fn execute(
        &mut self,
        command: &Command,
    ) -> Result<Reply> {
        self.call(command).await
    }

    async fn next_reply(
        &mut self,
        timeout: Duration,
    ) -> Result<Reply> {
        self.read_reply_within(timeout).await
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.conn.shutdown().await
    }

    fn peer(&self) -> Option<SocketAddr> {
        Some(self.conn.peer())
    }
}
