use std::net::SocketAddr;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::ConnectError;
use crate::Error;
use crate::NetworkConfig;
use crate::ProtocolError;
use crate::Result;

/// One TCP connection plus its read buffer.
///
/// A write or read that times out leaves the connection desynchronized: a late reply may
/// still arrive and would be taken for the answer to the next request. Every later
/// exchange on it fails with [`ProtocolError::Desynchronized`].
#[derive(Debug)]
pub(crate) struct Connection {
    stream: TcpStream,
    read_buf: BytesMut,
    peer: SocketAddr,
    request_timeout: Duration,
    desynchronized: bool,
}

impl Connection {
    pub(crate) async fn connect(
        addr: SocketAddr,
        network: &NetworkConfig,
    ) -> std::result::Result<Self, ConnectError> {
        let timeout = network.connect_timeout();
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ConnectError::Unreachable {
                addr,
                source: std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connect timed out after {} ms", timeout.as_millis()),
                ),
            })?
            .map_err(|source| ConnectError::Unreachable { addr, source })?;
        stream.set_nodelay(network.tcp_nodelay).ok();
        debug!(%addr, "connected");

        Ok(Self {
            stream,
            read_buf: BytesMut::with_capacity(network.buffer_size),
            peer: addr,
            request_timeout: network.request_timeout(),
            desynchronized: false,
        })
    }

    pub(crate) fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub(crate) fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub(crate) fn is_desynchronized(&self) -> bool {
        self.desynchronized
    }

    pub(crate) async fn write_all(
        &mut self,
        bytes: &[u8],
    ) -> Result<()> {
        self.ensure_in_sync()?;
        trace!(peer = %self.peer, len = bytes.len(), "write");
        let timeout = self.request_timeout;
        let write = async {
            self.stream.write_all(bytes).await?;
            self.stream.flush().await
        };
        match tokio::time::timeout(timeout, write).await {
            Ok(written) => Ok(written?),
            Err(_) => {
                self.mark_desynchronized("write timed out");
                Err(ProtocolError::Timeout(timeout).into())
            }
        }
    }

    /// Read until `decode` yields a value, bounded by `timeout`
    pub(crate) async fn read_with<T, F>(
        &mut self,
        timeout: Duration,
        mut decode: F,
    ) -> Result<T>
    where
        F: FnMut(&mut BytesMut) -> std::result::Result<Option<T>, ProtocolError>,
    {
        self.ensure_in_sync()?;
        let read = async {
            loop {
                if let Some(value) = decode(&mut self.read_buf)? {
                    return Ok(value);
                }
                let n = self.stream.read_buf(&mut self.read_buf).await?;
                if n == 0 {
                    return Err(Error::from(ProtocolError::ConnectionClosed));
                }
                trace!(peer = %self.peer, n, "read");
            }
        };
        match tokio::time::timeout(timeout, read).await {
            Ok(value) => value,
            Err(_) => {
                self.mark_desynchronized("read timed out");
                Err(ProtocolError::Timeout(timeout).into())
            }
        }
    }

    fn ensure_in_sync(&self) -> Result<()> {
        if self.desynchronized {
            return Err(ProtocolError::Desynchronized(self.peer).into());
        }
        Ok(())
    }

    fn mark_desynchronized(
        &mut self,
        cause: &str,
    ) {
        warn!(peer = %self.peer, "{cause}; connection no longer usable for requests");
        self.desynchronized = true;
    }

    /// Send FIN and wait for the peer to close its side (bounded by the request timeout)
    pub(crate) async fn shutdown(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        let wait = self.request_timeout;
        let mut sink = [0u8; 512];
        let drain = async {
            loop {
                match self.stream.read(&mut sink).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => continue,
                }
            }
        };
        if tokio::time::timeout(wait, drain).await.is_err() {
            debug!(peer = %self.peer, "peer did not close in time");
        }
        debug!(peer = %self.peer, "connection closed");
        Ok(())
    }
}
