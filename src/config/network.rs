use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use super::invalid;
use crate::Result;

/// Socket parameters shared by every protocol session
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NetworkConfig {
    /// TCP connect timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_in_ms: u64,

    /// Upper bound for one request/response exchange in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_in_ms: u64,

    /// Disable Nagle on session sockets
    #[serde(default = "default_tcp_nodelay")]
    pub tcp_nodelay: bool,

    /// Initial read buffer capacity in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_in_ms: default_connect_timeout(),
            request_timeout_in_ms: default_request_timeout(),
            tcp_nodelay: default_tcp_nodelay(),
            buffer_size: default_buffer_size(),
        }
    }
}

impl NetworkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_in_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_in_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout_in_ms == 0 {
            return Err(invalid("network.connect_timeout_in_ms must be > 0"));
        }

        if self.request_timeout_in_ms <= self.connect_timeout_in_ms {
            return Err(invalid(format!(
                "network request timeout {}ms must exceed connect timeout {}ms",
                self.request_timeout_in_ms, self.connect_timeout_in_ms
            )));
        }

        if self.buffer_size < 1024 {
            return Err(invalid(format!(
                "Buffer size {} too small, minimum 1024 bytes",
                self.buffer_size
            )));
        }

        Ok(())
    }
}

fn default_connect_timeout() -> u64 {
    3_000
}
fn default_request_timeout() -> u64 {
    30_000
}
fn default_tcp_nodelay() -> bool {
    true
}
fn default_buffer_size() -> usize {
    16 * 1024
}
