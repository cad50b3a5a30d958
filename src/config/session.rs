use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use super::invalid;
use crate::constants::DEFAULT_KEYSPACE;
use crate::constants::DEFAULT_PAGE_SIZE;
use crate::protocol::cql::Consistency;
use crate::Result;

/// Tabular (CQL native protocol) session parameters
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TabularConfig {
    /// Keyspace created (if missing) and selected on every session open; `None` skips both
    #[serde(default = "default_keyspace")]
    pub keyspace: Option<String>,

    /// Replication factor used when the keyspace has to be created
    #[serde(default = "default_replication_factor")]
    pub replication_factor: u32,

    /// Rows fetched per page by `select_all`
    #[serde(default = "default_page_size")]
    pub page_size: i32,

    #[serde(default)]
    pub consistency: Consistency,

    /// Credentials for a PasswordAuthenticator challenge
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,
}

/// Which exclusions the control-commands suite keeps
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SuiteProfile {
    /// Commands excluded by the reference suite stay excluded as `Skip` entries
    #[default]
    Compat,
    /// Every command is executed
    Full,
}

/// Key-value (RESP) session parameters
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct KeyValueConfig {
    /// Host filter applied when picking a worker for a key-value session
    #[serde(default = "default_kv_host")]
    pub host: String,

    /// Sent as `AUTH <token>` right after connecting
    #[serde(default)]
    pub auth_token: Option<String>,

    #[serde(default)]
    pub suite_profile: SuiteProfile,

    /// Budget for the monitor case to observe its auxiliary traffic
    #[serde(default = "default_monitor_timeout")]
    pub monitor_timeout_in_ms: u64,
}

impl Default for TabularConfig {
    fn default() -> Self {
        Self {
            keyspace: default_keyspace(),
            replication_factor: default_replication_factor(),
            page_size: default_page_size(),
            consistency: Consistency::default(),
            username: None,
            password: None,
        }
    }
}

impl Default for KeyValueConfig {
    fn default() -> Self {
        Self {
            host: default_kv_host(),
            auth_token: None,
            suite_profile: SuiteProfile::default(),
            monitor_timeout_in_ms: default_monitor_timeout(),
        }
    }
}

impl TabularConfig {
    /// Username/password pair, only when both are configured
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => Some((user.as_str(), pass.as_str())),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size <= 0 {
            return Err(invalid(format!(
                "tabular.page_size {} must be > 0",
                self.page_size
            )));
        }

        if self.replication_factor == 0 {
            return Err(invalid("tabular.replication_factor must be >= 1"));
        }

        if let Some(keyspace) = &self.keyspace {
            if keyspace.is_empty()
                || !keyspace.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                return Err(invalid(format!(
                    "tabular.keyspace '{keyspace}' must be a plain identifier"
                )));
            }
        }

        if self.username.is_some() != self.password.is_some() {
            return Err(invalid(
                "tabular.username and tabular.password must be set together",
            ));
        }

        Ok(())
    }
}

impl KeyValueConfig {
    pub fn monitor_timeout(&self) -> Duration {
        Duration::from_millis(self.monitor_timeout_in_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(invalid("keyvalue.host cannot be empty"));
        }

        if self.monitor_timeout_in_ms == 0 {
            return Err(invalid("keyvalue.monitor_timeout_in_ms must be > 0"));
        }

        Ok(())
    }
}

fn default_keyspace() -> Option<String> {
    Some(DEFAULT_KEYSPACE.to_string())
}
fn default_replication_factor() -> u32 {
    1
}
fn default_page_size() -> i32 {
    DEFAULT_PAGE_SIZE
}
fn default_kv_host() -> String {
    "localhost".to_string()
}
fn default_monitor_timeout() -> u64 {
    10_000
}
