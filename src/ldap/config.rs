//! Directory connection configuration.

use crate::errors::{ApiError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection settings for the directory, the `ldap` section of the
/// configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LdapConfig {
    /// Server URI (e.g. "ldap://localhost:389" or "ldaps://ldap.example.com:636")
    pub server_uri: String,

    /// Suffix appended to every view base DN (e.g. "dc=example,dc=com")
    pub prefix: String,

    /// DN of the long-lived service bind
    pub bind_dn: String,

    /// Password of the service bind
    #[serde(skip_serializing)]
    pub bind_password: String,

    /// Per-operation timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Service connection pool size
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_pool_size() -> usize {
    4
}

fn default_timeout() -> u64 {
    30
}

impl LdapConfig {
    /// Returns the per-operation timeout as a Duration.
    pub fn op_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.server_uri.is_empty() {
            return Err(ApiError::Config("ldap.serverUri cannot be empty".into()));
        }

        if !self.server_uri.starts_with("ldap://") && !self.server_uri.starts_with("ldaps://") {
            return Err(ApiError::Config(
                "ldap.serverUri must start with ldap:// or ldaps://".into(),
            ));
        }

        if self.prefix.is_empty() {
            return Err(ApiError::Config("ldap.prefix cannot be empty".into()));
        }

        if self.bind_dn.is_empty() {
            return Err(ApiError::Config("ldap.bindDn cannot be empty".into()));
        }

        if self.pool_size == 0 {
            return Err(ApiError::Config("ldap.poolSize must be greater than 0".into()));
        }

        Ok(())
    }
}

impl Default for LdapConfig {
    fn default() -> Self {
        Self {
            server_uri: "ldap://localhost:389".into(),
            prefix: "dc=example,dc=com".into(),
            bind_dn: "cn=admin,dc=example,dc=com".into(),
            bind_password: String::new(),
            timeout: default_timeout(),
            pool_size: default_pool_size(),
        }
    }
}
