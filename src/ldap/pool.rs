//! Service connection pool using deadpool.

use crate::errors::{DirResult, DirectoryError};
use crate::ldap::config::LdapConfig;
use crate::ldap::connection::LdapConnection;
use async_trait::async_trait;
use deadpool::managed::{Manager, Metrics, Object, Pool, RecycleError, RecycleResult};
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

/// Pool of bound service connections.
pub type LdapPool = Pool<LdapConnectionManager>;

/// A service connection checked out of the pool.
pub type PooledConnection = Object<LdapConnectionManager>;

/// Manager creating and recycling service connections.
pub struct LdapConnectionManager {
    config: Arc<LdapConfig>,
}

impl LdapConnectionManager {
    pub fn new(config: LdapConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

#[async_trait]
impl Manager for LdapConnectionManager {
    type Type = LdapConnection;
    type Error = DirectoryError;

    #[instrument(skip(self))]
    async fn create(&self) -> DirResult<LdapConnection> {
        debug!("Creating new service connection");
        let mut conn = LdapConnection::new((*self.config).clone()).await?;
        conn.bind().await?;
        Ok(conn)
    }

    #[instrument(skip(self, conn))]
    async fn recycle(
        &self,
        conn: &mut LdapConnection,
        _metrics: &Metrics,
    ) -> RecycleResult<Self::Error> {
        if !conn.is_bound() {
            warn!("Connection lost its bind, recycling failed");
            return Err(RecycleError::StaticMessage("Connection not bound"));
        }
        Ok(())
    }
}

/// Creates the service connection pool from configuration.
pub fn create_pool(config: LdapConfig) -> DirResult<LdapPool> {
    let max_size = config.pool_size;
    let wait_timeout = config.op_timeout();
    let manager = LdapConnectionManager::new(config);

    Pool::builder(manager)
        .max_size(max_size)
        .wait_timeout(Some(wait_timeout))
        .create_timeout(Some(wait_timeout))
        .build()
        .map_err(|e| DirectoryError::Transport(format!("failed to build pool: {}", e)))
}

/// Helper trait to get connections from the pool.
#[async_trait]
pub trait LdapPoolExt {
    /// Gets a connection from the pool.
    async fn get_connection(&self) -> DirResult<PooledConnection>;
}

#[async_trait]
impl LdapPoolExt for LdapPool {
    async fn get_connection(&self) -> DirResult<PooledConnection> {
        self.get().await.map_err(|e| {
            error!("Failed to get connection from pool: {}", e);
            DirectoryError::Transport(format!("pool error: {}", e))
        })
    }
}
