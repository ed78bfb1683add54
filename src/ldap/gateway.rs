//! The directory gateway trait and its ldap3-backed implementation.
//!
//! The view engine talks to the directory exclusively through [`Directory`],
//! which keeps the engine testable against an in-memory implementation.

use crate::errors::DirResult;
use crate::ldap::config::LdapConfig;
use crate::ldap::connection;
use crate::ldap::operations::{Addlist, Entry, Modlist, SearchScope};
use crate::ldap::pool::{create_pool, LdapPool, LdapPoolExt};
use async_trait::async_trait;
use std::sync::Arc;

/// The five directory primitives the view engine is built on.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Creates an entry; `Conflict` when the DN already exists.
    async fn add(&self, dn: &str, attrs: &Addlist) -> DirResult<()>;

    /// Returns matching entries; `NotFound` only for a BASE search on a
    /// missing DN, an empty list otherwise.
    async fn search(
        &self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attrs: &[String],
    ) -> DirResult<Vec<Entry>>;

    /// Applies a modlist; ops run left to right per attribute.
    async fn modify(&self, dn: &str, modlist: &Modlist) -> DirResult<()>;

    /// Removes an entry; `NotFound` when absent.
    async fn delete(&self, dn: &str) -> DirResult<()>;

    /// Authenticates `dn` over a transient connection.
    async fn bind(&self, dn: &str, password: &str) -> DirResult<()>;
}

/// Shared handle to a [`Directory`] implementation.
pub type DirectoryHandle = Arc<dyn Directory>;

/// Production gateway: pooled service connections for reads and writes,
/// a transient unpooled connection per login bind.
pub struct LdapGateway {
    pool: LdapPool,
    config: LdapConfig,
}

impl LdapGateway {
    pub fn new(config: LdapConfig) -> DirResult<Self> {
        let pool = create_pool(config.clone())?;
        Ok(Self { pool, config })
    }
}

#[async_trait]
impl Directory for LdapGateway {
    async fn add(&self, dn: &str, attrs: &Addlist) -> DirResult<()> {
        let mut conn = self.pool.get_connection().await?;
        conn.add(dn, attrs).await
    }

    async fn search(
        &self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attrs: &[String],
    ) -> DirResult<Vec<Entry>> {
        let mut conn = self.pool.get_connection().await?;
        conn.search(base, scope, filter, attrs).await
    }

    async fn modify(&self, dn: &str, modlist: &Modlist) -> DirResult<()> {
        let mut conn = self.pool.get_connection().await?;
        conn.modify(dn, modlist).await
    }

    async fn delete(&self, dn: &str) -> DirResult<()> {
        let mut conn = self.pool.get_connection().await?;
        conn.delete(dn).await
    }

    async fn bind(&self, dn: &str, password: &str) -> DirResult<()> {
        connection::bind_user(&self.config, dn, password).await
    }
}
