//! Directory connection management.

use crate::errors::{DirResult, DirectoryError};
use crate::ldap::config::LdapConfig;
use crate::ldap::operations::{Addlist, Entry, Modlist, SearchScope};
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, SearchEntry};
use std::collections::HashSet;
use tracing::{debug, error, instrument};

/// Maps an ldap3 error into the bounded gateway taxonomy.
fn map_ldap_err(err: ldap3::LdapError) -> DirectoryError {
    match err {
        ldap3::LdapError::LdapResult { result } => match result.rc {
            32 => DirectoryError::NotFound,
            68 => DirectoryError::Conflict,
            49 => DirectoryError::InvalidCredentials,
            // constraintViolation, invalidAttributeSyntax, objectClassViolation,
            // notAllowedOnRDN, undefinedAttributeType
            17 | 19 | 21 | 64 | 65 | 67 => DirectoryError::Schema(result.text),
            3 => DirectoryError::Timeout,
            _ => DirectoryError::Transport(format!("rc={}: {}", result.rc, result.text)),
        },
        ldap3::LdapError::Timeout { .. } => DirectoryError::Timeout,
        other => DirectoryError::Transport(other.to_string()),
    }
}

/// A single connection to the directory server.
pub struct LdapConnection {
    ldap: Ldap,
    config: LdapConfig,
    bound: bool,
}

impl LdapConnection {
    /// Opens a connection and spawns its driver task.
    #[instrument(skip(config), fields(uri = %config.server_uri))]
    pub async fn new(config: LdapConfig) -> DirResult<Self> {
        let settings = LdapConnSettings::new().set_conn_timeout(config.op_timeout());

        debug!("Connecting to directory server: {}", config.server_uri);

        let (conn, ldap) = LdapConnAsync::with_settings(settings, &config.server_uri)
            .await
            .map_err(map_ldap_err)?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                error!("Directory connection error: {}", e);
            }
        });

        Ok(Self {
            ldap,
            config,
            bound: false,
        })
    }

    /// Binds with the configured service credentials.
    #[instrument(skip(self))]
    pub async fn bind(&mut self) -> DirResult<()> {
        debug!("Binding as: {}", self.config.bind_dn);

        self.ldap
            .with_timeout(self.config.op_timeout())
            .simple_bind(&self.config.bind_dn, &self.config.bind_password)
            .await
            .map_err(map_ldap_err)?
            .success()
            .map_err(map_ldap_err)?;

        self.bound = true;
        Ok(())
    }

    /// Searches for entries below `base`.
    #[instrument(skip(self, attrs), fields(base = %base, filter = %filter))]
    pub async fn search(
        &mut self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attrs: &[String],
    ) -> DirResult<Vec<Entry>> {
        let (results, _res) = self
            .ldap
            .with_timeout(self.config.op_timeout())
            .search(base, scope.into(), filter, attrs)
            .await
            .map_err(map_ldap_err)?
            .success()
            .map_err(map_ldap_err)?;

        let entries: Vec<Entry> = results
            .into_iter()
            .map(|entry| {
                let search_entry = SearchEntry::construct(entry);
                Entry {
                    dn: search_entry.dn,
                    values: search_entry.attrs.into_iter().collect(),
                }
            })
            .collect();

        debug!("Search returned {} entries", entries.len());
        Ok(entries)
    }

    /// Adds a new entry.
    #[instrument(skip(self, addlist), fields(dn = %dn))]
    pub async fn add(&mut self, dn: &str, addlist: &Addlist) -> DirResult<()> {
        let attrs: Vec<(String, HashSet<String>)> = addlist
            .iter()
            .map(|(k, v)| (k.clone(), v.iter().cloned().collect()))
            .collect();

        debug!("Adding entry: {}", dn);

        self.ldap
            .with_timeout(self.config.op_timeout())
            .add(dn, attrs)
            .await
            .map_err(map_ldap_err)?
            .success()
            .map_err(map_ldap_err)?;

        Ok(())
    }

    /// Applies a modlist to an existing entry.
    #[instrument(skip(self, modlist), fields(dn = %dn))]
    pub async fn modify(&mut self, dn: &str, modlist: &Modlist) -> DirResult<()> {
        let mods = modlist.to_ldap3_mods();

        debug!("Modifying entry: {} with {} changes", dn, mods.len());

        self.ldap
            .with_timeout(self.config.op_timeout())
            .modify(dn, mods)
            .await
            .map_err(map_ldap_err)?
            .success()
            .map_err(map_ldap_err)?;

        Ok(())
    }

    /// Deletes an entry.
    #[instrument(skip(self), fields(dn = %dn))]
    pub async fn delete(&mut self, dn: &str) -> DirResult<()> {
        debug!("Deleting entry: {}", dn);

        self.ldap
            .with_timeout(self.config.op_timeout())
            .delete(dn)
            .await
            .map_err(map_ldap_err)?
            .success()
            .map_err(map_ldap_err)?;

        Ok(())
    }

    /// Whether the service bind has completed.
    pub fn is_bound(&self) -> bool {
        self.bound
    }

    /// Unbinds from the server.
    pub async fn unbind(&mut self) -> DirResult<()> {
        if self.bound {
            self.ldap.unbind().await.map_err(map_ldap_err)?;
            self.bound = false;
        }
        Ok(())
    }
}

/// One-shot bind used by login.
///
/// Opens a dedicated connection, attempts a simple bind as `dn`, and tears
/// the connection down on every exit path. Empty passwords are rejected
/// outright; LDAP would treat them as an anonymous bind and succeed.
#[instrument(skip(config, password), fields(dn = %dn))]
pub async fn bind_user(config: &LdapConfig, dn: &str, password: &str) -> DirResult<()> {
    if password.is_empty() {
        return Err(DirectoryError::InvalidCredentials);
    }

    let settings = LdapConnSettings::new().set_conn_timeout(config.op_timeout());
    let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &config.server_uri)
        .await
        .map_err(map_ldap_err)?;

    tokio::spawn(async move {
        if let Err(e) = conn.drive().await {
            error!("Directory connection error: {}", e);
        }
    });

    let bind_result = ldap
        .with_timeout(config.op_timeout())
        .simple_bind(dn, password)
        .await
        .map_err(map_ldap_err)
        .and_then(|res| res.success().map_err(map_ldap_err));

    let _ = ldap.unbind().await;

    bind_result.map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ldap3::LdapResult;

    fn result_err(rc: u32) -> ldap3::LdapError {
        ldap3::LdapError::LdapResult {
            result: LdapResult {
                rc,
                matched: String::new(),
                text: String::new(),
                refs: vec![],
                ctrls: vec![],
            },
        }
    }

    #[test]
    fn test_error_mapping_no_such_object() {
        assert_eq!(map_ldap_err(result_err(32)), DirectoryError::NotFound);
    }

    #[test]
    fn test_error_mapping_already_exists() {
        assert_eq!(map_ldap_err(result_err(68)), DirectoryError::Conflict);
    }

    #[test]
    fn test_error_mapping_invalid_credentials() {
        assert_eq!(map_ldap_err(result_err(49)), DirectoryError::InvalidCredentials);
    }

    #[test]
    fn test_error_mapping_schema_violation() {
        assert!(matches!(map_ldap_err(result_err(65)), DirectoryError::Schema(_)));
    }

    #[test]
    fn test_error_mapping_unknown_rc_is_transport() {
        assert!(matches!(map_ldap_err(result_err(80)), DirectoryError::Transport(_)));
    }
}
