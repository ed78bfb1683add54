//! The view registry.
//!
//! Views are constructed in configuration-declaration order, then wired in
//! a second pass so `foreignView` references resolve even when views form
//! a cycle. Cross-view handles are indices into the registry, never owned
//! pointers.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{OrderedMap, ViewConfig};
use crate::errors::{ApiError, Result};
use crate::ldap::dn::try_escape_rdn_value;
use crate::ldap::DirectoryHandle;
use crate::pwned::PasswordOracle;
use crate::view::View;

/// Wiring handle to a view under construction: enough to build foreign
/// DNs before the registry exists.
#[derive(Debug, Clone)]
pub struct ViewRef {
    pub index: usize,
    pub base_dn: String,
    pub primary_key: String,
}

impl ViewRef {
    /// DN of the entry with the given primary key under this view.
    pub fn dn(&self, primary_key: &str) -> Option<String> {
        let escaped = try_escape_rdn_value(primary_key)?;
        Some(format!("{}={},{}", self.primary_key, escaped, self.base_dn))
    }
}

/// Holds all views and the shared engine services.
pub struct ViewRegistry {
    views: Vec<View>,
    by_key: HashMap<String, usize>,
    pwned: Arc<dyn PasswordOracle>,
}

impl ViewRegistry {
    /// Two-pass construction: build every view, resolve references, then
    /// verify (or auto-create) each base DN in declaration order.
    pub async fn new(
        configs: &OrderedMap<ViewConfig>,
        prefix: &str,
        directory: DirectoryHandle,
        pwned: Arc<dyn PasswordOracle>,
    ) -> Result<Self> {
        let mut views = Vec::with_capacity(configs.len());
        let mut by_key = HashMap::new();
        let mut refs = HashMap::new();

        for (index, (key, config)) in configs.iter().enumerate() {
            if by_key.contains_key(key) {
                return Err(ApiError::Config(format!("duplicate view key {}", key)));
            }
            let view = View::from_config(key, config, prefix, directory.clone())?;
            refs.insert(
                key.clone(),
                ViewRef {
                    index,
                    base_dn: view.base_dn().to_string(),
                    primary_key: config.primary_key.clone(),
                },
            );
            by_key.insert(key.clone(), index);
            views.push(view);
        }

        for view in &mut views {
            view.init(&refs)?;
        }

        let registry = Self {
            views,
            by_key,
            pwned,
        };
        for view in &registry.views {
            view.ensure_base().await?;
        }
        Ok(registry)
    }

    pub fn get(&self, key: &str) -> Option<&View> {
        self.by_key.get(key).map(|&index| &self.views[index])
    }

    /// Resolves an index handle stored by a field or group at init time.
    pub fn view_at(&self, index: usize) -> &View {
        &self.views[index]
    }

    pub fn views(&self) -> impl Iterator<Item = &View> {
        self.views.iter()
    }

    pub fn password_oracle(&self) -> &dyn PasswordOracle {
        self.pwned.as_ref()
    }
}
