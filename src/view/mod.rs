//! The view engine.
//!
//! A view binds an entity kind to a base DN, an object-class filter, a
//! primary-key attribute, a permission set, and named projections, and
//! translates user actions into directory operations through the field
//! pipeline.

pub mod field;
pub mod group;
pub mod registry;

use std::collections::{BTreeSet, HashMap};

use serde_json::{json, Value};
use tracing::info;

use crate::config::ViewConfig;
use crate::errors::{ApiError, Result};
use crate::ldap::{
    dn::try_escape_rdn_value, Addlist, DirectoryHandle, FetchRecord, LdapFilter, Modlist,
    SearchScope,
};
use group::{DetailProjection, ListProjection};
use registry::{ViewRef, ViewRegistry};

pub use field::{truthy, Field, FieldKind, JsonMap, Template};
pub use group::Group;

/// The authenticated user record, produced by the auth projection.
///
/// Conventional keys: `primaryKey` identifies the subject, an optional
/// `timestamp` invalidates stale tokens, and permission names map to
/// truthy values.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AuthUser(pub JsonMap);

impl AuthUser {
    pub fn primary_key(&self) -> Option<&str> {
        self.0.get("primaryKey").and_then(|v| v.as_str())
    }

    pub fn timestamp(&self) -> Option<&Value> {
        self.0.get("timestamp")
    }

    /// Whether the user carries a truthy value under `permission`.
    pub fn has(&self, permission: &str) -> bool {
        self.0.get(permission).map(truthy).unwrap_or(false)
    }
}

/// One configured entity kind with its projections.
pub struct View {
    key: String,
    dn: String,
    title: String,
    description: String,
    icon_classes: String,
    primary_key: String,
    permissions: Vec<String>,
    read_permissions: Vec<String>,
    auto_create: Option<Vec<(String, Vec<String>)>>,
    classes: Vec<String>,
    class_filter: String,
    dn_prefix: String,
    dn_suffix: String,
    mail_attr: Option<String>,
    list: ListProjection,
    details: DetailProjection,
    self_view: Option<DetailProjection>,
    register: Option<DetailProjection>,
    auth_view: Option<ListProjection>,
    directory: DirectoryHandle,
}

impl View {
    pub fn from_config(
        key: &str,
        config: &ViewConfig,
        prefix: &str,
        directory: DirectoryHandle,
    ) -> Result<Self> {
        let dn = format!("{},{}", config.dn, prefix);
        let class_filter = LdapFilter::object_classes(config.object_class.clone()).to_string();

        let list = ListProjection::from_config(&config.list)?;
        let details = DetailProjection::from_config(&config.details)?;
        let self_view = config
            .self_view
            .as_ref()
            .map(DetailProjection::from_config)
            .transpose()?;
        let register = config
            .register
            .as_ref()
            .map(DetailProjection::from_config)
            .transpose()?;
        let auth_view = config
            .auth
            .as_ref()
            .map(ListProjection::from_config)
            .transpose()?;

        // The mail login filter exists only when the auth projection has a
        // field keyed `mail` fetching exactly one attribute.
        let mail_attr = auth_view.as_ref().and_then(|auth| {
            let mut fetches = BTreeSet::new();
            for field in auth.fields.iter().filter(|f| f.key == "mail") {
                field.get_fetch(&mut fetches);
            }
            if fetches.len() == 1 {
                fetches.into_iter().next()
            } else {
                None
            }
        });

        Ok(Self {
            key: key.to_string(),
            dn_prefix: format!("{}=", config.primary_key),
            dn_suffix: format!(",{}", dn),
            dn,
            title: config.title.clone(),
            description: config.description.clone(),
            icon_classes: config.icon_classes.clone(),
            primary_key: config.primary_key.clone(),
            permissions: config.permissions.clone(),
            read_permissions: config.read_permissions.clone(),
            auto_create: config.auto_create.as_ref().map(|attrs| {
                attrs
                    .iter()
                    .map(|(attr, values)| (attr.clone(), values.to_vec()))
                    .collect()
            }),
            classes: config.object_class.clone(),
            class_filter,
            mail_attr,
            list,
            details,
            self_view,
            register,
            auth_view,
            directory,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn primary_key_attr(&self) -> &str {
        &self.primary_key
    }

    pub fn base_dn(&self) -> &str {
        &self.dn
    }

    pub fn has_self(&self) -> bool {
        self.self_view.is_some()
    }

    /// Resolves cross-view references in every projection.
    pub fn init(&mut self, views: &HashMap<String, ViewRef>) -> Result<()> {
        self.list.init(views)?;
        self.details.init(views)?;
        if let Some(view) = &mut self.self_view {
            view.init(views)?;
        }
        if let Some(view) = &mut self.register {
            view.init(views)?;
        }
        if let Some(view) = &mut self.auth_view {
            view.init(views)?;
        }
        Ok(())
    }

    /// Verifies the base DN exists, creating it from `autoCreate` when
    /// configured. Runs once at startup; a missing base without
    /// `autoCreate` is fatal.
    pub async fn ensure_base(&self) -> Result<()> {
        match self
            .directory
            .search(&self.dn, SearchScope::Base, "(objectClass=*)", &[])
            .await
        {
            Ok(_) => Ok(()),
            Err(crate::errors::DirectoryError::NotFound) => {
                let Some(auto_create) = &self.auto_create else {
                    return Err(ApiError::Config(format!(
                        "base DN {} does not exist and autoCreate is not configured",
                        self.dn
                    )));
                };
                info!("Adding '{}'", self.dn);
                let mut addlist = Addlist::new();
                for (attr, values) in auto_create {
                    addlist.insert(attr.clone(), values.clone());
                }
                self.directory.add(&self.dn, &addlist).await?;
                self.directory
                    .search(&self.dn, SearchScope::Base, "(objectClass=*)", &[])
                    .await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Read access: open when no read permissions are configured,
    /// otherwise any read or write permission suffices. Write access
    /// requires a write permission.
    fn check_permissions(&self, user: &AuthUser, writing: bool) -> Result<()> {
        if !writing {
            if self.read_permissions.is_empty() {
                return Ok(());
            }
            if self.read_permissions.iter().any(|p| user.has(p)) {
                return Ok(());
            }
        }
        if self.permissions.iter().any(|p| user.has(p)) {
            return Ok(());
        }
        Err(ApiError::Forbidden)
    }

    /// Config document tailored to the user's permissions.
    pub fn user_config(&self, user: &AuthUser) -> Value {
        let has_write = self.permissions.iter().any(|p| user.has(p));
        let has_read = has_write
            || self.read_permissions.is_empty()
            || self.read_permissions.iter().any(|p| user.has(p));

        let mut doc = json!({
            "key": self.key,
            "primaryKey": self.primary_key,
            "permissions": self.permissions,
            "readPermissions": self.read_permissions,
            "title": self.title,
            "description": self.description,
            "iconClasses": self.icon_classes,
        });
        if has_read {
            doc["list"] = self.list.config_doc();
        }
        if has_write {
            doc["details"] = self.details.config_doc();
        }
        if let Some(view) = &self.self_view {
            doc["self"] = view.config_doc();
        }
        if let Some(view) = &self.auth_view {
            doc["auth"] = view.config_doc();
        }
        doc
    }

    /// Public register schema, when registration is enabled.
    pub fn public_config(&self) -> Option<Value> {
        self.register.as_ref().map(|register| {
            json!({
                "key": self.key,
                "primaryKey": self.primary_key,
                "title": self.title,
                "iconClasses": self.icon_classes,
                "description": self.description,
                "register": register.config_doc(),
            })
        })
    }

    // ---- DN helpers ----

    /// Strict DN construction; unescapable primary keys are a validation
    /// error.
    pub fn dn_for(&self, primary_key: &str) -> Result<String> {
        self.try_dn(primary_key).ok_or_else(|| {
            ApiError::field(&self.primary_key, format!("invalid value {:?}", primary_key))
        })
    }

    /// Fallible DN construction: `None` when the value has no RDN form.
    pub fn try_dn(&self, primary_key: &str) -> Option<String> {
        let escaped = try_escape_rdn_value(primary_key)?;
        Some(format!("{}{}{}", self.dn_prefix, escaped, self.dn_suffix))
    }

    /// Extracts the primary key from a DN under this view, or `None` when
    /// the DN does not match the view's pattern.
    pub fn try_primary_key(&self, dn: &str) -> Option<String> {
        let rest = dn.strip_prefix(&self.dn_prefix)?;
        let pk = rest.strip_suffix(&self.dn_suffix)?;
        if pk.is_empty() || pk.contains('=') || pk.contains(',') {
            return None;
        }
        Some(crate::ldap::unescape_rdn_value(pk))
    }

    // ---- pipelines ----

    async fn fetch_entry(&self, dn: &str, attrs: &[String]) -> Result<FetchRecord> {
        let entries = self
            .directory
            .search(dn, SearchScope::Base, "(objectClass=*)", attrs)
            .await?;
        let entry = entries.into_iter().next().ok_or(ApiError::NotFound)?;
        Ok(FetchRecord::from_entry(entry))
    }

    async fn create_with(
        &self,
        views: &ViewRegistry,
        projection: &DetailProjection,
        assignments: &JsonMap,
    ) -> Result<()> {
        let mut primary_key: Option<String> = None;
        for value in assignments.values() {
            if let Some(pk) = value.get(&self.primary_key).and_then(|v| v.as_str()) {
                primary_key = Some(pk.to_string());
            }
        }
        let pk = primary_key.filter(|pk| !pk.is_empty()).ok_or_else(|| {
            ApiError::field(&self.primary_key, "Missing primary key in assignments")
        })?;

        let dn = self.dn_for(&pk)?;
        let mut addlist = Addlist::new();
        addlist.insert("objectClass", self.classes.clone());

        let mut fetch = FetchRecord::new(dn.clone());
        projection.create(views, &mut fetch, &mut addlist, assignments).await?;
        self.directory.add(&dn, &addlist).await?;

        let mut post_fetch = FetchRecord::new(dn);
        projection.set_post(views, &mut post_fetch, assignments, true).await
    }

    async fn update_with(
        &self,
        views: &ViewRegistry,
        projection: &DetailProjection,
        primary_key: &str,
        assignments: &JsonMap,
    ) -> Result<()> {
        let dn = self.dn_for(primary_key)?;

        let mut fetches = BTreeSet::new();
        projection.set_fetch(&mut fetches, assignments)?;
        let attrs: Vec<String> = fetches.into_iter().collect();

        let mut fetch = self.fetch_entry(&dn, &attrs).await?;
        let mut modlist = Modlist::new();
        projection.set(views, &mut fetch, &mut modlist, assignments).await?;
        if !modlist.is_empty() {
            self.directory.modify(&dn, &modlist).await?;
        }
        projection.set_post(views, &mut fetch, assignments, false).await
    }

    async fn list_with(&self, projection: &ListProjection) -> Result<Vec<JsonMap>> {
        let mut fetches = BTreeSet::new();
        projection.get_fetch(&mut fetches);
        let attrs: Vec<String> = fetches.into_iter().collect();

        let entries = self
            .directory
            .search(&self.dn, SearchScope::One, &self.class_filter, &attrs)
            .await?;
        entries
            .into_iter()
            .map(|entry| projection.get(&FetchRecord::from_entry(entry)))
            .collect()
    }

    async fn flat_entry(&self, projection: &ListProjection, primary_key: &str) -> Result<JsonMap> {
        let mut fetches = BTreeSet::new();
        projection.get_fetch(&mut fetches);
        let attrs: Vec<String> = fetches.into_iter().collect();
        let dn = self.dn_for(primary_key)?;
        let fetch = self.fetch_entry(&dn, &attrs).await?;
        projection.get(&fetch)
    }

    async fn detail_entry(
        &self,
        views: &ViewRegistry,
        projection: &DetailProjection,
        primary_key: &str,
    ) -> Result<JsonMap> {
        let mut fetches = BTreeSet::new();
        projection.get_fetch(&mut fetches);
        let attrs: Vec<String> = fetches.into_iter().collect();
        let dn = self.dn_for(primary_key)?;
        let fetch = self.fetch_entry(&dn, &attrs).await?;
        projection.get(views, &fetch).await
    }

    // ---- operations ----

    pub async fn get_list(&self, user: &AuthUser) -> Result<Vec<JsonMap>> {
        self.check_permissions(user, false)?;
        self.list_with(&self.list).await
    }

    /// List-projection rendering of one entry, without a permission gate;
    /// used internally by relationship groups.
    pub async fn get_list_entry_permitted(&self, primary_key: &str) -> Result<JsonMap> {
        self.flat_entry(&self.list, primary_key).await
    }

    pub async fn get_list_entry(&self, user: &AuthUser, primary_key: &str) -> Result<JsonMap> {
        self.check_permissions(user, false)?;
        self.flat_entry(&self.list, primary_key).await
    }

    pub async fn get_detail_entry(
        &self,
        views: &ViewRegistry,
        user: &AuthUser,
        primary_key: &str,
    ) -> Result<JsonMap> {
        self.check_permissions(user, false)?;
        self.detail_entry(views, &self.details, primary_key).await
    }

    pub async fn get_self_entry(&self, views: &ViewRegistry, user: &AuthUser) -> Result<JsonMap> {
        let projection = self.self_view.as_ref().ok_or(ApiError::NotFound)?;
        let primary_key = user.primary_key().ok_or(ApiError::Unauthorized)?.to_string();
        self.detail_entry(views, projection, &primary_key).await
    }

    /// Flat record used to build tokens and the authenticated user.
    pub async fn get_auth_entry(&self, primary_key: &str) -> Result<JsonMap> {
        let projection = self.auth_view.as_ref().ok_or(ApiError::Unauthorized)?;
        self.flat_entry(projection, primary_key).await
    }

    pub async fn create_register(&self, views: &ViewRegistry, assignments: &JsonMap) -> Result<()> {
        let projection = self.register.as_ref().ok_or(ApiError::NotFound)?;
        self.create_with(views, projection, assignments).await
    }

    pub async fn create_detail(
        &self,
        views: &ViewRegistry,
        user: &AuthUser,
        assignments: &JsonMap,
    ) -> Result<()> {
        self.check_permissions(user, true)?;
        self.create_with(views, &self.details, assignments).await
    }

    pub async fn update_self(
        &self,
        views: &ViewRegistry,
        user: &AuthUser,
        assignments: &JsonMap,
    ) -> Result<()> {
        let projection = self.self_view.as_ref().ok_or(ApiError::NotFound)?;
        let primary_key = user.primary_key().ok_or(ApiError::Unauthorized)?.to_string();
        self.update_with(views, projection, &primary_key, assignments).await
    }

    pub async fn update_details(
        &self,
        views: &ViewRegistry,
        user: &AuthUser,
        primary_key: &str,
        assignments: &JsonMap,
    ) -> Result<()> {
        self.check_permissions(user, true)?;
        self.update_with(views, &self.details, primary_key, assignments).await
    }

    pub async fn delete(&self, user: &AuthUser, primary_key: &str) -> Result<()> {
        self.check_permissions(user, true)?;
        let dn = self.dn_for(primary_key)?;
        self.directory.delete(&dn).await?;
        Ok(())
    }

    /// Finds the single primary key whose mail attribute matches, through
    /// the auth projection's `mail` binding.
    pub async fn resolve_primary_key_by_mail(&self, mail: &str) -> Result<String> {
        let mail_attr = self.mail_attr.as_ref().ok_or(ApiError::NotFound)?;
        let filter = LdapFilter::object_classes(self.classes.clone())
            .also(LdapFilter::eq(mail_attr.clone(), mail))
            .to_string();
        let attrs = vec![self.primary_key.clone()];
        let entries = self
            .directory
            .search(&self.dn, SearchScope::One, &filter, &attrs)
            .await?;
        entries
            .into_iter()
            .next()
            .and_then(|entry| entry.first(&self.primary_key).map(|pk| pk.to_string()))
            .ok_or(ApiError::NotFound)
    }

    /// Hook used by relationship lifecycles to write the foreign side.
    pub async fn save_foreign_field(&self, primary_key: &str, modlist: &Modlist) -> Result<()> {
        if modlist.is_empty() {
            return Ok(());
        }
        let dn = self.dn_for(primary_key)?;
        self.directory.modify(&dn, modlist).await?;
        Ok(())
    }
}
