//! Application configuration.
//!
//! Loads `config.yaml` and applies `api_config_*` environment overrides.
//! An override variable names a path through the configuration: segments
//! are matched case-insensitively against camelCase keys by converting the
//! keys to their underscored form, and the value is parsed as a YAML
//! scalar (`api_config_ldap_bind_password=secret` replaces
//! `ldap.bindPassword`).
//!
//! Mapping order is semantic for views, projections, groups, and fields,
//! so ordered sections deserialize into [`OrderedMap`] instead of a hash
//! map.

use crate::errors::{ApiError, Result};
use crate::ldap::LdapConfig;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::path::Path;

/// A mapping that preserves declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedMap<V>(pub Vec<(String, V)>);

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<V> OrderedMap<V> {
    pub fn iter(&self) -> std::slice::Iter<'_, (String, V)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct OrderedMapVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedMapVisitor<V> {
            type Value = OrderedMap<V>;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a mapping")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, value)) = access.next_entry::<String, V>()? {
                    entries.push((key, value));
                }
                Ok(OrderedMap(entries))
            }
        }

        deserializer.deserialize_map(OrderedMapVisitor(PhantomData))
    }
}

/// One or more string values; YAML allows a bare scalar where a list fits.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum StringList {
    One(String),
    Many(Vec<String>),
}

impl StringList {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            StringList::One(value) => vec![value.clone()],
            StringList::Many(values) => values.clone(),
        }
    }
}

/// Anti-spam question/answer pair; the answer is a regex.
#[derive(Debug, Clone, Deserialize)]
pub struct QuestionConfig {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AntiSpamConfig {
    pub questions: Vec<QuestionConfig>,
}

/// The `auth` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    pub secret_key: String,
    pub header_prefix: String,
    /// Login token lifetime in seconds
    pub expiration: i64,
    /// Auto-login (mailed) token lifetime in seconds
    pub auto_login_expiration: i64,
    /// Key of the view whose `auth` projection builds user records
    pub view: String,
    pub anti_spam: AntiSpamConfig,
}

/// The `mail` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailConfig {
    pub host: String,
    pub port: Option<u16>,
    #[serde(default)]
    pub ssl: bool,
    #[serde(default)]
    pub starttls: bool,
    pub user: Option<String>,
    pub password: Option<String>,
    pub sender: String,
    pub site_base_url: String,
    pub site_name: String,
}

impl MailConfig {
    /// Effective port: explicit, or the default of the transport mode.
    pub fn port(&self) -> u16 {
        match self.port {
            Some(port) => port,
            None if self.ssl => 465,
            None if self.starttls => 587,
            None => 25,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.ssl && self.starttls {
            return Err(ApiError::Config(
                "mail.ssl and mail.starttls are mutually exclusive".into(),
            ));
        }
        Ok(())
    }
}

/// Per-field configuration inside a projection or group.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldConfig {
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default = "default_true")]
    pub creatable: bool,
    #[serde(default = "default_true")]
    pub readable: bool,
    #[serde(default = "default_true")]
    pub writable: bool,
    #[serde(default)]
    pub hidden: bool,

    /// Directory attribute backing the field; defaults per type
    pub field: Option<String>,
    /// Validation regex (text) or render template (generate)
    pub format: Option<String>,
    /// Client-side variant of `format`, echoed in config documents
    pub format_js: Option<String>,
    /// Whitelist of accepted values
    #[serde(rename = "enum")]
    pub enum_values: Option<Vec<String>>,
    #[serde(default)]
    pub auto_generate: bool,
    /// Password hashing scheme name
    pub hashing: Option<String>,
    #[serde(default)]
    pub pwned_password_check: bool,
    /// Name of the foreign entry whose membership this field mirrors
    pub member_of: Option<String>,
    pub foreign_view: Option<String>,
    pub foreign_field: Option<String>,
    /// objectClass toggled by an objectClass field
    pub object_class: Option<String>,
    /// Literal forwarded by an initial field
    pub value: Option<serde_yaml::Value>,
    /// Target of an initial field
    pub target: Option<Box<TargetConfig>>,
}

fn default_true() -> bool {
    true
}

/// Target of an `initial` field: a key plus a nested field config.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    pub key: String,
    #[serde(flatten)]
    pub config: FieldConfig,
}

/// Per-group configuration inside a read-write projection.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupConfig {
    #[serde(rename = "type")]
    pub group_type: String,
    #[serde(default)]
    pub title: String,
    /// Fields of a `fields` group, in declaration order
    pub fields: Option<OrderedMap<FieldConfig>>,
    pub foreign_view: Option<String>,
    pub field: Option<String>,
    pub foreign_field: Option<String>,
    #[serde(default = "default_true")]
    pub writable: bool,
}

/// One view: entity kind bound to a base DN and projections.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewConfig {
    /// Base DN relative to `ldap.prefix`
    pub dn: String,
    #[serde(default)]
    pub title: String,
    pub primary_key: String,
    pub permissions: Vec<String>,
    #[serde(default)]
    pub read_permissions: Vec<String>,
    /// Attributes used to create the base DN when missing at startup
    pub auto_create: Option<BTreeMap<String, StringList>>,
    pub object_class: Vec<String>,
    pub list: OrderedMap<FieldConfig>,
    pub details: OrderedMap<GroupConfig>,
    #[serde(rename = "self")]
    pub self_view: Option<OrderedMap<GroupConfig>>,
    pub register: Option<OrderedMap<GroupConfig>>,
    pub auth: Option<OrderedMap<FieldConfig>>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon_classes: String,
}

/// Root configuration document.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub ldap: LdapConfig,
    pub auth: AuthConfig,
    pub mail: MailConfig,
    pub views: OrderedMap<ViewConfig>,
    #[serde(default)]
    pub allow_origins: Vec<String>,
}

impl AppConfig {
    /// Loads the configuration file and applies environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text, std::env::vars())
    }

    /// Parses a YAML document and applies the given override variables.
    pub fn from_yaml(
        text: &str,
        env: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self> {
        let mut value: serde_yaml::Value = serde_yaml::from_str(text)?;
        apply_env_overrides(&mut value, env, "api_config_")?;
        let config: AppConfig = serde_yaml::from_value(value)?;
        config.ldap.validate()?;
        config.mail.validate()?;
        Ok(config)
    }
}

/// Converts a camelCase key to its lowercase underscored form
/// (`bindDn` -> `bind_dn`).
fn camelcase_to_underscore(key: &str) -> String {
    let mut result = String::with_capacity(key.len() + 4);
    let mut last_was_upper = true;
    for c in key.chars() {
        if c.is_uppercase() && !last_was_upper {
            result.push('_');
        }
        last_was_upper = c.is_uppercase();
        result.extend(c.to_lowercase());
    }
    result
}

/// Applies every `<prefix><path>` variable onto the parsed document.
fn apply_env_overrides(
    config: &mut serde_yaml::Value,
    env: impl IntoIterator<Item = (String, String)>,
    prefix: &str,
) -> Result<()> {
    for (name, raw_value) in env {
        let lower = name.to_lowercase();
        let Some(path) = lower.strip_prefix(prefix) else {
            continue;
        };
        let value: serde_yaml::Value = serde_yaml::from_str(&raw_value)?;
        assign_key(config, path, value, prefix.trim_end_matches('_'))?;
    }
    Ok(())
}

/// Resolves one underscored path segment by segment against camelCase keys
/// and replaces the addressed leaf.
fn assign_key(
    config: &mut serde_yaml::Value,
    key: &str,
    value: serde_yaml::Value,
    path: &str,
) -> Result<()> {
    let mapping = config.as_mapping_mut().ok_or_else(|| {
        ApiError::Config(format!("cannot override {}: {} is not a mapping", key, path))
    })?;

    let first_part = key.split('_').next().unwrap_or(key);
    let mut found: Option<(serde_yaml::Value, String)> = None;
    for cfg_key in mapping.keys() {
        let Some(name) = cfg_key.as_str() else { continue };
        let underscored = camelcase_to_underscore(name);
        if !underscored.starts_with(first_part) {
            continue;
        }
        let is_full = key == underscored;
        let is_parent = key
            .strip_prefix(underscored.as_str())
            .is_some_and(|rest| rest.starts_with('_'));
        if is_full || is_parent {
            found = Some((cfg_key.clone(), underscored));
        }
    }

    let Some((cfg_key, underscored)) = found else {
        return Err(ApiError::Config(format!("cannot find {} in {}", key, path)));
    };

    if underscored == key {
        mapping.insert(cfg_key, value);
    } else if let Some(child) = mapping.get_mut(&cfg_key) {
        let child_path = format!("{}_{}", path, underscored);
        assign_key(child, &key[underscored.len() + 1..], value, &child_path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MINIMAL: &str = r#"
ldap:
  serverUri: ldap://localhost:389
  prefix: dc=example,dc=com
  bindDn: cn=admin,dc=example,dc=com
  bindPassword: admin
  timeout: 5
auth:
  secretKey: super-secret
  headerPrefix: Bearer
  expiration: 3600
  autoLoginExpiration: 600
  view: users
  antiSpam:
    questions:
      - question: "2+2?"
        answer: "4"
mail:
  host: localhost
  sender: noreply@example.com
  siteBaseUrl: https://example.com
  siteName: Example
views:
  users:
    dn: ou=users
    title: Users
    primaryKey: uid
    permissions: [isAdmin]
    objectClass: [inetOrgPerson]
    list:
      uid:
        type: text
        title: Username
    details:
      user:
        type: fields
        title: User
        fields:
          uid:
            type: text
            title: Username
            required: true
allowOrigins: ["https://example.com"]
"#;

    #[test]
    fn test_camelcase_to_underscore() {
        assert_eq!(camelcase_to_underscore("bindDn"), "bind_dn");
        assert_eq!(camelcase_to_underscore("serverUri"), "server_uri");
        assert_eq!(camelcase_to_underscore("autoLoginExpiration"), "auto_login_expiration");
        assert_eq!(camelcase_to_underscore("uid"), "uid");
    }

    #[test]
    fn test_minimal_config_parses() {
        let config = AppConfig::from_yaml(MINIMAL, Vec::new()).unwrap();
        assert_eq!(config.ldap.prefix, "dc=example,dc=com");
        assert_eq!(config.auth.view, "users");
        assert_eq!(config.views.len(), 1);
        let (key, view) = &config.views.0[0];
        assert_eq!(key, "users");
        assert_eq!(view.primary_key, "uid");
        assert_eq!(view.list.len(), 1);
    }

    #[test]
    fn test_env_override_leaf() {
        let env = vec![(
            "API_CONFIG_LDAP_BIND_PASSWORD".to_string(),
            "from-env".to_string(),
        )];
        let config = AppConfig::from_yaml(MINIMAL, env).unwrap();
        assert_eq!(config.ldap.bind_password, "from-env");
    }

    #[test]
    fn test_env_override_camel_case_path() {
        let env = vec![(
            "api_config_auth_auto_login_expiration".to_string(),
            "120".to_string(),
        )];
        let config = AppConfig::from_yaml(MINIMAL, env).unwrap();
        assert_eq!(config.auth.auto_login_expiration, 120);
    }

    #[test]
    fn test_env_override_parses_yaml_scalars() {
        let env = vec![("api_config_ldap_timeout".to_string(), "42".to_string())];
        let config = AppConfig::from_yaml(MINIMAL, env).unwrap();
        assert_eq!(config.ldap.timeout, 42);
    }

    #[test]
    fn test_env_override_unknown_path_fails() {
        let env = vec![("api_config_ldap_no_such_key".to_string(), "x".to_string())];
        assert!(AppConfig::from_yaml(MINIMAL, env).is_err());
    }

    #[test]
    fn test_unrelated_env_ignored() {
        let env = vec![("PATH".to_string(), "/usr/bin".to_string())];
        assert!(AppConfig::from_yaml(MINIMAL, env).is_ok());
    }

    #[test]
    fn test_ordered_map_preserves_order() {
        let yaml = r#"
b: { type: text, title: B }
a: { type: text, title: A }
c: { type: text, title: C }
"#;
        let map: OrderedMap<FieldConfig> = serde_yaml::from_str(yaml).unwrap();
        let keys: Vec<&str> = map.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_mail_default_ports() {
        let base = MailConfig {
            host: "h".into(),
            port: None,
            ssl: false,
            starttls: false,
            user: None,
            password: None,
            sender: "s@x".into(),
            site_base_url: "https://x".into(),
            site_name: "X".into(),
        };
        assert_eq!(base.port(), 25);
        assert_eq!(MailConfig { ssl: true, ..base.clone() }.port(), 465);
        assert_eq!(MailConfig { starttls: true, ..base.clone() }.port(), 587);
        assert_eq!(MailConfig { port: Some(2525), ..base.clone() }.port(), 2525);
        assert!(MailConfig { ssl: true, starttls: true, ..base }.validate().is_err());
    }
}
