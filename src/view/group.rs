//! The group library and projection shapes.
//!
//! Groups compose fields (`fields`) or expose relationship semantics
//! (`member`, `memberOf`). Projections are ordered compositions: `list`
//! and `auth` are flat read-only field sets, `details`/`self`/`register`
//! are group sets.

use std::collections::{BTreeSet, HashMap};

use serde_json::{json, Value};

use crate::config::{FieldConfig, GroupConfig, OrderedMap};
use crate::errors::{ApiError, Result};
use crate::ldap::{Addlist, FetchRecord, ModOp, Modlist};
use crate::view::field::{truthy, Field, FieldKind, JsonMap};
use crate::view::registry::{ViewRef, ViewRegistry};

/// Extracts the `add`/`delete` reference lists of a relationship
/// assignment.
fn ref_list(assignments: &Value, key: &str) -> Result<Vec<String>> {
    match assignments.get(key) {
        None => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                _ => Err(ApiError::bad_request(format!("expected strings in {}", key))),
            })
            .collect(),
        Some(_) => Err(ApiError::bad_request(format!("expected a list for {}", key))),
    }
}

fn object_assignments(assignments: &Value) -> Result<&JsonMap> {
    assignments
        .as_object()
        .ok_or_else(|| ApiError::bad_request("expected an object"))
}

/// A group of fields on the same entry, delegating every phase across its
/// fields in declaration order.
#[derive(Debug)]
pub struct FieldsGroup {
    pub key: String,
    pub title: String,
    pub fields: Vec<Field>,
}

impl FieldsGroup {
    fn from_config(key: &str, config: &GroupConfig) -> Result<Self> {
        let field_configs = config.fields.as_ref().ok_or_else(|| {
            ApiError::Config(format!("fields group {} requires fields", key))
        })?;
        let fields = field_configs
            .iter()
            .map(|(field_key, cfg)| Field::from_config(field_key, cfg, false))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            key: key.to_string(),
            title: config.title.clone(),
            fields,
        })
    }

    fn init(&mut self, views: &HashMap<String, ViewRef>) -> Result<()> {
        validate_siblings(&self.fields)?;
        for field in &mut self.fields {
            field.init(views)?;
        }
        Ok(())
    }

    /// Resolves the sibling `_enabled` signal: an assignment of the
    /// pseudo-field wins, otherwise the producer's projection of the
    /// fetched state. `None` when no producer is configured.
    fn enabled(&self, fetch: &FetchRecord, assignments: Option<&JsonMap>) -> Option<bool> {
        let producer = self.fields.iter().find(|f| f.key == "_enabled")?;
        if let Some(assignments) = assignments {
            if let Some(value) = assignments.get("_enabled") {
                return Some(truthy(value));
            }
        }
        producer.read_enabled(fetch)
    }

    fn gated_out(&self, field: &Field, enabled: Option<bool>) -> bool {
        enabled == Some(false) && field.key != "_enabled"
    }

    fn get_fetch(&self, fetches: &mut BTreeSet<String>) {
        for field in &self.fields {
            field.get_fetch(fetches);
        }
    }

    fn get(&self, fetch: &FetchRecord) -> Result<Value> {
        let enabled = self.enabled(fetch, None);
        let mut out = JsonMap::new();
        for field in &self.fields {
            if self.gated_out(field, enabled) {
                continue;
            }
            field.get(fetch, &mut out).map_err(|e| e.nest(&field.key))?;
        }
        Ok(Value::Object(out))
    }

    fn set_fetch(&self, fetches: &mut BTreeSet<String>, assignments: &Value) -> Result<()> {
        let assignments = object_assignments(assignments)?;
        for field in &self.fields {
            field
                .set_fetch(&self.fields, fetches, assignments)
                .map_err(|e| e.nest(&field.key))?;
        }
        Ok(())
    }

    async fn set(
        &self,
        views: &ViewRegistry,
        fetch: &mut FetchRecord,
        modlist: &mut Modlist,
        assignments: &Value,
    ) -> Result<()> {
        let assignments = object_assignments(assignments)?;
        let enabled = self.enabled(fetch, Some(assignments));
        for field in &self.fields {
            if self.gated_out(field, enabled) {
                continue;
            }
            field
                .set(views, &self.fields, fetch, modlist, assignments)
                .await
                .map_err(|e| e.nest(&field.key))?;
        }
        Ok(())
    }

    async fn create(
        &self,
        views: &ViewRegistry,
        fetch: &mut FetchRecord,
        addlist: &mut Addlist,
        assignments: &Value,
    ) -> Result<()> {
        let assignments = object_assignments(assignments)?;
        let enabled = self.enabled(fetch, Some(assignments));
        for field in &self.fields {
            if self.gated_out(field, enabled) {
                continue;
            }
            field
                .create(views, &self.fields, fetch, addlist, assignments)
                .await
                .map_err(|e| e.nest(&field.key))?;
        }
        Ok(())
    }

    async fn set_post(
        &self,
        views: &ViewRegistry,
        fetch: &mut FetchRecord,
        assignments: &Value,
        is_new: bool,
    ) -> Result<()> {
        let assignments = object_assignments(assignments)?;
        let enabled = self.enabled(fetch, Some(assignments));
        for field in &self.fields {
            if self.gated_out(field, enabled) {
                continue;
            }
            field
                .set_post(views, fetch, assignments, is_new)
                .await
                .map_err(|e| e.nest(&field.key))?;
        }
        Ok(())
    }

    fn config_doc(&self) -> Value {
        json!({
            "key": self.key,
            "type": "fields",
            "title": self.title,
            "fields": self.fields.iter().map(|f| f.config_doc()).collect::<Vec<_>>(),
        })
    }
}

/// Sibling checks shared by field containers: generator inputs must exist
/// and an `_enabled` pseudo-field must come from a producer type.
pub(crate) fn validate_siblings(fields: &[Field]) -> Result<()> {
    let keys: BTreeSet<&str> = fields.iter().map(|f| f.key.as_str()).collect();
    for field in fields {
        for input in field.input_keys() {
            if !keys.contains(input.as_str()) {
                return Err(ApiError::Config(format!(
                    "generate field {} references unknown field {}",
                    field.key, input
                )));
            }
        }
        if field.key == "_enabled"
            && !matches!(field.kind, FieldKind::IsMemberOf(_) | FieldKind::ObjectClass(_))
        {
            return Err(ApiError::Config(
                "_enabled must be an isMemberOf or objectClass field".into(),
            ));
        }
    }
    Ok(())
}

/// Which side of the relationship a group edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// Outgoing references stored on this entry (`member`)
    Outgoing,
    /// Incoming back-references; writes land on the foreign entry (`memberOf`)
    Incoming,
}

/// Multi-valued DN reference group (`member` / `memberOf`).
#[derive(Debug)]
pub struct RelationGroup {
    pub key: String,
    pub title: String,
    direction: Direction,
    foreign_view: String,
    foreign_index: Option<usize>,
    field: String,
    foreign_field: String,
    writable: bool,
}

impl RelationGroup {
    fn from_config(key: &str, config: &GroupConfig, direction: Direction) -> Result<Self> {
        let foreign_view = config.foreign_view.clone().ok_or_else(|| {
            ApiError::Config(format!("group {} requires foreignView", key))
        })?;
        let (field_default, foreign_default) = match direction {
            Direction::Outgoing => ("member", "memberOf"),
            Direction::Incoming => ("memberOf", "member"),
        };
        Ok(Self {
            key: key.to_string(),
            title: config.title.clone(),
            direction,
            foreign_view,
            foreign_index: None,
            field: config.field.clone().unwrap_or_else(|| field_default.to_string()),
            foreign_field: config
                .foreign_field
                .clone()
                .unwrap_or_else(|| foreign_default.to_string()),
            writable: config.writable,
        })
    }

    fn init(&mut self, views: &HashMap<String, ViewRef>) -> Result<()> {
        let foreign = views.get(&self.foreign_view).ok_or_else(|| {
            ApiError::Config(format!("unknown foreignView {}", self.foreign_view))
        })?;
        self.foreign_index = Some(foreign.index);
        Ok(())
    }

    fn foreign<'a>(&self, views: &'a ViewRegistry) -> Result<&'a crate::view::View> {
        let index = self
            .foreign_index
            .ok_or_else(|| ApiError::Config("group used before init".into()))?;
        Ok(views.view_at(index))
    }

    fn get_fetch(&self, fetches: &mut BTreeSet<String>) {
        fetches.insert(self.field.clone());
    }

    /// Renders each referenced entry through the foreign view's list
    /// projection, dropping DNs that do not match its pattern.
    async fn get(&self, views: &ViewRegistry, fetch: &FetchRecord) -> Result<Value> {
        let Some(dns) = fetch.values.get(&self.field).cloned() else {
            return Ok(json!([]));
        };
        let foreign = self.foreign(views)?;
        let mut entries = Vec::new();
        for dn in dns {
            if let Some(pk) = foreign.try_primary_key(&dn) {
                entries.push(Value::Object(foreign.get_list_entry_permitted(&pk).await?));
            }
        }
        Ok(Value::Array(entries))
    }

    fn set_fetch(&self, fetches: &mut BTreeSet<String>, assignments: &Value) -> Result<()> {
        if !ref_list(assignments, "add")?.is_empty() || !ref_list(assignments, "delete")?.is_empty()
        {
            fetches.insert(self.field.clone());
        }
        Ok(())
    }

    /// Outgoing side: edits land in this entry's modlist.
    async fn set(
        &self,
        views: &ViewRegistry,
        fetch: &mut FetchRecord,
        modlist: &mut Modlist,
        assignments: &Value,
    ) -> Result<()> {
        if self.direction != Direction::Outgoing {
            return Ok(());
        }
        let foreign = self.foreign(views)?;

        let mut add_dns = Vec::new();
        for pk in ref_list(assignments, "add")? {
            let dn = foreign.dn_for(&pk)?;
            if !fetch.contains_value(&self.field, &dn) && !add_dns.contains(&dn) {
                add_dns.push(dn);
            }
        }
        if !add_dns.is_empty() {
            if !self.writable {
                return Err(ApiError::Forbidden);
            }
            modlist.push(&self.field, ModOp::Add, add_dns.clone());
            for dn in add_dns {
                fetch.push_value(&self.field, dn);
            }
        }

        let mut delete_dns = Vec::new();
        for pk in ref_list(assignments, "delete")? {
            let dn = foreign.dn_for(&pk)?;
            if fetch.contains_value(&self.field, &dn) && !delete_dns.contains(&dn) {
                delete_dns.push(dn);
            }
        }
        if !delete_dns.is_empty() {
            if !self.writable {
                return Err(ApiError::Forbidden);
            }
            modlist.push(&self.field, ModOp::Delete, delete_dns.clone());
            for dn in &delete_dns {
                fetch.remove_value(&self.field, dn);
            }
        }
        Ok(())
    }

    /// Outgoing side only: on creation the references go straight into the
    /// addlist; removal requests are invalid.
    async fn create(
        &self,
        views: &ViewRegistry,
        fetch: &mut FetchRecord,
        addlist: &mut Addlist,
        assignments: &Value,
    ) -> Result<()> {
        if self.direction != Direction::Outgoing {
            return Ok(());
        }
        if !ref_list(assignments, "delete")?.is_empty() {
            return Err(ApiError::bad_request("Cannot remove on creation"));
        }
        let foreign = self.foreign(views)?;
        let mut add_dns = Vec::new();
        for pk in ref_list(assignments, "add")? {
            add_dns.push(foreign.dn_for(&pk)?);
        }
        if add_dns.is_empty() {
            return Ok(());
        }
        if !self.writable {
            return Err(ApiError::Forbidden);
        }
        addlist.extend(&self.field, add_dns.clone());
        for dn in add_dns {
            fetch.push_value(&self.field, dn);
        }
        Ok(())
    }

    /// Incoming side: each flip issues one modify on the foreign entry,
    /// idempotent against the cached local state.
    async fn set_post(
        &self,
        views: &ViewRegistry,
        fetch: &mut FetchRecord,
        assignments: &Value,
        _is_new: bool,
    ) -> Result<()> {
        if self.direction != Direction::Incoming {
            return Ok(());
        }
        let foreign = self.foreign(views)?;

        for add_ref in ref_list(assignments, "add")? {
            if !self.writable {
                return Err(ApiError::Forbidden);
            }
            let foreign_dn = foreign.dn_for(&add_ref)?;
            if !fetch.contains_value(&self.field, &foreign_dn) {
                let mut modlist = Modlist::new();
                modlist.set(&self.foreign_field, ModOp::Add, vec![fetch.dn.clone()]);
                foreign.save_foreign_field(&add_ref, &modlist).await?;
                fetch.push_value(&self.field, foreign_dn);
            }
        }

        if fetch.contains_attr(&self.field) {
            for del_ref in ref_list(assignments, "delete")? {
                if !self.writable {
                    return Err(ApiError::Forbidden);
                }
                let foreign_dn = foreign.dn_for(&del_ref)?;
                if fetch.contains_value(&self.field, &foreign_dn) {
                    let mut modlist = Modlist::new();
                    modlist.set(&self.foreign_field, ModOp::Delete, vec![fetch.dn.clone()]);
                    foreign.save_foreign_field(&del_ref, &modlist).await?;
                    fetch.remove_value(&self.field, &foreign_dn);
                }
            }
        }
        Ok(())
    }

    fn config_doc(&self) -> Value {
        json!({
            "key": self.key,
            "type": match self.direction {
                Direction::Outgoing => "member",
                Direction::Incoming => "memberOf",
            },
            "title": self.title,
            "field": self.field,
            "foreignView": self.foreign_view,
            "foreignField": self.foreign_field,
            "writable": self.writable,
        })
    }
}

/// A lifecycle participant composing fields or relationship semantics.
#[derive(Debug)]
pub enum Group {
    Fields(FieldsGroup),
    Relation(RelationGroup),
}

impl Group {
    pub fn from_config(key: &str, config: &GroupConfig) -> Result<Self> {
        match config.group_type.as_str() {
            "fields" => Ok(Group::Fields(FieldsGroup::from_config(key, config)?)),
            "member" => Ok(Group::Relation(RelationGroup::from_config(
                key,
                config,
                Direction::Outgoing,
            )?)),
            "memberOf" => Ok(Group::Relation(RelationGroup::from_config(
                key,
                config,
                Direction::Incoming,
            )?)),
            other => Err(ApiError::Config(format!(
                "unknown group type {} for {}",
                other, key
            ))),
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Group::Fields(group) => &group.key,
            Group::Relation(group) => &group.key,
        }
    }

    pub fn init(&mut self, views: &HashMap<String, ViewRef>) -> Result<()> {
        match self {
            Group::Fields(group) => group.init(views),
            Group::Relation(group) => group.init(views),
        }
    }

    pub fn get_fetch(&self, fetches: &mut BTreeSet<String>) {
        match self {
            Group::Fields(group) => group.get_fetch(fetches),
            Group::Relation(group) => group.get_fetch(fetches),
        }
    }

    pub async fn get(&self, views: &ViewRegistry, fetch: &FetchRecord) -> Result<Value> {
        match self {
            Group::Fields(group) => group.get(fetch),
            Group::Relation(group) => group.get(views, fetch).await,
        }
    }

    pub fn set_fetch(&self, fetches: &mut BTreeSet<String>, assignments: &Value) -> Result<()> {
        match self {
            Group::Fields(group) => group.set_fetch(fetches, assignments),
            Group::Relation(group) => group.set_fetch(fetches, assignments),
        }
    }

    pub async fn set(
        &self,
        views: &ViewRegistry,
        fetch: &mut FetchRecord,
        modlist: &mut Modlist,
        assignments: &Value,
    ) -> Result<()> {
        match self {
            Group::Fields(group) => group.set(views, fetch, modlist, assignments).await,
            Group::Relation(group) => group.set(views, fetch, modlist, assignments).await,
        }
    }

    pub async fn create(
        &self,
        views: &ViewRegistry,
        fetch: &mut FetchRecord,
        addlist: &mut Addlist,
        assignments: &Value,
    ) -> Result<()> {
        match self {
            Group::Fields(group) => group.create(views, fetch, addlist, assignments).await,
            Group::Relation(group) => group.create(views, fetch, addlist, assignments).await,
        }
    }

    pub async fn set_post(
        &self,
        views: &ViewRegistry,
        fetch: &mut FetchRecord,
        assignments: &Value,
        is_new: bool,
    ) -> Result<()> {
        match self {
            Group::Fields(group) => group.set_post(views, fetch, assignments, is_new).await,
            Group::Relation(group) => group.set_post(views, fetch, assignments, is_new).await,
        }
    }

    pub fn config_doc(&self) -> Value {
        match self {
            Group::Fields(group) => group.config_doc(),
            Group::Relation(group) => group.config_doc(),
        }
    }
}

/// A read-write projection: ordered groups keyed by their group key.
#[derive(Debug)]
pub struct DetailProjection {
    pub groups: Vec<Group>,
}

impl DetailProjection {
    pub fn from_config(config: &OrderedMap<GroupConfig>) -> Result<Self> {
        let groups = config
            .iter()
            .map(|(key, cfg)| Group::from_config(key, cfg))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { groups })
    }

    pub fn init(&mut self, views: &HashMap<String, ViewRef>) -> Result<()> {
        for group in &mut self.groups {
            group.init(views)?;
        }
        Ok(())
    }

    pub fn get_fetch(&self, fetches: &mut BTreeSet<String>) {
        for group in &self.groups {
            group.get_fetch(fetches);
        }
    }

    pub async fn get(&self, views: &ViewRegistry, fetch: &FetchRecord) -> Result<JsonMap> {
        let mut results = JsonMap::new();
        for group in &self.groups {
            let value = group
                .get(views, fetch)
                .await
                .map_err(|e| e.nest(group.key()))?;
            results.insert(group.key().to_string(), value);
        }
        Ok(results)
    }

    pub fn set_fetch(&self, fetches: &mut BTreeSet<String>, assignments: &JsonMap) -> Result<()> {
        for group in &self.groups {
            if let Some(group_assignments) = assignments.get(group.key()) {
                group
                    .set_fetch(fetches, group_assignments)
                    .map_err(|e| e.nest(group.key()))?;
            }
        }
        Ok(())
    }

    pub async fn set(
        &self,
        views: &ViewRegistry,
        fetch: &mut FetchRecord,
        modlist: &mut Modlist,
        assignments: &JsonMap,
    ) -> Result<()> {
        for group in &self.groups {
            if let Some(group_assignments) = assignments.get(group.key()) {
                group
                    .set(views, fetch, modlist, group_assignments)
                    .await
                    .map_err(|e| e.nest(group.key()))?;
            }
        }
        Ok(())
    }

    pub async fn create(
        &self,
        views: &ViewRegistry,
        fetch: &mut FetchRecord,
        addlist: &mut Addlist,
        assignments: &JsonMap,
    ) -> Result<()> {
        for group in &self.groups {
            if let Some(group_assignments) = assignments.get(group.key()) {
                group
                    .create(views, fetch, addlist, group_assignments)
                    .await
                    .map_err(|e| e.nest(group.key()))?;
            }
        }
        Ok(())
    }

    pub async fn set_post(
        &self,
        views: &ViewRegistry,
        fetch: &mut FetchRecord,
        assignments: &JsonMap,
        is_new: bool,
    ) -> Result<()> {
        for group in &self.groups {
            if let Some(group_assignments) = assignments.get(group.key()) {
                group
                    .set_post(views, fetch, group_assignments, is_new)
                    .await
                    .map_err(|e| e.nest(group.key()))?;
            }
        }
        Ok(())
    }

    pub fn config_doc(&self) -> Value {
        Value::Array(self.groups.iter().map(|g| g.config_doc()).collect())
    }
}

/// A flat, read-only projection: ordered fields with writes disabled at
/// construction (`list` and `auth`).
#[derive(Debug)]
pub struct ListProjection {
    pub fields: Vec<Field>,
}

impl ListProjection {
    pub fn from_config(config: &OrderedMap<FieldConfig>) -> Result<Self> {
        let fields = config
            .iter()
            .map(|(key, cfg)| Field::from_config(key, cfg, true))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { fields })
    }

    pub fn init(&mut self, views: &HashMap<String, ViewRef>) -> Result<()> {
        validate_siblings(&self.fields)?;
        for field in &mut self.fields {
            field.init(views)?;
        }
        Ok(())
    }

    pub fn get_fetch(&self, fetches: &mut BTreeSet<String>) {
        for field in &self.fields {
            field.get_fetch(fetches);
        }
    }

    pub fn get(&self, fetch: &FetchRecord) -> Result<JsonMap> {
        let mut out = JsonMap::new();
        for field in &self.fields {
            field.get(fetch, &mut out).map_err(|e| e.nest(&field.key))?;
        }
        Ok(out)
    }

    pub fn config_doc(&self) -> Value {
        Value::Array(self.fields.iter().map(|f| f.config_doc()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_ref_list() {
        let assignments = json!({"add": ["a", "b"], "delete": []});
        assert_eq!(ref_list(&assignments, "add").unwrap(), vec!["a", "b"]);
        assert!(ref_list(&assignments, "delete").unwrap().is_empty());
        assert!(ref_list(&assignments, "missing").unwrap().is_empty());

        let bad = json!({"add": [1]});
        assert!(ref_list(&bad, "add").is_err());
    }

    #[test]
    fn test_unknown_group_type_rejected() {
        let config = GroupConfig {
            group_type: "mystery".into(),
            title: String::new(),
            fields: None,
            foreign_view: None,
            field: None,
            foreign_field: None,
            writable: true,
        };
        assert!(Group::from_config("g", &config).is_err());
    }

    #[test]
    fn test_relation_group_defaults() {
        let config = GroupConfig {
            group_type: "memberOf".into(),
            title: "Groups".into(),
            fields: None,
            foreign_view: Some("groups".into()),
            field: None,
            foreign_field: None,
            writable: true,
        };
        let group = Group::from_config("memberOfGroups", &config).unwrap();
        let doc = group.config_doc();
        assert_eq!(doc["field"], json!("memberOf"));
        assert_eq!(doc["foreignField"], json!("member"));
        assert_eq!(doc["type"], json!("memberOf"));

        let config = GroupConfig {
            group_type: "member".into(),
            ..config
        };
        let group = Group::from_config("members", &config).unwrap();
        let doc = group.config_doc();
        assert_eq!(doc["field"], json!("member"));
        assert_eq!(doc["foreignField"], json!("memberOf"));
    }

    #[test]
    fn test_list_projection_forces_read_only() {
        let yaml = r#"
uid: { type: text, title: Username }
"#;
        let config: OrderedMap<FieldConfig> = serde_yaml::from_str(yaml).unwrap();
        let projection = ListProjection::from_config(&config).unwrap();
        assert!(!projection.fields[0].writable);
    }

    #[test]
    fn test_fields_group_requires_fields() {
        let config = GroupConfig {
            group_type: "fields".into(),
            title: String::new(),
            fields: None,
            foreign_view: None,
            field: None,
            foreign_field: None,
            writable: true,
        };
        assert!(Group::from_config("user", &config).is_err());
    }
}
