//! The field library.
//!
//! A closed set of field kinds, each participating in the six-phase view
//! lifecycle: `get_fetch`, `get`, `set_fetch`, `set`, `create`, `set_post`.
//! Unknown type names are rejected when the configuration is loaded.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use regex::Regex;
use serde_json::{json, Value};

use crate::config::FieldConfig;
use crate::crypto::{generate_secret, hash_password, HashMethod};
use crate::errors::{ApiError, Result};
use crate::ldap::{Addlist, FetchRecord, ModOp, Modlist};
use crate::view::registry::{ViewRef, ViewRegistry};

/// JSON object shape used for projection output and assignments.
pub type JsonMap = serde_json::Map<String, Value>;

/// Directory timestamp layout (generalized time, UTC).
const GENERALIZED_TIME: &str = "%Y%m%d%H%M%SZ";

fn assigned_str<'a>(assignments: &'a JsonMap, key: &str) -> Result<Option<&'a str>> {
    match assignments.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(ApiError::bad_request(format!("expected a string for {}", key))),
    }
}

fn assigned_bool(assignments: &JsonMap, key: &str) -> Result<Option<bool>> {
    match assignments.get(key) {
        None => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(ApiError::bad_request(format!("expected a boolean for {}", key))),
    }
}

/// Renders a JSON value the way a template input expects it.
fn input_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// A `{name}`-style render template with its input names extracted at
/// parse time. `{{` and `}}` escape literal braces.
#[derive(Debug, Clone)]
pub struct Template {
    segments: Vec<Segment>,
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Input(String),
}

impl Template {
    pub fn parse(source: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(c) => name.push(c),
                            None => {
                                return Err(ApiError::Config(format!(
                                    "unclosed placeholder in template {:?}",
                                    source
                                )))
                            }
                        }
                    }
                    segments.push(Segment::Input(name));
                }
                '}' => {
                    return Err(ApiError::Config(format!(
                        "unmatched '}}' in template {:?}",
                        source
                    )))
                }
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { segments })
    }

    /// Input names in first-use order, deduplicated.
    pub fn input_names(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut names = Vec::new();
        for segment in &self.segments {
            if let Segment::Input(name) = segment {
                if seen.insert(name.clone()) {
                    names.push(name.clone());
                }
            }
        }
        names
    }

    /// Renders the template; missing inputs render empty.
    pub fn render(&self, inputs: &BTreeMap<String, String>) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Input(name) => {
                    if let Some(value) = inputs.get(name) {
                        out.push_str(value);
                    }
                }
            }
        }
        out
    }
}

/// Single-valued string projection with regex and whitelist validation.
#[derive(Debug, Clone)]
pub struct TextField {
    pub attr: String,
    format: Option<Regex>,
    format_src: String,
    format_js: Option<String>,
    enum_values: Option<Vec<String>>,
}

/// ISO-8601 projection over a generalized-time attribute.
#[derive(Debug, Clone)]
pub struct DateTimeField {
    pub attr: String,
}

/// Write-biased hash field over userPassword-style attributes.
#[derive(Debug, Clone)]
pub struct PasswordField {
    pub attr: String,
    method: HashMethod,
    hashing_name: String,
    auto_generate: bool,
    pwned_check: bool,
}

/// Derived field rendered from sibling values through a template.
#[derive(Debug, Clone)]
pub struct GenerateField {
    pub attr: String,
    template: Template,
    template_src: String,
    format_js: Option<String>,
    input_keys: Vec<String>,
}

/// Boolean projection over membership in one named foreign entry.
#[derive(Debug, Clone)]
pub struct IsMemberOfField {
    pub attr: String,
    member_of: String,
    foreign_view: String,
    foreign_field: String,
    member_of_dn: String,
    foreign_index: Option<usize>,
}

/// Boolean projection over the presence of one objectClass.
#[derive(Debug, Clone)]
pub struct ObjectClassField {
    class: String,
}

/// Create-only wrapper forwarding a literal to a nested target field.
#[derive(Debug)]
pub struct InitialField {
    value: Value,
    target: Box<Field>,
}

/// The closed set of field kinds.
#[derive(Debug)]
pub enum FieldKind {
    Text(TextField),
    DateTime(DateTimeField),
    Password(PasswordField),
    Generate(GenerateField),
    IsMemberOf(IsMemberOfField),
    ObjectClass(ObjectClassField),
    Initial(InitialField),
}

/// A leaf lifecycle participant bound to one or more directory attributes.
#[derive(Debug)]
pub struct Field {
    pub key: String,
    pub title: String,
    pub required: bool,
    pub creatable: bool,
    pub readable: bool,
    pub writable: bool,
    pub hidden: bool,
    pub kind: FieldKind,
}

fn yaml_to_json(value: &serde_yaml::Value) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| ApiError::Config(e.to_string()))
}

impl Field {
    /// Builds a field from its configuration; unknown types are rejected.
    /// `force_read_only` is applied by list and auth projections.
    pub fn from_config(key: &str, config: &FieldConfig, force_read_only: bool) -> Result<Self> {
        // Most kinds default their attribute to the field key.
        let keyed_attr = || config.field.clone().unwrap_or_else(|| key.to_string());

        let kind = match config.field_type.as_str() {
            "text" => {
                let format_src = config.format.clone().unwrap_or_default();
                let format = if format_src.is_empty() {
                    None
                } else {
                    Some(Regex::new(&format!("^(?:{})$", format_src)).map_err(|e| {
                        ApiError::Config(format!("invalid format for field {}: {}", key, e))
                    })?)
                };
                FieldKind::Text(TextField {
                    attr: keyed_attr(),
                    format,
                    format_src,
                    format_js: config.format_js.clone(),
                    enum_values: config.enum_values.clone(),
                })
            }
            "datetime" => FieldKind::DateTime(DateTimeField { attr: keyed_attr() }),
            "password" => {
                let hashing_name = config.hashing.clone().ok_or_else(|| {
                    ApiError::Config(format!("password field {} requires hashing", key))
                })?;
                let method = HashMethod::parse(&hashing_name).ok_or_else(|| {
                    ApiError::Config(format!(
                        "password field {}: unknown hashing scheme {}",
                        key, hashing_name
                    ))
                })?;
                FieldKind::Password(PasswordField {
                    attr: keyed_attr(),
                    method,
                    hashing_name,
                    auto_generate: config.auto_generate,
                    pwned_check: config.pwned_password_check,
                })
            }
            "generate" => {
                let template_src = config.format.clone().ok_or_else(|| {
                    ApiError::Config(format!("generate field {} requires format", key))
                })?;
                let template = Template::parse(&template_src)?;
                let input_keys = template.input_names();
                FieldKind::Generate(GenerateField {
                    attr: keyed_attr(),
                    template,
                    template_src,
                    format_js: config.format_js.clone(),
                    input_keys,
                })
            }
            "isMemberOf" => {
                let member_of = config.member_of.clone().ok_or_else(|| {
                    ApiError::Config(format!("isMemberOf field {} requires memberOf", key))
                })?;
                let foreign_view = config.foreign_view.clone().ok_or_else(|| {
                    ApiError::Config(format!("isMemberOf field {} requires foreignView", key))
                })?;
                FieldKind::IsMemberOf(IsMemberOfField {
                    attr: config.field.clone().unwrap_or_else(|| "memberOf".to_string()),
                    member_of,
                    foreign_view,
                    foreign_field: config
                        .foreign_field
                        .clone()
                        .unwrap_or_else(|| "member".to_string()),
                    member_of_dn: String::new(),
                    foreign_index: None,
                })
            }
            "objectClass" => {
                let class = config.object_class.clone().ok_or_else(|| {
                    ApiError::Config(format!("objectClass field {} requires objectClass", key))
                })?;
                FieldKind::ObjectClass(ObjectClassField { class })
            }
            "initial" => {
                let value = config.value.as_ref().ok_or_else(|| {
                    ApiError::Config(format!("initial field {} requires value", key))
                })?;
                let target_config = config.target.as_ref().ok_or_else(|| {
                    ApiError::Config(format!("initial field {} requires target", key))
                })?;
                if target_config.config.field_type == "initial" {
                    return Err(ApiError::Config(format!(
                        "initial field {} cannot target another initial field",
                        key
                    )));
                }
                if !config.creatable {
                    return Err(ApiError::Config(format!(
                        "initial field {} must be creatable",
                        key
                    )));
                }
                let target =
                    Field::from_config(&target_config.key, &target_config.config, force_read_only)?;
                FieldKind::Initial(InitialField {
                    value: yaml_to_json(value)?,
                    target: Box::new(target),
                })
            }
            other => {
                return Err(ApiError::Config(format!(
                    "unknown field type {} for {}",
                    other, key
                )))
            }
        };

        Ok(Field {
            key: key.to_string(),
            title: config.title.clone(),
            required: config.required,
            creatable: config.creatable,
            readable: config.readable,
            writable: config.writable && !force_read_only,
            hidden: config.hidden,
            kind,
        })
    }

    /// Resolves cross-view references once every view exists.
    pub fn init(&mut self, views: &HashMap<String, ViewRef>) -> Result<()> {
        match &mut self.kind {
            FieldKind::IsMemberOf(field) => {
                let foreign = views.get(&field.foreign_view).ok_or_else(|| {
                    ApiError::Config(format!("unknown foreignView {}", field.foreign_view))
                })?;
                field.member_of_dn = foreign.dn(&field.member_of).ok_or_else(|| {
                    ApiError::Config(format!("invalid memberOf name {}", field.member_of))
                })?;
                field.foreign_index = Some(foreign.index);
                Ok(())
            }
            FieldKind::Initial(field) => field.target.init(views),
            _ => Ok(()),
        }
    }

    /// Template input keys of a generate field, used for sibling validation.
    pub fn input_keys(&self) -> &[String] {
        match &self.kind {
            FieldKind::Generate(field) => &field.input_keys,
            _ => &[],
        }
    }

    /// Whether this field can act as an `_enabled` producer, and its
    /// current state projected from the fetch record.
    pub fn read_enabled(&self, fetch: &FetchRecord) -> Option<bool> {
        match &self.kind {
            FieldKind::IsMemberOf(field) => {
                Some(fetch.contains_value(&field.attr, &field.member_of_dn))
            }
            FieldKind::ObjectClass(field) => {
                Some(fetch.contains_value("objectClass", &field.class))
            }
            _ => None,
        }
    }

    fn projected(&self) -> bool {
        self.readable && !self.hidden
    }

    /// Declares the attributes needed to render this field.
    pub fn get_fetch(&self, fetches: &mut BTreeSet<String>) {
        if !self.projected() {
            return;
        }
        match &self.kind {
            FieldKind::Text(field) => {
                fetches.insert(field.attr.clone());
            }
            FieldKind::DateTime(field) => {
                fetches.insert(field.attr.clone());
            }
            FieldKind::Password(field) => {
                fetches.insert(field.attr.clone());
            }
            FieldKind::Generate(field) => {
                fetches.insert(field.attr.clone());
            }
            FieldKind::IsMemberOf(field) => {
                fetches.insert(field.attr.clone());
            }
            FieldKind::ObjectClass(_) => {
                fetches.insert("objectClass".to_string());
            }
            FieldKind::Initial(_) => {}
        }
    }

    /// Projects the fetched value into `out[key]`.
    pub fn get(&self, fetch: &FetchRecord, out: &mut JsonMap) -> Result<()> {
        if !self.projected() {
            return Ok(());
        }
        match &self.kind {
            FieldKind::Text(field) => {
                if let Some(value) = fetch.first(&field.attr) {
                    out.insert(self.key.clone(), Value::String(value.to_string()));
                }
            }
            FieldKind::DateTime(field) => {
                if let Some(value) = fetch.first(&field.attr) {
                    let rendered = generalized_to_iso(value).unwrap_or_else(|| value.to_string());
                    out.insert(self.key.clone(), Value::String(rendered));
                }
            }
            FieldKind::Password(field) => {
                if let Some(value) = fetch.first(&field.attr) {
                    out.insert(self.key.clone(), Value::String(value.to_string()));
                }
            }
            FieldKind::Generate(field) => {
                if let Some(value) = fetch.first(&field.attr) {
                    out.insert(self.key.clone(), Value::String(value.to_string()));
                }
            }
            FieldKind::IsMemberOf(field) => {
                out.insert(
                    self.key.clone(),
                    Value::Bool(fetch.contains_value(&field.attr, &field.member_of_dn)),
                );
            }
            FieldKind::ObjectClass(field) => {
                out.insert(
                    self.key.clone(),
                    Value::Bool(fetch.contains_value("objectClass", &field.class)),
                );
            }
            FieldKind::Initial(_) => {}
        }
        Ok(())
    }

    /// Shared assignment gate for writes: skips unmentioned keys, enforces
    /// `required` and `writable`.
    fn write_gate(&self, assignments: &JsonMap) -> Result<bool> {
        if !assignments.contains_key(&self.key) {
            return Ok(false);
        }
        if self.required && !truthy(&assignments[&self.key]) {
            return Err(ApiError::bad_request(format!("{} is required", self.key)));
        }
        if !self.writable {
            return Err(ApiError::Forbidden);
        }
        Ok(true)
    }

    /// Declares the attributes needed to apply this assignment.
    pub fn set_fetch(
        &self,
        siblings: &[Field],
        fetches: &mut BTreeSet<String>,
        assignments: &JsonMap,
    ) -> Result<()> {
        match &self.kind {
            FieldKind::Text(field) => {
                if self.write_gate(assignments)? {
                    fetches.insert(field.attr.clone());
                }
            }
            FieldKind::DateTime(field) => {
                if self.write_gate(assignments)? {
                    fetches.insert(field.attr.clone());
                }
            }
            FieldKind::Password(field) => {
                if self.write_gate(assignments)? {
                    fetches.insert(field.attr.clone());
                }
            }
            FieldKind::Generate(field) => {
                if assignments.contains_key(&self.key) {
                    return Err(ApiError::bad_request(format!(
                        "cannot assign value to generated field {}",
                        self.key
                    )));
                }
                if !self.writable {
                    return Ok(());
                }
                if field.input_keys.iter().any(|key| assignments.contains_key(key)) {
                    for input in &field.input_keys {
                        if let Some(sibling) = siblings.iter().find(|f| &f.key == input) {
                            sibling.get_fetch(fetches);
                        }
                    }
                    fetches.insert(field.attr.clone());
                }
            }
            FieldKind::IsMemberOf(field) => {
                // An `_enabled` producer is consulted for sibling gating
                // even when unassigned, so its attribute is always fetched.
                if self.write_gate(assignments)? || self.key == "_enabled" {
                    fetches.insert(field.attr.clone());
                }
            }
            FieldKind::ObjectClass(_) => {
                if self.write_gate(assignments)? || self.key == "_enabled" {
                    fetches.insert("objectClass".to_string());
                }
            }
            FieldKind::Initial(_) => {}
        }
        Ok(())
    }

    /// Applies the single-valued write strategy shared by text-like fields:
    /// ADD when absent, REPLACE when changed, DELETE when emptied.
    fn apply_single_value(
        &self,
        attr: &str,
        value: &str,
        fetch: &mut FetchRecord,
        modlist: &mut Modlist,
    ) -> Result<()> {
        if value.is_empty() {
            if self.required {
                return Err(ApiError::bad_request(format!("{} is required", self.key)));
            }
            if fetch.contains_attr(attr) {
                modlist.set(attr, ModOp::Delete, vec![]);
            }
        } else if let Some(current) = fetch.values.get(attr) {
            if current.len() != 1 || current[0] != value {
                modlist.set(attr, ModOp::Replace, vec![value.to_string()]);
            }
        } else {
            modlist.set(attr, ModOp::Add, vec![value.to_string()]);
        }
        fetch.set_values(attr, vec![value.to_string()]);
        Ok(())
    }

    /// Validates a text assignment against the format regex and whitelist.
    fn validate_text(&self, field: &TextField, value: &str) -> Result<()> {
        if let Some(format) = &field.format {
            if !format.is_match(value) {
                return Err(ApiError::bad_request(format!(
                    "Invalid value {} for {}, expecting {}",
                    value, self.key, field.format_src
                )));
            }
        }
        if let Some(allowed) = &field.enum_values {
            if !value.is_empty() && !allowed.iter().any(|v| v == value) {
                return Err(ApiError::bad_request(format!(
                    "Invalid value {} for {}, expecting one of {}",
                    value,
                    self.key,
                    allowed.join(", ")
                )));
            }
        }
        Ok(())
    }

    /// Assembles generator inputs, preferring assigned values over fetched.
    fn generator_inputs(
        &self,
        field: &GenerateField,
        siblings: &[Field],
        fetch: &FetchRecord,
        assignments: &JsonMap,
    ) -> BTreeMap<String, String> {
        let mut inputs = BTreeMap::new();
        for input in &field.input_keys {
            if let Some(value) = assignments.get(input) {
                inputs.insert(input.clone(), input_string(value));
            } else if let Some(sibling) = siblings.iter().find(|f| &f.key == input) {
                let mut tmp = JsonMap::new();
                let _ = sibling.get(fetch, &mut tmp);
                if let Some(value) = tmp.get(input) {
                    inputs.insert(input.clone(), input_string(value));
                }
            }
        }
        inputs
    }

    /// Contributes to a `modify`.
    pub async fn set(
        &self,
        views: &ViewRegistry,
        siblings: &[Field],
        fetch: &mut FetchRecord,
        modlist: &mut Modlist,
        assignments: &JsonMap,
    ) -> Result<()> {
        match &self.kind {
            FieldKind::Text(field) => {
                if !self.write_gate(assignments)? {
                    return Ok(());
                }
                let value = assigned_str(assignments, &self.key)?.unwrap_or_default();
                self.validate_text(field, value)?;
                self.apply_single_value(&field.attr, value, fetch, modlist)
            }
            FieldKind::DateTime(field) => {
                if !self.write_gate(assignments)? {
                    return Ok(());
                }
                let raw = assigned_str(assignments, &self.key)?.unwrap_or_default();
                let value = if raw.is_empty() {
                    String::new()
                } else {
                    iso_to_generalized(raw)
                        .ok_or_else(|| {
                            ApiError::bad_request(format!(
                                "Invalid value {} for {}, expecting an ISO-8601 timestamp",
                                raw, self.key
                            ))
                        })?
                };
                self.apply_single_value(&field.attr, &value, fetch, modlist)
            }
            FieldKind::Password(field) => {
                if !self.write_gate(assignments)? {
                    return Ok(());
                }
                let supplied = assigned_str(assignments, &self.key)?.unwrap_or_default();
                let hashed = self.hash_password_value(field, views, supplied).await?;
                // Salted hashes never compare equal, so a non-empty
                // assignment always lands as a REPLACE on an existing
                // attribute.
                if hashed.is_empty() {
                    return self.apply_single_value(&field.attr, "", fetch, modlist);
                }
                if fetch.contains_attr(&field.attr) {
                    modlist.set(&field.attr, ModOp::Replace, vec![hashed.clone()]);
                } else {
                    modlist.set(&field.attr, ModOp::Add, vec![hashed.clone()]);
                }
                fetch.set_values(&field.attr, vec![hashed]);
                Ok(())
            }
            FieldKind::Generate(field) => {
                if assignments.contains_key(&self.key) {
                    return Err(ApiError::bad_request(format!(
                        "cannot assign value to generated field {}",
                        self.key
                    )));
                }
                if !self.writable {
                    return Ok(());
                }
                if !field.input_keys.iter().any(|key| assignments.contains_key(key)) {
                    return Ok(());
                }
                let inputs = self.generator_inputs(field, siblings, fetch, assignments);
                let value = field.template.render(&inputs);
                if value.is_empty() {
                    if fetch.contains_attr(&field.attr) {
                        modlist.set(&field.attr, ModOp::Delete, vec![]);
                    }
                } else if let Some(current) = fetch.values.get(&field.attr) {
                    if current.len() != 1 || current[0] != value {
                        modlist.set(&field.attr, ModOp::Replace, vec![value.clone()]);
                    }
                } else {
                    modlist.set(&field.attr, ModOp::Add, vec![value.clone()]);
                }
                fetch.set_values(&field.attr, vec![value]);
                Ok(())
            }
            FieldKind::IsMemberOf(_) => Ok(()),
            FieldKind::ObjectClass(field) => {
                if !assignments.contains_key(&self.key) {
                    return Ok(());
                }
                if !self.writable {
                    return Err(ApiError::Forbidden);
                }
                let desired = assigned_bool(assignments, &self.key)?.unwrap_or(false);
                let present = fetch.contains_value("objectClass", &field.class);
                if desired == present {
                    return Ok(());
                }
                if desired {
                    modlist.push("objectClass", ModOp::Add, vec![field.class.clone()]);
                    fetch.push_value("objectClass", field.class.clone());
                } else {
                    modlist.push("objectClass", ModOp::Delete, vec![field.class.clone()]);
                    fetch.remove_value("objectClass", &field.class);
                }
                Ok(())
            }
            FieldKind::Initial(_) => Ok(()),
        }
    }

    async fn hash_password_value(
        &self,
        field: &PasswordField,
        views: &ViewRegistry,
        supplied: &str,
    ) -> Result<String> {
        let generated;
        let plaintext = if field.auto_generate && supplied.is_empty() {
            generated = generate_secret();
            generated.as_str()
        } else {
            supplied
        };
        if plaintext.is_empty() {
            return Ok(String::new());
        }
        if field.pwned_check && !supplied.is_empty() {
            let count = views.password_oracle().breach_count(plaintext).await?;
            if count > 0 {
                return Err(ApiError::bad_request(format!(
                    "{} appears in known password breaches",
                    self.key
                )));
            }
        }
        hash_password(plaintext, field.method)
    }

    /// Shared creation gate: enforces `required` on absence, `creatable`
    /// on assignment.
    fn create_gate(&self, assignments: &JsonMap) -> Result<bool> {
        if !assignments.contains_key(&self.key) {
            if self.required {
                return Err(ApiError::bad_request(format!("{} is required", self.key)));
            }
            return Ok(false);
        }
        if !self.creatable {
            return Err(ApiError::Forbidden);
        }
        Ok(true)
    }

    fn add_single_value(
        &self,
        attr: &str,
        value: &str,
        fetch: &mut FetchRecord,
        addlist: &mut Addlist,
    ) -> Result<()> {
        if fetch.contains_attr(attr) {
            return Err(ApiError::bad_request("Cannot modify value"));
        }
        if value.is_empty() && self.required {
            return Err(ApiError::bad_request(format!("{} is required", self.key)));
        }
        addlist.insert(attr, vec![value.to_string()]);
        fetch.set_values(attr, vec![value.to_string()]);
        Ok(())
    }

    /// Contributes to an `add`.
    pub fn create<'a>(
        &'a self,
        views: &'a ViewRegistry,
        siblings: &'a [Field],
        fetch: &'a mut FetchRecord,
        addlist: &'a mut Addlist,
        assignments: &'a JsonMap,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move { self.create_inner(views, siblings, fetch, addlist, assignments).await })
    }

    async fn create_inner(
        &self,
        views: &ViewRegistry,
        siblings: &[Field],
        fetch: &mut FetchRecord,
        addlist: &mut Addlist,
        assignments: &JsonMap,
    ) -> Result<()> {
        match &self.kind {
            FieldKind::Text(field) => {
                if !self.create_gate(assignments)? {
                    return Ok(());
                }
                let value = assigned_str(assignments, &self.key)?.unwrap_or_default();
                self.validate_text(field, value)?;
                self.add_single_value(&field.attr, value, fetch, addlist)
            }
            FieldKind::DateTime(field) => {
                if !self.create_gate(assignments)? {
                    return Ok(());
                }
                let raw = assigned_str(assignments, &self.key)?.unwrap_or_default();
                let value = if raw.is_empty() {
                    String::new()
                } else {
                    iso_to_generalized(raw)
                        .ok_or_else(|| {
                            ApiError::bad_request(format!(
                                "Invalid value {} for {}, expecting an ISO-8601 timestamp",
                                raw, self.key
                            ))
                        })?
                };
                self.add_single_value(&field.attr, &value, fetch, addlist)
            }
            FieldKind::Password(field) => {
                if !self.create_gate(assignments)? {
                    return Ok(());
                }
                let supplied = assigned_str(assignments, &self.key)?.unwrap_or_default();
                let hashed = self.hash_password_value(field, views, supplied).await?;
                self.add_single_value(&field.attr, &hashed, fetch, addlist)
            }
            FieldKind::Generate(field) => {
                if assignments.contains_key(&self.key) {
                    return Err(ApiError::bad_request(format!(
                        "cannot assign value to generated field {}",
                        self.key
                    )));
                }
                if !self.creatable {
                    return Ok(());
                }
                if !field.input_keys.iter().any(|key| assignments.contains_key(key)) {
                    return Ok(());
                }
                let inputs = self.generator_inputs(field, siblings, fetch, assignments);
                let value = field.template.render(&inputs);
                if fetch.contains_attr(&field.attr) {
                    return Err(ApiError::bad_request("Cannot modify value"));
                }
                if value.is_empty() && self.required {
                    return Err(ApiError::bad_request(format!("{} is required", self.key)));
                }
                addlist.insert(&field.attr, vec![value.clone()]);
                fetch.set_values(&field.attr, vec![value]);
                Ok(())
            }
            FieldKind::IsMemberOf(_) => Ok(()),
            FieldKind::ObjectClass(field) => {
                if !self.create_gate(assignments)? {
                    return Ok(());
                }
                if assigned_bool(assignments, &self.key)?.unwrap_or(false) {
                    addlist.extend("objectClass", vec![field.class.clone()]);
                    fetch.push_value("objectClass", field.class.clone());
                }
                Ok(())
            }
            FieldKind::Initial(initial) => {
                if assignments.get(&self.key).map(truthy).unwrap_or(false) {
                    return Err(ApiError::bad_request(format!("Cannot assign {}", self.key)));
                }
                let mut forwarded = assignments.clone();
                forwarded.insert(initial.target.key.clone(), initial.value.clone());
                initial.target.create(views, siblings, fetch, addlist, &forwarded).await
            }
        }
    }

    /// Performs follow-up writes on related entries.
    pub fn set_post<'a>(
        &'a self,
        views: &'a ViewRegistry,
        fetch: &'a mut FetchRecord,
        assignments: &'a JsonMap,
        is_new: bool,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move { self.set_post_inner(views, fetch, assignments, is_new).await })
    }

    async fn set_post_inner(
        &self,
        views: &ViewRegistry,
        fetch: &mut FetchRecord,
        assignments: &JsonMap,
        is_new: bool,
    ) -> Result<()> {
        match &self.kind {
            FieldKind::IsMemberOf(field) => {
                if !assignments.contains_key(&self.key) {
                    if is_new && self.required {
                        return Err(ApiError::bad_request(format!("{} is required", self.key)));
                    }
                    return Ok(());
                }
                if !(is_new && self.creatable) && !self.writable {
                    return Err(ApiError::Forbidden);
                }

                let desired = assigned_bool(assignments, &self.key)?.unwrap_or(false);
                let is_member = fetch.contains_value(&field.attr, &field.member_of_dn);
                if is_member == desired {
                    return Ok(());
                }

                let index = field
                    .foreign_index
                    .ok_or_else(|| ApiError::Config("field used before init".into()))?;
                let foreign = views.view_at(index);
                let mut modlist = Modlist::new();
                let op = if desired { ModOp::Add } else { ModOp::Delete };
                modlist.set(&field.foreign_field, op, vec![fetch.dn.clone()]);
                foreign.save_foreign_field(&field.member_of, &modlist).await?;

                if desired {
                    fetch.push_value(&field.attr, field.member_of_dn.clone());
                } else {
                    fetch.remove_value(&field.attr, &field.member_of_dn);
                }
                Ok(())
            }
            FieldKind::Initial(initial) => {
                if !is_new {
                    return Ok(());
                }
                if assignments.get(&self.key).map(truthy).unwrap_or(false) {
                    return Err(ApiError::bad_request(format!("Cannot assign {}", self.key)));
                }
                let mut forwarded = assignments.clone();
                forwarded.insert(initial.target.key.clone(), initial.value.clone());
                initial.target.set_post(views, fetch, &forwarded, is_new).await
            }
            _ => Ok(()),
        }
    }

    /// Static schema document served to clients.
    pub fn config_doc(&self) -> Value {
        let mut doc = json!({
            "key": self.key,
            "type": self.type_name(),
            "title": self.title,
            "required": self.required,
            "creatable": self.creatable,
            "readable": self.readable,
            "writable": self.writable,
            "hidden": self.hidden,
        });
        match &self.kind {
            FieldKind::Text(field) => {
                doc["field"] = json!(field.attr);
                doc["format"] = json!(field.format_js.clone().unwrap_or_else(|| field.format_src.clone()));
                if let Some(allowed) = &field.enum_values {
                    doc["enum"] = json!(allowed);
                }
            }
            FieldKind::DateTime(field) => {
                doc["field"] = json!(field.attr);
            }
            FieldKind::Password(field) => {
                doc["field"] = json!(field.attr);
                doc["autoGenerate"] = json!(field.auto_generate);
                doc["hashing"] = json!(field.hashing_name);
                doc["pwnedPasswordCheck"] = json!(field.pwned_check);
            }
            FieldKind::Generate(field) => {
                doc["field"] = json!(field.attr);
                doc["format"] = json!(field
                    .format_js
                    .clone()
                    .unwrap_or_else(|| field.template_src.clone()));
            }
            FieldKind::IsMemberOf(field) => {
                doc["field"] = json!(field.attr);
                doc["memberOf"] = json!(field.member_of);
                doc["foreignView"] = json!(field.foreign_view);
                doc["foreignField"] = json!(field.foreign_field);
            }
            FieldKind::ObjectClass(field) => {
                doc["objectClass"] = json!(field.class);
            }
            FieldKind::Initial(field) => {
                doc["value"] = field.value.clone();
                doc["target"] = field.target.config_doc();
            }
        }
        doc
    }

    fn type_name(&self) -> &'static str {
        match &self.kind {
            FieldKind::Text(_) => "text",
            FieldKind::DateTime(_) => "datetime",
            FieldKind::Password(_) => "password",
            FieldKind::Generate(_) => "generate",
            FieldKind::IsMemberOf(_) => "isMemberOf",
            FieldKind::ObjectClass(_) => "objectClass",
            FieldKind::Initial(_) => "initial",
        }
    }
}

/// JSON truthiness matching the permissive semantics of the API payloads.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn iso_to_generalized(value: &str) -> Option<String> {
    let parsed = DateTime::parse_from_rfc3339(value).ok()?;
    Some(parsed.with_timezone(&Utc).format(GENERALIZED_TIME).to_string())
}

fn generalized_to_iso(value: &str) -> Option<String> {
    let naive = NaiveDateTime::parse_from_str(value, GENERALIZED_TIME).ok()?;
    let utc: DateTime<Utc> = DateTime::from_naive_utc_and_offset(naive, Utc);
    Some(utc.to_rfc3339_opts(SecondsFormat::Secs, true))
}
