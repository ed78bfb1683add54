//! Directory operation data structures.
//!
//! Entries, write plans (addlist/modlist), and the request-local fetch
//! record that threads through the view lifecycle.

use std::collections::btree_map;
use std::collections::BTreeMap;

/// A directory entry with its DN and attribute multimap.
///
/// Value order within an attribute is preserved; equality comparisons in
/// the view engine depend on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub dn: String,
    pub values: BTreeMap<String, Vec<String>>,
}

impl Entry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn with_attribute(
        mut self,
        name: impl Into<String>,
        values: Vec<impl Into<String>>,
    ) -> Self {
        self.values
            .insert(name.into(), values.into_iter().map(|v| v.into()).collect());
        self
    }

    /// First value of an attribute, if any.
    pub fn first(&self, attr: &str) -> Option<&str> {
        self.values.get(attr).and_then(|v| v.first()).map(|s| s.as_str())
    }
}

/// Search scope for directory queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    /// Only the base object.
    Base,
    /// Immediate children of the base.
    One,
    /// The entire subtree.
    Sub,
}

impl From<SearchScope> for ldap3::Scope {
    fn from(scope: SearchScope) -> Self {
        match scope {
            SearchScope::Base => ldap3::Scope::Base,
            SearchScope::One => ldap3::Scope::OneLevel,
            SearchScope::Sub => ldap3::Scope::Subtree,
        }
    }
}

/// A modification op on a single attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModOp {
    Add,
    Delete,
    Replace,
    Increment,
}

/// Attribute values destined for an `add` operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Addlist(pub BTreeMap<String, Vec<String>>);

impl Addlist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, attr: impl Into<String>, values: Vec<String>) {
        self.0.insert(attr.into(), values);
    }

    pub fn contains(&self, attr: &str) -> bool {
        self.0.contains_key(attr)
    }

    /// Appends to an attribute, creating it when absent.
    pub fn extend(&mut self, attr: &str, values: Vec<String>) {
        self.0.entry(attr.to_string()).or_default().extend(values);
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Vec<String>> {
        self.0.iter()
    }
}

/// An ordered write plan for a `modify` operation.
///
/// Per attribute, ops apply left to right; a DELETE with no values removes
/// the attribute entirely. Relationship flips rely on DELETE preceding ADD.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Modlist(pub BTreeMap<String, Vec<(ModOp, Vec<String>)>>);

impl Modlist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any pending ops for `attr` with a single op.
    pub fn set(&mut self, attr: impl Into<String>, op: ModOp, values: Vec<String>) {
        self.0.insert(attr.into(), vec![(op, values)]);
    }

    /// Appends an op after whatever is already queued for `attr`.
    pub fn push(&mut self, attr: impl Into<String>, op: ModOp, values: Vec<String>) {
        self.0.entry(attr.into()).or_default().push((op, values));
    }

    pub fn contains(&self, attr: &str) -> bool {
        self.0.contains_key(attr)
    }

    pub fn get(&self, attr: &str) -> Option<&Vec<(ModOp, Vec<String>)>> {
        self.0.get(attr)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Vec<(ModOp, Vec<String>)>> {
        self.0.iter()
    }

    /// Converts to ldap3 Mod entries, preserving per-attribute op order.
    pub(crate) fn to_ldap3_mods(&self) -> Vec<ldap3::Mod<String>> {
        let mut mods = Vec::new();
        for (attr, ops) in self.iter() {
            for (op, values) in ops {
                let vals: std::collections::HashSet<String> = values.iter().cloned().collect();
                mods.push(match op {
                    ModOp::Add => ldap3::Mod::Add(attr.clone(), vals),
                    ModOp::Delete => ldap3::Mod::Delete(attr.clone(), vals),
                    ModOp::Replace => ldap3::Mod::Replace(attr.clone(), vals),
                    ModOp::Increment => ldap3::Mod::Increment(
                        attr.clone(),
                        values.first().cloned().unwrap_or_else(|| "1".to_string()),
                    ),
                });
            }
        }
        mods
    }
}

/// Request-local snapshot of one entry's state.
///
/// The engine reads from it during a request and rolls it forward after
/// each flushed write, so later lifecycle phases observe post-write state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRecord {
    pub dn: String,
    pub values: BTreeMap<String, Vec<String>>,
}

impl FetchRecord {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn from_entry(entry: Entry) -> Self {
        Self {
            dn: entry.dn,
            values: entry.values,
        }
    }

    pub fn first(&self, attr: &str) -> Option<&str> {
        self.values.get(attr).and_then(|v| v.first()).map(|s| s.as_str())
    }

    pub fn contains_attr(&self, attr: &str) -> bool {
        self.values.contains_key(attr)
    }

    pub fn contains_value(&self, attr: &str, value: &str) -> bool {
        self.values
            .get(attr)
            .map(|vals| vals.iter().any(|v| v == value))
            .unwrap_or(false)
    }

    /// Overwrites the cached values of `attr`.
    pub fn set_values(&mut self, attr: &str, values: Vec<String>) {
        self.values.insert(attr.to_string(), values);
    }

    pub fn push_value(&mut self, attr: &str, value: String) {
        self.values.entry(attr.to_string()).or_default().push(value);
    }

    pub fn remove_value(&mut self, attr: &str, value: &str) {
        if let Some(vals) = self.values.get_mut(attr) {
            vals.retain(|v| v != value);
        }
    }
}
