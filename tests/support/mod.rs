//! In-memory directory used by the engine tests.
//!
//! Mimics the behavior the engine depends on: BASE/ONE searches with
//! objectClass (and mail) filters, modlist application, a memberOf
//! overlay maintained from `member` writes, `modifyTimestamp` stamping,
//! and password binds against hashed userPassword values. Every
//! operation is recorded so tests can assert on the issued traffic.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use dirview::crypto::verify_password;
use dirview::errors::{DirResult, DirectoryError};
use dirview::ldap::{Addlist, Directory, Entry, ModOp, Modlist, SearchScope};
use dirview::pwned::PasswordOracle;

type Attrs = BTreeMap<String, Vec<String>>;

/// One recorded gateway call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Add(String),
    Modify(String),
    Delete(String),
    Search { base: String, attrs: Vec<String> },
    Bind(String),
}

#[derive(Default)]
struct Inner {
    data: BTreeMap<String, Attrs>,
    log: Vec<Op>,
    clock: u64,
}

#[derive(Default)]
pub struct MemoryDirectory {
    inner: Mutex<Inner>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> Vec<Op> {
        self.inner.lock().unwrap().log.clone()
    }

    pub fn modify_count(&self) -> usize {
        self.log().iter().filter(|op| matches!(op, Op::Modify(_))).count()
    }

    pub fn entry(&self, dn: &str) -> Option<Attrs> {
        self.inner.lock().unwrap().data.get(dn).cloned()
    }

    fn stamp(inner: &mut Inner, dn: &str) {
        inner.clock += 1;
        let stamp = format!("20240101{:06}Z", inner.clock);
        if let Some(entry) = inner.data.get_mut(dn) {
            entry.insert("modifyTimestamp".to_string(), vec![stamp]);
        }
    }

    fn add_back_ref(inner: &mut Inner, member_dn: &str, group_dn: &str) {
        if let Some(target) = inner.data.get_mut(member_dn) {
            let refs = target.entry("memberOf".to_string()).or_default();
            if !refs.iter().any(|r| r == group_dn) {
                refs.push(group_dn.to_string());
            }
        }
    }

    fn remove_back_ref(inner: &mut Inner, member_dn: &str, group_dn: &str) {
        if let Some(target) = inner.data.get_mut(member_dn) {
            if let Some(refs) = target.get_mut("memberOf") {
                refs.retain(|r| r != group_dn);
                if refs.is_empty() {
                    target.remove("memberOf");
                }
            }
        }
    }

    fn matches_filter(attrs: &Attrs, filter: &str) -> bool {
        if filter == "(objectClass=*)" {
            return true;
        }
        // Conjunctions of equality clauses, the only shape the engine
        // emits: (&(objectClass=a)(objectClass=b)(mail=x))
        let Some(body) = filter.strip_prefix("(&").and_then(|f| f.strip_suffix(')')) else {
            return false;
        };
        for clause in body.trim_start_matches('(').trim_end_matches(')').split(")(") {
            let Some((attr, value)) = clause.split_once('=') else {
                return false;
            };
            let present = attrs
                .get(attr)
                .map(|values| values.iter().any(|v| v == value))
                .unwrap_or(false);
            if !present {
                return false;
            }
        }
        true
    }

    fn project(attrs: &Attrs, selection: &[String]) -> Attrs {
        if selection.is_empty() {
            return attrs.clone();
        }
        selection
            .iter()
            .filter_map(|attr| attrs.get(attr).map(|values| (attr.clone(), values.clone())))
            .collect()
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn add(&self, dn: &str, addlist: &Addlist) -> DirResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.log.push(Op::Add(dn.to_string()));
        if inner.data.contains_key(dn) {
            return Err(DirectoryError::Conflict);
        }
        let attrs: Attrs = addlist
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(members) = attrs.get("member").cloned() {
            for member_dn in &members {
                Self::add_back_ref(&mut inner, member_dn, dn);
            }
        }
        inner.data.insert(dn.to_string(), attrs);
        Self::stamp(&mut inner, dn);
        Ok(())
    }

    async fn search(
        &self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attrs: &[String],
    ) -> DirResult<Vec<Entry>> {
        let mut inner = self.inner.lock().unwrap();
        inner.log.push(Op::Search {
            base: base.to_string(),
            attrs: attrs.to_vec(),
        });

        match scope {
            SearchScope::Base => {
                let entry = inner.data.get(base).ok_or(DirectoryError::NotFound)?;
                if !Self::matches_filter(entry, filter) {
                    return Ok(vec![]);
                }
                Ok(vec![Entry {
                    dn: base.to_string(),
                    values: Self::project(entry, attrs),
                }])
            }
            SearchScope::One | SearchScope::Sub => {
                let suffix = format!(",{}", base);
                let mut results = Vec::new();
                for (dn, entry) in inner.data.iter() {
                    if !dn.ends_with(&suffix) {
                        continue;
                    }
                    if scope == SearchScope::One && dn[..dn.len() - suffix.len()].contains(',') {
                        continue;
                    }
                    if Self::matches_filter(entry, filter) {
                        results.push(Entry {
                            dn: dn.clone(),
                            values: Self::project(entry, attrs),
                        });
                    }
                }
                Ok(results)
            }
        }
    }

    async fn modify(&self, dn: &str, modlist: &Modlist) -> DirResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.log.push(Op::Modify(dn.to_string()));
        if !inner.data.contains_key(dn) {
            return Err(DirectoryError::NotFound);
        }

        for (attr, ops) in modlist.iter() {
            for (op, values) in ops {
                match op {
                    ModOp::Add => {
                        if attr == "member" {
                            for member_dn in values {
                                Self::add_back_ref(&mut inner, member_dn, dn);
                            }
                        }
                        let entry = inner.data.get_mut(dn).unwrap();
                        entry.entry(attr.clone()).or_default().extend(values.iter().cloned());
                    }
                    ModOp::Delete => {
                        if values.is_empty() {
                            if attr == "member" {
                                let members = inner
                                    .data
                                    .get(dn)
                                    .and_then(|e| e.get("member"))
                                    .cloned()
                                    .unwrap_or_default();
                                for member_dn in &members {
                                    Self::remove_back_ref(&mut inner, member_dn, dn);
                                }
                            }
                            inner.data.get_mut(dn).unwrap().remove(attr);
                        } else {
                            if attr == "member" {
                                for member_dn in values {
                                    Self::remove_back_ref(&mut inner, member_dn, dn);
                                }
                            }
                            let entry = inner.data.get_mut(dn).unwrap();
                            if let Some(current) = entry.get_mut(attr) {
                                current.retain(|v| !values.contains(v));
                                if current.is_empty() {
                                    entry.remove(attr);
                                }
                            }
                        }
                    }
                    ModOp::Replace => {
                        if attr == "member" {
                            let old = inner
                                .data
                                .get(dn)
                                .and_then(|e| e.get("member"))
                                .cloned()
                                .unwrap_or_default();
                            for member_dn in &old {
                                Self::remove_back_ref(&mut inner, member_dn, dn);
                            }
                            for member_dn in values {
                                Self::add_back_ref(&mut inner, member_dn, dn);
                            }
                        }
                        let entry = inner.data.get_mut(dn).unwrap();
                        if values.is_empty() {
                            entry.remove(attr);
                        } else {
                            entry.insert(attr.clone(), values.clone());
                        }
                    }
                    ModOp::Increment => {
                        let entry = inner.data.get_mut(dn).unwrap();
                        let current = entry.entry(attr.clone()).or_insert_with(|| vec!["0".into()]);
                        if let Some(first) = current.first_mut() {
                            let value: i64 = first.parse().unwrap_or(0);
                            *first = (value + 1).to_string();
                        }
                    }
                }
            }
        }
        Self::stamp(&mut inner, dn);
        Ok(())
    }

    async fn delete(&self, dn: &str) -> DirResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.log.push(Op::Delete(dn.to_string()));
        let Some(entry) = inner.data.remove(dn) else {
            return Err(DirectoryError::NotFound);
        };
        if let Some(members) = entry.get("member") {
            let members = members.clone();
            for member_dn in &members {
                Self::remove_back_ref(&mut inner, member_dn, dn);
            }
        }
        Ok(())
    }

    async fn bind(&self, dn: &str, password: &str) -> DirResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.log.push(Op::Bind(dn.to_string()));
        if password.is_empty() {
            return Err(DirectoryError::InvalidCredentials);
        }
        let hashes = inner
            .data
            .get(dn)
            .and_then(|entry| entry.get("userPassword"))
            .cloned()
            .ok_or(DirectoryError::InvalidCredentials)?;
        let verified = hashes
            .iter()
            .any(|hash| verify_password(password, hash).unwrap_or(false));
        if verified {
            Ok(())
        } else {
            Err(DirectoryError::InvalidCredentials)
        }
    }
}

/// Breach oracle stub: a fixed denylist instead of the HTTP range API.
pub struct StubOracle {
    pub breached: Vec<String>,
}

#[async_trait]
impl PasswordOracle for StubOracle {
    async fn breach_count(&self, password: &str) -> dirview::errors::Result<u64> {
        Ok(if self.breached.iter().any(|p| p == password) {
            1000
        } else {
            0
        })
    }
}
