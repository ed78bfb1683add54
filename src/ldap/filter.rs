//! LDAP filter building utilities.

use crate::ldap::dn::escape_filter_value;
use std::fmt;

/// Represents an LDAP search filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LdapFilter {
    /// Equality match: (attr=value)
    Equals(String, String),
    /// Presence check: (attr=*)
    Present(String),
    /// Conjunction: (&(filter1)(filter2)...)
    And(Vec<LdapFilter>),
    /// Disjunction: (|(filter1)(filter2)...)
    Or(Vec<LdapFilter>),
    /// Negation: (!(filter))
    Not(Box<LdapFilter>),
}

impl LdapFilter {
    /// Creates an equality filter: (attr=value)
    pub fn eq(attr: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Equals(attr.into(), value.into())
    }

    /// Creates a presence filter: (attr=*)
    pub fn present(attr: impl Into<String>) -> Self {
        Self::Present(attr.into())
    }

    /// Creates a conjunction: (&(filter1)(filter2)...)
    pub fn and(filters: Vec<LdapFilter>) -> Self {
        Self::And(filters)
    }

    /// Conjunction of objectClass equality matches, the list filter of a view.
    pub fn object_classes<I, S>(classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::And(
            classes
                .into_iter()
                .map(|cls| Self::eq("objectClass", cls))
                .collect(),
        )
    }

    /// Appends a clause to an existing conjunction, wrapping other shapes.
    pub fn also(self, clause: LdapFilter) -> Self {
        match self {
            LdapFilter::And(mut filters) => {
                filters.push(clause);
                LdapFilter::And(filters)
            }
            other => LdapFilter::And(vec![other, clause]),
        }
    }
}

impl fmt::Display for LdapFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LdapFilter::Equals(attr, value) => {
                write!(f, "({}={})", attr, escape_filter_value(value))
            }
            LdapFilter::Present(attr) => write!(f, "({}=*)", attr),
            LdapFilter::And(filters) => {
                write!(f, "(&")?;
                for filter in filters {
                    write!(f, "{}", filter)?;
                }
                write!(f, ")")
            }
            LdapFilter::Or(filters) => {
                write!(f, "(|")?;
                for filter in filters {
                    write!(f, "{}", filter)?;
                }
                write!(f, ")")
            }
            LdapFilter::Not(inner) => write!(f, "(!{})", inner),
        }
    }
}
