//! Resource reference parsing (`name` or `namespace/name`).
//!
//! Every cross-resource pointer in an Agent spec (model config, tool servers,
//! nested agents, memories) is a plain string resolved here against the
//! referring object's namespace.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Maximum length of a DNS-1123 subdomain.
const MAX_SUBDOMAIN_LEN: usize = 253;

/// A fully-qualified namespaced name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    pub namespace: String,
    pub name: String,
}

impl ObjectRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReferenceError {
    #[error("reference is empty")]
    Empty,
    #[error("reference '{0}' contains whitespace")]
    Whitespace(String),
    #[error("reference '{0}' has more than one '/' separator")]
    TooManySegments(String),
    #[error("reference '{reference}' has an empty {segment}")]
    EmptySegment {
        reference: String,
        segment: &'static str,
    },
    #[error("invalid {segment} '{value}' in reference '{reference}': {reason}")]
    InvalidName {
        reference: String,
        segment: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Resolve `reference` against `default_namespace`.
///
/// `"name"` resolves to `{default_namespace, name}` and `"ns/name"` to
/// `{ns, name}`. Invalid input always fails; it never falls back to a default.
pub fn resolve(reference: &str, default_namespace: &str) -> Result<ObjectRef, ReferenceError> {
    if reference.is_empty() {
        return Err(ReferenceError::Empty);
    }
    if reference.chars().any(char::is_whitespace) {
        return Err(ReferenceError::Whitespace(reference.to_string()));
    }
    let mut parts = reference.split('/');
    let (namespace, name) = match (parts.next(), parts.next(), parts.next()) {
        (Some(name), None, _) => (default_namespace, name),
        (Some(ns), Some(name), None) => {
            if ns.is_empty() {
                return Err(ReferenceError::EmptySegment {
                    reference: reference.to_string(),
                    segment: "namespace",
                });
            }
            (ns, name)
        }
        _ => return Err(ReferenceError::TooManySegments(reference.to_string())),
    };
    if name.is_empty() {
        return Err(ReferenceError::EmptySegment {
            reference: reference.to_string(),
            segment: "name",
        });
    }
    validate_subdomain(reference, "namespace", namespace)?;
    validate_subdomain(reference, "name", name)?;
    Ok(ObjectRef::new(namespace, name))
}

fn validate_subdomain(
    reference: &str,
    segment: &'static str,
    value: &str,
) -> Result<(), ReferenceError> {
    let invalid = |reason: &'static str| ReferenceError::InvalidName {
        reference: reference.to_string(),
        segment,
        value: value.to_string(),
        reason,
    };
    if value.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if value.len() > MAX_SUBDOMAIN_LEN {
        return Err(invalid("must be at most 253 characters"));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
    {
        return Err(invalid(
            "must consist of lower case alphanumeric characters, '-' or '.'",
        ));
    }
    let alnum = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
    let first = value.chars().next().is_some_and(alnum);
    let last = value.chars().last().is_some_and(alnum);
    if !first || !last {
        return Err(invalid("must start and end with an alphanumeric character"));
    }
    Ok(())
}
