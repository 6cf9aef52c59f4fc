//! Identifiers, namespaces, and attribute values shared across the model.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Registry-assigned module identifier.
///
/// Ids are dense and increase with installation order; the resolver uses
/// "lower id wins" as the final tie-break when ordering candidates, so ids
/// double as a stable installation timestamp.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ModuleId(pub u64);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The namespace a capability or requirement lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    /// Whole-module capabilities, matched by `require` style requirements.
    Module,
    /// Exported/imported packages.
    Package,
    /// Host slots that fragments attach to.
    Host,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Module => "module",
            Namespace::Package => "package",
            Namespace::Host => "host",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An attribute value on a capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Str(String),
    Version(semver::Version),
    Bool(bool),
    Int(i64),
    /// Multi-valued attribute; filter equality means membership.
    List(Vec<String>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_version(&self) -> Option<&semver::Version> {
        match self {
            Value::Version(v) => Some(v),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<semver::Version> for Value {
    fn from(v: semver::Version) -> Self {
        Value::Version(v)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            Value::Version(v) => write!(f, "{v}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::List(items) => f.write_str(&items.join(",")),
        }
    }
}

/// Parse a version string, defaulting the patch (and minor) component to
/// zero so `"1"` and `"1.2"` are accepted alongside full `"1.2.3"` triples.
pub fn parse_version(version: &str) -> crate::Result<semver::Version> {
    let normalized = match version.split('.').count() {
        1 => format!("{version}.0.0"),
        2 => format!("{version}.0"),
        _ => version.to_string(),
    };
    normalized
        .parse()
        .map_err(|e: semver::Error| crate::Error::InvalidVersion {
            version: version.to_string(),
            reason: e.to_string(),
        })
}
