//! Dynamic metadata addressing.

use serde::Deserialize;
use serde_json::Value;
use std::fmt;

use super::context::RequestContext;

/// Location of a value in request dynamic metadata.
///
/// `key` names the filter namespace; `path` walks nested objects below it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetadataKey {
    /// Filter namespace, e.g. `envoy.filters.http.lua`
    pub key: String,
    /// Nested object keys below the namespace
    pub path: Vec<PathSegment>,
}

/// One step of a [`MetadataKey`] path.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathSegment {
    pub key: String,
}

impl MetadataKey {
    pub fn new<I, S>(namespace: impl Into<String>, path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key: namespace.into(),
            path: path
                .into_iter()
                .map(|key| PathSegment { key: key.into() })
                .collect(),
        }
    }

    /// Check the key addresses something, returning a reason when it cannot.
    pub(crate) fn validate(&self) -> std::result::Result<(), &'static str> {
        if self.key.is_empty() {
            return Err("metadata namespace must not be empty");
        }
        if self.path.is_empty() {
            return Err("metadata path must have at least one segment");
        }
        if self.path.iter().any(|segment| segment.key.is_empty()) {
            return Err("metadata path segments must not be empty");
        }
        Ok(())
    }

    /// Look up the addressed value in the request's dynamic metadata.
    pub fn lookup<'a, C: RequestContext + ?Sized>(&self, ctx: &'a C) -> Option<&'a Value> {
        let mut value = ctx.dynamic_metadata(&self.key)?;
        for segment in &self.path {
            value = value.as_object()?.get(&segment.key)?;
        }
        Some(value)
    }
}

impl fmt::Display for MetadataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)?;
        for segment in &self.path {
            write!(f, ".{}", segment.key)?;
        }
        Ok(())
    }
}
