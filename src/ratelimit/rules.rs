//! Rate limit rule configuration.
//!
//! This module holds the raw, deserialized shape of a route's rate limit rules.
//! It mirrors Envoy's `RateLimit` configuration: each rule lists actions as
//! single-key mappings (a oneof) plus an optional stage, disable key and limit.
//! Nothing here is validated beyond what serde enforces; [`RateLimitPolicy`]
//! turns these into checked, evaluable entries.
//!
//! [`RateLimitPolicy`]: super::RateLimitPolicy

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use super::limit::TimeUnit;
use super::metadata::MetadataKey;
use crate::error::{PolicyError, Result};

/// The ordered rate limit rules configured for one route or virtual host.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Rules in declaration order
    #[serde(default)]
    pub rate_limits: Vec<RateLimitRuleConfig>,
}

/// One configured rate limit rule.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitRuleConfig {
    /// Evaluation stage (0 when omitted)
    #[serde(default)]
    pub stage: u64,
    /// Runtime key that can switch this rule off
    #[serde(default)]
    pub disable_key: Option<String>,
    /// Descriptor-producing actions, in descriptor order
    #[serde(default)]
    pub actions: Vec<ActionConfig>,
    /// Static limit and/or override
    #[serde(default)]
    pub limit: Option<LimitConfig>,
}

/// A single action. Exactly one field should be set.
///
/// Keys that do not name a known action kind land in `unknown` so that
/// construction can report them by name.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionConfig {
    #[serde(default)]
    pub source_cluster: Option<EmptyConfig>,
    #[serde(default)]
    pub destination_cluster: Option<EmptyConfig>,
    #[serde(default)]
    pub request_headers: Option<RequestHeadersConfig>,
    #[serde(default)]
    pub remote_address: Option<EmptyConfig>,
    #[serde(default)]
    pub generic_key: Option<GenericKeyConfig>,
    #[serde(default)]
    pub dynamic_metadata: Option<DynamicMetadataConfig>,
    #[serde(default)]
    pub header_value_match: Option<HeaderValueMatchConfig>,
    #[serde(flatten)]
    pub unknown: BTreeMap<String, Value>,
}

/// Body of actions that take no settings, written as `{}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmptyConfig {}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestHeadersConfig {
    pub header_name: String,
    pub descriptor_key: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenericKeyConfig {
    pub descriptor_value: String,
    /// Defaults to `generic_key`
    #[serde(default)]
    pub descriptor_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DynamicMetadataConfig {
    pub descriptor_key: String,
    pub metadata_key: MetadataKey,
    #[serde(default)]
    pub default_value: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeaderValueMatchConfig {
    pub descriptor_value: String,
    #[serde(default = "default_expect_match")]
    pub expect_match: bool,
    pub headers: Vec<HeaderMatcherConfig>,
}

fn default_expect_match() -> bool {
    true
}

/// A header matcher. Exactly one `*_match` specifier should be set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeaderMatcherConfig {
    pub name: String,
    #[serde(default)]
    pub exact_match: Option<String>,
    #[serde(default)]
    pub safe_regex_match: Option<RegexMatcherConfig>,
    #[serde(default)]
    pub range_match: Option<RangeMatchConfig>,
    #[serde(default)]
    pub present_match: Option<bool>,
    #[serde(default)]
    pub prefix_match: Option<String>,
    #[serde(default)]
    pub suffix_match: Option<String>,
    #[serde(default)]
    pub contains_match: Option<String>,
    #[serde(default)]
    pub invert_match: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegexMatcherConfig {
    pub regex: String,
}

/// Half-open integer range `[start, end)`.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RangeMatchConfig {
    pub start: i64,
    pub end: i64,
}

/// The `limit` block of a rule.
///
/// A static limit needs both `requests_per_unit` and `unit`. Keys other than
/// the known override kinds land in `unknown`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LimitConfig {
    #[serde(default)]
    pub requests_per_unit: Option<u32>,
    #[serde(default)]
    pub unit: Option<TimeUnit>,
    #[serde(default)]
    pub dynamic_metadata: Option<DynamicMetadataOverrideConfig>,
    #[serde(flatten)]
    pub unknown: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DynamicMetadataOverrideConfig {
    pub metadata_key: MetadataKey,
}

impl RateLimitConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML (or JSON) string.
    ///
    /// Accepts either a bare list of rules or a mapping with a `rate_limits` key.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let document: serde_yaml::Value = serde_yaml::from_str(yaml).map_err(parse_error)?;

        match document {
            serde_yaml::Value::Null => Ok(Self::new()),
            serde_yaml::Value::Sequence(_) => {
                let rate_limits = serde_yaml::from_value(document).map_err(parse_error)?;
                Ok(Self { rate_limits })
            }
            _ => serde_yaml::from_value(document).map_err(parse_error),
        }
    }
}

fn parse_error(e: serde_yaml::Error) -> PolicyError {
    PolicyError::Config(format!("Failed to parse rate limit rules: {}", e))
}
