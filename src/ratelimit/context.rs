//! Read-only view of an in-flight request.
//!
//! Actions and overrides only ever read from a [`RequestContext`]. The trait is
//! the seam to whatever owns header and metadata storage; [`RequestAttributes`]
//! is a self-contained implementation used by the CLI and in tests.

use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;

/// Request attributes consumed by rate limit actions.
pub trait RequestContext {
    /// First value of the named request header. Names compare case-insensitively.
    fn header(&self, name: &str) -> Option<&str>;

    /// Dynamic metadata stored under a filter namespace.
    fn dynamic_metadata(&self, namespace: &str) -> Option<&Value>;

    /// Cluster name of the local service.
    fn local_service_cluster(&self) -> &str;

    /// Upstream cluster chosen by routing, if routing has resolved.
    fn route_cluster(&self) -> Option<&str>;

    /// Address of the downstream peer, if it has one.
    fn remote_address(&self) -> Option<IpAddr>;

    /// Whether a runtime feature flag is enabled. Unknown flags are enabled.
    fn runtime_feature_enabled(&self, _key: &str) -> bool {
        true
    }
}

/// Owned request attributes.
///
/// Deserializes from YAML or JSON:
///
/// ```yaml
/// local_cluster: ingress
/// route_cluster: backend
/// remote_address: 10.0.0.5
/// headers:
///   x-user: alice
/// dynamic_metadata:
///   envoy.filters.http.lua:
///     plan: gold
/// runtime:
///   ratelimit.api.http_filter_enabled: false
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestAttributes {
    /// Local service cluster name
    #[serde(default)]
    pub local_cluster: String,
    /// Upstream cluster selected by routing
    #[serde(default)]
    pub route_cluster: Option<String>,
    /// Downstream peer IP
    #[serde(default)]
    pub remote_address: Option<IpAddr>,
    /// Request headers, first match wins on lookup
    #[serde(default, deserialize_with = "header_list")]
    pub headers: Vec<(String, String)>,
    /// Dynamic metadata keyed by filter namespace
    #[serde(default)]
    pub dynamic_metadata: HashMap<String, Value>,
    /// Runtime feature flags
    #[serde(default)]
    pub runtime: HashMap<String, bool>,
}

impl RequestAttributes {
    pub fn new(local_cluster: impl Into<String>) -> Self {
        Self {
            local_cluster: local_cluster.into(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_route_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.route_cluster = Some(cluster.into());
        self
    }

    pub fn with_remote_address(mut self, addr: IpAddr) -> Self {
        self.remote_address = Some(addr);
        self
    }

    pub fn with_metadata(mut self, namespace: impl Into<String>, value: Value) -> Self {
        self.dynamic_metadata.insert(namespace.into(), value);
        self
    }

    pub fn with_runtime_flag(mut self, key: impl Into<String>, enabled: bool) -> Self {
        self.runtime.insert(key.into(), enabled);
        self
    }
}

impl RequestContext for RequestAttributes {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn dynamic_metadata(&self, namespace: &str) -> Option<&Value> {
        self.dynamic_metadata.get(namespace)
    }

    fn local_service_cluster(&self) -> &str {
        &self.local_cluster
    }

    fn route_cluster(&self) -> Option<&str> {
        self.route_cluster.as_deref()
    }

    fn remote_address(&self) -> Option<IpAddr> {
        self.remote_address
    }

    fn runtime_feature_enabled(&self, key: &str) -> bool {
        self.runtime.get(key).copied().unwrap_or(true)
    }
}

// Headers are written as a mapping in config files but kept as an ordered list.
fn header_list<'de, D>(deserializer: D) -> Result<Vec<(String, String)>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let map = BTreeMap::<String, String>::deserialize(deserializer)?;
    Ok(map.into_iter().collect())
}
