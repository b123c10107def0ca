//! Rate limit actions.
//!
//! An action inspects one attribute of the request and either contributes a
//! single [`DescriptorEntry`] or nothing. Actions hold only static
//! configuration, so one policy can be evaluated by many requests at once.

use serde_json::Value;

use super::context::RequestContext;
use super::descriptor::DescriptorEntry;
use super::matcher::{match_all, HeaderMatcher};
use super::metadata::MetadataKey;
use super::rules::{
    ActionConfig, DynamicMetadataConfig, GenericKeyConfig, HeaderValueMatchConfig,
    RequestHeadersConfig,
};
use crate::error::{PolicyError, Result};

const SOURCE_CLUSTER_KEY: &str = "source_cluster";
const DESTINATION_CLUSTER_KEY: &str = "destination_cluster";
const REMOTE_ADDRESS_KEY: &str = "remote_address";
const GENERIC_KEY_KEY: &str = "generic_key";
const HEADER_MATCH_KEY: &str = "header_match";

/// A descriptor-producing action.
#[derive(Debug, Clone)]
pub enum Action {
    /// `("source_cluster", <local service cluster>)`
    SourceCluster,
    /// `("destination_cluster", <routed upstream cluster>)`
    DestinationCluster,
    /// `(descriptor_key, <value of header_name>)`
    RequestHeaders {
        header_name: String,
        descriptor_key: String,
    },
    /// `("remote_address", <downstream peer IP>)`
    RemoteAddress,
    /// `(descriptor_key, descriptor_value)`, both static
    GenericKey {
        descriptor_key: String,
        descriptor_value: String,
    },
    /// `(descriptor_key, <string at metadata_key>)`, or `default_value`
    DynamicMetadata {
        descriptor_key: String,
        metadata_key: MetadataKey,
        default_value: Option<String>,
    },
    /// `("header_match", descriptor_value)` when the header conjunction
    /// evaluates to `expect_match`
    HeaderValueMatch {
        descriptor_value: String,
        expect_match: bool,
        headers: Vec<HeaderMatcher>,
    },
}

impl Action {
    /// Short name of this action's kind, as written in configuration.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::SourceCluster => "source_cluster",
            Action::DestinationCluster => "destination_cluster",
            Action::RequestHeaders { .. } => "request_headers",
            Action::RemoteAddress => "remote_address",
            Action::GenericKey { .. } => "generic_key",
            Action::DynamicMetadata { .. } => "dynamic_metadata",
            Action::HeaderValueMatch { .. } => "header_value_match",
        }
    }

    /// Evaluate against a request. `None` means the action has nothing to add.
    pub fn evaluate<C: RequestContext + ?Sized>(&self, ctx: &C) -> Option<DescriptorEntry> {
        match self {
            Action::SourceCluster => Some(DescriptorEntry::new(
                SOURCE_CLUSTER_KEY,
                ctx.local_service_cluster(),
            )),
            Action::DestinationCluster => ctx
                .route_cluster()
                .map(|cluster| DescriptorEntry::new(DESTINATION_CLUSTER_KEY, cluster)),
            Action::RequestHeaders {
                header_name,
                descriptor_key,
            } => ctx
                .header(header_name)
                .map(|value| DescriptorEntry::new(descriptor_key.as_str(), value)),
            Action::RemoteAddress => ctx
                .remote_address()
                .map(|ip| DescriptorEntry::new(REMOTE_ADDRESS_KEY, ip.to_string())),
            Action::GenericKey {
                descriptor_key,
                descriptor_value,
            } => Some(DescriptorEntry::new(
                descriptor_key.as_str(),
                descriptor_value.as_str(),
            )),
            Action::DynamicMetadata {
                descriptor_key,
                metadata_key,
                default_value,
            } => {
                let value = metadata_key
                    .lookup(ctx)
                    .and_then(Value::as_str)
                    .filter(|v| !v.is_empty())
                    .or_else(|| default_value.as_deref().filter(|v| !v.is_empty()))?;
                Some(DescriptorEntry::new(descriptor_key.as_str(), value))
            }
            Action::HeaderValueMatch {
                descriptor_value,
                expect_match,
                headers,
            } => (match_all(headers, ctx) == *expect_match)
                .then(|| DescriptorEntry::new(HEADER_MATCH_KEY, descriptor_value.as_str())),
        }
    }

    /// Build an action from its configuration.
    ///
    /// `rule` and `index` locate the action in errors.
    pub(crate) fn from_config(rule: usize, index: usize, config: &ActionConfig) -> Result<Self> {
        if let Some(kind) = config.unknown.keys().next() {
            return Err(PolicyError::UnsupportedAction {
                rule,
                action: index,
                kind: kind.clone(),
            });
        }

        let field = format!("actions[{index}]");
        let ActionConfig {
            source_cluster,
            destination_cluster,
            request_headers,
            remote_address,
            generic_key,
            dynamic_metadata,
            header_value_match,
            unknown: _,
        } = config;

        let mut built = Vec::with_capacity(1);
        if source_cluster.is_some() {
            built.push(Action::SourceCluster);
        }
        if destination_cluster.is_some() {
            built.push(Action::DestinationCluster);
        }
        if let Some(c) = request_headers {
            built.push(Self::request_headers(rule, &field, c)?);
        }
        if remote_address.is_some() {
            built.push(Action::RemoteAddress);
        }
        if let Some(c) = generic_key {
            built.push(Self::generic_key(rule, &field, c)?);
        }
        if let Some(c) = dynamic_metadata {
            built.push(Self::dynamic_metadata(rule, &field, c)?);
        }
        if let Some(c) = header_value_match {
            built.push(Self::header_value_match(rule, &field, c)?);
        }

        match built.len() {
            1 => Ok(built.remove(0)),
            n => Err(PolicyError::invalid(
                rule,
                field,
                format!("exactly one action kind must be set, found {n}"),
            )),
        }
    }

    fn request_headers(rule: usize, field: &str, c: &RequestHeadersConfig) -> Result<Self> {
        require_non_empty(rule, field, "request_headers.header_name", &c.header_name)?;
        require_non_empty(rule, field, "request_headers.descriptor_key", &c.descriptor_key)?;
        Ok(Action::RequestHeaders {
            header_name: c.header_name.clone(),
            descriptor_key: c.descriptor_key.clone(),
        })
    }

    fn generic_key(rule: usize, field: &str, c: &GenericKeyConfig) -> Result<Self> {
        require_non_empty(rule, field, "generic_key.descriptor_value", &c.descriptor_value)?;
        let descriptor_key = match &c.descriptor_key {
            Some(key) => {
                require_non_empty(rule, field, "generic_key.descriptor_key", key)?;
                key.clone()
            }
            None => GENERIC_KEY_KEY.to_string(),
        };
        Ok(Action::GenericKey {
            descriptor_key,
            descriptor_value: c.descriptor_value.clone(),
        })
    }

    fn dynamic_metadata(rule: usize, field: &str, c: &DynamicMetadataConfig) -> Result<Self> {
        require_non_empty(rule, field, "dynamic_metadata.descriptor_key", &c.descriptor_key)?;
        c.metadata_key.validate().map_err(|reason| {
            PolicyError::invalid(rule, format!("{field}.dynamic_metadata.metadata_key"), reason)
        })?;
        Ok(Action::DynamicMetadata {
            descriptor_key: c.descriptor_key.clone(),
            metadata_key: c.metadata_key.clone(),
            default_value: c.default_value.clone(),
        })
    }

    fn header_value_match(rule: usize, field: &str, c: &HeaderValueMatchConfig) -> Result<Self> {
        require_non_empty(rule, field, "header_value_match.descriptor_value", &c.descriptor_value)?;
        if c.headers.is_empty() {
            return Err(PolicyError::invalid(
                rule,
                format!("{field}.header_value_match.headers"),
                "at least one header matcher is required",
            ));
        }
        let headers = c
            .headers
            .iter()
            .enumerate()
            .map(|(i, m)| {
                HeaderMatcher::from_config(
                    rule,
                    &format!("{field}.header_value_match.headers[{i}]"),
                    m,
                )
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Action::HeaderValueMatch {
            descriptor_value: c.descriptor_value.clone(),
            expect_match: c.expect_match,
            headers,
        })
    }
}

fn require_non_empty(rule: usize, field: &str, name: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(PolicyError::invalid(rule, format!("{field}.{name}"), "must not be empty"));
    }
    Ok(())
}
