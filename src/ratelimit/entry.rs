//! A single configured rate limit rule.

use tracing::{debug, trace};

use super::action::Action;
use super::context::RequestContext;
use super::descriptor::{Descriptor, PolicyDescriptor};
use super::limit::{Limit, LimitOverride, LimitSpec};
use super::rules::RateLimitRuleConfig;
use crate::error::{PolicyError, Result};

/// Highest stage number a rule may use.
pub const MAX_STAGE_NUMBER: u64 = 10;

/// One rate limit rule: ordered actions, a stage, an optional disable key and
/// an optional limit.
///
/// Evaluates to at most one descriptor per request. The descriptor is only
/// produced when every action contributes an entry.
#[derive(Debug, Clone)]
pub struct RateLimitPolicyEntry {
    actions: Vec<Action>,
    stage: u64,
    disable_key: Option<String>,
    disable_runtime_key: Option<String>,
    limit: LimitSpec,
}

impl RateLimitPolicyEntry {
    /// Build and validate an entry. `rule` is the entry's position in the
    /// configuration and is used in errors.
    pub fn from_config(rule: usize, config: &RateLimitRuleConfig) -> Result<Self> {
        if config.stage > MAX_STAGE_NUMBER {
            return Err(PolicyError::StageOutOfRange {
                rule,
                stage: config.stage,
                max: MAX_STAGE_NUMBER,
            });
        }

        if config.actions.is_empty() {
            return Err(PolicyError::invalid(rule, "actions", "at least one action is required"));
        }

        let actions = config
            .actions
            .iter()
            .enumerate()
            .map(|(index, action)| Action::from_config(rule, index, action))
            .collect::<Result<Vec<_>>>()?;

        if let Some(key) = &config.disable_key {
            if key.is_empty() {
                return Err(PolicyError::invalid(rule, "disable_key", "must not be empty"));
            }
        }

        let limit = match &config.limit {
            Some(limit) => LimitSpec::from_config(rule, limit)?,
            None => LimitSpec::default(),
        };

        Ok(Self {
            actions,
            stage: config.stage,
            disable_key: config.disable_key.clone(),
            disable_runtime_key: config
                .disable_key
                .as_ref()
                .map(|key| format!("ratelimit.{key}.http_filter_enabled")),
            limit,
        })
    }

    pub fn stage(&self) -> u64 {
        self.stage
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn disable_key(&self) -> Option<&str> {
        self.disable_key.as_deref()
    }

    /// The statically configured limit, if any.
    pub fn raw_limit(&self) -> Option<Limit> {
        self.limit.raw
    }

    pub fn limit_override(&self) -> Option<&LimitOverride> {
        self.limit.override_.as_ref()
    }

    /// Runtime feature consulted for this entry's disable key.
    pub fn disable_runtime_key(&self) -> Option<&str> {
        self.disable_runtime_key.as_deref()
    }

    /// Evaluate this entry against a request.
    ///
    /// Returns `None` when the entry is disabled at runtime or when any action
    /// has nothing to contribute.
    pub fn evaluate<C: RequestContext + ?Sized>(&self, ctx: &C) -> Option<PolicyDescriptor> {
        if let Some(runtime_key) = self.disable_runtime_key() {
            if !ctx.runtime_feature_enabled(runtime_key) {
                debug!(runtime_key = %runtime_key, "Rate limit entry disabled at runtime");
                return None;
            }
        }

        let mut entries = Vec::with_capacity(self.actions.len());
        for action in &self.actions {
            match action.evaluate(ctx) {
                Some(entry) => entries.push(entry),
                None => {
                    trace!(
                        stage = self.stage,
                        action = action.kind(),
                        "Action produced no entry, skipping rate limit entry"
                    );
                    return None;
                }
            }
        }

        Some(PolicyDescriptor {
            descriptor: Descriptor::new(entries),
            limit: self.limit.effective(ctx),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::rules::RateLimitConfig;
    use crate::ratelimit::{DescriptorEntry, EffectiveLimit, RequestAttributes, TimeUnit};
    use serde_json::json;

    const NS: &str = "envoy.filters.http.lua";

    fn entry(yaml: &str) -> Result<RateLimitPolicyEntry> {
        let config = RateLimitConfig::from_yaml(yaml)?;
        RateLimitPolicyEntry::from_config(0, &config.rate_limits[0])
    }

    fn full_request() -> RequestAttributes {
        RequestAttributes::new("ingress")
            .with_route_cluster("backend")
            .with_remote_address("10.0.0.5".parse().unwrap())
            .with_header("x-user", "alice")
            .with_metadata(NS, json!({"plan": "gold"}))
    }

    const ALL_ACTIONS: &str = r#"
- actions:
    - source_cluster: {}
    - destination_cluster: {}
    - request_headers: { header_name: x-user, descriptor_key: user }
    - remote_address: {}
    - generic_key: { descriptor_value: foo }
    - dynamic_metadata:
        descriptor_key: plan
        metadata_key: { key: envoy.filters.http.lua, path: [ { key: plan } ] }
    - header_value_match:
        descriptor_value: no_debug
        expect_match: false
        headers:
          - name: x-debug
            present_match: true
"#;

    #[test]
    fn test_all_actions_produce_ordered_descriptor() {
        let entry = entry(ALL_ACTIONS).unwrap();
        let result = entry.evaluate(&full_request()).unwrap();

        assert_eq!(
            result.descriptor.entries,
            vec![
                DescriptorEntry::new("source_cluster", "ingress"),
                DescriptorEntry::new("destination_cluster", "backend"),
                DescriptorEntry::new("user", "alice"),
                DescriptorEntry::new("remote_address", "10.0.0.5"),
                DescriptorEntry::new("generic_key", "foo"),
                DescriptorEntry::new("plan", "gold"),
                DescriptorEntry::new("header_match", "no_debug"),
            ]
        );
        assert_eq!(result.limit, EffectiveLimit::Unspecified);
    }

    #[test]
    fn test_any_missing_input_skips_whole_entry() {
        let entry = entry(ALL_ACTIONS).unwrap();

        let mut no_route = full_request();
        no_route.route_cluster = None;
        assert!(entry.evaluate(&no_route).is_none());

        let mut no_header = full_request();
        no_header.headers.clear();
        assert!(entry.evaluate(&no_header).is_none());

        let mut no_address = full_request();
        no_address.remote_address = None;
        assert!(entry.evaluate(&no_address).is_none());

        let mut no_metadata = full_request();
        no_metadata.dynamic_metadata.clear();
        assert!(entry.evaluate(&no_metadata).is_none());

        let debug = full_request().with_header("x-debug", "1");
        assert!(entry.evaluate(&debug).is_none());
    }

    #[test]
    fn test_single_action_entries_fail_closed() {
        let bare = RequestAttributes::new("ingress");
        let cases = [
            "destination_cluster: {}",
            "request_headers: { header_name: x-user, descriptor_key: user }",
            "remote_address: {}",
            "dynamic_metadata: { descriptor_key: plan, metadata_key: { key: ns, path: [ { key: plan } ] } }",
            "header_value_match: { descriptor_value: v, headers: [ { name: x-user, present_match: true } ] }",
        ];
        for action in cases {
            let yaml = format!("- actions:\n    - generic_key: {{ descriptor_value: foo }}\n    - {action}\n");
            let entry = entry(&yaml).unwrap();
            assert!(entry.evaluate(&bare).is_none(), "{action}");
        }
    }

    #[test]
    fn test_static_actions_never_fail() {
        // source_cluster and generic_key need nothing from the request.
        let entry = entry(
            "- actions:\n    - source_cluster: {}\n    - generic_key: { descriptor_value: foo }\n",
        )
        .unwrap();
        assert!(entry.evaluate(&RequestAttributes::default()).is_some());
    }

    #[test]
    fn test_disable_key() {
        let entry = entry(
            r#"
- disable_key: api
  actions:
    - generic_key: { descriptor_value: foo }
"#,
        )
        .unwrap();
        assert_eq!(entry.disable_key(), Some("api"));
        assert_eq!(
            entry.disable_runtime_key(),
            Some("ratelimit.api.http_filter_enabled")
        );

        let enabled = RequestAttributes::new("ingress");
        assert!(entry.evaluate(&enabled).is_some());

        let disabled = RequestAttributes::new("ingress")
            .with_runtime_flag("ratelimit.api.http_filter_enabled", false);
        assert!(entry.evaluate(&disabled).is_none());
    }

    #[test]
    fn test_no_disable_key_is_always_enabled() {
        let entry = entry("- actions:\n    - generic_key: { descriptor_value: foo }\n").unwrap();
        assert_eq!(entry.disable_runtime_key(), None);

        let req = RequestAttributes::new("ingress")
            .with_runtime_flag("ratelimit.api.http_filter_enabled", false);
        assert!(entry.evaluate(&req).is_some());
    }

    #[test]
    fn test_uppercase_static_unit() {
        let entry = entry(
            "- actions:\n    - generic_key: { descriptor_value: foo }\n  limit: { requests_per_unit: 10, unit: MINUTE }\n",
        )
        .unwrap();
        assert_eq!(entry.raw_limit(), Some(Limit::new(10, TimeUnit::Minute)));
    }

    #[test]
    fn test_present_false_header_value_match() {
        let entry = entry(
            r#"
- actions:
    - header_value_match:
        descriptor_value: anonymous
        headers:
          - name: x-user
            present_match: false
"#,
        )
        .unwrap();

        let absent = RequestAttributes::new("ingress");
        let result = entry.evaluate(&absent).unwrap();
        assert_eq!(result.descriptor.to_string_key(), "header_match=anonymous");

        let present = RequestAttributes::new("ingress").with_header("x-user", "alice");
        assert!(entry.evaluate(&present).is_none());
    }

    #[test]
    fn test_override_replaces_static_limit() {
        let entry = entry(
            r#"
- actions:
    - generic_key: { descriptor_value: foo }
  limit:
    requests_per_unit: 100
    unit: hour
    dynamic_metadata:
      metadata_key: { key: envoy.filters.http.lua, path: [ { key: override } ] }
"#,
        )
        .unwrap();
        assert_eq!(entry.raw_limit(), Some(Limit::new(100, TimeUnit::Hour)));
        assert!(entry.limit_override().is_some());

        let valid = RequestAttributes::new("ingress").with_metadata(
            NS,
            json!({"override": {"requests_per_unit": 5, "unit": "minute"}}),
        );
        assert_eq!(
            entry.evaluate(&valid).unwrap().limit,
            EffectiveLimit::Override(Limit::new(5, TimeUnit::Minute))
        );

        let malformed = RequestAttributes::new("ingress").with_metadata(
            NS,
            json!({"override": {"requests_per_unit": "abc", "unit": "minute"}}),
        );
        let result = entry.evaluate(&malformed).unwrap();
        assert_eq!(result.limit, EffectiveLimit::Static(Limit::new(100, TimeUnit::Hour)));
        assert_eq!(result.descriptor.to_string_key(), "generic_key=foo");
    }

    #[test]
    fn test_stage_out_of_range() {
        let err = entry("- stage: 11\n  actions:\n    - source_cluster: {}\n").unwrap_err();
        match err {
            PolicyError::StageOutOfRange { rule, stage, max } => {
                assert_eq!((rule, stage, max), (0, 11, MAX_STAGE_NUMBER));
            }
            other => panic!("unexpected error: {other}"),
        }

        let ok = entry("- stage: 10\n  actions:\n    - source_cluster: {}\n").unwrap();
        assert_eq!(ok.stage(), 10);
    }

    #[test]
    fn test_requires_actions_and_non_empty_disable_key() {
        assert!(matches!(
            entry("- stage: 1\n"),
            Err(PolicyError::InvalidField { .. })
        ));
        assert!(matches!(
            entry("- disable_key: ''\n  actions:\n    - source_cluster: {}\n"),
            Err(PolicyError::InvalidField { .. })
        ));
    }

    #[test]
    fn test_unknown_override_kind() {
        let err = entry(
            r#"
- actions:
    - source_cluster: {}
  limit:
    header_value: { name: x-limit }
"#,
        )
        .unwrap_err();
        assert!(matches!(err, PolicyError::UnsupportedOverride { .. }));
        assert_eq!(
            err.to_string(),
            "rate limit rule 0: unsupported limit override kind 'header_value'"
        );
    }
}
