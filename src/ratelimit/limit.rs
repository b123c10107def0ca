//! Limits and per-request limit overrides.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use super::context::RequestContext;
use super::metadata::MetadataKey;
use super::rules::LimitConfig;
use crate::error::{PolicyError, Result};
use crate::proto;

/// Time unit for rate limits (matches Envoy's configuration format).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    #[serde(alias = "SECOND")]
    Second,
    #[serde(alias = "MINUTE")]
    Minute,
    #[serde(alias = "HOUR")]
    Hour,
    #[serde(alias = "DAY")]
    Day,
}

impl TimeUnit {
    /// Convert to the proto enum value.
    pub fn to_proto(self) -> proto::RateLimitUnit {
        match self {
            TimeUnit::Second => proto::RateLimitUnit::Second,
            TimeUnit::Minute => proto::RateLimitUnit::Minute,
            TimeUnit::Hour => proto::RateLimitUnit::Hour,
            TimeUnit::Day => proto::RateLimitUnit::Day,
        }
    }
}

impl FromStr for TimeUnit {
    type Err = ();

    /// Parses `second`, `MINUTE` and so on. `unknown` is not a unit.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "second" => Ok(TimeUnit::Second),
            "minute" => Ok(TimeUnit::Minute),
            "hour" => Ok(TimeUnit::Hour),
            "day" => Ok(TimeUnit::Day),
            _ => Err(()),
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimeUnit::Second => "second",
            TimeUnit::Minute => "minute",
            TimeUnit::Hour => "hour",
            TimeUnit::Day => "day",
        };
        f.write_str(name)
    }
}

/// A request budget: `requests_per_unit` requests per `unit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Limit {
    pub requests_per_unit: u32,
    pub unit: TimeUnit,
}

impl Limit {
    pub fn new(requests_per_unit: u32, unit: TimeUnit) -> Self {
        Self {
            requests_per_unit,
            unit,
        }
    }

    pub fn to_proto(self) -> proto::rate_limit_descriptor::RateLimitOverride {
        proto::rate_limit_descriptor::RateLimitOverride {
            requests_per_unit: self.requests_per_unit,
            unit: self.unit.to_proto() as i32,
        }
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.requests_per_unit, self.unit)
    }
}

/// Replaces a rule's static limit with a value read from the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimitOverride {
    /// Reads `{requests_per_unit, unit}` from dynamic metadata.
    DynamicMetadata { metadata_key: MetadataKey },
}

impl LimitOverride {
    /// Resolve the override for this request.
    ///
    /// Missing or malformed metadata yields `None`; the caller falls back to
    /// the static limit.
    pub fn resolve<C: RequestContext + ?Sized>(&self, ctx: &C) -> Option<Limit> {
        match self {
            LimitOverride::DynamicMetadata { metadata_key } => {
                let value = metadata_key.lookup(ctx)?;
                let limit = limit_from_metadata(value);
                if limit.is_none() {
                    debug!(
                        metadata_key = %metadata_key,
                        value = %value,
                        "Malformed rate limit override in dynamic metadata"
                    );
                }
                limit
            }
        }
    }
}

fn limit_from_metadata(value: &Value) -> Option<Limit> {
    let fields = value.as_object()?;
    let requests_per_unit = fields.get("requests_per_unit")?.as_f64()?;
    let unit = fields.get("unit")?.as_str()?.parse().ok()?;

    if requests_per_unit.fract() != 0.0
        || requests_per_unit < 1.0
        || requests_per_unit > f64::from(u32::MAX)
    {
        return None;
    }

    Some(Limit::new(requests_per_unit as u32, unit))
}

/// The limit attached to an evaluated descriptor and where it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectiveLimit {
    /// Resolved from the rule's override for this request
    Override(Limit),
    /// The rule's statically configured limit
    Static(Limit),
    /// No limit configured; the rate limit service decides
    Unspecified,
}

impl EffectiveLimit {
    pub fn limit(&self) -> Option<Limit> {
        match self {
            EffectiveLimit::Override(limit) | EffectiveLimit::Static(limit) => Some(*limit),
            EffectiveLimit::Unspecified => None,
        }
    }
}

/// Validated form of a rule's `limit` block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct LimitSpec {
    pub raw: Option<Limit>,
    pub override_: Option<LimitOverride>,
}

impl LimitSpec {
    pub fn from_config(rule: usize, config: &LimitConfig) -> Result<Self> {
        if let Some(kind) = config.unknown.keys().next() {
            return Err(PolicyError::UnsupportedOverride {
                rule,
                kind: kind.clone(),
            });
        }

        let raw = match (config.requests_per_unit, config.unit) {
            (Some(0), Some(_)) => {
                return Err(PolicyError::invalid(
                    rule,
                    "limit.requests_per_unit",
                    "must be greater than zero",
                ))
            }
            (Some(requests_per_unit), Some(unit)) => Some(Limit::new(requests_per_unit, unit)),
            (None, None) => None,
            (Some(_), None) => {
                return Err(PolicyError::invalid(
                    rule,
                    "limit.unit",
                    "required when requests_per_unit is set",
                ))
            }
            (None, Some(_)) => {
                return Err(PolicyError::invalid(
                    rule,
                    "limit.requests_per_unit",
                    "required when unit is set",
                ))
            }
        };

        let override_ = match &config.dynamic_metadata {
            Some(dm) => {
                dm.metadata_key.validate().map_err(|reason| {
                    PolicyError::invalid(rule, "limit.dynamic_metadata.metadata_key", reason)
                })?;
                Some(LimitOverride::DynamicMetadata {
                    metadata_key: dm.metadata_key.clone(),
                })
            }
            None => None,
        };

        if raw.is_none() && override_.is_none() {
            return Err(PolicyError::invalid(
                rule,
                "limit",
                "must set a static limit or an override",
            ));
        }

        Ok(Self { raw, override_ })
    }

    /// Pick the limit for this request: override, then static, then unspecified.
    pub fn effective<C: RequestContext + ?Sized>(&self, ctx: &C) -> EffectiveLimit {
        if let Some(limit) = self.override_.as_ref().and_then(|o| o.resolve(ctx)) {
            return EffectiveLimit::Override(limit);
        }
        match self.raw {
            Some(limit) => EffectiveLimit::Static(limit),
            None => EffectiveLimit::Unspecified,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::RequestAttributes;
    use serde_json::json;

    const NS: &str = "envoy.filters.http.lua";

    fn metadata_override() -> LimitOverride {
        LimitOverride::DynamicMetadata {
            metadata_key: MetadataKey::new(NS, ["override"]),
        }
    }

    fn request_with(value: Value) -> RequestAttributes {
        RequestAttributes::new("ingress").with_metadata(NS, json!({ "override": value }))
    }

    #[test]
    fn test_time_unit_parse() {
        assert_eq!("minute".parse::<TimeUnit>(), Ok(TimeUnit::Minute));
        assert_eq!("DAY".parse::<TimeUnit>(), Ok(TimeUnit::Day));
        assert!("unknown".parse::<TimeUnit>().is_err());
        assert!("week".parse::<TimeUnit>().is_err());
    }

    #[test]
    fn test_time_unit_deserialize_either_case() {
        let units: Vec<TimeUnit> = serde_yaml::from_str("[second, MINUTE, hour, DAY]").unwrap();
        assert_eq!(
            units,
            [TimeUnit::Second, TimeUnit::Minute, TimeUnit::Hour, TimeUnit::Day]
        );
        assert!(serde_yaml::from_str::<TimeUnit>("UNKNOWN").is_err());
    }

    #[test]
    fn test_time_unit_to_proto() {
        assert_eq!(TimeUnit::Second.to_proto(), proto::RateLimitUnit::Second);
        assert_eq!(TimeUnit::Minute.to_proto(), proto::RateLimitUnit::Minute);
        assert_eq!(TimeUnit::Hour.to_proto(), proto::RateLimitUnit::Hour);
        assert_eq!(TimeUnit::Day.to_proto(), proto::RateLimitUnit::Day);
    }

    #[test]
    fn test_override_resolves_valid_metadata() {
        let req = request_with(json!({"requests_per_unit": 5, "unit": "minute"}));
        assert_eq!(
            metadata_override().resolve(&req),
            Some(Limit::new(5, TimeUnit::Minute))
        );
    }

    #[test]
    fn test_override_rejects_malformed_metadata() {
        let cases = [
            json!({"requests_per_unit": "abc", "unit": "minute"}),
            json!({"requests_per_unit": 5}),
            json!({"unit": "minute"}),
            json!({"requests_per_unit": 5, "unit": "fortnight"}),
            json!({"requests_per_unit": 5, "unit": 2}),
            json!({"requests_per_unit": 0, "unit": "minute"}),
            json!({"requests_per_unit": -3, "unit": "minute"}),
            json!({"requests_per_unit": 2.5, "unit": "minute"}),
            json!({"requests_per_unit": 5_000_000_000u64, "unit": "minute"}),
            json!("5/minute"),
        ];
        for value in cases {
            let req = request_with(value.clone());
            assert_eq!(metadata_override().resolve(&req), None, "{}", value);
        }
    }

    #[test]
    fn test_override_absent_metadata() {
        let req = RequestAttributes::new("ingress");
        assert_eq!(metadata_override().resolve(&req), None);
    }

    #[test]
    fn test_effective_limit_prefers_override() {
        let spec = LimitSpec {
            raw: Some(Limit::new(100, TimeUnit::Hour)),
            override_: Some(metadata_override()),
        };

        let req = request_with(json!({"requests_per_unit": 5, "unit": "minute"}));
        assert_eq!(
            spec.effective(&req),
            EffectiveLimit::Override(Limit::new(5, TimeUnit::Minute))
        );

        let req = request_with(json!({"requests_per_unit": "abc", "unit": "minute"}));
        assert_eq!(
            spec.effective(&req),
            EffectiveLimit::Static(Limit::new(100, TimeUnit::Hour))
        );
    }

    #[test]
    fn test_effective_limit_unspecified() {
        let spec = LimitSpec {
            raw: None,
            override_: Some(metadata_override()),
        };
        let req = RequestAttributes::new("ingress");
        assert_eq!(spec.effective(&req), EffectiveLimit::Unspecified);
        assert_eq!(spec.effective(&req).limit(), None);
    }

    #[test]
    fn test_limit_spec_rejects_unknown_override_kind() {
        let mut config = LimitConfig::default();
        config
            .unknown
            .insert("header_value".to_string(), json!({"name": "x"}));

        let err = LimitSpec::from_config(3, &config).unwrap_err();
        match err {
            PolicyError::UnsupportedOverride { rule, kind } => {
                assert_eq!(rule, 3);
                assert_eq!(kind, "header_value");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_limit_spec_requires_complete_static_limit() {
        let config = LimitConfig {
            requests_per_unit: Some(10),
            ..LimitConfig::default()
        };
        assert!(matches!(
            LimitSpec::from_config(0, &config),
            Err(PolicyError::InvalidField { .. })
        ));

        let config = LimitConfig {
            requests_per_unit: Some(0),
            unit: Some(TimeUnit::Second),
            ..LimitConfig::default()
        };
        assert!(matches!(
            LimitSpec::from_config(0, &config),
            Err(PolicyError::InvalidField { .. })
        ));

        assert!(matches!(
            LimitSpec::from_config(0, &LimitConfig::default()),
            Err(PolicyError::InvalidField { .. })
        ));
    }

    #[test]
    fn test_limit_to_proto() {
        let wire = Limit::new(5, TimeUnit::Minute).to_proto();
        assert_eq!(wire.requests_per_unit, 5);
        assert_eq!(wire.unit(), proto::RateLimitUnit::Minute);
    }
}
