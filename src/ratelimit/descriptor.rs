//! Descriptors produced by rate limit policy evaluation.

use serde::Serialize;

use super::limit::EffectiveLimit;
use crate::proto::{rate_limit_descriptor::Entry, RateLimitDescriptor};

/// One key/value pair contributed by an action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DescriptorEntry {
    pub key: String,
    pub value: String,
}

impl DescriptorEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// An ordered list of descriptor entries.
///
/// Entry order is the order of the rule's actions. The rate limit service
/// builds its counter key from the entries in this order, so two descriptors
/// with the same pairs in a different order are different counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Descriptor {
    pub entries: Vec<DescriptorEntry>,
}

impl Descriptor {
    pub fn new(entries: Vec<DescriptorEntry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render as `key=value,key=value`. Useful for logging.
    pub fn to_string_key(&self) -> String {
        let entries_str: Vec<String> = self
            .entries
            .iter()
            .map(|e| format!("{}={}", e.key, e.value))
            .collect();

        entries_str.join(",")
    }
}

impl std::fmt::Display for Descriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}

/// A descriptor produced by one policy entry together with its limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDescriptor {
    pub descriptor: Descriptor,
    pub limit: EffectiveLimit,
}

impl PolicyDescriptor {
    /// Convert into the message sent to the rate limit service.
    pub fn to_proto(&self) -> RateLimitDescriptor {
        RateLimitDescriptor {
            entries: self
                .descriptor
                .entries
                .iter()
                .map(|e| Entry {
                    key: e.key.clone(),
                    value: e.value.clone(),
                })
                .collect(),
            limit: self.limit.limit().map(|limit| limit.to_proto()),
        }
    }
}
