//! The per-route set of rate limit entries, bucketed by stage.

use std::path::Path;
use tracing::{info, trace};

use super::context::RequestContext;
use super::descriptor::PolicyDescriptor;
use super::entry::{RateLimitPolicyEntry, MAX_STAGE_NUMBER};
use super::rules::RateLimitConfig;
use crate::error::Result;

const STAGE_COUNT: usize = MAX_STAGE_NUMBER as usize + 1;

/// An immutable rate limit policy.
///
/// Entries are stored once, in configuration order. Each stage keeps the
/// indices of its entries so a stage lookup is a single slice access. A policy
/// is never modified after construction; share it behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct RateLimitPolicy {
    entries: Vec<RateLimitPolicyEntry>,
    stages: [Vec<usize>; STAGE_COUNT],
}

impl RateLimitPolicy {
    /// Create a policy with no entries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a policy from parsed configuration.
    ///
    /// Fails on the first invalid rule; nothing is built in that case.
    pub fn from_config(config: &RateLimitConfig) -> Result<Self> {
        let mut policy = Self::new();
        for (rule, rule_config) in config.rate_limits.iter().enumerate() {
            let entry = RateLimitPolicyEntry::from_config(rule, rule_config)?;
            let stage = entry.stage() as usize;
            policy.stages[stage].push(policy.entries.len());
            policy.entries.push(entry);
        }

        info!(
            entries = policy.entries.len(),
            stages = policy.stages.iter().filter(|s| !s.is_empty()).count(),
            "Rate limit policy built"
        );
        Ok(policy)
    }

    /// Build a policy from a YAML (or JSON) string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Self::from_config(&RateLimitConfig::from_yaml(yaml)?)
    }

    /// Build a policy from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_config(&RateLimitConfig::from_file(path)?)
    }

    /// Entries configured for `stage`, in configuration order.
    ///
    /// # Panics
    ///
    /// Panics if `stage` is greater than [`MAX_STAGE_NUMBER`]. Entry stages are
    /// checked at load time, so callers only ever ask for stages in range.
    pub fn applicable_entries(
        &self,
        stage: u64,
    ) -> impl ExactSizeIterator<Item = &RateLimitPolicyEntry> + '_ {
        assert!(
            stage <= MAX_STAGE_NUMBER,
            "stage {stage} exceeds maximum stage number {MAX_STAGE_NUMBER}"
        );
        self.stages[stage as usize]
            .iter()
            .map(move |&index| &self.entries[index])
    }

    /// Evaluate every entry of `stage` and collect the descriptors produced.
    pub fn populate_descriptors<C: RequestContext + ?Sized>(
        &self,
        stage: u64,
        ctx: &C,
    ) -> Vec<PolicyDescriptor> {
        let descriptors: Vec<PolicyDescriptor> = self
            .applicable_entries(stage)
            .filter_map(|entry| entry.evaluate(ctx))
            .collect();

        trace!(
            stage = stage,
            produced = descriptors.len(),
            "Populated rate limit descriptors"
        );
        descriptors
    }

    /// True when no rules were configured.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// All entries in configuration order.
    pub fn entries(&self) -> &[RateLimitPolicyEntry] {
        &self.entries
    }

    /// Number of entries per stage, indexed by stage number.
    pub fn stage_counts(&self) -> [usize; STAGE_COUNT] {
        std::array::from_fn(|stage| self.stages[stage].len())
    }
}
