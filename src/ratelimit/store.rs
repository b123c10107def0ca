//! Publication of policy snapshots.
//!
//! One writer builds a new [`RateLimitPolicy`] and publishes it; any number of
//! request handlers take the current snapshot and evaluate against it without
//! further locking. A snapshot lives as long as its longest holder.

use parking_lot::RwLock;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::policy::RateLimitPolicy;
use crate::error::Result;

/// Holds the current policy snapshot.
pub struct PolicyStore {
    current: RwLock<Arc<RateLimitPolicy>>,
    generation: AtomicU64,
}

impl PolicyStore {
    /// Create a store serving `policy` as generation 0.
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            current: RwLock::new(Arc::new(policy)),
            generation: AtomicU64::new(0),
        }
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<RateLimitPolicy> {
        Arc::clone(&*self.current.read())
    }

    /// Number of snapshots published since creation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Replace the current snapshot, returning the new generation.
    ///
    /// Readers holding the previous snapshot keep it until they drop it.
    pub fn publish(&self, policy: RateLimitPolicy) -> u64 {
        let entries = policy.len();
        let mut current = self.current.write();
        *current = Arc::new(policy);
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        drop(current);

        info!(generation, entries, "Published rate limit policy");
        generation
    }

    /// Build a policy from YAML and publish it.
    ///
    /// On any error the current snapshot stays in place.
    pub fn reload_from_yaml(&self, yaml: &str) -> Result<u64> {
        match RateLimitPolicy::from_yaml(yaml) {
            Ok(policy) => Ok(self.publish(policy)),
            Err(e) => {
                warn!(error = %e, generation = self.generation(), "Rejected rate limit policy, keeping current");
                Err(e)
            }
        }
    }

    /// Reload from `path` if its contents differ from `last_seen`.
    ///
    /// Returns `Ok(true)` when a new snapshot was published. `last_seen` is
    /// updated whenever the file was read, so a rejected file is not retried
    /// until it changes again.
    pub async fn reload_if_changed(
        &self,
        path: &Path,
        last_seen: &mut Option<String>,
    ) -> Result<bool> {
        let contents = tokio::fs::read_to_string(path).await?;
        if last_seen.as_deref() == Some(contents.as_str()) {
            return Ok(false);
        }

        let result = self.reload_from_yaml(&contents);
        *last_seen = Some(contents);
        result.map(|_| true)
    }

    /// Poll `path` every `interval` and publish changes until `shutdown` resolves.
    pub async fn watch_file<F>(&self, path: &Path, interval: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last_seen = None;
        tokio::pin!(shutdown);

        info!(path = %path.display(), interval = ?interval, "Watching rate limit policy file");

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(path = %path.display(), "Stopped watching rate limit policy file");
                    return;
                }
                _ = ticker.tick() => {
                    match self.reload_if_changed(path, &mut last_seen).await {
                        Ok(true) => {}
                        Ok(false) => debug!(path = %path.display(), "Rate limit policy unchanged"),
                        Err(e) => warn!(path = %path.display(), error = %e, "Rate limit policy reload failed"),
                    }
                }
            }
        }
    }
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::new(RateLimitPolicy::new())
    }
}
