//! Window storage abstraction and the in-process implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;
use tracing::trace;

use super::policy::PolicyTier;
use super::window::{RateWindowEntry, WindowKey, WindowOutcome, WindowSnapshot};

/// Errors raised by a window store.
///
/// The controller never surfaces these to callers; it logs them and admits
/// the request.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Window store unavailable: {0}")]
    Unavailable(String),
    #[error("Window store operation failed: {0}")]
    Operation(String),
}

/// Trait for window store implementations.
///
/// Implementations must make [`WindowStore::increment`] atomic per key: the
/// prune, the comparison against the limit and the recording of the new
/// request happen as one step, so two concurrent callers can never both
/// take the last slot.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Read the current state of a window without recording anything.
    async fn get(
        &self,
        key: &WindowKey,
        now: DateTime<Utc>,
    ) -> Result<Option<WindowSnapshot>, StoreError>;

    /// Record one request against `key` if the tier allows it.
    async fn increment(
        &self,
        key: &WindowKey,
        tier: &PolicyTier,
        now: DateTime<Utc>,
    ) -> Result<WindowOutcome, StoreError>;

    /// Remove every entry with no request inside its window.
    ///
    /// Returns the number of entries removed.
    async fn evict(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Number of entries currently held.
    fn len(&self) -> usize;

    /// Whether the store holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process window store backed by a sharded concurrent map.
///
/// `DashMap::entry` holds the shard write lock for the duration of the
/// update, which serializes mutations of a single key without a global lock.
#[derive(Debug, Default)]
pub struct InMemoryWindowStore {
    entries: DashMap<WindowKey, RateWindowEntry>,
}

impl InMemoryWindowStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Clear all entries.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[async_trait]
impl WindowStore for InMemoryWindowStore {
    async fn get(
        &self,
        key: &WindowKey,
        now: DateTime<Utc>,
    ) -> Result<Option<WindowSnapshot>, StoreError> {
        Ok(self.entries.get(key).map(|entry| entry.snapshot(now)))
    }

    async fn increment(
        &self,
        key: &WindowKey,
        tier: &PolicyTier,
        now: DateTime<Utc>,
    ) -> Result<WindowOutcome, StoreError> {
        let mut entry = self.entries.entry(key.clone()).or_insert_with(|| {
            trace!(key = %key, "Creating window entry");
            RateWindowEntry::new(tier.window())
        });

        Ok(entry.try_record(now, tier.limit))
    }

    async fn evict(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_stale(now));
        Ok(before.saturating_sub(self.entries.len()))
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
