// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! mtx-dedup
#![deny(unsafe_code)]
#![warn(missing_docs)]

use mtx_core::TxResult;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Soft cap on cached entries before an oldest-first trim kicks in.
pub const MAX_ENTRIES: usize = 1000;

/// Number of oldest entries removed when the cache exceeds [`MAX_ENTRIES`].
pub const TRIM_BATCH: usize = 100;

struct Entry {
    result: TxResult,
    stored_at: Instant,
}

/// Deduplication cache for one session.
///
/// Not synchronized; the owning session serializes access.
pub struct DedupCache {
    window: Duration,
    entries: HashMap<String, Entry>,
}

impl DedupCache {
    /// Create a cache whose entries are visible for `window` after storage.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: HashMap::new(),
        }
    }

    /// Look up a prior result for `key`.
    ///
    /// A hit within the window returns a copy flagged `duplicate = true`;
    /// the original `attempts`, `final_status`, `ack`, and error fields are
    /// preserved. An expired entry is removed and reported as a miss.
    pub fn lookup(&mut self, key: &str) -> Option<TxResult> {
        self.lookup_at(key, Instant::now())
    }

    /// Store `result` under `key`, then evict expired entries and enforce
    /// the soft size cap.
    pub fn store(&mut self, key: String, result: TxResult) {
        self.store_at(key, result, Instant::now());
    }

    fn lookup_at(&mut self, key: &str, now: Instant) -> Option<TxResult> {
        match self.entries.get(key) {
            Some(entry) if now.saturating_duration_since(entry.stored_at) <= self.window => {
                let mut result = entry.result.clone();
                result.meta.duplicate = true;
                Some(result)
            }
            Some(_) => {
                debug!(target: "mtx.dedup", key, "evicting expired entry on access");
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn store_at(&mut self, key: String, result: TxResult, now: Instant) {
        self.entries.insert(
            key,
            Entry {
                result,
                stored_at: now,
            },
        );

        let window = self.window;
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.stored_at) <= window);

        if self.entries.len() > MAX_ENTRIES {
            let mut by_age: Vec<(String, Instant)> = self
                .entries
                .iter()
                .map(|(k, e)| (k.clone(), e.stored_at))
                .collect();
            by_age.sort_by_key(|(_, stored_at)| *stored_at);

            let evicted = by_age.len().min(TRIM_BATCH);
            for (key, _) in by_age.into_iter().take(TRIM_BATCH) {
                self.entries.remove(&key);
            }
            debug!(target: "mtx.dedup", evicted, "trimmed oldest entries past soft cap");
        }
    }

    /// Number of cached entries, expired ones included until swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl std::fmt::Debug for DedupCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupCache")
            .field("window", &self.window)
            .field("entries", &self.entries.len())
            .finish()
    }
}
