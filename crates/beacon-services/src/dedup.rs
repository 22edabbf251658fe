//! Dedup cache: skip re-validation of byte-identical announces.
//!
//! Devices re-announce roughly every `expiration / 2`, almost always with
//! the same bytes. Two bounded LRU indexes keep that cheap:
//!
//!   content: raw message   → validated announce
//!   path:    path identity → last raw message seen on that path
//!
//! The path index lets a content change on a known path drop the stale
//! raw entry from the content index. The two indexes evict independently,
//! so a path entry can outlive its content entry (or the reverse). That
//! only costs a re-validation, after which `record` restores the missing
//! content entry. Presence tracking never reads cache state.

use std::num::NonZeroUsize;
use std::sync::Arc;

use beacon_core::wire::DEFAULT_CACHE_CAPACITY;
use beacon_core::{Announce, PathIdentity};
use lru::LruCache;

/// Which branch `record` took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The path already pointed at these exact bytes. The content entry is
    /// restored if it had been evicted.
    Unchanged,
    /// The path pointed at different bytes, now dropped from the content index.
    Changed { evicted: String },
    /// First time this path is seen (or its entry had been evicted).
    Inserted,
}

pub struct DedupCache {
    content: LruCache<String, Arc<Announce>>,
    paths: LruCache<PathIdentity, String>,
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_CAPACITY)
    }
}

impl DedupCache {
    /// A capacity of zero is treated as one.
    pub fn new(content_capacity: usize, path_capacity: usize) -> Self {
        Self {
            content: LruCache::new(non_zero(content_capacity)),
            paths: LruCache::new(non_zero(path_capacity)),
        }
    }

    /// Content index lookup. A hit refreshes recency.
    pub fn lookup(&mut self, raw: &str) -> Option<Arc<Announce>> {
        self.content.get(raw).cloned()
    }

    /// Remember a freshly validated announce.
    pub fn record(
        &mut self,
        raw: &str,
        identity: PathIdentity,
        announce: Arc<Announce>,
    ) -> RecordOutcome {
        let outcome = match self.paths.get(&identity) {
            Some(previous) if previous == raw => {
                // The content entry may have been evicted while the path
                // entry survived; put it back so the next repeat is a hit.
                if !self.content.contains(raw) {
                    self.content.put(raw.to_owned(), announce);
                }
                return RecordOutcome::Unchanged;
            }
            Some(previous) => {
                let evicted = previous.clone();
                self.content.pop(&evicted);
                RecordOutcome::Changed { evicted }
            }
            None => RecordOutcome::Inserted,
        };

        self.content.put(raw.to_owned(), announce);
        self.paths.put(identity, raw.to_owned());
        outcome
    }

    /// Peek at the raw message last recorded for a path. Does not touch recency.
    pub fn raw_for(&self, identity: &PathIdentity) -> Option<&str> {
        self.paths.peek(identity).map(String::as_str)
    }

    pub fn contains_raw(&self, raw: &str) -> bool {
        self.content.contains(raw)
    }

    pub fn content_len(&self) -> usize {
        self.content.len()
    }

    pub fn path_len(&self) -> usize {
        self.paths.len()
    }

    pub fn clear(&mut self) {
        self.content.clear();
        self.paths.clear();
    }
}

fn non_zero(capacity: usize) -> NonZeroUsize {
    NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)
}
