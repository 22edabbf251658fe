//! Announce pipeline: raw text in, presence transitions out.
//!
//! ```text
//! raw ─► content cache ─hit────────────────► monitor.observe
//!              │
//!              └─miss─► validator ─ok─► monitor.observe ─ok─► record in cache
//!                            └─err─► last rejection + counters (dropped)
//! ```
//!
//! One mutex spans the whole sequence, so concurrent ingest calls for the
//! same path cannot interleave their cache and presence updates.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use beacon_core::config::PresenceConfig;
use beacon_core::wire::{DEFAULT_CACHE_CAPACITY, DEFAULT_EXPIRATION_SECS};
use beacon_core::{Validated, ValidationError, Validator};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::dedup::{DedupCache, RecordOutcome};
use crate::presence::{
    MonitorError, PresenceEvent, PresenceHandler, PresenceMonitor, SubscriptionId, Transition,
};

/// Startup parameters. Nothing else about the pipeline is configurable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub default_expiration: Duration,
    pub content_cache_capacity: usize,
    pub path_cache_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_expiration: Duration::from_secs(DEFAULT_EXPIRATION_SECS),
            content_cache_capacity: DEFAULT_CACHE_CAPACITY,
            path_cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl From<&PresenceConfig> for PipelineConfig {
    fn from(config: &PresenceConfig) -> Self {
        Self {
            default_expiration: config.default_expiration(),
            content_cache_capacity: config.content_cache_capacity,
            path_cache_capacity: config.path_cache_capacity,
        }
    }
}

/// What happened to one raw message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ingested {
    /// Validated from scratch, then fed to the monitor.
    Validated(Transition),
    /// Served from the content cache without re-validation.
    Cached(Transition),
    /// Dropped. Never reaches subscribers.
    Rejected(ValidationError),
}

/// The most recent validation failure. Diagnostics only.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub reason: ValidationError,
    pub at: SystemTime,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub received: u64,
    pub validations: u64,
    pub cache_hits: u64,
    pub rejected: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheSizes {
    pub content: usize,
    pub paths: usize,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    validations: AtomicU64,
    cache_hits: AtomicU64,
    rejected: AtomicU64,
}

pub struct AnnouncePipeline {
    validator: Validator,
    cache: Mutex<DedupCache>,
    monitor: PresenceMonitor,
    last_rejection: Mutex<Option<Rejection>>,
    counters: Counters,
}

impl AnnouncePipeline {
    /// Must be called inside a tokio runtime (the monitor spawns its timer worker).
    pub fn new(config: PipelineConfig) -> Result<Self, MonitorError> {
        let validator = Validator::new(config.default_expiration);
        tracing::debug!(
            default_expiration_secs = validator.default_expiration().as_secs(),
            content_cache_capacity = config.content_cache_capacity,
            path_cache_capacity = config.path_cache_capacity,
            "announce pipeline starting"
        );
        Ok(Self {
            validator,
            cache: Mutex::new(DedupCache::new(
                config.content_cache_capacity,
                config.path_cache_capacity,
            )),
            monitor: PresenceMonitor::start()?,
            last_rejection: Mutex::new(None),
            counters: Counters::default(),
        })
    }

    /// Process one raw message. Validation failures are absorbed into
    /// `Ingested::Rejected`; only monitor failures are returned as errors.
    pub fn ingest(&self, raw: &str) -> Result<Ingested, MonitorError> {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        let mut cache = self.cache.lock();

        if let Some(announce) = cache.lookup(raw) {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            let identity = announce.path_identity();
            let transition = self.monitor.observe(announce, identity)?;
            return Ok(Ingested::Cached(transition));
        }

        self.counters.validations.fetch_add(1, Ordering::Relaxed);
        let Validated { announce, identity } = match self.validator.validate(raw) {
            Ok(v) => v,
            Err(reason) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                *self.last_rejection.lock() = Some(Rejection {
                    reason: reason.clone(),
                    at: SystemTime::now(),
                });
                return Ok(Ingested::Rejected(reason));
            }
        };

        // Observe first: a refused announce must not land in the cache.
        let announce = Arc::new(announce);
        let transition = self.monitor.observe(announce.clone(), identity)?;
        if let RecordOutcome::Changed { .. } = cache.record(raw, identity, announce) {
            tracing::trace!(identity = %identity, "announce content changed, stale entry dropped");
        }
        Ok(Ingested::Validated(transition))
    }

    pub fn last_rejection(&self) -> Option<Rejection> {
        self.last_rejection.lock().clone()
    }

    pub fn stats(&self) -> IngestStats {
        IngestStats {
            received: self.counters.received.load(Ordering::Relaxed),
            validations: self.counters.validations.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }

    pub fn cache_sizes(&self) -> CacheSizes {
        let cache = self.cache.lock();
        CacheSizes {
            content: cache.content_len(),
            paths: cache.path_len(),
        }
    }

    pub fn monitor(&self) -> &PresenceMonitor {
        &self.monitor
    }

    pub fn subscribe(&self, handler: impl PresenceHandler + 'static) -> SubscriptionId {
        self.monitor.subscribe(handler)
    }

    pub fn subscribe_channel(&self) -> mpsc::UnboundedReceiver<PresenceEvent> {
        self.monitor.subscribe_channel()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.monitor.unsubscribe(id)
    }

    /// Shut the monitor down (bounded by `grace`) and drop cached announces.
    pub async fn shutdown(&self, grace: Duration) -> Result<(), MonitorError> {
        let result = self.monitor.shutdown(grace).await;
        self.cache.lock().clear();
        result
    }
}
