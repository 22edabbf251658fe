//! beacon-services: dedup cache, presence monitor, and the pipeline
//! that ties them to the validator.

pub mod dedup;
pub mod pipeline;
pub mod presence;

pub use dedup::{DedupCache, RecordOutcome};
pub use pipeline::{
    AnnouncePipeline, CacheSizes, IngestStats, Ingested, PipelineConfig, Rejection,
};
pub use presence::{
    EventKind, MonitorError, PresenceEvent, PresenceHandler, PresenceMonitor, SubscriptionId,
    Transition,
};
