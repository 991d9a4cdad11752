//! # System Constants
//!
//! Defaults and fixed names that define the operational boundaries of the
//! audience resolution and flow-start pipeline. Runtime-tunable values are
//! mirrored in [`crate::config`]; these are their defaults.

/// Task type tags carried on the work queue
pub mod task_types {
    pub const START_FLOW: &str = "start_flow";
    pub const START_FLOW_BATCH: &str = "start_flow_batch";
    pub const START_IVR_FLOW_BATCH: &str = "start_ivr_flow_batch";
    pub const POPULATE_DYNAMIC_GROUP: &str = "populate_dynamic_group";
}

/// Queue names used unless overridden in configuration
pub mod queues {
    /// Bulk queue for large fan-outs
    pub const BATCH_QUEUE: &str = "mailroom_batch";
    /// Low-latency queue for interactive, few-contact work
    pub const HANDLER_QUEUE: &str = "mailroom_handler";
}

pub mod system {
    /// Number of contacts in a single flow start batch
    pub const START_BATCH_SIZE: usize = 100;

    /// Starts resolving to this many contacts or fewer go to the handler queue
    pub const HANDLER_QUEUE_THRESHOLD: usize = 2;

    /// Window after the last contact modification during which the search
    /// index may not yet reflect the primary store
    pub const INDEX_FRESHNESS_WINDOW_MS: u64 = 10_000;

    /// Largest page the search index serves through plain from/size paging
    pub const MAX_RESULT_WINDOW: usize = 10_000;

    /// How long a point-in-time scroll context is kept alive between pages
    pub const POINT_IN_TIME_KEEP_ALIVE: &str = "1m";

    /// Default sort for paged contact searches
    pub const DEFAULT_SEARCH_SORT: &str = "-id";

    /// Default lifetime of a cached org asset snapshot
    pub const ASSET_CACHE_TTL_SECONDS: u64 = 5;
}
