//! # System Constants
//!
//! Reserved field names, tags and defaults that define the shape of emitted
//! events and the operational boundaries of the input.

use std::time::Duration;

/// Reserved event field names
pub mod fields {
    /// Default field holding the provenance metadata envelope
    pub const METADATA: &str = "@metadata";
    /// Field holding the failure record on failure events
    pub const FAILURE: &str = "firebase_failure";
    /// Field holding the event's tag list
    pub const TAGS: &str = "tags";
    /// Field a scalar retrieval result is wrapped under
    pub const VALUE: &str = "value";
}

/// Tags attached to emitted events
pub mod tags {
    /// Marker carried by every failure event
    pub const FAILURE: &str = "_firebasefailure";
}

/// Schedule option keys, in the order they are reported in error messages
pub mod schedule_kinds {
    pub const CRON: &str = "cron";
    pub const EVERY: &str = "every";
    pub const AT: &str = "at";
    pub const IN: &str = "in";

    pub const ALL: [&str; 4] = [CRON, EVERY, AT, IN];
}

/// Operational defaults
pub mod defaults {
    use super::Duration;

    /// Delay before the first `every` trigger
    pub const EVERY_INITIAL_DELAY: Duration = Duration::from_millis(10);
    /// Per-request fetch timeout
    pub const FETCH_TIMEOUT_SECONDS: u64 = 10;
    /// Bounded retry count for retryable fetch failures
    pub const MAX_RETRIES: u32 = 3;
    /// Base backoff between fetch retries
    pub const RETRY_BACKOFF_MS: u64 = 250;
    /// Lifetime of a cached auth token
    pub const TOKEN_REFRESH_HOURS: u64 = 23;
    /// Delay before a dropped stream reconnects
    pub const RECONNECT_DELAY_MS: u64 = 1000;
    /// Capacity of the bounded sink queue
    pub const SINK_BUFFER_SIZE: usize = 1000;
    /// Longest an emit waits for queue space
    pub const SINK_ENQUEUE_TIMEOUT_MS: u64 = 5000;
    /// Capacity of a subscription's message channel
    pub const STREAM_BUFFER_SIZE: usize = 256;
    /// Environment variable prefix for configuration overrides
    pub const ENV_PREFIX: &str = "FIREBASE_INPUT";
}
