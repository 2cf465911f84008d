//! Configuration types for the Portway core

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sizing limits for the multiplexing engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum frame payload size in bytes (default: 16MB)
    pub max_payload_bytes: u32,
    /// Depth of the bounded outbound frame queue per endpoint
    pub outbound_queue_depth: usize,
    /// Chunk size used by stream pump tasks reading local connections
    pub stream_chunk_bytes: usize,
    /// Attempts to find a free random stream id before giving up
    pub max_id_alloc_retries: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: 16 * 1024 * 1024, // 16MB
            outbound_queue_depth: 1024,
            stream_chunk_bytes: 4096,
            max_id_alloc_retries: 8,
        }
    }
}

/// Bounded waits inside the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    /// How long a writer may wait for an announced stream to become ready
    pub stream_ready: Duration,
    /// How long a CONNECT-side dial of the local target may take
    pub local_dial: Duration,
    /// How long the plain relay holds an external connection while
    /// waiting for an internal peer
    pub relay_pairing: Duration,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            stream_ready: Duration::from_secs(10),
            local_dial: Duration::from_secs(10),
            relay_pairing: Duration::from_secs(10),
        }
    }
}

/// Client reconnect backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Base delay for reconnection backoff
    pub base: Duration,
    /// Maximum delay for reconnection backoff
    pub max: Duration,
    /// Jitter factor (0.0 - 1.0)
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(60),
            jitter: 0.3,
        }
    }
}
