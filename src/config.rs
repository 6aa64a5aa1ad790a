//! Listener configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Tuning knobs for a single `TrackListener`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Interval between keyframe requests (PLI) sent to the publisher.
    pub pli_interval: Duration,
    /// Read buffer size for one RTP packet. One MTU.
    pub rtp_buffer_size: usize,
    /// Capacity of the track event channel. The channel is kept small so
    /// that a slow router exerts backpressure on inbound-track handling.
    pub event_channel_capacity: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            pli_interval: Duration::from_secs(3),
            rtp_buffer_size: 1400,
            event_channel_capacity: 1,
        }
    }
}

/// Logging configuration, consumed by [`crate::logging::init_logging`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn or error.
    pub level: String,
    /// Output format: "json" or "pretty".
    pub format: String,
    /// Optional log file; stdout when absent.
    pub file_path: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}
