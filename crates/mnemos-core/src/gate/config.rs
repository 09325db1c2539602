//! Configuration for the inbound event gate.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Dedup cache and reassembly buffer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// How long an event identity is remembered. Default: 600s
    pub dedup_ttl_secs: u64,
    /// Maximum remembered events before oldest-first eviction. Default: 2000
    pub dedup_capacity: usize,
    /// Text at or above this many characters starts a fragment buffer.
    /// Default: 4000
    pub fragment_min_chars: usize,
    /// Inactivity window after which a fragment buffer flushes. Default: 1000ms
    pub fragment_window_ms: u64,
    /// Hard cap on accumulated fragment text. Default: 40000
    pub fragment_max_chars: usize,
    /// Quiet period before a media group flushes. Default: 1200ms
    pub media_group_delay_ms: u64,
    /// Text used when no event in a media group carried a caption.
    pub media_placeholder: String,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            dedup_ttl_secs: 600,
            dedup_capacity: 2000,
            fragment_min_chars: 4000,
            fragment_window_ms: 1000,
            fragment_max_chars: 40_000,
            media_group_delay_ms: 1200,
            media_placeholder: "[media]".to_string(),
        }
    }
}

impl GateConfig {
    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_secs)
    }

    pub fn fragment_window(&self) -> Duration {
        Duration::from_millis(self.fragment_window_ms)
    }

    pub fn media_group_delay(&self) -> Duration {
        Duration::from_millis(self.media_group_delay_ms)
    }

    /// Validate configuration values are in valid ranges.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.dedup_capacity == 0 {
            return Err("dedup_capacity must be at least 1");
        }
        if self.fragment_min_chars == 0 {
            return Err("fragment_min_chars must be at least 1");
        }
        if self.fragment_max_chars < self.fragment_min_chars {
            return Err("fragment_max_chars must not be below fragment_min_chars");
        }
        Ok(())
    }
}
