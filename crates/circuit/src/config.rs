use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    /// Client name registered with the OS MIDI layer
    pub client_name: String,
    /// Minimum spacing between the start of consecutive SysEx sends
    pub min_send_interval_ms: u64,
    /// How long to wait for a dump reply
    pub response_timeout_ms: u64,
    /// Quiet period after a port change before the port list is re-read
    pub hotplug_debounce_ms: u64,
    /// Port list poll interval; 0 disables the watcher
    pub port_poll_interval_ms: u64,
    /// Buffered events per subscriber before the slowest one starts lagging
    pub event_capacity: usize,
    /// Case-insensitive substrings identifying the device, best match first
    pub port_patterns: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            client_name: "circuit-librarian".to_string(),
            min_send_interval_ms: 20,
            response_timeout_ms: 3000,
            hotplug_debounce_ms: 150,
            port_poll_interval_ms: 1000,
            event_capacity: 256,
            port_patterns: vec![
                "circuit tracks".to_string(),
                "circuit".to_string(),
                "novation".to_string(),
            ],
        }
    }
}

impl SessionConfig {
    /// Parse a JSON config. Missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn min_send_interval(&self) -> Duration {
        Duration::from_millis(self.min_send_interval_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn hotplug_debounce(&self) -> Duration {
        Duration::from_millis(self.hotplug_debounce_ms)
    }

    pub fn port_poll_interval(&self) -> Option<Duration> {
        (self.port_poll_interval_ms > 0).then(|| Duration::from_millis(self.port_poll_interval_ms))
    }
}
