use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default DCM1 TCP port (serial-over-IP bridge)
pub const DEFAULT_PORT: u16 = 4999;

/// Reconnect attempts are never spaced closer than this
pub const RECONNECT_FLOOR: Duration = Duration::from_secs(1);

/// Connection settings and tunables for a mixer client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixerConfig {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Minimum gap between two writes to the device
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,

    /// Quiet interval before a run of EQ changes is sent
    #[serde(default = "default_eq_debounce_ms")]
    pub eq_debounce_ms: u64,

    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    #[serde(default = "default_true")]
    pub heartbeat_enabled: bool,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_reconnect_min_ms")]
    pub reconnect_min_ms: u64,

    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_pacing_ms() -> u64 {
    100
}

fn default_eq_debounce_ms() -> u64 {
    275
}

fn default_heartbeat_interval_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_reconnect_min_ms() -> u64 {
    1000
}

fn default_reconnect_max_ms() -> u64 {
    30_000
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self::new("127.0.0.1", DEFAULT_PORT)
    }
}

impl MixerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            pacing_ms: default_pacing_ms(),
            eq_debounce_ms: default_eq_debounce_ms(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            heartbeat_enabled: true,
            connect_timeout_ms: default_connect_timeout_ms(),
            reconnect_min_ms: default_reconnect_min_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
        }
    }

    /// Parse a JSON config; omitted fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_heartbeat(mut self, enabled: bool) -> Self {
        self.heartbeat_enabled = enabled;
        self
    }

    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing_ms = pacing.as_millis() as u64;
        self
    }

    pub fn with_eq_debounce(mut self, quiet: Duration) -> Self {
        self.eq_debounce_ms = quiet.as_millis() as u64;
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    pub fn eq_debounce(&self) -> Duration {
        Duration::from_millis(self.eq_debounce_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_min(&self) -> Duration {
        Duration::from_millis(self.reconnect_min_ms).max(RECONNECT_FLOOR)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms).max(self.reconnect_min())
    }
}
