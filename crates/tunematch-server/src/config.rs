//! Server configuration
//!
//! Loaded from a TOML file; every field has a default so a partial file,
//! or none at all, is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tunematch_core::{EngineConfig, SessionLimits};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,
    #[serde(default = "default_index_poll_secs")]
    pub index_poll_secs: u64,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_receive_timeout_secs")]
    pub receive_timeout_secs: u64,
    #[serde(default = "default_max_pending_windows")]
    pub max_pending_windows: usize,
    #[serde(default = "default_max_in_flight_windows")]
    pub max_in_flight_windows: usize,
    #[serde(default = "default_ring_buffer_seconds")]
    pub ring_buffer_seconds: f64,
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    #[serde(default = "default_status_interval_secs")]
    pub status_interval_secs: u64,
    /// Events buffered for a client that is slow to read
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_duration_bucket_secs")]
    pub duration_bucket_secs: f64,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            index_path: default_index_path(),
            index_poll_secs: default_index_poll_secs(),
            max_sessions: default_max_sessions(),
            receive_timeout_secs: default_receive_timeout_secs(),
            max_pending_windows: default_max_pending_windows(),
            max_in_flight_windows: default_max_in_flight_windows(),
            ring_buffer_seconds: default_ring_buffer_seconds(),
            grace_period_ms: default_grace_period_ms(),
            status_interval_secs: default_status_interval_secs(),
            outbound_queue: default_outbound_queue(),
            cache_ttl_secs: default_cache_ttl_secs(),
            duration_bucket_secs: default_duration_bucket_secs(),
            engine: EngineConfig::default(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}
fn default_index_path() -> PathBuf {
    PathBuf::from("./corpus.tmidx")
}
fn default_index_poll_secs() -> u64 {
    30
}
fn default_max_sessions() -> usize {
    64
}
fn default_receive_timeout_secs() -> u64 {
    30
}
fn default_max_pending_windows() -> usize {
    4
}
fn default_max_in_flight_windows() -> usize {
    2
}
fn default_ring_buffer_seconds() -> f64 {
    10.0
}
fn default_grace_period_ms() -> u64 {
    500
}
fn default_status_interval_secs() -> u64 {
    5
}
fn default_outbound_queue() -> usize {
    32
}
fn default_cache_ttl_secs() -> u64 {
    300
}
fn default_duration_bucket_secs() -> f64 {
    5.0
}

impl ServerConfig {
    /// Load configuration from TOML file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {}: {}", path.display(), e))?;
        let config: ServerConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML config: {}", e))?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.engine.validate()?;
        if self.max_sessions == 0 {
            anyhow::bail!("max_sessions must be > 0");
        }
        if self.max_in_flight_windows == 0 || self.max_pending_windows == 0 {
            anyhow::bail!("max_in_flight_windows and max_pending_windows must be > 0");
        }
        if self.outbound_queue == 0 {
            anyhow::bail!("outbound_queue must be > 0");
        }
        if self.ring_buffer_seconds < self.engine.window_seconds {
            anyhow::bail!("ring_buffer_seconds must hold at least one window");
        }
        if self.receive_timeout_secs == 0 || self.status_interval_secs == 0 {
            anyhow::bail!("receive_timeout_secs and status_interval_secs must be > 0");
        }
        if self.duration_bucket_secs <= 0.0 {
            anyhow::bail!("duration_bucket_secs must be > 0");
        }
        Ok(())
    }

    pub fn session_limits(&self) -> SessionLimits {
        SessionLimits::new(&self.engine, self.ring_buffer_seconds, self.max_pending_windows)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_secs(self.receive_timeout_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }

    pub fn index_poll_interval(&self) -> Duration {
        Duration::from_secs(self.index_poll_secs.max(1))
    }
}
