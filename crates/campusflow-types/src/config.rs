//! Engine configuration types, deserialized from `config.toml`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Scheduler tick interval in seconds.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Size of the dispatch worker pool.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Timeout applied to outbound node HTTP calls, in seconds.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    /// Internal service credentials keyed by client name.
    #[serde(default)]
    pub clients: HashMap<String, InternalClientConfig>,
}

/// Credential entry for one internal service client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalClientConfig {
    /// Base URL prepended to relative internal URLs.
    pub base_url: String,
    /// Key identifier sent on signed requests.
    pub key_id: String,
    /// Shared signing secret.
    pub secret: String,
}

fn default_tick_secs() -> u64 {
    60
}

fn default_worker_count() -> usize {
    8
}

fn default_http_timeout_secs() -> u64 {
    30
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            worker_count: default_worker_count(),
            http_timeout_secs: default_http_timeout_secs(),
            clients: HashMap::new(),
        }
    }
}
