//! Shared runtime state for cq-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The queue store sits
//! behind the engine and is built once at start-up.

use std::sync::Arc;

use cq_config::EngineConfig;
use cq_queue::{EngineSettings, QueueEngine, QueueStore};
use serde::{Deserialize, Serialize};

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: String,
    pub version: String,
}

impl Default for BuildInfo {
    fn default() -> Self {
        Self {
            service: "cq-daemon".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub build: BuildInfo,
    pub engine: QueueEngine,
    /// SHA-256 of the effective configuration, if loaded from files.
    pub config_hash: Option<String>,
}

impl AppState {
    pub fn new(store: Arc<dyn QueueStore>, settings: EngineSettings) -> Self {
        Self {
            build: BuildInfo::default(),
            engine: QueueEngine::new(store, settings),
            config_hash: None,
        }
    }

    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = Some(hash.into());
        self
    }
}

pub fn engine_settings(cfg: &EngineConfig) -> EngineSettings {
    EngineSettings {
        admission_identity: cfg.admission_identity,
        call_identity: cfg.call_identity,
        waiting_list_nulls: cfg.waiting_list_nulls,
    }
}

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}
