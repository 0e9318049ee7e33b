//! Engine-wide settings, loadable from JSON; every field has a default.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    core::store::{DocStore, DEFAULT_MAX_BATCH_OPS},
    import::plan::ImportDefaults,
    persist::{sqlite::SqliteOpSink, PersistResult},
    runtime::handle::{spawn_store, RuntimeConfig, StoreHandle},
    timing::{presence::PresenceThresholds, recorder::DEFAULT_FINISH_NAME},
};

/// Failure to read or decode a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("reading config: {0}")]
    Io(#[from] std::io::Error),
    /// Config file is not valid JSON for these settings.
    #[error("parsing config: {0}")]
    Json(#[from] serde_json::Error),
}

/// Every tunable of a timing station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Single-writer runtime and persistence worker settings.
    pub runtime: RuntimeConfig,
    /// Ceiling on the ops of one atomic batch.
    pub max_batch_ops: usize,
    /// Chunk size of resets, purges and oversized imports.
    pub chunk_size: usize,
    /// Marshal liveness limits and heartbeat period.
    pub presence: PresenceThresholds,
    /// Checkpoint name written on finish passages.
    pub finish_name: String,
    /// Fallback values of unmapped import columns.
    pub import: ImportDefaults,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            runtime: RuntimeConfig::default(),
            max_batch_ops: DEFAULT_MAX_BATCH_OPS,
            chunk_size: DEFAULT_MAX_BATCH_OPS,
            presence: PresenceThresholds::default(),
            finish_name: DEFAULT_FINISH_NAME.to_string(),
            import: ImportDefaults::default(),
        }
    }
}

impl EngineConfig {
    /// Parses JSON; absent fields take their defaults.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Reads and parses a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Chunk size clamped to the batch ceiling.
    pub fn effective_chunk_size(&self) -> usize {
        self.chunk_size.clamp(1, self.max_batch_ops.max(1))
    }

    /// Empty store honoring the configured batch ceiling.
    pub fn new_store(&self) -> DocStore {
        DocStore::with_batch_ceiling(self.max_batch_ops)
    }

    /// Store replayed from `sink`, honoring the configured batch ceiling.
    pub fn load_store(&self, sink: &SqliteOpSink) -> PersistResult<DocStore> {
        sink.load_store_with_ceiling(self.max_batch_ops)
    }

    /// Starts the runtime over `store`, journaling to `sink` when given.
    pub fn spawn(&self, store: DocStore, sink: Option<SqliteOpSink>) -> StoreHandle {
        let sink = sink.map(|s| Box::new(s) as Box<dyn crate::persist::OpSink>);
        spawn_store(store, sink, self.runtime.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = EngineConfig::from_json_str(
            r#"{ "chunk_size": 50, "presence": { "online_ms": 5000 }, "runtime": { "flush_on_passage": false } }"#,
        )
        .unwrap();
        assert_eq!(cfg.chunk_size, 50);
        assert_eq!(cfg.presence.online_ms, 5000);
        assert_eq!(cfg.presence.away_ms, 120_000);
        assert!(!cfg.runtime.flush_on_passage);
        assert_eq!(cfg.max_batch_ops, DEFAULT_MAX_BATCH_OPS);
        assert_eq!(cfg.finish_name, DEFAULT_FINISH_NAME);
    }

    #[test]
    fn chunk_size_never_exceeds_ceiling() {
        let cfg = EngineConfig {
            chunk_size: 1000,
            max_batch_ops: 100,
            ..EngineConfig::default()
        };
        assert_eq!(cfg.effective_chunk_size(), 100);
    }

    #[test]
    fn reloaded_store_keeps_configured_ceiling() {
        let cfg = EngineConfig::from_json_str(r#"{ "max_batch_ops": 10 }"#).unwrap();
        assert_eq!(cfg.new_store().max_batch_ops(), 10);

        let sink = SqliteOpSink::open_in_memory().unwrap();
        assert_eq!(cfg.load_store(&sink).unwrap().max_batch_ops(), 10);
        assert_eq!(sink.load_store().unwrap().max_batch_ops(), DEFAULT_MAX_BATCH_OPS);
    }
}
