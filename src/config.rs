//! Relation configuration

use crate::cache::CacheManager;
use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Tuning knobs shared by every relation kind.
#[derive(Clone, Serialize, Deserialize)]
pub struct RelationConfig {
    /// Maximum substitutions per flush
    pub batch_size: usize,
    /// Idle delay before flushing a non-full batch
    pub debounce_ms: u64,
    pub enable_caching: bool,
    pub enable_query_merging: bool,
    /// Custom cache implementation; defaults to the substitution-scoped one
    #[serde(skip)]
    pub cache_manager: Option<Arc<dyn CacheManager>>,
}

impl Default for RelationConfig {
    fn default() -> Self {
        RelationConfig {
            batch_size: 100,
            debounce_ms: 50,
            enable_caching: true,
            enable_query_merging: true,
            cache_manager: None,
        }
    }
}

impl RelationConfig {
    /// Preset for REST-backed relations: smaller batches, a longer debounce,
    /// and no query merging.
    pub fn rest_defaults() -> Self {
        RelationConfig {
            batch_size: 50,
            debounce_ms: 100,
            enable_query_merging: false,
            ..RelationConfig::default()
        }
    }

    /// Construction-time validation; relations fail fast on a bad config.
    pub fn validate(&self) -> EngineResult<()> {
        if self.batch_size == 0 {
            return Err(EngineError::Config("batch_size must be > 0".to_string()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for RelationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationConfig")
            .field("batch_size", &self.batch_size)
            .field("debounce_ms", &self.debounce_ms)
            .field("enable_caching", &self.enable_caching)
            .field("enable_query_merging", &self.enable_query_merging)
            .field("custom_cache", &self.cache_manager.is_some())
            .finish()
    }
}

/// Per-relation options, passed through to the store inside `QueryParams`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationOptions {
    /// Primary key hint
    pub primary_key: Option<String>,
    /// Projection override; when set, replaces the planner's column union
    pub select_columns: Option<Vec<String>>,
    /// Columns that never receive WHERE conditions
    pub full_scan_keys: Vec<String>,
    /// REST-specific primary key (path substitution)
    pub rest_primary_key: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let config = RelationConfig::default();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.debounce_ms, 50);
        assert!(config.enable_caching);
        assert!(config.enable_query_merging);

        let rest = RelationConfig::rest_defaults();
        assert_eq!(rest.batch_size, 50);
        assert_eq!(rest.debounce_ms, 100);
        assert!(!rest.enable_query_merging);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let config = RelationConfig {
            batch_size: 0,
            ..RelationConfig::default()
        };
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }
}
