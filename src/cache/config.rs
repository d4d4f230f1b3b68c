//! Cache configuration.
//!
//! Controls the rendered-block cache via the `[cache]` settings section.

use std::num::NonZeroUsize;

use serde::Deserialize;

use crate::application::loader::DEFAULT_MAX_NESTING_DEPTH;

const DEFAULT_PREFIX: &str = "content_blocks";
const DEFAULT_MEMORY_LIMIT: usize = 1000;

/// Which store holds rendered HTML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// Process-local LRU.
    Memory,
    /// Shared table in the application database.
    Database,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Global cache disable flag.
    pub disabled: bool,
    /// Prefix of every cache key.
    pub prefix: String,
    pub backend: CacheBackend,
    /// Capacity of the memory backend.
    pub memory_limit: usize,
    /// Serialize concurrent misses for the same key.
    pub dedupe_inflight: bool,
    /// Upper bound on ancestor walks and tree loads.
    pub max_nesting_depth: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            prefix: DEFAULT_PREFIX.to_string(),
            backend: CacheBackend::Database,
            memory_limit: DEFAULT_MEMORY_LIMIT,
            dedupe_inflight: true,
            max_nesting_depth: DEFAULT_MAX_NESTING_DEPTH,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            disabled: settings.disabled,
            prefix: settings.prefix.clone(),
            backend: settings.backend,
            memory_limit: settings.memory_limit,
            dedupe_inflight: settings.dedupe_inflight,
            max_nesting_depth: settings.max_nesting_depth,
        }
    }
}

impl CacheConfig {
    pub fn is_enabled(&self) -> bool {
        !self.disabled
    }

    /// Returns the memory limit as NonZeroUsize, clamping to 1 if zero.
    pub fn memory_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.memory_limit).unwrap_or(NonZeroUsize::MIN)
    }
}
