//! Rendered-block cache.
//!
//! Top-level published blocks are cached as rendered HTML, once per related
//! site. Nested blocks and drafts are never cached on their own; a nested
//! change refreshes or drops the entry of every ancestor instead.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! disabled = false
//! prefix = "content_blocks"
//! backend = "database"
//! memory_limit = 1000
//! dedupe_inflight = true
//! max_nesting_depth = 32
//! ```

mod bulk;
mod config;
mod engine;
mod inflight;
mod keys;
pub(crate) mod lock;
mod store;

pub use bulk::BulkReport;
pub use config::{CacheBackend, CacheConfig};
pub use engine::CacheEngine;
pub use inflight::{InFlightRenders, RenderGuard};
pub use keys::CacheKey;
pub use store::{CacheStore, CacheStoreError, MemoryCacheStore};
