//! Cache key definitions.

use std::fmt;

use crate::domain::types::{BlockId, SiteId};

/// Store key of a block's rendered HTML, optionally bound to a site.
///
/// `{prefix}_{block}` or `{prefix}_{block}_site_{site}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn for_block(prefix: &str, block: BlockId, site: Option<SiteId>) -> Self {
        match site {
            Some(site) => Self(format!("{prefix}_{block}_site_{site}")),
            None => Self(format!("{prefix}_{block}")),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
