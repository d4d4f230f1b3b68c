//! Parent enumeration.
//!
//! A parent is any persisted entity owning a collection of top-level blocks.
//! Kinds declare that capability explicitly by implementing
//! [`HasBlockCollection`] and registering with a [`ParentRegistry`]; site
//! fan-out comes from [`HasSiteAssociation`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::application::{error::AppError, repos::ParentsRepo};
use crate::domain::entities::{BlockRecord, ParentRecord, ParentRef, Site, SiteRelation};

/// Kind name of the built-in slug-keyed block collection.
pub const COLLECTION_KIND: &str = "collection";

#[async_trait]
pub trait HasBlockCollection: Send + Sync {
    fn kind(&self) -> &str;

    /// Every instance of this kind.
    async fn parents(&self) -> Result<Vec<ParentRecord>, AppError>;

    /// Top-level blocks referenced by one instance, ordered by position.
    async fn blocks(&self, parent: &ParentRef) -> Result<Vec<BlockRecord>, AppError>;
}

pub trait HasSiteAssociation {
    fn site_relation(&self) -> &SiteRelation;
}

impl HasSiteAssociation for ParentRecord {
    fn site_relation(&self) -> &SiteRelation {
        &self.sites
    }
}

/// Sites to cache a parent's blocks for.
///
/// No relation yields `[None]`, a single reference yields `[site]` and a
/// multi-valued relation yields its members, possibly none.
pub fn parent_sites(parent: &impl HasSiteAssociation) -> Vec<Option<Site>> {
    match parent.site_relation() {
        SiteRelation::Absent => vec![None],
        SiteRelation::Single(site) => vec![site.clone()],
        SiteRelation::Many(sites) => sites.iter().cloned().map(Some).collect(),
    }
}

/// Parent kind stored in the shared parents tables.
pub struct StoredParentKind {
    kind: String,
    parents: Arc<dyn ParentsRepo>,
}

impl StoredParentKind {
    pub fn new(kind: impl Into<String>, parents: Arc<dyn ParentsRepo>) -> Self {
        Self {
            kind: kind.into(),
            parents,
        }
    }
}

#[async_trait]
impl HasBlockCollection for StoredParentKind {
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn parents(&self) -> Result<Vec<ParentRecord>, AppError> {
        Ok(self.parents.list_parents(&self.kind).await?)
    }

    async fn blocks(&self, parent: &ParentRef) -> Result<Vec<BlockRecord>, AppError> {
        Ok(self.parents.parent_blocks(parent).await?)
    }
}

/// Registry of parent kinds known to own blocks.
#[derive(Clone, Default)]
pub struct ParentRegistry {
    kinds: Vec<Arc<dyn HasBlockCollection>>,
}

impl ParentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry of stored kinds backed by one repository.
    pub fn stored(parents: Arc<dyn ParentsRepo>, kinds: &[&str]) -> Self {
        let mut registry = Self::new();
        for kind in kinds {
            registry.register(Arc::new(StoredParentKind::new(*kind, parents.clone())));
        }
        registry
    }

    pub fn register(&mut self, kind: Arc<dyn HasBlockCollection>) {
        if self.find(kind.kind()).is_none() {
            self.kinds.push(kind);
        }
    }

    pub fn parent_models(&self) -> &[Arc<dyn HasBlockCollection>] {
        &self.kinds
    }

    pub fn find(&self, kind: &str) -> Option<&Arc<dyn HasBlockCollection>> {
        self.kinds.iter().find(|candidate| candidate.kind() == kind)
    }
}
