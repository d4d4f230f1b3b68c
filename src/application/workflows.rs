//! Publish, reset and import of a parent's blocks.
//!
//! Each workflow replaces one state (drafts or published) of a parent with
//! clones of the other. Callers own the transaction boundary.

use tracing::{info, instrument};

use crate::application::{
    clone::{CloneEngine, CloneOverrides},
    error::AppError,
    loader::BlockLoader,
    parents::parent_sites,
    repos::Repositories,
};
use crate::cache::CacheEngine;
use crate::domain::{
    entities::{BlockRecord, ParentRecord, ParentRef},
    types::BlockId,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowReport {
    pub removed: Vec<BlockId>,
    pub created: Vec<BlockId>,
}

#[derive(Clone)]
pub struct BlockWorkflows {
    repos: Repositories,
    loader: BlockLoader,
    cloner: CloneEngine,
    cache: CacheEngine,
    pre_render: bool,
}

impl BlockWorkflows {
    pub fn new(
        repos: Repositories,
        loader: BlockLoader,
        cache: CacheEngine,
        pre_render: bool,
    ) -> Self {
        Self {
            cloner: CloneEngine::new(repos.clone()),
            repos,
            loader,
            cache,
            pre_render,
        }
    }

    /// Replace the published blocks of `parent` with published clones of its drafts.
    #[instrument(skip(self), fields(parent = %parent))]
    pub async fn publish(&self, parent: &ParentRef) -> Result<WorkflowReport, AppError> {
        let record = self.find_parent(parent).await?;
        let sites = parent_sites(&record);
        let blocks = self.repos.parents.parent_blocks(parent).await?;
        let (drafts, published): (Vec<BlockRecord>, Vec<BlockRecord>) =
            blocks.into_iter().partition(|block| block.draft);

        for block in &published {
            self.cache.delete_cache_per_site(block, &sites).await?;
        }
        let removed = ids(&published);
        self.repos.block_writes.delete_blocks(&removed).await?;

        let mut created = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let node = self.loader.load_record(draft).await?;
            let copy = self
                .cloner
                .clone_content_block(&node, CloneOverrides::draft(false))
                .await?;
            self.repos.parents.attach_block(parent, copy.id).await?;

            if self.pre_render {
                let published = self.loader.load(copy.id).await?;
                self.cache
                    .set_cache_content_block_parent(&published, &record)
                    .await?;
            }
            created.push(copy.id);
        }

        info!(removed = removed.len(), created = created.len(), "blocks published");
        Ok(WorkflowReport { removed, created })
    }

    /// Replace the drafts of `parent` with draft clones of its published blocks.
    #[instrument(skip(self), fields(parent = %parent))]
    pub async fn reset(&self, parent: &ParentRef) -> Result<WorkflowReport, AppError> {
        self.find_parent(parent).await?;
        let blocks = self.repos.parents.parent_blocks(parent).await?;
        let (drafts, published): (Vec<BlockRecord>, Vec<BlockRecord>) =
            blocks.into_iter().partition(|block| block.draft);

        let removed = ids(&drafts);
        self.repos.block_writes.delete_blocks(&removed).await?;

        let mut created = Vec::with_capacity(published.len());
        for block in published {
            let node = self.loader.load_record(block).await?;
            let copy = self
                .cloner
                .clone_content_block(&node, CloneOverrides::draft(true))
                .await?;
            self.repos.parents.attach_block(parent, copy.id).await?;
            created.push(copy.id);
        }

        info!(removed = removed.len(), created = created.len(), "drafts reset");
        Ok(WorkflowReport { removed, created })
    }

    /// Replace the drafts of `target` with clones of the drafts of `master`.
    #[instrument(skip(self), fields(target = %target, master = %master))]
    pub async fn import(
        &self,
        target: &ParentRef,
        master: &ParentRef,
    ) -> Result<WorkflowReport, AppError> {
        if target.kind != master.kind {
            return Err(AppError::validation(format!(
                "cannot import `{}` blocks into a `{}` parent",
                master.kind, target.kind
            )));
        }
        if target == master {
            return Err(AppError::validation("a parent cannot import its own blocks"));
        }
        self.find_parent(target).await?;
        self.find_parent(master).await?;

        let existing = self.repos.parents.parent_blocks(target).await?;
        let removed: Vec<BlockId> = existing
            .iter()
            .filter(|block| block.draft)
            .map(|block| block.id)
            .collect();
        self.repos.block_writes.delete_blocks(&removed).await?;

        let mut created = Vec::new();
        for block in self.repos.parents.parent_blocks(master).await? {
            if !block.draft {
                continue;
            }
            let node = self.loader.load_record(block).await?;
            let copy = self
                .cloner
                .clone_content_block(&node, CloneOverrides::default())
                .await?;
            self.repos.parents.attach_block(target, copy.id).await?;
            created.push(copy.id);
        }

        info!(removed = removed.len(), created = created.len(), "drafts imported");
        Ok(WorkflowReport { removed, created })
    }

    async fn find_parent(&self, parent: &ParentRef) -> Result<ParentRecord, AppError> {
        self.repos
            .parents
            .find_parent(parent)
            .await?
            .ok_or_else(|| AppError::not_found("parent", parent))
    }
}

fn ids(blocks: &[BlockRecord]) -> Vec<BlockId> {
    blocks.iter().map(|block| block.id).collect()
}
