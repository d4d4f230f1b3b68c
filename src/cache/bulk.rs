//! Bulk cache population and invalidation across every registered parent.
//!
//! These are full scans without pagination; they back management commands
//! and startup warm-up, never the request path.

use std::{collections::HashMap, time::Instant};

use tracing::{info, instrument, warn};

use crate::application::{
    error::AppError,
    filters::{BlockSubset, is_cacheable},
    parents::{HasBlockCollection, parent_sites},
};
use crate::domain::{
    entities::{BlockRecord, ParentRecord, TemplateRecord},
    types::{BlockId, TemplateId},
};

use super::engine::CacheEngine;

/// Outcome counters of a bulk operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkReport {
    pub parents: usize,
    pub blocks: usize,
    /// Blocks skipped because their template file does not resolve.
    pub unrenderable: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BulkOp {
    GetOrSet,
    Set,
    Delete,
}

impl BulkOp {
    fn name(self) -> &'static str {
        match self {
            BulkOp::GetOrSet => "get_or_set_cache_all",
            BulkOp::Set => "set_cache_all",
            BulkOp::Delete => "delete_cache_all",
        }
    }
}

/// Per-operation template memo; templates are immutable for the duration.
#[derive(Default)]
struct TemplateLookup(HashMap<TemplateId, Option<TemplateRecord>>);

impl CacheEngine {
    /// Populate missing entries for every cacheable block of every parent.
    pub async fn get_or_set_cache_all(&self) -> Result<BulkReport, AppError> {
        if !self.config.is_enabled() {
            return Ok(BulkReport::default());
        }
        self.run_bulk(BulkOp::GetOrSet, &BlockSubset::all()).await
    }

    /// Re-render every cacheable block, optionally limited to `subset`.
    pub async fn set_cache_all(&self, subset: &BlockSubset) -> Result<BulkReport, AppError> {
        if !self.config.is_enabled() {
            return Ok(BulkReport::default());
        }
        self.run_bulk(BulkOp::Set, subset).await
    }

    /// Drop the entries of every cacheable block of every parent.
    pub async fn delete_cache_all(&self) -> Result<BulkReport, AppError> {
        self.run_bulk(BulkOp::Delete, &BlockSubset::all()).await
    }

    /// Re-set blocks whose template uses `filename` after its source changed.
    #[instrument(skip(self))]
    pub async fn refresh_template(&self, filename: &str) -> Result<BulkReport, AppError> {
        let repos = self.loader.repos();
        let templates: Vec<TemplateId> = repos
            .templates
            .templates_with_filename(filename)
            .await?
            .into_iter()
            .map(|template| template.id)
            .collect();
        if templates.is_empty() {
            return Ok(BulkReport::default());
        }
        let blocks = repos.blocks.blocks_with_templates(&templates).await?;
        let subset = BlockSubset::only(blocks.into_iter().map(|block| block.id));
        self.set_cache_all(&subset).await
    }

    /// Re-set the roots of every block pointing at a changed entity.
    #[instrument(skip(self))]
    pub async fn refresh_model_choice(
        &self,
        content_type: &str,
        object_id: i64,
    ) -> Result<usize, AppError> {
        let referencing = self
            .loader
            .repos()
            .blocks
            .blocks_referencing(content_type, object_id)
            .await?;
        self.refresh_blocks(&referencing).await
    }

    /// Re-set the top-level ancestors of `blocks` across their parents' sites.
    /// Returns the number of distinct roots refreshed.
    pub async fn refresh_blocks(&self, blocks: &[BlockId]) -> Result<usize, AppError> {
        let mut roots = Vec::new();
        for id in blocks {
            let record = self.loader.find(*id).await?;
            let root = self.loader.root_of(record).await?;
            if !roots.contains(&root.id) {
                roots.push(root.id);
            }
        }

        let repos = self.loader.repos();
        for root in &roots {
            let node = self.loader.load(*root).await?;
            let parents = repos.parents.parents_of_block(*root).await?;
            if parents.is_empty() {
                self.set_cache_content_block(&node, None).await?;
                continue;
            }
            for parent in parents {
                if let Some(parent) = repos.parents.find_parent(&parent).await? {
                    self.set_cache_content_block_parent(&node, &parent).await?;
                }
            }
        }
        Ok(roots.len())
    }

    #[instrument(skip(self, subset), fields(op = op.name()))]
    async fn run_bulk(&self, op: BulkOp, subset: &BlockSubset) -> Result<BulkReport, AppError> {
        let started = Instant::now();
        let mut report = BulkReport::default();
        let mut templates = TemplateLookup::default();

        for kind in self.parents.parent_models() {
            for parent in kind.parents().await? {
                report.parents += 1;
                self.run_parent(op, kind.as_ref(), &parent, subset, &mut templates, &mut report)
                    .await?;
            }
        }

        info!(
            op = op.name(),
            parents = report.parents,
            blocks = report.blocks,
            unrenderable = report.unrenderable,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "bulk cache operation finished"
        );
        Ok(report)
    }

    async fn run_parent(
        &self,
        op: BulkOp,
        kind: &dyn HasBlockCollection,
        parent: &ParentRecord,
        subset: &BlockSubset,
        templates: &mut TemplateLookup,
        report: &mut BulkReport,
    ) -> Result<(), AppError> {
        let sites = parent_sites(parent);
        for block in kind.blocks(&parent.parent).await? {
            if !subset.contains(block.id) {
                continue;
            }
            let Some(template) = self.template_for(&block, templates).await? else {
                continue;
            };
            if !is_cacheable(&block, template.filename().is_some()) {
                continue;
            }

            match op {
                BulkOp::Delete => {
                    self.delete_cache_per_site(&block, &sites).await?;
                }
                BulkOp::GetOrSet | BulkOp::Set => {
                    if !self.renderer.can_render(&template) {
                        warn!(
                            block_id = %block.id,
                            parent = %parent.parent,
                            template = %template.template_filename,
                            "block cannot render; skipped during bulk cache population"
                        );
                        report.unrenderable += 1;
                        continue;
                    }
                    if op == BulkOp::GetOrSet && !self.can_cache_record(&block, &template) {
                        continue;
                    }
                    let node = self.loader.load_record(block).await?;
                    if op == BulkOp::GetOrSet {
                        self.get_or_set_cache_per_site(&node, &sites).await?;
                    } else {
                        self.set_cache_per_site(&node, &sites).await?;
                    }
                }
            }
            report.blocks += 1;
        }
        Ok(())
    }

    async fn template_for(
        &self,
        block: &BlockRecord,
        templates: &mut TemplateLookup,
    ) -> Result<Option<TemplateRecord>, AppError> {
        if let Some(template) = templates.0.get(&block.template_id) {
            return Ok(template.clone());
        }
        let template = self
            .loader
            .repos()
            .templates
            .find_template(block.template_id)
            .await?;
        templates.0.insert(block.template_id, template.clone());
        Ok(template)
    }
}
