//! Cache engine: cacheability, keys and single-block operations.

use std::{collections::HashSet, sync::Arc};

use metrics::counter;
use tracing::{debug, instrument, warn};

use crate::application::{
    error::AppError,
    loader::BlockLoader,
    parents::{ParentRegistry, parent_sites},
    render::{BlockRenderer, RenderContext, site_from_context},
};
use crate::domain::{
    blocks::BlockNode,
    entities::{BlockRecord, ParentRecord, Site, TemplateRecord},
    types::BlockId,
};

use super::config::CacheConfig;
use super::inflight::InFlightRenders;
use super::keys::CacheKey;
use super::store::CacheStore;

const METRIC_HIT: &str = "content_blocks_cache_hit_total";
const METRIC_MISS: &str = "content_blocks_cache_miss_total";
const METRIC_SET: &str = "content_blocks_cache_set_total";
const METRIC_DELETE: &str = "content_blocks_cache_delete_total";
const METRIC_INFLIGHT_WAIT: &str = "content_blocks_inflight_wait_total";

/// Gates, keys and mutates cached block HTML.
#[derive(Clone)]
pub struct CacheEngine {
    pub(super) config: CacheConfig,
    pub(super) store: Arc<dyn CacheStore>,
    pub(super) renderer: BlockRenderer,
    pub(super) loader: BlockLoader,
    pub(super) parents: ParentRegistry,
    inflight: InFlightRenders,
}

impl CacheEngine {
    pub fn new(
        config: CacheConfig,
        store: Arc<dyn CacheStore>,
        renderer: BlockRenderer,
        loader: BlockLoader,
        parents: ParentRegistry,
    ) -> Self {
        Self {
            config,
            store,
            renderer,
            loader,
            parents,
            inflight: InFlightRenders::new(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn renderer(&self) -> &BlockRenderer {
        &self.renderer
    }

    pub fn loader(&self) -> &BlockLoader {
        &self.loader
    }

    pub fn parents(&self) -> &ParentRegistry {
        &self.parents
    }

    /// Cacheability of a block given its template.
    pub fn can_cache_record(&self, block: &BlockRecord, template: &TemplateRecord) -> bool {
        self.config.is_enabled()
            && !block.draft
            && block.parent.is_none()
            && !template.no_cache
            && self.renderer.can_render(template)
    }

    pub fn can_cache(&self, block: &BlockNode) -> bool {
        self.can_cache_record(&block.block, &block.template)
    }

    pub fn cache_key(&self, block: BlockId, site: Option<&Site>) -> CacheKey {
        CacheKey::for_block(&self.config.prefix, block, site.map(|site| site.id))
    }

    /// Raw store lookup.
    pub async fn get_cache(
        &self,
        block: BlockId,
        site: Option<&Site>,
    ) -> Result<Option<String>, AppError> {
        let key = self.cache_key(block, site);
        Ok(self.store.get(&key).await?)
    }

    /// Overwrite the entry for `block`; no-op unless the block is cacheable.
    pub async fn set_cache(
        &self,
        block: &BlockNode,
        html: &str,
        site: Option<&Site>,
    ) -> Result<(), AppError> {
        if !self.can_cache(block) {
            return Ok(());
        }
        let key = self.cache_key(block.id(), site);
        self.store.set(&key, html).await?;
        counter!(METRIC_SET).increment(1);
        debug!(block_id = %block.id(), cache_key = %key, "cache entry written");
        Ok(())
    }

    /// Delete the entry for `block` and for every ancestor holding it.
    #[instrument(skip(self, block, site), fields(block_id = %block.id))]
    pub async fn delete_cache(
        &self,
        block: &BlockRecord,
        site: Option<&Site>,
    ) -> Result<(), AppError> {
        let mut visited = HashSet::new();
        let mut current = Some(block.clone());
        while let Some(record) = current {
            if !self.enter_ancestor(&mut visited, record.id, "delete_cache") {
                break;
            }
            let key = self.cache_key(record.id, site);
            self.store.delete(&key).await?;
            counter!(METRIC_DELETE).increment(1);
            current = self.loader.owning_block(&record).await?;
        }
        Ok(())
    }

    /// Return the cached HTML, rendering and storing it on a miss.
    #[instrument(skip(self, block, context, site), fields(block_id = %block.id()))]
    pub async fn get_or_set_cache(
        &self,
        block: &BlockNode,
        context: Option<RenderContext>,
        site: Option<&Site>,
    ) -> Result<String, AppError> {
        let context_site = match site {
            Some(_) => None,
            None => context.as_ref().and_then(site_from_context),
        };
        let site = site.or(context_site.as_ref());
        let key = self.cache_key(block.id(), site);

        if let Some(html) = self.store.get(&key).await? {
            counter!(METRIC_HIT).increment(1);
            return Ok(html);
        }

        let _guard = if self.config.dedupe_inflight {
            let (guard, waited) = self.inflight.acquire(&key).await;
            if waited {
                counter!(METRIC_INFLIGHT_WAIT).increment(1);
            }
            // A previous holder may have stored the entry since the first lookup.
            if let Some(html) = self.store.get(&key).await? {
                counter!(METRIC_HIT).increment(1);
                return Ok(html);
            }
            Some(guard)
        } else {
            None
        };

        counter!(METRIC_MISS).increment(1);
        let html = self.renderer.render_html(block, context, site)?;
        self.set_cache(block, &html, site).await?;
        Ok(html)
    }

    /// Render `block` afresh and store it when cacheable.
    pub async fn set_cache_content_block(
        &self,
        block: &BlockNode,
        site: Option<&Site>,
    ) -> Result<(), AppError> {
        if !self.can_cache(block) {
            return Ok(());
        }
        let html = self.renderer.render_html(block, None, site)?;
        self.set_cache(block, &html, site).await
    }

    /// Re-render and overwrite the entry of `block` and of every ancestor.
    ///
    /// Each level is reloaded from storage first, so the HTML always reflects
    /// the current field values.
    #[instrument(skip(self, context, site), fields(block_id = %block))]
    pub async fn update_cache(
        &self,
        block: BlockId,
        context: Option<RenderContext>,
        site: Option<&Site>,
    ) -> Result<(), AppError> {
        let mut visited = HashSet::new();
        let mut current = Some(self.loader.find(block).await?);
        while let Some(record) = current {
            if !self.enter_ancestor(&mut visited, record.id, "update_cache") {
                break;
            }
            // Nested blocks are only ever cached as part of their root.
            if record.parent.is_none() {
                let node = self.loader.load_record(record.clone()).await?;
                if self.can_cache(&node) {
                    let html = self.renderer.render_html(&node, context.clone(), site)?;
                    self.set_cache(&node, &html, site).await?;
                }
            }
            current = self.loader.owning_block(&record).await?;
        }
        Ok(())
    }

    pub async fn get_or_set_cache_per_site(
        &self,
        block: &BlockNode,
        sites: &[Option<Site>],
    ) -> Result<Vec<String>, AppError> {
        let mut rendered = Vec::with_capacity(sites.len());
        for site in sites {
            rendered.push(self.get_or_set_cache(block, None, site.as_ref()).await?);
        }
        Ok(rendered)
    }

    pub async fn set_cache_per_site(
        &self,
        block: &BlockNode,
        sites: &[Option<Site>],
    ) -> Result<(), AppError> {
        for site in sites {
            self.set_cache_content_block(block, site.as_ref()).await?;
        }
        Ok(())
    }

    pub async fn delete_cache_per_site(
        &self,
        block: &BlockRecord,
        sites: &[Option<Site>],
    ) -> Result<(), AppError> {
        for site in sites {
            self.delete_cache(block, site.as_ref()).await?;
        }
        Ok(())
    }

    /// Refresh `block` for every site of `parent`.
    pub async fn set_cache_content_block_parent(
        &self,
        block: &BlockNode,
        parent: &ParentRecord,
    ) -> Result<(), AppError> {
        self.set_cache_per_site(block, &parent_sites(parent)).await
    }

    /// Track one step of an ancestor walk; false stops the walk.
    fn enter_ancestor(
        &self,
        visited: &mut HashSet<BlockId>,
        block: BlockId,
        op: &'static str,
    ) -> bool {
        if visited.len() >= self.config.max_nesting_depth {
            warn!(
                op,
                block_id = %block,
                limit = self.config.max_nesting_depth,
                "ancestor walk hit the nesting depth guard"
            );
            return false;
        }
        if !visited.insert(block) {
            warn!(op, block_id = %block, "ancestor walk found a parent cycle");
            return false;
        }
        true
    }
}
