//! Entry point wiring the render, cache, clone and editing services together.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::application::{
    editor::BlockEditor,
    error::AppError,
    loader::BlockLoader,
    parents::{COLLECTION_KIND, ParentRegistry, parent_sites},
    render::{BlockRenderer, RenderConfig, RenderContext, TemplateRenderer, site_from_context},
    repos::Repositories,
    templates::TemplateTransfer,
    workflows::BlockWorkflows,
};
use crate::cache::{CacheConfig, CacheEngine, CacheStore};
use crate::domain::{blocks::BlockNode, entities::ParentRef, types::BlockId};

#[derive(Debug, Clone)]
pub struct ContentBlocksConfig {
    pub cache: CacheConfig,
    pub render: RenderConfig,
    /// Populate the cache of freshly published blocks.
    pub pre_render: bool,
    /// Parent kinds whose blocks bulk operations visit.
    pub parent_kinds: Vec<String>,
}

impl Default for ContentBlocksConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            render: RenderConfig::default(),
            pre_render: true,
            parent_kinds: vec![COLLECTION_KIND.to_string()],
        }
    }
}

impl From<&crate::config::Settings> for ContentBlocksConfig {
    fn from(settings: &crate::config::Settings) -> Self {
        Self {
            cache: CacheConfig::from(&settings.cache),
            render: RenderConfig::from(&settings.render),
            pre_render: settings.render.pre_render,
            parent_kinds: settings.cache.parent_kinds.clone(),
        }
    }
}

#[derive(Clone)]
pub struct ContentBlocks {
    repos: Repositories,
    loader: BlockLoader,
    cache: CacheEngine,
    editor: BlockEditor,
    workflows: BlockWorkflows,
    templates: TemplateTransfer,
}

impl ContentBlocks {
    pub fn new(
        repos: Repositories,
        renderer: Arc<dyn TemplateRenderer>,
        store: Arc<dyn CacheStore>,
        config: ContentBlocksConfig,
    ) -> Self {
        let loader = BlockLoader::new(repos.clone(), config.cache.max_nesting_depth);
        let kinds: Vec<&str> = config.parent_kinds.iter().map(String::as_str).collect();
        let parents = ParentRegistry::stored(repos.parents.clone(), &kinds);
        Self::with_registry(repos, renderer, store, config, loader, parents)
    }

    /// Build with a caller-assembled parent registry.
    pub fn with_registry(
        repos: Repositories,
        renderer: Arc<dyn TemplateRenderer>,
        store: Arc<dyn CacheStore>,
        config: ContentBlocksConfig,
        loader: BlockLoader,
        parents: ParentRegistry,
    ) -> Self {
        let renderer = BlockRenderer::new(renderer, config.render.clone());
        let cache = CacheEngine::new(config.cache, store, renderer, loader.clone(), parents);
        Self {
            editor: BlockEditor::new(repos.clone(), loader.clone(), cache.clone()),
            workflows: BlockWorkflows::new(
                repos.clone(),
                loader.clone(),
                cache.clone(),
                config.pre_render,
            ),
            templates: TemplateTransfer::new(repos.clone(), cache.clone()),
            repos,
            loader,
            cache,
        }
    }

    pub fn cache(&self) -> &CacheEngine {
        &self.cache
    }

    pub fn renderer(&self) -> &BlockRenderer {
        self.cache.renderer()
    }

    pub fn loader(&self) -> &BlockLoader {
        &self.loader
    }

    pub fn editor(&self) -> &BlockEditor {
        &self.editor
    }

    pub fn workflows(&self) -> &BlockWorkflows {
        &self.workflows
    }

    pub fn templates(&self) -> &TemplateTransfer {
        &self.templates
    }

    /// Render a stored block, going through the cache when it is cacheable.
    pub async fn render_content_block(
        &self,
        block: BlockId,
        context: Option<RenderContext>,
    ) -> Result<String, AppError> {
        let node = self.loader.load(block).await?;
        self.render_node(&node, context).await
    }

    /// Render an already loaded block.
    #[instrument(skip(self, block, context), fields(block_id = %block.id()))]
    pub async fn render_node(
        &self,
        block: &BlockNode,
        context: Option<RenderContext>,
    ) -> Result<String, AppError> {
        let site = context.as_ref().and_then(site_from_context);
        if self.cache.can_cache(block) {
            self.cache
                .get_or_set_cache(block, context, site.as_ref())
                .await
        } else {
            Ok(self.renderer().render_html(block, context, site.as_ref())?)
        }
    }

    /// Delete `parent` and, explicitly, every block it references.
    #[instrument(skip(self), fields(parent = %parent))]
    pub async fn delete_parent(&self, parent: &ParentRef) -> Result<(), AppError> {
        let record = self
            .repos
            .parents
            .find_parent(parent)
            .await?
            .ok_or_else(|| AppError::not_found("parent", parent))?;
        let sites = parent_sites(&record);

        let blocks = self.repos.parents.parent_blocks(parent).await?;
        for block in &blocks {
            self.cache.delete_cache_per_site(block, &sites).await?;
        }
        let ids: Vec<BlockId> = blocks.iter().map(|block| block.id).collect();
        self.repos.block_writes.delete_blocks(&ids).await?;
        self.repos.parents.delete_parent(parent).await?;

        info!(blocks = ids.len(), "parent deleted");
        Ok(())
    }
}
