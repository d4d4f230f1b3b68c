//! Shared fixtures: in-memory repositories, a counting renderer and a
//! memory-backed cache wired into [`ContentBlocks`].

#![allow(dead_code)]

use std::{
    collections::HashSet,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use content_blocks::{
    application::{
        content_blocks::{ContentBlocks, ContentBlocksConfig},
        render::{RenderContext, RenderError, TemplateRenderer},
        repos::{
            BlocksWriteRepo, ParentsRepo, Repositories, TemplatesWriteRepo,
            UpsertTemplateFieldParams, UpsertTemplateParams,
        },
    },
    cache::{CacheBackend, CacheConfig, MemoryCacheStore},
    domain::{
        entities::{BlockRecord, ParentRef, TemplateFieldRecord, TemplateRecord},
        types::{FieldType, TemplateId},
    },
    infra::memory::InMemoryRepositories,
};
use serde_json::Value;

/// Renders `[template|site=..|context]` and counts every call.
///
/// Templates whose id contains `missing` do not exist; those containing
/// `broken` exist but fail to render.
#[derive(Default)]
pub struct CountingRenderer {
    renders: AtomicUsize,
    rendered: Mutex<Vec<String>>,
    removed: Mutex<HashSet<String>>,
}

impl CountingRenderer {
    pub fn count(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }

    /// Template ids rendered so far, in call order.
    pub fn rendered(&self) -> Vec<String> {
        self.rendered.lock().unwrap().clone()
    }

    /// Make `template` stop resolving, as if its file was deleted.
    pub fn remove(&self, template: &str) {
        self.removed.lock().unwrap().insert(template.to_string());
    }
}

impl TemplateRenderer for CountingRenderer {
    fn exists(&self, template: &str) -> bool {
        !template.contains("missing") && !self.removed.lock().unwrap().contains(template)
    }

    fn render(&self, template: &str, context: &RenderContext) -> Result<String, RenderError> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        self.rendered.lock().unwrap().push(template.to_string());
        if template.contains("broken") {
            return Err(RenderError::template(template, "boom"));
        }
        let site = context
            .get("request")
            .and_then(|request| request.get("site"))
            .and_then(|site| site.get("id"))
            .map(Value::to_string)
            .unwrap_or_else(|| "none".to_string());
        let block = context.get("content_block").cloned().unwrap_or(Value::Null);
        Ok(format!("[{template}|site={site}|{block}]"))
    }
}

pub struct Harness {
    pub repo: Arc<InMemoryRepositories>,
    pub renderer: Arc<CountingRenderer>,
    pub store: Arc<MemoryCacheStore>,
    pub app: ContentBlocks,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(memory_config())
    }

    pub fn with_config(config: ContentBlocksConfig) -> Self {
        let repo = Arc::new(InMemoryRepositories::new());
        let renderer = Arc::new(CountingRenderer::default());
        let store = Arc::new(MemoryCacheStore::new(&config.cache));
        let app = ContentBlocks::new(
            Repositories::from_shared(repo.clone()),
            renderer.clone(),
            store.clone(),
            config,
        );
        Self {
            repo,
            renderer,
            store,
            app,
        }
    }

    pub async fn template(&self, name: &str, filename: &str) -> TemplateRecord {
        self.upsert_template(name, filename, false).await
    }

    pub async fn uncached_template(&self, name: &str, filename: &str) -> TemplateRecord {
        self.upsert_template(name, filename, true).await
    }

    async fn upsert_template(&self, name: &str, filename: &str, no_cache: bool) -> TemplateRecord {
        self.repo
            .upsert_template(UpsertTemplateParams {
                name: name.to_string(),
                template_filename: filename.to_string(),
                no_cache,
                position: 0,
                visible: true,
            })
            .await
            .unwrap()
    }

    pub async fn field(
        &self,
        template: &TemplateRecord,
        key: &str,
        field_type: FieldType,
    ) -> TemplateFieldRecord {
        self.template_field(template, key, field_type, Vec::new(), 0, None)
            .await
    }

    pub async fn nested_field(
        &self,
        template: &TemplateRecord,
        key: &str,
        allowed: &[TemplateId],
        min_num: i32,
    ) -> TemplateFieldRecord {
        self.template_field(template, key, FieldType::Nested, allowed.to_vec(), min_num, None)
            .await
    }

    pub async fn template_field(
        &self,
        template: &TemplateRecord,
        key: &str,
        field_type: FieldType,
        nested_templates: Vec<TemplateId>,
        min_num: i32,
        model_choice_content_type: Option<String>,
    ) -> TemplateFieldRecord {
        self.repo
            .upsert_template_field(UpsertTemplateFieldParams {
                template_id: template.id,
                key: key.to_string(),
                field_type,
                required: false,
                help_text: String::new(),
                css_class: String::new(),
                position: 0,
                min_num,
                max_num: 3,
                nested_templates,
                choices: String::new(),
                model_choice_content_type,
            })
            .await
            .unwrap()
            .field
    }

    /// A saved, published top-level block attached to `parent`.
    pub async fn published(&self, parent: &ParentRef, template: &TemplateRecord) -> BlockRecord {
        self.attached(parent, template, false).await
    }

    /// A saved draft attached to `parent`.
    pub async fn draft(&self, parent: &ParentRef, template: &TemplateRecord) -> BlockRecord {
        self.attached(parent, template, true).await
    }

    async fn attached(
        &self,
        parent: &ParentRef,
        template: &TemplateRecord,
        draft: bool,
    ) -> BlockRecord {
        let position = self.repo.parent_blocks(parent).await.unwrap().len() as i32;
        let mut block = self
            .app
            .editor()
            .create_content_block(template.id, draft, None, position)
            .await
            .unwrap();
        block.saved = true;
        let block = self.repo.update_block(&block).await.unwrap();
        self.repo.attach_block(parent, block.id).await.unwrap();
        block
    }
}

pub fn memory_config() -> ContentBlocksConfig {
    ContentBlocksConfig {
        cache: CacheConfig {
            backend: CacheBackend::Memory,
            ..CacheConfig::default()
        },
        ..ContentBlocksConfig::default()
    }
}

pub fn object(value: Value) -> RenderContext {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}
