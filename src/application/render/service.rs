use std::{sync::Arc, time::Instant};

use metrics::histogram;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::application::render::types::{RenderContext, RenderError, TemplateRenderer};
use crate::domain::{
    blocks::{BlockNode, ContextSlot},
    entities::{Site, TemplateRecord},
};

pub const DEFAULT_TEMPLATE_PREFIX: &str = "content_blocks/content_blocks";
pub const DEFAULT_CONTEXT_NAME: &str = "content_block";

/// Key under which a request-like object is looked up in a supplied context.
pub const REQUEST_KEY: &str = "request";

#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Directory prefix joined with a template's filename.
    pub template_prefix: String,
    /// Label of the block context inside the render context.
    pub context_name: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            template_prefix: DEFAULT_TEMPLATE_PREFIX.to_string(),
            context_name: DEFAULT_CONTEXT_NAME.to_string(),
        }
    }
}

impl From<&crate::config::RenderSettings> for RenderConfig {
    fn from(settings: &crate::config::RenderSettings) -> Self {
        Self {
            template_prefix: settings.template_prefix.clone(),
            context_name: settings.context_name.clone(),
        }
    }
}

/// Turns hydrated blocks into HTML through a [`TemplateRenderer`].
#[derive(Clone)]
pub struct BlockRenderer {
    renderer: Arc<dyn TemplateRenderer>,
    config: RenderConfig,
}

impl BlockRenderer {
    pub fn new(renderer: Arc<dyn TemplateRenderer>, config: RenderConfig) -> Self {
        Self { renderer, config }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Renderer identifier for a template, when it has a filename.
    pub fn template_id(&self, template: &TemplateRecord) -> Option<String> {
        let filename = template.filename()?;
        let prefix = self.config.template_prefix.trim_end_matches('/');
        if prefix.is_empty() {
            Some(filename.to_string())
        } else {
            Some(format!("{prefix}/{filename}"))
        }
    }

    /// A template can render when its filename is set and resolves.
    pub fn can_render(&self, template: &TemplateRecord) -> bool {
        self.template_id(template)
            .is_some_and(|id| self.renderer.exists(&id))
    }

    /// Fresh context of `block`: one entry per field key plus `css_class`.
    ///
    /// Nested fields expose their visible children as a list of
    /// `{id, css_class, context, html}` entries.
    pub fn block_context(
        &self,
        block: &BlockNode,
        base: &RenderContext,
        site: Option<&Site>,
    ) -> Result<Value, RenderError> {
        let mut context = Map::new();
        for field in &block.fields {
            let value = match field.context_slot() {
                ContextSlot::Value(value) => value,
                ContextSlot::Nested(children) => {
                    let mut items = Vec::with_capacity(children.len());
                    for child in children {
                        let child_context = self.block_context(child, base, site)?;
                        let html = self.render_with_context(child, &child_context, base, site)?;
                        items.push(json!({
                            "id": child.id().get(),
                            "css_class": child.block.css_class,
                            "context": child_context,
                            "html": html,
                        }));
                    }
                    Value::Array(items)
                }
            };
            context.insert(field.key().to_string(), value);
        }
        context.insert(
            "css_class".to_string(),
            Value::String(block.block.css_class.clone()),
        );
        Ok(Value::Object(context))
    }

    /// Render `block` to HTML, or `""` when its template cannot render.
    pub fn render_html(
        &self,
        block: &BlockNode,
        context: Option<RenderContext>,
        site: Option<&Site>,
    ) -> Result<String, RenderError> {
        let Some(template_id) = self.resolved_template(block) else {
            return Ok(String::new());
        };
        let base = context.unwrap_or_default();
        let block_context = self.block_context(block, &base, site)?;
        self.render_resolved(block, &template_id, &block_context, &base, site)
    }

    /// Render `block` with a context already built by [`Self::block_context`].
    /// Every block of a tree is rendered once per call.
    fn render_with_context(
        &self,
        block: &BlockNode,
        block_context: &Value,
        base: &RenderContext,
        site: Option<&Site>,
    ) -> Result<String, RenderError> {
        match self.resolved_template(block) {
            Some(template_id) => {
                self.render_resolved(block, &template_id, block_context, base, site)
            }
            None => Ok(String::new()),
        }
    }

    fn resolved_template(&self, block: &BlockNode) -> Option<String> {
        let template_id = self.template_id(&block.template)?;
        if !self.renderer.exists(&template_id) {
            debug!(
                block_id = %block.id(),
                template = %template_id,
                "block template missing; rendering empty"
            );
            return None;
        }
        Some(template_id)
    }

    fn render_resolved(
        &self,
        block: &BlockNode,
        template_id: &str,
        block_context: &Value,
        base: &RenderContext,
        site: Option<&Site>,
    ) -> Result<String, RenderError> {
        let mut merged = base.clone();
        merged.insert(self.config.context_name.clone(), block_context.clone());
        merged.insert(
            format!("{}_object", self.config.context_name),
            block_object(block),
        );
        if !merged.contains_key(REQUEST_KEY)
            && let Some(site) = site
        {
            merged.insert(REQUEST_KEY.to_string(), json!({ "site": site }));
        }

        let started = Instant::now();
        let result = self.renderer.render(template_id, &merged);
        histogram!("content_blocks_render_ms").record(started.elapsed().as_secs_f64() * 1000.0);

        match result {
            Ok(html) => Ok(html),
            Err(RenderError::TemplateNotFound { template }) => {
                debug!(block_id = %block.id(), %template, "template vanished during render");
                Ok(String::new())
            }
            Err(err) => Err(err),
        }
    }
}

/// Site carried by a request-like object in the supplied context.
pub fn site_from_context(context: &RenderContext) -> Option<Site> {
    let site = context.get(REQUEST_KEY)?.get("site")?;
    serde_json::from_value(site.clone()).ok()
}

fn block_object(block: &BlockNode) -> Value {
    json!({
        "id": block.id().get(),
        "name": block.block.name,
        "template": block.template.name,
        "position": block.block.position,
        "visible": block.block.visible,
        "draft": block.block.draft,
        "saved": block.block.saved,
        "css_class": block.block.css_class,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::domain::{
        blocks::fixtures::{block, field, template},
        fields::FieldValue,
        types::{FieldId, SiteId},
    };

    #[derive(Default)]
    struct EchoRenderer {
        seen: Mutex<Vec<(String, RenderContext)>>,
    }

    impl TemplateRenderer for EchoRenderer {
        fn exists(&self, template: &str) -> bool {
            !template.ends_with("missing.html")
        }

        fn render(&self, template: &str, context: &RenderContext) -> Result<String, RenderError> {
            self.seen
                .lock()
                .unwrap()
                .push((template.to_string(), context.clone()));
            let block = &context["content_block"];
            Ok(block
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string())
        }
    }

    fn text_block(title: &str) -> BlockNode {
        let tpl = template(1, "text");
        let record = block(1, &tpl, None);
        BlockNode {
            fields: vec![field(1, &record, "title", FieldValue::Text(title.into()), vec![])],
            block: record,
            template: tpl,
        }
    }

    fn renderer() -> (Arc<EchoRenderer>, BlockRenderer) {
        let echo = Arc::new(EchoRenderer::default());
        let renderer = BlockRenderer::new(echo.clone(), RenderConfig::default());
        (echo, renderer)
    }

    #[test]
    fn renders_through_prefixed_template() {
        let (echo, renderer) = renderer();
        let html = renderer.render_html(&text_block("hello"), None, None).unwrap();
        assert_eq!(html, "hello");

        let seen = echo.seen.lock().unwrap();
        assert_eq!(seen[0].0, "content_blocks/content_blocks/text.html");
        assert!(seen[0].1.contains_key("content_block_object"));
        assert!(!seen[0].1.contains_key(REQUEST_KEY));
    }

    #[test]
    fn missing_template_renders_empty() {
        let (echo, renderer) = renderer();
        let mut node = text_block("hello");
        node.template.template_filename = "missing.html".into();
        assert!(!renderer.can_render(&node.template));
        assert_eq!(renderer.render_html(&node, None, None).unwrap(), "");

        node.template.template_filename = "  ".into();
        assert_eq!(renderer.render_html(&node, None, None).unwrap(), "");
        assert!(echo.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn site_is_injected_as_request_stand_in() {
        let (echo, renderer) = renderer();
        let site = Site {
            id: SiteId(3),
            domain: "example.org".into(),
            name: "Example".into(),
        };
        renderer
            .render_html(&text_block("x"), None, Some(&site))
            .unwrap();

        let seen = echo.seen.lock().unwrap();
        assert_eq!(site_from_context(&seen[0].1), Some(site));
    }

    #[test]
    fn existing_request_is_left_untouched() {
        let (echo, renderer) = renderer();
        let site = Site {
            id: SiteId(3),
            domain: "example.org".into(),
            name: "Example".into(),
        };
        let mut context = RenderContext::new();
        context.insert(REQUEST_KEY.into(), json!({"path": "/"}));
        renderer
            .render_html(&text_block("x"), Some(context), Some(&site))
            .unwrap();

        let seen = echo.seen.lock().unwrap();
        assert_eq!(seen[0].1[REQUEST_KEY], json!({"path": "/"}));
    }

    #[test]
    fn context_includes_css_class_and_nested_children() {
        let (_, renderer) = renderer();
        let tpl = template(1, "text");
        let child_record = block(2, &tpl, Some(FieldId(9)));
        let child = BlockNode {
            fields: vec![field(3, &child_record, "title", FieldValue::Text("inner".into()), vec![])],
            block: child_record,
            template: tpl.clone(),
        };
        let mut root = block(1, &tpl, None);
        root.css_class = "wide".into();
        let node = BlockNode {
            fields: vec![field(9, &root, "items", FieldValue::Nested, vec![child])],
            block: root,
            template: tpl,
        };

        let context = renderer
            .block_context(&node, &RenderContext::new(), None)
            .unwrap();
        assert_eq!(context["css_class"], json!("wide"));
        assert_eq!(context["items"][0]["html"], json!("inner"));
        assert_eq!(context["items"][0]["context"]["title"], json!("inner"));
    }

    fn chain(depth: i64) -> BlockNode {
        let tpl = template(1, "text");
        let mut node: Option<BlockNode> = None;
        for level in (0..depth).rev() {
            let parent = (level > 0).then(|| FieldId(level * 10 - 1));
            let record = block(level + 1, &tpl, parent);
            let mut fields = vec![field(
                level * 10 + 1,
                &record,
                "title",
                FieldValue::Text(format!("level {level}")),
                vec![],
            )];
            if let Some(child) = node.take() {
                fields.push(field(level * 10 + 9, &record, "items", FieldValue::Nested, vec![child]));
            }
            node = Some(BlockNode {
                fields,
                block: record,
                template: tpl.clone(),
            });
        }
        node.expect("chain has at least one level")
    }

    #[test]
    fn nested_chain_renders_each_block_once() {
        let (echo, renderer) = renderer();
        let root = chain(8);
        assert_eq!(root.depth(), 8);

        let html = renderer.render_html(&root, None, None).unwrap();
        assert_eq!(html, "level 0");
        assert_eq!(echo.seen.lock().unwrap().len(), 8);

        let (echo, renderer) = self::renderer();
        let context = renderer
            .block_context(&root, &RenderContext::new(), None)
            .unwrap();
        assert_eq!(context["items"][0]["html"], json!("level 1"));
        assert_eq!(
            context["items"][0]["context"]["items"][0]["html"],
            json!("level 2")
        );
        assert_eq!(echo.seen.lock().unwrap().len(), 7);
    }
}
