//! File-backed template renderer using minijinja.

use std::{path::PathBuf, sync::RwLock};

use minijinja::{AutoEscape, Environment, ErrorKind, UndefinedBehavior};
use tracing::debug;

use crate::application::render::{RenderContext, RenderError, TemplateRenderer};
use crate::cache::lock::{rw_read, rw_write};

const SOURCE: &str = "infra::templates";

/// Loads templates from a directory tree on first use.
pub struct MiniJinjaRenderer {
    root: PathBuf,
    env: RwLock<Environment<'static>>,
}

impl MiniJinjaRenderer {
    pub fn new(root: impl Into<PathBuf>, autoescape: bool) -> Self {
        let root = root.into();
        let mut env = Environment::new();
        env.set_loader(minijinja::path_loader(&root));
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_auto_escape_callback(move |_name| {
            if autoescape {
                AutoEscape::Html
            } else {
                AutoEscape::None
            }
        });
        Self {
            root,
            env: RwLock::new(env),
        }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// Forget compiled templates so edited sources are picked up.
    pub fn reload(&self) {
        rw_write(&self.env, SOURCE, "reload").clear_templates();
        debug!(root = %self.root.display(), "template cache cleared");
    }
}

impl TemplateRenderer for MiniJinjaRenderer {
    fn exists(&self, template: &str) -> bool {
        match rw_read(&self.env, SOURCE, "exists").get_template(template) {
            Ok(_) => true,
            // A template that fails to compile still exists; rendering reports it.
            Err(err) => err.kind() != ErrorKind::TemplateNotFound,
        }
    }

    fn render(&self, template: &str, context: &RenderContext) -> Result<String, RenderError> {
        let env = rw_read(&self.env, SOURCE, "render");
        let compiled = env.get_template(template).map_err(|err| map_error(template, err))?;
        compiled
            .render(context)
            .map_err(|err| map_error(template, err))
    }
}

fn map_error(template: &str, err: minijinja::Error) -> RenderError {
    if err.kind() == ErrorKind::TemplateNotFound {
        RenderError::TemplateNotFound {
            template: template.to_string(),
        }
    } else {
        RenderError::template(template, format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::json;

    use super::*;

    fn write(dir: &tempfile::TempDir, name: &str, body: &str) {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, body).unwrap();
    }

    fn context(value: serde_json::Value) -> RenderContext {
        match value {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn renders_and_probes_templates() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir, "blocks/text.html", "{{ content_block.title }}");
        let renderer = MiniJinjaRenderer::new(dir.path(), true);

        assert!(renderer.exists("blocks/text.html"));
        assert!(!renderer.exists("blocks/missing.html"));

        let html = renderer
            .render(
                "blocks/text.html",
                &context(json!({"content_block": {"title": "a<b"}})),
            )
            .unwrap();
        assert_eq!(html, "a&lt;b");
    }

    #[test]
    fn autoescape_can_be_disabled() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir, "raw.html", "{{ body }}");
        let renderer = MiniJinjaRenderer::new(dir.path(), false);
        let html = renderer
            .render("raw.html", &context(json!({"body": "<p>x</p>"})))
            .unwrap();
        assert_eq!(html, "<p>x</p>");
    }

    #[test]
    fn missing_and_broken_templates_are_distinguished() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir, "broken.html", "{{ missing.attribute }}");
        let renderer = MiniJinjaRenderer::new(dir.path(), true);

        let err = renderer.render("nope.html", &RenderContext::new()).unwrap_err();
        assert!(matches!(err, RenderError::TemplateNotFound { .. }));

        assert!(renderer.exists("broken.html"));
        let err = renderer.render("broken.html", &RenderContext::new()).unwrap_err();
        assert!(matches!(err, RenderError::Template { .. }));
    }

    #[test]
    fn reload_picks_up_edited_sources() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir, "t.html", "one");
        let renderer = MiniJinjaRenderer::new(dir.path(), true);
        assert_eq!(renderer.render("t.html", &RenderContext::new()).unwrap(), "one");

        write(&dir, "t.html", "two");
        renderer.reload();
        assert_eq!(renderer.render("t.html", &RenderContext::new()).unwrap(), "two");
    }
}
