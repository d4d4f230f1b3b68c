use serde_json::{Map, Value};
use thiserror::Error;

/// Mapping handed to the template renderer.
pub type RenderContext = Map<String, Value>;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("template `{template}` not found")]
    TemplateNotFound { template: String },
    #[error("template `{template}` failed to render: {message}")]
    Template { template: String, message: String },
}

impl RenderError {
    pub fn template(template: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Template {
            template: template.into(),
            message: message.into(),
        }
    }
}

/// Template engine used to turn a block context into HTML.
pub trait TemplateRenderer: Send + Sync {
    /// Whether `template` resolves to a loadable template.
    fn exists(&self, template: &str) -> bool;

    fn render(&self, template: &str, context: &RenderContext) -> Result<String, RenderError>;
}
