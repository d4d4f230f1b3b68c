//! Block rendering.
//!
//! Rendering is pure with respect to storage: it takes a hydrated block tree,
//! computes its context on demand and hands it to a [`TemplateRenderer`].
//! Caching decisions live in [`crate::cache`].

mod service;
mod types;

pub use service::{
    BlockRenderer, DEFAULT_CONTEXT_NAME, DEFAULT_TEMPLATE_PREFIX, REQUEST_KEY, RenderConfig,
    site_from_context,
};
pub use types::{RenderContext, RenderError, TemplateRenderer};
