//! Application services layer.

pub mod clone;
pub mod content_blocks;
pub mod editor;
pub mod error;
pub mod filters;
pub mod loader;
pub mod parents;
pub mod render;
pub mod repos;
pub mod templates;
pub mod workflows;
