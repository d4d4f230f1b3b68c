//! Template-driven content blocks with draft/publish workflows and a per-site
//! rendered HTML cache.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
