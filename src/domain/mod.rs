//! Domain layer types and invariants.

pub mod blocks;
pub mod entities;
pub mod error;
pub mod fields;
pub mod types;
