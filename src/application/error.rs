use thiserror::Error;

use crate::{
    application::{render::RenderError, repos::RepoError},
    cache::CacheStoreError,
    domain::error::DomainError,
    infra::error::InfraError,
};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    CacheStore(#[from] CacheStoreError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Exit code used by the management commands.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::NotFound { .. } => 2,
            AppError::Domain(DomainError::Validation { .. }) | AppError::Validation(_) => 3,
            AppError::Infra(InfraError::Configuration { .. }) => 4,
            _ => 1,
        }
    }
}
