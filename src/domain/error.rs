use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("content block validation failed: {message}")]
    Validation { message: String },
    #[error("content block invariant violated: {message}")]
    Invariant { message: String },
    #[error("block nesting exceeds the configured depth of {limit}")]
    NestingTooDeep { limit: usize },
}

impl DomainError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant {
            message: message.into(),
        }
    }

    pub fn nesting_too_deep(limit: usize) -> Self {
        Self::NestingTooDeep { limit }
    }
}
