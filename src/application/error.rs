use thiserror::Error;

use crate::cache::{DedupeError, StorageError};
use crate::domain::error::DomainError;
use crate::infra::error::InfraError;

use super::sources::SourceError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::Domain(_) | AppError::Validation(_) => 2,
            AppError::Source(_) => 3,
            AppError::Storage(_) | AppError::Infra(_) => 4,
            AppError::Unexpected(_) => 1,
        }
    }
}

impl From<DedupeError<SourceError>> for AppError {
    fn from(error: DedupeError<SourceError>) -> Self {
        match error {
            DedupeError::Fetch(source) => AppError::Source(source.as_ref().clone()),
            aborted @ DedupeError::Aborted { .. } => AppError::unexpected(aborted.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn dedupe_fetch_errors_keep_their_kind() {
        let shared = DedupeError::Fetch(Arc::new(SourceError::Timeout));
        let err = AppError::from(shared);
        assert!(matches!(err, AppError::Source(SourceError::Timeout)));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn aborted_fetch_is_unexpected() {
        let aborted: DedupeError<SourceError> = DedupeError::Aborted {
            key: "k".into(),
            reason: "panicked".into(),
        };
        let err = AppError::from(aborted);
        assert!(matches!(err, AppError::Unexpected(ref message) if message.contains("panicked")));
    }
}
