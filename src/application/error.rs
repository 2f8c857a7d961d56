use thiserror::Error;

use crate::application::render::client::RenderFailure;
use crate::application::render::codec::CodecError;
use crate::infra::embedded::EmbeddedServerError;
use crate::infra::error::InfraError;

/// Top-level error for the binary's command paths.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Embedded(#[from] EmbeddedServerError),
    #[error("render failed: {0}")]
    Render(#[from] RenderFailure),
    #[error("render server is not reachable")]
    ServerOffline,
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
}
