use crate::probe::ProbeError;
use std::sync::Arc;

/// Store or cache failure unrelated to a code collision.
///
/// Cloneable so that one failure can be handed to every caller coalesced
/// onto the same lookup.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InfraError {
    #[error("store error: {0}")]
    Store(Arc<sqlx::Error>),

    #[error("cache error: {0}")]
    Cache(Arc<redis::RedisError>),
}

impl From<sqlx::Error> for InfraError {
    fn from(e: sqlx::Error) -> Self {
        Self::Store(Arc::new(e))
    }
}

impl From<redis::RedisError> for InfraError {
    fn from(e: redis::RedisError) -> Self {
        Self::Cache(Arc::new(e))
    }
}

/// Why a link could not be created.
#[derive(Debug, thiserror::Error)]
pub enum CreateError {
    #[error("not a valid http or https URL")]
    InvalidUrl,

    #[error("the URL did not respond successfully: {0}")]
    Unreachable(#[from] ProbeError),

    /// An active link for the same owner and URL already exists.
    #[error("a short link already exists for this URL: {code}")]
    Conflict { code: String },

    #[error(transparent)]
    Internal(#[from] InfraError),
}

impl CreateError {
    /// Validation failures are the caller's fault and never touch the store.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidUrl | Self::Unreachable(_))
    }
}
