use thiserror::Error;
use tokio::task::JoinError;

/// Crate-wide error taxonomy.
///
/// Variants carry enough of their origin to let callers decide disposition
/// without re-inspecting the underlying library error.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(#[from] redis::RedisError),
    #[error("entity not found: {0}")]
    EntityNotFound(String),
    #[error("validation failure: {0}")]
    ValidationFailure(String),
    #[error("llm rate limited: {0}")]
    LlmRateLimited(String),
    #[error("llm timeout: {0}")]
    LlmTimeout(String),
    #[error("llm transient error: {0}")]
    LlmTransient(String),
    #[error("llm permanent error: {0}")]
    LlmPermanent(String),
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("task join error: {0}")]
    Join(#[from] JoinError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Whether the job dispatcher and the LLM port's retry helper should
    /// requeue/retry this error, or give up and mark the job failed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::LlmRateLimited(_)
                | AppError::LlmTimeout(_)
                | AppError::LlmTransient(_)
                | AppError::Persistence(_)
        )
    }
}
