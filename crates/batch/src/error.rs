//! Batch scheduler error types.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced to callers of [`crate::BatchScheduler::submit`].
///
/// `Clone` so a single processor failure can be handed to every item of
/// the batch it broke.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BatchError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("processor failed: {0}")]
    Processor(String),

    #[error("scheduler is shutting down")]
    ShuttingDown,

    #[error("scheduler already stopped")]
    AlreadyStopped,

    #[error("result handle dropped before completion")]
    Dropped,

    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
}

impl BatchError {
    /// Whether resubmitting the same payload may succeed.
    ///
    /// Only admission timeouts qualify: the item may simply have been
    /// waiting behind higher-priority work.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BatchError::Timeout(_))
    }

    /// Whether this is an admission timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, BatchError::Timeout(_))
    }
}

/// Error returned by a [`crate::BatchProcessor`] for a whole batch.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message}")]
pub struct ProcessorError {
    message: String,
}

impl ProcessorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<ProcessorError> for BatchError {
    fn from(e: ProcessorError) -> Self {
        BatchError::Processor(e.message)
    }
}

/// Errors raised while loading or validating a [`crate::BatchConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
}
