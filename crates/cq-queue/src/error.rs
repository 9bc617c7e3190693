use thiserror::Error;

/// Failure of a persistence primitive.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique key was taken by a concurrent writer. Retrying is safe.
    #[error("unique key conflict: {0}")]
    Conflict(String),
    /// A row the caller just resolved vanished.
    #[error("row not found: {0}")]
    Missing(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Error taxonomy surfaced by the engine; one variant per HTTP status class.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Missing or malformed field.
    #[error("{0}")]
    Validation(String),
    /// Credentials present but not matching a stored user.
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    NotFound(String),
    /// Lost a race on a unique key; the caller may retry.
    #[error("{0}")]
    Transient(String),
    #[error("internal error: {0:#}")]
    Internal(anyhow::Error),
}

impl QueueError {
    pub fn validation(msg: impl Into<String>) -> Self {
        QueueError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        QueueError::NotFound(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, QueueError::Transient(_))
    }
}

impl From<StoreError> for QueueError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(msg) => {
                QueueError::Transient(format!("concurrent update conflict, retry: {msg}"))
            }
            StoreError::Missing(msg) => QueueError::NotFound(msg),
            StoreError::Backend(err) => QueueError::Internal(err),
        }
    }
}

pub type Result<T, E = QueueError> = std::result::Result<T, E>;
