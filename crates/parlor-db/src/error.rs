use thiserror::Error;

/// Failure classes of store operations. Callers map these onto transport
/// status codes; anything backed by SQLite itself is an internal failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl StoreError {
    pub fn not_found(entity: &str, id: i64) -> Self {
        Self::NotFound(format!("{} {} not found", entity, id))
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }
}
