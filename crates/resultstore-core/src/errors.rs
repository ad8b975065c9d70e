/// Error taxonomy for the store. Validation and NotFound are the caller's
/// fault; Storage and Configuration are infrastructural and fatal-ish.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("configuration error: {0}")]
    Configuration(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Delivery failures stay inside the notification layer. They are logged
/// and counted in the dispatch report, never returned to the creation caller.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("broker rejected message: {0}")]
    Rejected(String),

    #[error("publish timed out after {0} ms")]
    Timeout(u64),
}
