/// Errors surfaced by pool construction and submission.
#[derive(thiserror::Error, Debug)]
pub enum PoolError {
    /// Construction-time parameter validation failed.
    #[error("invalid pool configuration: {0}")]
    InvalidConfiguration(String),

    /// `submit` was called on a pool whose destruction has begun.
    #[error("submit on a pool that is shutting down")]
    ShutdownInProgress,
}
