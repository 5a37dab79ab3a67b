use std::time::Duration;

/// Failure taxonomy for the distributed single-flight machinery.
///
/// Every variant surfaces to the immediate caller of the wrapped operation;
/// nothing is swallowed and nothing is retried internally.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad or missing operation key, or an invalid instance configuration.
    /// Raised synchronously at construction / wrap time.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Transport-level failure talking to Redis.  Retry policy is the
    /// caller's decision.
    #[error("redis store unavailable: {0}")]
    Store(#[from] fred::error::Error),

    /// The stored or published payload could not be decoded.  Scoped to the
    /// affected call; other keys are unaffected.
    #[error("cached payload could not be decoded: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The wrapped operation itself failed while this process held the lock.
    /// Nothing is stored or published in this case.
    #[error("wrapped operation failed: {0}")]
    Work(#[source] anyhow::Error),

    /// The process performing the work published an error marker instead of
    /// a result.
    #[error("remote worker reported failure: {0}")]
    Remote(String),

    /// Neither a cache hit nor a notification arrived within the configured
    /// window.  Another process is presumed to still be performing the work.
    #[error("timed out after {waited:?} waiting on '{key}' for another process to finish the work")]
    WaitTimeout { key: String, waited: Duration },

    /// The owning instance was closed while this call was pending.
    #[error("instance closed while waiting for a result")]
    Shutdown,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
