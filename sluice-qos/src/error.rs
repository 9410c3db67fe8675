//! QoS engine error types.

use crate::context::CancelReason;

/// QoS engine error type.
#[derive(Debug, thiserror::Error)]
pub enum QosError {
    /// A parked admission was cancelled through its [`crate::AllocContext`].
    ///
    /// This is the only error surfaced to I/O issuers.
    #[error("admission cancelled: {reason}")]
    Cancelled {
        /// Why the context fired.
        reason: CancelReason,
    },

    /// The limiter went away while the request was parked.
    #[error("limiter shut down while the request was parked")]
    Shutdown,

    /// The master could not be reached for a quota refresh.
    ///
    /// Produced by [`crate::MasterLink`] implementations; the limiter logs
    /// and swallows it (refresh is best-effort and rate-limited).
    #[error("master refresh failed: {message}")]
    Master {
        /// Transport-level failure description.
        message: String,
    },

    /// Invalid configuration.
    #[error("invalid configuration '{name}': {reason}")]
    InvalidConfig {
        /// The offending field.
        name: &'static str,
        /// Why it was rejected.
        reason: &'static str,
    },
}

/// Result type for QoS operations.
pub type QosResult<T> = Result<T, QosError>;
