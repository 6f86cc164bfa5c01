//! Error types for the counter store.
//!
//! All errors are propagated via [`StoreError`]. The transient variants
//! (connection failures, timeouts, an unreachable backend) are grouped by
//! [`StoreError::is_unavailable`]; callers treat those as "try again on the
//! next cycle" and never as fatal.

/// Errors that can occur while talking to the counter store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A Redis operation failed.
    #[error("Redis error: {0}")]
    Redis(#[from] fred::error::Error),

    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A store call did not complete within its deadline.
    #[error("store call `{operation}` timed out after {timeout_ms}ms")]
    Timeout {
        /// The operation that timed out.
        operation: &'static str,
        /// The deadline that was exceeded, in milliseconds.
        timeout_ms: u64,
    },

    /// A stored value could not be interpreted as a counter.
    #[error("invalid value at {key}: {reason}")]
    InvalidValue {
        /// The key holding the bad value.
        key: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// A configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Whether this error means the store is (temporarily) unreachable.
    ///
    /// These are the `StoreUnavailable` class: recoverable by retrying on the
    /// next notification or reconciliation.
    pub const fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Redis(_) | Self::Unavailable(_) | Self::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_unavailable() {
        assert!(StoreError::Unavailable(String::from("down")).is_unavailable());
        assert!(
            StoreError::Timeout {
                operation: "read_one",
                timeout_ms: 500,
            }
            .is_unavailable()
        );
    }

    #[test]
    fn data_errors_are_not_unavailable() {
        let err = StoreError::InvalidValue {
            key: String::from("parking:lot-a"),
            reason: String::from("not an integer"),
        };
        assert!(!err.is_unavailable());
        assert!(!StoreError::Config(String::from("bad url")).is_unavailable());
    }

    #[test]
    fn timeout_message_names_operation() {
        let err = StoreError::Timeout {
            operation: "batch_read",
            timeout_ms: 250,
        };
        assert_eq!(err.to_string(), "store call `batch_read` timed out after 250ms");
    }
}
