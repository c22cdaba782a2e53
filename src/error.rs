//! Error types for the driver.
//!
//! All errors are strongly typed using thiserror. Storage errors are the
//! only ones allowed to abort a mutation's notification; relay-side
//! failures are observed out of band and never surface here.

use thiserror::Error;

use crate::storage::StorageError;

/// Request-shape errors surfaced synchronously, before any storage call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MalformedRequestError {
    /// The search value is neither id-shaped nor query-shaped.
    #[error("search value is neither an identifier nor a query (got {found})")]
    UnclassifiableSearch {
        /// JSON type name of the offending value.
        found: &'static str,
    },

    /// No update document was supplied, embedded or as a sibling argument.
    #[error("find-and-modify request carries no update document")]
    MissingUpdate,
}

/// Top-level error type for driver operations.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The request could not be classified.
    #[error("malformed request: {0}")]
    Malformed(#[from] MalformedRequestError),

    /// The document store reported a failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl DriverError {
    /// Returns true if this is a malformed-request error.
    #[must_use]
    pub const fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }

    /// Returns true if this is a storage error.
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

/// Result type alias for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_request_converts_into_driver_error() {
        let err: DriverError = MalformedRequestError::MissingUpdate.into();
        assert!(err.is_malformed());
        assert!(!err.is_storage());
        assert!(err.to_string().contains("no update document"));
    }

    #[test]
    fn storage_error_converts_into_driver_error() {
        let err: DriverError = StorageError::BackendError("boom".to_string()).into();
        assert!(err.is_storage());
        assert!(err.to_string().contains("boom"));
    }
}
