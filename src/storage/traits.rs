//! Abstract storage traits.
//!
//! These traits define the contract a document store must satisfy for the
//! driver to wrap it. The driver composes over a store instead of
//! extending one: only the capability set below is required, so in-memory
//! backends, remote stores, and test doubles are interchangeable.

use std::sync::Arc;

use thiserror::Error;

use crate::document::{Document, Query, UpdateDoc};
use crate::request::UpdateOptions;

/// Errors raised by a document store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No document matched where one was required.
    #[error("document not found: {0}")]
    NotFound(String),

    /// A document with the same id already exists.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// An update combines modifiers that target the same field.
    #[error("conflicting modifiers on field '{field}': {first} and {second}")]
    ConflictingModifiers {
        /// The doubly-targeted field path.
        field: String,
        /// First modifier naming the field.
        first: String,
        /// Second modifier naming the field.
        second: String,
    },

    /// An update uses a modifier the backend does not implement.
    #[error("unsupported modifier: {0}")]
    UnsupportedModifier(String),

    /// Backend error.
    #[error("storage backend error: {0}")]
    BackendError(String),
}

/// Write acknowledgment returned by a direct update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateAck {
    /// Documents matched by the query.
    pub matched: u64,
    /// Documents the mutation was applied to.
    pub modified: u64,
}

/// Collection-oriented document store.
///
/// # Safety Considerations
/// - `update_first_match` must be atomic: no other writer may observe the
///   matched document between match and mutation.
/// - Implementations must handle concurrent access safely.
pub trait DocumentStore: Send + Sync {
    /// Insert a document, assigning an id if it has none. Returns the
    /// stored document.
    fn insert(&self, document: Document) -> Result<Document, StorageError>;

    /// Find every document matching the query, in insertion order.
    fn find(&self, query: &Query) -> Result<Vec<Document>, StorageError>;

    /// Find the first document matching the query.
    fn find_one(&self, query: &Query) -> Result<Option<Document>, StorageError>;

    /// Apply the update to matching documents (one, or all when
    /// `options.multi`). Succeeds with `matched = 0` when nothing matches.
    fn update(
        &self,
        query: &Query,
        update: &UpdateDoc,
        options: &UpdateOptions,
    ) -> Result<UpdateAck, StorageError>;

    /// Atomically update the first match and return it (after the
    /// mutation, restricted by `options.projection`), or `None` when
    /// nothing matched.
    fn update_first_match(
        &self,
        query: &Query,
        update: &UpdateDoc,
        options: &UpdateOptions,
    ) -> Result<Option<Document>, StorageError>;
}

/// A named-collection factory over some storage engine.
pub trait Database: Send + Sync {
    /// The store backing the named collection, created on demand.
    fn collection(&self, name: &str) -> Arc<dyn DocumentStore>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time test: ensure traits are object-safe
    fn _assert_document_store_object_safe(_: &dyn DocumentStore) {}
    fn _assert_database_object_safe(_: &dyn Database) {}

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::NotFound("abc".to_string());
        assert!(err.to_string().contains("document not found"));

        let err = StorageError::ConflictingModifiers {
            field: "a".to_string(),
            first: "$pull".to_string(),
            second: "$push".to_string(),
        };
        assert!(err.to_string().contains("$pull"));
        assert!(err.to_string().contains("$push"));
    }
}
