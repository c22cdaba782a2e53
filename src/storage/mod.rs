//! Storage abstraction and backends.
//!
//! The driver never talks to a storage engine directly; it goes through
//! the [`DocumentStore`] trait. The in-memory backend is the reference
//! implementation, used for embedded operation and tests.

/// In-memory backend.
pub mod memory;
/// Abstract storage traits.
pub mod traits;

pub use memory::{InMemoryCollectionStore, InMemoryDatabase};
pub use traits::{Database, DocumentStore, StorageError, UpdateAck};
