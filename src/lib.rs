//! # mudb - a mutation-observing document collection driver
//!
//! mudb wraps a collection-oriented document store and bridges mutations
//! to notifications: whenever an update can be attributed to exactly one
//! identifiable document, the collection emits a normalized `op` event
//! `(id, residual query, operation)` to local listeners and, optionally,
//! forwards it over an external publish/subscribe relay on the channel
//! named by the document id.
//!
//! ## Core Concepts
//!
//! - **Collection**: a handle re-exposing the store's operations, plus the
//!   notification bridge
//! - **Search**: id shorthand and structured queries, normalized once at
//!   the entry point
//! - **EventHub**: per-collection listener registry for the `op` event
//! - **Relay**: publish-by-channel transport keyed by document id
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use mudb::{document_id, InMemoryDatabase, Manager, ManagerConfig, UpdateOptions, OP_EVENT};
//!
//! let db = Manager::new(Arc::new(InMemoryDatabase::new()), ManagerConfig::without_relay());
//! let users = db.collection("users");
//!
//! let user = users.insert(mudb::Document::new())?;
//! let id = document_id(&user).unwrap();
//!
//! users.once(OP_EVENT, |event| {
//!     println!("document {} changed: {:?}", event.id, event.op);
//! });
//!
//! let update = serde_json::json!({"$set": {"name": "amy"}});
//! let serde_json::Value::Object(update) = update else { unreachable!() };
//! users.update(id.as_str(), update, UpdateOptions::default())?;
//! # Ok::<(), mudb::DriverError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod collection;
pub mod document;
pub mod error;
pub mod events;
pub mod manager;
pub mod relay;
pub mod request;
pub mod storage;

// Re-export primary types at crate root for convenience
pub use collection::{Collection, UpdateOutcome};
pub use document::{canonical_id_string, document_id, Document, DocumentId, Query, UpdateDoc, ID_FIELD};
pub use error::{DriverError, DriverResult, MalformedRequestError};
pub use events::{EventHub, ListenerId, OpEvent, OP_EVENT};
pub use manager::{Manager, ManagerConfig, RelaySetting, DEFAULT_RELAY_HOST, DEFAULT_RELAY_PORT};
pub use relay::{InProcessRelay, RelayMessage, RelayPublisher, TcpRelay};
pub use request::{ModifySpec, Search, UpdateOptions};
pub use storage::{
    Database, DocumentStore, InMemoryCollectionStore, InMemoryDatabase, StorageError, UpdateAck,
};
