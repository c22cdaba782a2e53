//! Document, query, and identifier types.
//!
//! Documents are schemaless JSON objects. The identifier lives under the
//! [`ID_FIELD`] key as its canonical string form, so a document and its id
//! survive any serialization boundary unchanged.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Field under which a document's identifier is stored.
pub const ID_FIELD: &str = "_id";

/// A schemaless document: field name to JSON value.
pub type Document = serde_json::Map<String, Value>;

/// A search criterion: field path to match condition.
///
/// Field paths may be dotted (`"address.city"`). A query may or may not
/// contain the [`ID_FIELD`].
pub type Query = serde_json::Map<String, Value>;

/// A mutation description, opaque to the driver.
///
/// Operator-style partial updates (`{"$set": {...}}`) and full replacement
/// documents are both just forwarded; only the storage backend interprets
/// them.
pub type UpdateDoc = serde_json::Map<String, Value>;

/// Opaque document identifier.
///
/// An identifier is an arbitrary non-empty string handle. Store-assigned
/// identifiers are random UUIDs, but any string names a document: the
/// shorthand forms `update(id, ..)` and `update(id.to_string(), ..)` are
/// interchangeable.
///
/// # Examples
///
/// ```
/// use mudb::DocumentId;
///
/// let id = DocumentId::new();
/// let same = DocumentId::from(id.to_string());
/// assert_eq!(id, same);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Creates a new random (uuid-backed) document id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Creates an id from an existing UUID.
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid.to_string())
    }

    /// The canonical string form of this id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<Uuid> for DocumentId {
    fn from(uuid: Uuid) -> Self {
        Self::from_uuid(uuid)
    }
}

impl From<DocumentId> for String {
    fn from(id: DocumentId) -> Self {
        id.0
    }
}

/// Canonical string form of an identifier value found inside a document or
/// query.
///
/// Only primitive values name a document; objects and arrays (operator
/// conditions such as `{"_id": {"$in": [..]}}`) return `None`.
#[must_use]
pub fn canonical_id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Extracts the canonical id string of a document, if it has one.
#[must_use]
pub fn document_id(document: &Document) -> Option<String> {
    document.get(ID_FIELD).and_then(canonical_id_string)
}
