//! In-memory storage backend.
//!
//! Thread-safe reference implementation of the storage traits, intended
//! for embedded usage and tests. It implements just enough of the
//! operator-update dialect (`$set`, `$unset`, `$inc`, `$push`, `$pull`,
//! full replacement) for a driver stacked on top to be exercised end to
//! end, with match conditions restricted to (dotted-path) equality.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;

use crate::document::{document_id, Document, DocumentId, Query, UpdateDoc, ID_FIELD};
use crate::request::UpdateOptions;
use crate::storage::traits::{Database, DocumentStore, StorageError, UpdateAck};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

fn lookup_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn set_path(doc: &mut Document, path: &str, value: Value) {
    let segments: Vec<&str> = path.split('.').collect();
    let Some((last, parents)) = segments.split_last() else {
        return;
    };

    let mut current = doc;
    for segment in parents {
        let entry = current
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if !matches!(entry, Value::Object(_)) {
            *entry = Value::Object(serde_json::Map::new());
        }
        let Value::Object(map) = entry else {
            return;
        };
        current = map;
    }
    current.insert((*last).to_string(), value);
}

fn remove_path(doc: &mut Document, path: &str) {
    let segments: Vec<&str> = path.split('.').collect();
    let Some((last, parents)) = segments.split_last() else {
        return;
    };

    let mut current = doc;
    for segment in parents {
        let Some(Value::Object(map)) = current.get_mut(*segment) else {
            return;
        };
        current = map;
    }
    current.remove(*last);
}

fn matches(doc: &Document, query: &Query) -> bool {
    query
        .iter()
        .all(|(path, condition)| lookup_path(doc, path) == Some(condition))
}

fn is_operator_update(update: &UpdateDoc) -> bool {
    update.keys().any(|key| key.starts_with('$'))
}

/// Reject malformed modifier documents before touching any document, so a
/// bad update fails the same way whether or not anything matches.
fn validate_update(update: &UpdateDoc) -> Result<(), StorageError> {
    if !is_operator_update(update) {
        return Ok(());
    }

    let mut targets: HashMap<&str, &str> = HashMap::new();
    for (op, fields) in update {
        if !op.starts_with('$') {
            return Err(StorageError::BackendError(format!(
                "cannot mix modifiers and plain fields: '{op}'"
            )));
        }
        let Some(fields) = fields.as_object() else {
            return Err(StorageError::BackendError(format!(
                "modifier {op} expects an object of field paths"
            )));
        };
        for path in fields.keys() {
            if let Some(first) = targets.insert(path.as_str(), op.as_str()) {
                return Err(StorageError::ConflictingModifiers {
                    field: path.clone(),
                    first: first.to_string(),
                    second: op.clone(),
                });
            }
        }
    }
    Ok(())
}

fn apply_inc(doc: &mut Document, path: &str, delta: &Value) -> Result<(), StorageError> {
    let current = match lookup_path(doc, path) {
        None => None,
        Some(Value::Number(n)) => Some(n.clone()),
        Some(other) => {
            return Err(StorageError::BackendError(format!(
                "$inc on '{path}' requires a numeric field, found {other}"
            )))
        }
    };

    // Integer arithmetic while both sides are integers, float otherwise.
    let base_int = current.as_ref().and_then(serde_json::Number::as_i64);
    let delta_int = delta.as_i64();
    let next = match (base_int, delta_int) {
        (Some(base), Some(delta)) => Value::from(base + delta),
        _ => {
            let base = current.as_ref().and_then(serde_json::Number::as_f64).unwrap_or(0.0);
            let delta = delta.as_f64().ok_or_else(|| {
                StorageError::BackendError(format!("$inc on '{path}' requires a numeric amount"))
            })?;
            serde_json::Number::from_f64(base + delta)
                .map(Value::Number)
                .ok_or_else(|| {
                    StorageError::BackendError(format!("$inc on '{path}' produced a non-finite value"))
                })?
        }
    };

    set_path(doc, path, next);
    Ok(())
}

fn apply_update(doc: &mut Document, update: &UpdateDoc) -> Result<(), StorageError> {
    if !is_operator_update(update) {
        // Full replacement; the id survives.
        let id = doc.get(ID_FIELD).cloned();
        doc.clear();
        for (key, value) in update {
            doc.insert(key.clone(), value.clone());
        }
        if let Some(id) = id {
            doc.insert(ID_FIELD.to_string(), id);
        }
        return Ok(());
    }

    for (op, fields) in update {
        let Some(fields) = fields.as_object() else {
            return Err(StorageError::BackendError(format!(
                "modifier {op} expects an object of field paths"
            )));
        };
        match op.as_str() {
            "$set" => {
                for (path, value) in fields {
                    set_path(doc, path, value.clone());
                }
            }
            "$unset" => {
                for path in fields.keys() {
                    remove_path(doc, path);
                }
            }
            "$inc" => {
                for (path, delta) in fields {
                    apply_inc(doc, path, delta)?;
                }
            }
            "$push" => {
                for (path, value) in fields {
                    let mut array = match lookup_path(doc, path) {
                        None => Vec::new(),
                        Some(Value::Array(items)) => items.clone(),
                        Some(other) => {
                            return Err(StorageError::BackendError(format!(
                                "$push on '{path}' requires an array field, found {other}"
                            )))
                        }
                    };
                    array.push(value.clone());
                    set_path(doc, path, Value::Array(array));
                }
            }
            "$pull" => {
                for (path, value) in fields {
                    match lookup_path(doc, path) {
                        None => {}
                        Some(Value::Array(items)) => {
                            let retained: Vec<Value> =
                                items.iter().filter(|item| *item != value).cloned().collect();
                            set_path(doc, path, Value::Array(retained));
                        }
                        Some(other) => {
                            return Err(StorageError::BackendError(format!(
                                "$pull on '{path}' requires an array field, found {other}"
                            )))
                        }
                    }
                }
            }
            other => return Err(StorageError::UnsupportedModifier(other.to_string())),
        }
    }
    Ok(())
}

fn project(doc: &Document, projection: Option<&[String]>) -> Document {
    let Some(fields) = projection else {
        return doc.clone();
    };

    let mut out = Document::new();
    for field in fields {
        if let Some(value) = doc.get(field) {
            out.insert(field.clone(), value.clone());
        }
    }
    out
}

/// Thread-safe in-memory collection store.
///
/// Documents are kept in insertion order, which is also the match order
/// for `find_one` and `update_first_match`.
#[derive(Debug, Default)]
pub struct InMemoryCollectionStore {
    documents: RwLock<Vec<Document>>,
}

impl InMemoryCollectionStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents.
    pub fn len(&self) -> Result<usize, StorageError> {
        Ok(self
            .documents
            .read()
            .map_err(|_| lock_err("collection.len"))?
            .len())
    }

    /// Whether the store holds no documents.
    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }
}

impl DocumentStore for InMemoryCollectionStore {
    fn insert(&self, mut document: Document) -> Result<Document, StorageError> {
        let mut docs = self
            .documents
            .write()
            .map_err(|_| lock_err("collection.insert"))?;

        if !document.contains_key(ID_FIELD) {
            document.insert(
                ID_FIELD.to_string(),
                Value::String(DocumentId::new().into()),
            );
        }
        if let Some(id) = document_id(&document) {
            if docs
                .iter()
                .any(|existing| document_id(existing).as_deref() == Some(id.as_str()))
            {
                return Err(StorageError::DuplicateKey(id));
            }
        }

        docs.push(document.clone());
        Ok(document)
    }

    fn find(&self, query: &Query) -> Result<Vec<Document>, StorageError> {
        let docs = self
            .documents
            .read()
            .map_err(|_| lock_err("collection.find"))?;
        Ok(docs.iter().filter(|doc| matches(doc, query)).cloned().collect())
    }

    fn find_one(&self, query: &Query) -> Result<Option<Document>, StorageError> {
        let docs = self
            .documents
            .read()
            .map_err(|_| lock_err("collection.find_one"))?;
        Ok(docs.iter().find(|doc| matches(doc, query)).cloned())
    }

    fn update(
        &self,
        query: &Query,
        update: &UpdateDoc,
        options: &UpdateOptions,
    ) -> Result<UpdateAck, StorageError> {
        validate_update(update)?;

        let mut docs = self
            .documents
            .write()
            .map_err(|_| lock_err("collection.update"))?;

        let mut ack = UpdateAck::default();
        for doc in docs.iter_mut() {
            if !matches(doc, query) {
                continue;
            }
            apply_update(doc, update)?;
            ack.matched += 1;
            ack.modified += 1;
            if !options.multi {
                break;
            }
        }
        Ok(ack)
    }

    fn update_first_match(
        &self,
        query: &Query,
        update: &UpdateDoc,
        options: &UpdateOptions,
    ) -> Result<Option<Document>, StorageError> {
        validate_update(update)?;

        // One write lock spans match and mutation, so the operation is
        // atomic with respect to every other writer.
        let mut docs = self
            .documents
            .write()
            .map_err(|_| lock_err("collection.update_first_match"))?;

        let Some(doc) = docs.iter_mut().find(|doc| matches(doc, query)) else {
            return Ok(None);
        };
        apply_update(doc, update)?;
        Ok(Some(project(doc, options.projection.as_deref())))
    }
}

/// In-memory database: a set of named collection stores, created on
/// demand.
#[derive(Debug, Default)]
pub struct InMemoryDatabase {
    collections: RwLock<HashMap<String, Arc<InMemoryCollectionStore>>>,
}

impl InMemoryDatabase {
    /// Create a new empty database.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Database for InMemoryDatabase {
    fn collection(&self, name: &str) -> Arc<dyn DocumentStore> {
        // Collection creation never panics while holding the lock, so a
        // poisoned map is still consistent.
        if let Some(store) = self
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            let store: Arc<dyn DocumentStore> = store.clone();
            return store;
        }

        let mut map = self
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let store = map.entry(name.to_string()).or_default();
        let store: Arc<dyn DocumentStore> = store.clone();
        store
    }
}
