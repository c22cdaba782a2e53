//! Collection handles and the mutation-to-notification bridge.
//!
//! A [`Collection`] wraps a [`DocumentStore`] and re-exposes its operation
//! names, layering exactly one behavior on top: whenever an update can be
//! attributed to a single identifiable document, a normalized `op` event
//! `(id, residual query, operation)` is emitted locally and, when a relay
//! is configured, forwarded on the channel named by the id.

use std::sync::{Arc, OnceLock};

use tracing::debug;

use crate::document::{canonical_id_string, document_id, Document, Query, UpdateDoc, ID_FIELD};
use crate::error::DriverResult;
use crate::events::{EventHub, ListenerId, OpEvent, OP_EVENT};
use crate::relay::RelayPublisher;
use crate::request::{ModifySpec, Search, UpdateOptions};
use crate::storage::{DocumentStore, UpdateAck};

/// What an update request did.
#[derive(Debug)]
pub enum UpdateOutcome {
    /// Direct update path: the store's write acknowledgment.
    Acknowledged(UpdateAck),
    /// Find-and-modify path: the matched document (projected to its id),
    /// or `None` when nothing matched.
    FoundAndModified(Option<Document>),
}

/// A collection handle.
///
/// Handles are cheap to share (`Arc` them, or get a cached one from
/// [`Manager::collection`](crate::Manager::collection)). The event hub is
/// created lazily on the first listener registration and lives as long as
/// the handle.
pub struct Collection {
    name: String,
    store: Arc<dyn DocumentStore>,
    relay: Option<Arc<dyn RelayPublisher>>,
    hub: OnceLock<EventHub>,
}

impl Collection {
    /// Creates a handle over a store, with an optional relay.
    pub(crate) fn new(
        name: impl Into<String>,
        store: Arc<dyn DocumentStore>,
        relay: Option<Arc<dyn RelayPublisher>>,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            relay,
            hub: OnceLock::new(),
        }
    }

    /// The collection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn hub(&self) -> &EventHub {
        self.hub.get_or_init(EventHub::new)
    }

    /// Registers a persistent `op` listener.
    pub fn on(
        &self,
        event: &str,
        listener: impl Fn(&OpEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.hub().on(event, listener)
    }

    /// Registers a one-shot `op` listener.
    pub fn once(
        &self,
        event: &str,
        listener: impl Fn(&OpEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.hub().once(event, listener)
    }

    /// Removes a single listener by its registration token.
    pub fn remove_listener(&self, event: &str, id: ListenerId) -> bool {
        self.hub().remove_listener(event, id)
    }

    /// Removes every listener for an event.
    pub fn remove_all_listeners(&self, event: &str) {
        self.hub().remove_all_listeners(event);
    }

    /// Number of listeners currently registered for an event.
    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        self.hub.get().map_or(0, |hub| hub.listener_count(event))
    }

    /// Inserts a document. Returns the stored document, id included.
    pub fn insert(&self, document: Document) -> DriverResult<Document> {
        Ok(self.store.insert(document)?)
    }

    /// Finds every document matching the query.
    pub fn find(&self, query: &Query) -> DriverResult<Vec<Document>> {
        Ok(self.store.find(query)?)
    }

    /// Finds the first document matching the query.
    pub fn find_one(&self, query: &Query) -> DriverResult<Option<Document>> {
        Ok(self.store.find_one(query)?)
    }

    /// Updates documents, emitting an `op` event when the mutation can be
    /// attributed to exactly one identifiable document.
    ///
    /// Classification, in order:
    /// 1. An id shorthand is rewritten to the query `{"_id": id}`.
    /// 2. A query carrying `_id`, or any `multi` update, goes straight to
    ///    the store. Single-document id updates notify with the residual
    ///    query (the search minus `_id`) once the store reports success;
    ///    `multi` updates never notify.
    /// 3. Anything else becomes a find-and-modify restricted to returning
    ///    only the id, which notifies with an empty residual query when a
    ///    document matched.
    ///
    /// Storage errors propagate; no event is emitted for a failed
    /// mutation.
    pub fn update(
        &self,
        search: impl Into<Search>,
        update: UpdateDoc,
        options: UpdateOptions,
    ) -> DriverResult<UpdateOutcome> {
        let query = search.into().into_query();

        if query.contains_key(ID_FIELD) || options.multi {
            let ack = self.store.update(&query, &update, &options)?;

            // Only a primitive-valued id names exactly one document; an
            // operator condition under `_id` updates without notifying.
            if !options.multi {
                if let Some(id) = query.get(ID_FIELD).and_then(canonical_id_string) {
                    let mut residual = query;
                    residual.remove(ID_FIELD);
                    self.publish_op(&id, residual, update);
                }
            }
            return Ok(UpdateOutcome::Acknowledged(ack));
        }

        // No id to key the notification on: find exactly one and modify
        // it. The returned payload is restricted to the id so the store
        // never ships the whole document back.
        let mut options = options;
        options.acknowledge = true;
        options.projection = Some(vec![ID_FIELD.to_string()]);

        let found = self.find_and_modify(ModifySpec::new(Search::Query(query), update), options)?;
        Ok(UpdateOutcome::FoundAndModified(found))
    }

    /// Atomically updates the first match and returns it.
    ///
    /// On success with a matched document, emits an `op` event keyed on
    /// the returned document's id, with an empty residual query (the
    /// caller's criteria are not id-based and are not replayed). No match
    /// means no event and no error.
    pub fn find_and_modify(
        &self,
        spec: ModifySpec,
        options: UpdateOptions,
    ) -> DriverResult<Option<Document>> {
        let ModifySpec { target, update } = spec;
        let query = target.into_query();

        let found = self.store.update_first_match(&query, &update, &options)?;
        if let Some(doc) = &found {
            if let Some(id) = document_id(doc) {
                self.publish_op(&id, Query::new(), update);
            }
        }
        Ok(found)
    }

    /// Emits the notification tuple, locally and over the relay.
    ///
    /// Called only after the triggering storage operation confirmed
    /// success. Local emission and relay publication carry congruent
    /// payloads and happen in the same step; a relay failure never rolls
    /// back or prevents the local event.
    fn publish_op(&self, id: &str, mut residual: Query, op: UpdateDoc) {
        residual.remove(ID_FIELD);

        debug!(collection = %self.name, id, "emitting op");
        let event = OpEvent {
            id: id.to_string(),
            query: residual,
            op,
        };
        if let Some(hub) = self.hub.get() {
            hub.emit(OP_EVENT, &event);
        }

        if let Some(relay) = &self.relay {
            let payload = serde_json::Value::Array(vec![
                serde_json::Value::Object(event.query),
                serde_json::Value::Object(event.op),
            ])
            .to_string();
            debug!(collection = %self.name, channel = id, "publishing op to relay");
            relay.publish(id, &payload);
        }
    }
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("relay", &self.relay.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use crate::document::DocumentId;
    use crate::storage::InMemoryCollectionStore;

    use super::*;

    fn obj(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        match value {
            serde_json::Value::Object(map) => map,
            other => panic!("expected object, got {other:?}"),
        }
    }

    fn collection() -> Collection {
        Collection::new("users", Arc::new(InMemoryCollectionStore::new()), None)
    }

    fn capture(collection: &Collection) -> Arc<Mutex<Vec<OpEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        collection.on(OP_EVENT, move |event| {
            sink.lock().unwrap().push(event.clone());
        });
        events
    }

    #[test]
    fn id_update_emits_the_residual_query() {
        let users = collection();
        let events = capture(&users);

        let doc = users.insert(Document::new()).unwrap();
        let id = document_id(&doc).unwrap();

        users
            .update(
                obj(json!({"_id": id, "status": "new"})),
                obj(json!({"$set": {"status": "done"}})),
                UpdateOptions::default(),
            )
            .unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, id);
        assert_eq!(events[0].query, obj(json!({"status": "new"})));
        assert_eq!(events[0].op, obj(json!({"$set": {"status": "done"}})));
    }

    #[test]
    fn shorthand_and_id_query_produce_identical_tuples() {
        let users = collection();
        let events = capture(&users);

        let doc = users.insert(Document::new()).unwrap();
        let id = document_id(&doc).unwrap();

        users
            .update(
                DocumentId::from(id.as_str()),
                obj(json!({"$pull": {"a": "woot"}})),
                UpdateOptions::default(),
            )
            .unwrap();
        users
            .update(
                obj(json!({"_id": id})),
                obj(json!({"$pull": {"a": "woot"}})),
                UpdateOptions::default(),
            )
            .unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], events[1]);
        assert_eq!(events[0].query, Query::new());
    }

    #[test]
    fn multi_update_never_emits() {
        let users = collection();
        let events = capture(&users);

        users.insert(obj(json!({"test": "test"}))).unwrap();
        users
            .update(
                obj(json!({"test": "test"})),
                obj(json!({"$set": {"test": "a"}})),
                UpdateOptions::multi(),
            )
            .unwrap();

        assert!(events.lock().unwrap().is_empty());
        assert!(users.find_one(&obj(json!({"test": "a"}))).unwrap().is_some());
    }

    #[test]
    fn storage_failure_emits_nothing_and_surfaces_the_error() {
        let users = collection();
        let events = capture(&users);

        let doc = users.insert(obj(json!({"a": [1, 2]}))).unwrap();
        let id = document_id(&doc).unwrap();

        let err = users
            .update(
                obj(json!({"_id": id})),
                obj(json!({"$pull": {"a": 1}, "$push": {"a": 3}})),
                UpdateOptions::default(),
            )
            .unwrap_err();

        assert!(err.is_storage());
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn non_id_update_emits_the_touched_documents_id() {
        let users = collection();
        let events = capture(&users);

        let doc = users.insert(obj(json!({"a": "haha"}))).unwrap();
        let id = document_id(&doc).unwrap();

        let outcome = users
            .update(
                obj(json!({"a": "haha"})),
                obj(json!({"$set": {"a": "b"}})),
                UpdateOptions::default(),
            )
            .unwrap();

        let UpdateOutcome::FoundAndModified(Some(returned)) = outcome else {
            panic!("expected a matched document");
        };
        // Forced projection: only the id comes back.
        assert_eq!(returned.len(), 1);
        assert_eq!(document_id(&returned), Some(id.clone()));

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, id);
        assert_eq!(events[0].query, Query::new());
    }

    #[test]
    fn non_id_update_that_matches_nothing_is_silent() {
        let users = collection();
        let events = capture(&users);

        let outcome = users
            .update(
                obj(json!({"a": "nope"})),
                obj(json!({"$set": {"a": "b"}})),
                UpdateOptions::default(),
            )
            .unwrap();

        assert!(matches!(outcome, UpdateOutcome::FoundAndModified(None)));
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn operator_valued_id_updates_without_notifying() {
        let users = collection();
        let events = capture(&users);

        let outcome = users
            .update(
                obj(json!({"_id": {"$gt": ""}})),
                obj(json!({"$set": {"a": 1}})),
                UpdateOptions::default(),
            )
            .unwrap();

        assert!(matches!(
            outcome,
            UpdateOutcome::Acknowledged(UpdateAck { matched: 0, .. })
        ));
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn per_id_notifications_keep_confirmation_order() {
        let users = collection();
        let events = capture(&users);

        let doc = users.insert(Document::new()).unwrap();
        let id = document_id(&doc).unwrap();

        for n in 0..3 {
            users
                .update(
                    DocumentId::from(id.as_str()),
                    obj(json!({"$set": {"n": n}})),
                    UpdateOptions::default(),
                )
                .unwrap();
        }

        let events = events.lock().unwrap();
        let ns: Vec<_> = events
            .iter()
            .map(|event| event.op.get("$set").and_then(|set| set.get("n")).cloned())
            .collect();
        assert_eq!(ns, vec![Some(json!(0)), Some(json!(1)), Some(json!(2))]);
    }
}
