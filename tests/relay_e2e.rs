use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use mudb::{
    document_id, Document, InMemoryDatabase, InProcessRelay, Manager, ManagerConfig, OpEvent,
    RelayPublisher, UpdateOptions, OP_EVENT,
};

fn obj(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("expected object, got {other:?}"),
    }
}

#[test]
fn ops_are_published_on_the_documents_channel() {
    let relay = Arc::new(InProcessRelay::new());
    let db = Manager::new(
        Arc::new(InMemoryDatabase::new()),
        ManagerConfig::with_relay(Arc::clone(&relay) as Arc<dyn RelayPublisher>),
    );
    let users = db.collection("users");

    let local: Arc<Mutex<Vec<OpEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&local);
    users.on(OP_EVENT, move |event| {
        sink.lock().unwrap().push(event.clone());
    });

    let user = users.insert(Document::new()).unwrap();
    let id = document_id(&user).unwrap();
    let rx = relay.subscribe(&id);

    users
        .update(
            obj(json!({"_id": id})),
            obj(json!({"$set": {}})),
            UpdateOptions::default(),
        )
        .unwrap();

    let message = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(message.channel, id);

    let decoded: serde_json::Value = serde_json::from_str(&message.payload).unwrap();
    assert_eq!(decoded, json!([{}, {"$set": {}}]));

    // Local and relay emission carry congruent data.
    let local = local.lock().unwrap();
    assert_eq!(local.len(), 1);
    assert_eq!(local[0].id, id);
    assert_eq!(json!(local[0].query), decoded[0]);
    assert_eq!(json!(local[0].op), decoded[1]);
}

#[test]
fn relay_payload_carries_the_residual_query() {
    let relay = Arc::new(InProcessRelay::new());
    let db = Manager::new(
        Arc::new(InMemoryDatabase::new()),
        ManagerConfig::with_relay(Arc::clone(&relay) as Arc<dyn RelayPublisher>),
    );
    let users = db.collection("users");

    let user = users.insert(Document::new()).unwrap();
    let id = document_id(&user).unwrap();
    let rx = relay.subscribe(&id);

    users
        .update(
            obj(json!({"_id": id, "role": "admin"})),
            obj(json!({"$set": {"role": "user"}})),
            UpdateOptions::default(),
        )
        .unwrap();

    let message = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    let decoded: serde_json::Value = serde_json::from_str(&message.payload).unwrap();
    assert_eq!(decoded, json!([{"role": "admin"}, {"$set": {"role": "user"}}]));
}

#[test]
fn relay_publishes_even_without_local_listeners() {
    let relay = Arc::new(InProcessRelay::new());
    let db = Manager::new(
        Arc::new(InMemoryDatabase::new()),
        ManagerConfig::with_relay(Arc::clone(&relay) as Arc<dyn RelayPublisher>),
    );
    let users = db.collection("users");

    let user = users.insert(Document::new()).unwrap();
    let id = document_id(&user).unwrap();
    let rx = relay.subscribe(&id);

    users
        .update(
            id.as_str(),
            obj(json!({"$set": {"a": 1}})),
            UpdateOptions::default(),
        )
        .unwrap();

    assert!(rx.recv_timeout(Duration::from_secs(1)).is_ok());
}

/// A relay whose every publish fails, observable only out of band.
struct BlackholeRelay {
    attempts: AtomicU64,
}

impl RelayPublisher for BlackholeRelay {
    fn publish(&self, _channel: &str, _payload: &str) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    fn dropped_publishes(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }
}

#[test]
fn relay_failures_never_reach_the_mutation_path() {
    let relay = Arc::new(BlackholeRelay {
        attempts: AtomicU64::new(0),
    });
    let db = Manager::new(
        Arc::new(InMemoryDatabase::new()),
        ManagerConfig::with_relay(Arc::clone(&relay) as Arc<dyn RelayPublisher>),
    );
    let users = db.collection("users");

    let local: Arc<Mutex<Vec<OpEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&local);
    users.on(OP_EVENT, move |event| {
        sink.lock().unwrap().push(event.clone());
    });

    let user = users.insert(Document::new()).unwrap();
    let id = document_id(&user).unwrap();

    // The update succeeds and the local event still fires.
    users
        .update(
            id.as_str(),
            obj(json!({"$set": {"a": 1}})),
            UpdateOptions::default(),
        )
        .unwrap();

    assert_eq!(local.lock().unwrap().len(), 1);
    assert_eq!(relay.dropped_publishes(), 1);
}

#[test]
fn disabled_relay_is_local_emission_only() {
    let db = Manager::new(
        Arc::new(InMemoryDatabase::new()),
        ManagerConfig::without_relay(),
    );
    let users = db.collection("users");

    let local: Arc<Mutex<Vec<OpEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&local);
    users.on(OP_EVENT, move |event| {
        sink.lock().unwrap().push(event.clone());
    });

    let user = users.insert(Document::new()).unwrap();
    users
        .update(
            document_id(&user).unwrap().as_str(),
            obj(json!({"$set": {}})),
            UpdateOptions::default(),
        )
        .unwrap();

    assert!(db.relay().is_none());
    assert_eq!(local.lock().unwrap().len(), 1);
}
