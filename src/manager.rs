//! Database manager: collection handles and relay configuration.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::collection::Collection;
use crate::relay::{RelayPublisher, TcpRelay};
use crate::storage::Database;

/// Default relay host.
pub const DEFAULT_RELAY_HOST: &str = "127.0.0.1";

/// Default relay port.
pub const DEFAULT_RELAY_PORT: u16 = 6379;

/// How the manager reaches the external relay.
#[derive(Clone)]
pub enum RelaySetting {
    /// Local emission only; no relay is used regardless of host/port.
    Disabled,
    /// Use a preconfigured relay client.
    Client(Arc<dyn RelayPublisher>),
    /// Connect a TCP relay client to `host:port` in the background.
    /// Connection failures are logged, not fatal.
    Connect {
        /// Relay host.
        host: String,
        /// Relay port.
        port: u16,
    },
}

impl Default for RelaySetting {
    fn default() -> Self {
        Self::Connect {
            host: DEFAULT_RELAY_HOST.to_string(),
            port: DEFAULT_RELAY_PORT,
        }
    }
}

impl fmt::Debug for RelaySetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "Disabled"),
            Self::Client(_) => write!(f, "Client(..)"),
            Self::Connect { host, port } => write!(f, "Connect({host}:{port})"),
        }
    }
}

/// Manager configuration.
#[derive(Debug, Clone, Default)]
pub struct ManagerConfig {
    /// Relay reachability.
    pub relay: RelaySetting,
}

impl ManagerConfig {
    /// Configuration with the relay disabled.
    #[must_use]
    pub fn without_relay() -> Self {
        Self {
            relay: RelaySetting::Disabled,
        }
    }

    /// Configuration with a preconfigured relay client.
    #[must_use]
    pub fn with_relay(relay: Arc<dyn RelayPublisher>) -> Self {
        Self {
            relay: RelaySetting::Client(relay),
        }
    }
}

/// Entry point: wraps a database and hands out collection handles.
///
/// Handles are cached per name, so every caller of [`collection`] with the
/// same name shares one event hub and one relay wiring.
///
/// [`collection`]: Manager::collection
pub struct Manager {
    db: Arc<dyn Database>,
    relay: Option<Arc<dyn RelayPublisher>>,
    collections: RwLock<HashMap<String, Arc<Collection>>>,
}

impl Manager {
    /// Creates a manager over a database.
    #[must_use]
    pub fn new(db: Arc<dyn Database>, config: ManagerConfig) -> Self {
        let relay = match config.relay {
            RelaySetting::Disabled => None,
            RelaySetting::Client(client) => Some(client),
            RelaySetting::Connect { host, port } => {
                debug!(%host, port, "initializing relay client");
                let client: Arc<dyn RelayPublisher> = Arc::new(TcpRelay::connect(&host, port));
                Some(client)
            }
        };

        Self {
            db,
            relay,
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// The collection handle for `name`, created on first use.
    pub fn collection(&self, name: &str) -> Arc<Collection> {
        // Handle creation never panics while holding the lock, so a
        // poisoned map is still consistent.
        if let Some(collection) = self
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Arc::clone(collection);
        }

        let mut map = self
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let collection = map.entry(name.to_string()).or_insert_with(|| {
            Arc::new(Collection::new(
                name,
                self.db.collection(name),
                self.relay.clone(),
            ))
        });
        Arc::clone(collection)
    }

    /// The configured relay client, if any.
    #[must_use]
    pub fn relay(&self) -> Option<&Arc<dyn RelayPublisher>> {
        self.relay.as_ref()
    }
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("relay", &self.relay.is_some())
            .field(
                "collections",
                &self
                    .collections
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .len(),
            )
            .finish()
    }
}
