//! External publish/subscribe relay.
//!
//! The relay propagates notifications outside the process, keyed by
//! channel name (the document id's string form). Publishing is fire and
//! forget: the mutation path never blocks on the relay, and relay
//! failures are counted and logged rather than surfaced to callers.

use std::collections::HashMap;
use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::debug;

/// Per-channel buffer capacity for in-process subscriptions.
const SUBSCRIPTION_CAPACITY: usize = 1024;

/// Outbound queue capacity for the TCP relay worker.
const PUBLISH_QUEUE_CAPACITY: usize = 4096;

/// Publish-by-channel transport.
///
/// Implementations must never block the caller and must swallow their own
/// failures; `dropped_publishes` is the out-of-band error channel.
pub trait RelayPublisher: Send + Sync {
    /// Publish a payload on a channel. Fire and forget.
    fn publish(&self, channel: &str, payload: &str);

    /// Number of publishes that could not be delivered.
    fn dropped_publishes(&self) -> u64;
}

/// A message delivered to an in-process subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayMessage {
    /// The channel the message was published on.
    pub channel: String,
    /// The serialized payload.
    pub payload: String,
}

/// In-process relay: subscribe-by-channel over bounded channels.
///
/// Used for embedded operation and tests, where the "external" transport
/// is another part of the same process.
#[derive(Default)]
pub struct InProcessRelay {
    subscribers: Mutex<HashMap<String, Vec<Sender<RelayMessage>>>>,
    dropped: AtomicU64,
}

impl InProcessRelay {
    /// Creates a relay with no subscriptions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to a channel, returning the message stream.
    ///
    /// A slow subscriber whose buffer fills drops messages (counted), it
    /// never blocks publishers.
    pub fn subscribe(&self, channel: &str) -> Receiver<RelayMessage> {
        let (tx, rx) = bounded(SUBSCRIPTION_CAPACITY);
        self.lock().entry(channel.to_string()).or_default().push(tx);
        rx
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Sender<RelayMessage>>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl RelayPublisher for InProcessRelay {
    fn publish(&self, channel: &str, payload: &str) {
        let mut subscribers = self.lock();
        let Some(list) = subscribers.get_mut(channel) else {
            return;
        };

        let message = RelayMessage {
            channel: channel.to_string(),
            payload: payload.to_string(),
        };
        list.retain(|tx| match tx.try_send(message.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
        if list.is_empty() {
            subscribers.remove(channel);
        }
    }

    fn dropped_publishes(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for InProcessRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InProcessRelay")
            .field("channels", &self.lock().len())
            .field("dropped", &self.dropped.load(Ordering::Relaxed))
            .finish()
    }
}

/// TCP relay client speaking the RESP `PUBLISH` command.
///
/// A dedicated worker thread owns the connection; `publish` enqueues with
/// a non-blocking `try_send` and never stalls the mutation path.
/// Connection failures are logged and counted, not fatal: the worker
/// reconnects on the next publish.
pub struct TcpRelay {
    tx: Sender<RelayMessage>,
    dropped: Arc<AtomicU64>,
}

impl TcpRelay {
    /// Creates a relay client for `host:port` and starts its worker.
    ///
    /// The connection is established in the background; this call never
    /// fails, and a server that is down only shows up as dropped
    /// publishes.
    #[must_use]
    pub fn connect(host: &str, port: u16) -> Self {
        let (tx, rx) = bounded::<RelayMessage>(PUBLISH_QUEUE_CAPACITY);
        let dropped = Arc::new(AtomicU64::new(0));

        let address = format!("{host}:{port}");
        let worker_dropped = Arc::clone(&dropped);
        // The worker exits once the last sender is dropped; the handle is
        // detached so callers can drop the relay without joining.
        thread::Builder::new()
            .name("mudb-relay".to_string())
            .spawn(move || worker_loop(&address, &rx, &worker_dropped))
            .expect("failed to spawn mudb relay worker");

        Self { tx, dropped }
    }
}

impl RelayPublisher for TcpRelay {
    fn publish(&self, channel: &str, payload: &str) {
        let message = RelayMessage {
            channel: channel.to_string(),
            payload: payload.to_string(),
        };
        match self.tx.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn dropped_publishes(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for TcpRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpRelay")
            .field("queued", &self.tx.len())
            .field("dropped", &self.dropped.load(Ordering::Relaxed))
            .finish()
    }
}

fn encode_publish(channel: &str, payload: &str) -> Vec<u8> {
    format!(
        "*3\r\n$7\r\nPUBLISH\r\n${}\r\n{channel}\r\n${}\r\n{payload}\r\n",
        channel.len(),
        payload.len()
    )
    .into_bytes()
}

fn connect(address: &str) -> Option<TcpStream> {
    match TcpStream::connect(address) {
        Ok(stream) => {
            // Short read timeout: replies are drained opportunistically so
            // the socket buffer cannot fill, but the worker must not stall
            // on a quiet server.
            let _ = stream.set_read_timeout(Some(Duration::from_millis(10)));
            debug!(address, "relay connected");
            Some(stream)
        }
        Err(err) => {
            debug!(address, %err, "relay connection failed");
            None
        }
    }
}

fn drain_replies(stream: &mut TcpStream) {
    let mut scratch = [0u8; 512];
    loop {
        match stream.read(&mut scratch) {
            Ok(0) | Err(_) => break,
            Ok(n) if n < scratch.len() => break,
            Ok(_) => {}
        }
    }
}

fn worker_loop(address: &str, rx: &Receiver<RelayMessage>, dropped: &AtomicU64) {
    let mut conn = connect(address);

    while let Ok(message) = rx.recv() {
        let frame = encode_publish(&message.channel, &message.payload);

        let mut delivered = false;
        // One reconnect attempt per message, then drop it.
        for _ in 0..2 {
            let Some(stream) = conn.as_mut() else {
                conn = connect(address);
                continue;
            };
            match stream.write_all(&frame) {
                Ok(()) => {
                    drain_replies(stream);
                    delivered = true;
                    break;
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    delivered = true;
                    break;
                }
                Err(err) => {
                    debug!(address, %err, "relay publish failed");
                    conn = None;
                }
            }
        }

        if !delivered {
            dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}
