//! Fan-out hub for live status-change subscribers.
//!
//! One task owns the canonical subscriber set; registration, removal, and
//! broadcast all arrive over channels, so the set needs no lock. Delivery
//! into a subscriber's outbound queue is non-blocking: a full queue marks
//! the subscriber delinquent and it is evicted on the spot. One slow reader
//! must never stall the hub for everyone else.

pub mod connection;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::events::StatusChangeEvent;
use crate::shutdown::Shutdown;

/// Capacity of each subscriber's outbound frame queue.
pub const SUBSCRIBER_QUEUE_SIZE: usize = 256;

const BROADCAST_QUEUE_SIZE: usize = 256;

/// A live subscriber handle: an id plus the sending side of its outbound
/// queue. The hub holds the only sender, so removal closes the queue and the
/// subscriber's writer sees end-of-stream.
pub struct Subscriber {
    id: u64,
    send: mpsc::Sender<String>,
}

impl Subscriber {
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// The hub task. Created paired with its [`HubHandle`].
pub struct Hub {
    clients: HashMap<u64, mpsc::Sender<String>>,
    register_rx: mpsc::Receiver<Subscriber>,
    unregister_rx: mpsc::Receiver<u64>,
    broadcast_rx: mpsc::Receiver<String>,
}

/// Cloneable handle for talking to a running [`Hub`].
#[derive(Clone)]
pub struct HubHandle {
    register_tx: mpsc::Sender<Subscriber>,
    unregister_tx: mpsc::Sender<u64>,
    broadcast_tx: mpsc::Sender<String>,
    next_id: Arc<AtomicU64>,
}

impl Hub {
    pub fn new() -> (Self, HubHandle) {
        let (register_tx, register_rx) = mpsc::channel(1);
        let (unregister_tx, unregister_rx) = mpsc::channel(1);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(BROADCAST_QUEUE_SIZE);

        let hub = Self {
            clients: HashMap::new(),
            register_rx,
            unregister_rx,
            broadcast_rx,
        };
        let handle = HubHandle {
            register_tx,
            unregister_tx,
            broadcast_tx,
            next_id: Arc::new(AtomicU64::new(1)),
        };
        (hub, handle)
    }

    /// Run until shutdown, then drain: every subscriber queue is closed and
    /// the set cleared.
    pub async fn run(mut self, mut shutdown: Shutdown) {
        info!("fan-out hub is running");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.drain();
                    return;
                }
                Some(subscriber) = self.register_rx.recv() => {
                    debug!(subscriber = subscriber.id, "subscriber registered");
                    self.clients.insert(subscriber.id, subscriber.send);
                }
                Some(id) = self.unregister_rx.recv() => {
                    if self.clients.remove(&id).is_some() {
                        debug!(subscriber = id, "subscriber unregistered");
                    }
                }
                Some(payload) = self.broadcast_rx.recv() => {
                    self.broadcast(payload);
                }
                else => {
                    self.drain();
                    return;
                }
            }
        }
    }

    fn broadcast(&mut self, payload: String) {
        self.clients.retain(|id, send| {
            match send.try_send(payload.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    // Delinquent: dropping the sender closes its queue.
                    warn!(subscriber = *id, "outbound queue full, evicting subscriber");
                    false
                }
                Err(TrySendError::Closed(_)) => false,
            }
        });
    }

    fn drain(&mut self) {
        info!("fan-out hub shutting down, dropping {} subscribers", self.clients.len());
        self.clients.clear();
    }
}

impl HubHandle {
    /// Wrap an outbound queue sender into a registrable subscriber.
    pub fn subscriber(&self, send: mpsc::Sender<String>) -> Subscriber {
        Subscriber {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            send,
        }
    }

    pub async fn register(&self, subscriber: Subscriber) {
        if self.register_tx.send(subscriber).await.is_err() {
            warn!("hub is gone, dropping subscriber registration");
        }
    }

    /// Unknown ids are ignored, so calling this twice for one connection is
    /// harmless.
    pub async fn unregister(&self, id: u64) {
        let _ = self.unregister_tx.send(id).await;
    }

    /// Serialize a status change and submit it for broadcast. Only
    /// serialization can fail the caller; delivery problems are the hub's
    /// business (slow subscribers get evicted, a stopped hub drops payloads).
    pub async fn broadcast_status_change(
        &self,
        event: &StatusChangeEvent,
    ) -> serde_json::Result<()> {
        let payload = serde_json::to_string(event)?;
        if self.broadcast_tx.send(payload).await.is_err() {
            warn!("hub is gone, dropping status change broadcast");
        }
        Ok(())
    }
}
