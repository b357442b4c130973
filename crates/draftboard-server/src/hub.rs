//! Per-game hub actor.
//!
//! A hub owns the registry of live connections for one game. Registration,
//! unregistration and broadcasts arrive on three separate mailboxes and are
//! applied one at a time by [`Hub::run`], so the registry needs no lock.
//! Everything outside the loop talks to it through a cloneable
//! [`HubHandle`].

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::config::PersistConfig;
use crate::store::{self, GameStore, StoreError};

/// Identifier of a connection, unique within its hub.
pub type ConnectionId = String;

/// Items the hub queues for one connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// An update from another participant, forwarded unchanged.
    Payload(Bytes),
    /// This connection's own update could not be persisted.
    Rejected(String),
}

/// Bounded mailbox the hub writes and one adapter drains. The hub holds the
/// only sender, so dropping the registry entry closes the mailbox.
pub type OutboundSender = mpsc::Sender<Outbound>;
pub type OutboundReceiver = mpsc::Receiver<Outbound>;

/// Who produced a [`HubMessage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Emitted by the server itself, e.g. the assembled board after drafting.
    Server,
    Connection(ConnectionId),
}

impl Origin {
    fn is_connection(&self, id: &str) -> bool {
        matches!(self, Self::Connection(own) if own == id)
    }
}

/// One board update on its way through a hub.
#[derive(Debug, Clone)]
pub struct HubMessage {
    pub payload: Bytes,
    pub origin: Origin,
}

impl HubMessage {
    pub fn from_connection(id: impl Into<ConnectionId>, payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            origin: Origin::Connection(id.into()),
        }
    }

    pub fn from_server(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            origin: Origin::Server,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// The hub has terminated; a fresh one must be obtained from the directory.
    #[error("hub has shut down")]
    Closed,
    #[error("connection id {0} is already registered")]
    DuplicateConnection(ConnectionId),
    #[error("no free connection id after {0} attempts")]
    IdsExhausted(usize),
    #[error("failed to persist board: {0}")]
    Persist(#[source] StoreError),
}

/// Called once when the hub terminates.
pub type OnTerminate = Box<dyn FnOnce() + Send>;

/// Tunables for one hub.
#[derive(Debug, Clone)]
pub struct HubOptions {
    pub mailbox_capacity: usize,
    pub persist: PersistConfig,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            mailbox_capacity: 16,
            persist: PersistConfig::default(),
        }
    }
}

struct Registration {
    id: ConnectionId,
    outbound: OutboundSender,
    reply: oneshot::Sender<Result<(), HubError>>,
}

struct Unregistration {
    id: ConnectionId,
    reply: oneshot::Sender<usize>,
}

struct Broadcast {
    message: HubMessage,
    reply: Option<oneshot::Sender<Result<usize, HubError>>>,
}

enum Event {
    Register(Registration),
    Unregister(Unregistration),
    Broadcast(Broadcast),
    Shutdown,
}

/// Cheap, cloneable access to a running hub. Holds mailbox senders only;
/// the hub itself is owned by its task.
#[derive(Clone)]
pub struct HubHandle {
    game_id: Arc<str>,
    register_tx: mpsc::Sender<Registration>,
    unregister_tx: mpsc::Sender<Unregistration>,
    broadcast_tx: mpsc::Sender<Broadcast>,
    connections: Arc<AtomicUsize>,
}

impl HubHandle {
    pub fn game_id(&self) -> &str {
        &self.game_id
    }

    /// Add a connection. Rejected if `id` is already live in this hub.
    pub async fn register(
        &self,
        id: ConnectionId,
        outbound: OutboundSender,
    ) -> Result<(), HubError> {
        let (reply, rx) = oneshot::channel();
        self.register_tx
            .send(Registration {
                id,
                outbound,
                reply,
            })
            .await
            .map_err(|_| HubError::Closed)?;
        rx.await.map_err(|_| HubError::Closed)?
    }

    /// Remove a connection and close its mailbox. Returns how many
    /// connections remain; zero means the hub has terminated.
    pub async fn unregister(&self, id: ConnectionId) -> Result<usize, HubError> {
        let (reply, rx) = oneshot::channel();
        self.unregister_tx
            .send(Unregistration { id, reply })
            .await
            .map_err(|_| HubError::Closed)?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Submit an update without waiting for the outcome. Waits only for
    /// mailbox space, which is how a busy hub pushes back on senders.
    pub async fn broadcast(&self, message: HubMessage) -> Result<(), HubError> {
        self.broadcast_tx
            .send(Broadcast {
                message,
                reply: None,
            })
            .await
            .map_err(|_| HubError::Closed)
    }

    /// Submit an update and wait until it has been persisted and fanned out.
    /// Returns the number of connections it was delivered to.
    pub async fn broadcast_and_wait(&self, message: HubMessage) -> Result<usize, HubError> {
        let (reply, rx) = oneshot::channel();
        self.broadcast_tx
            .send(Broadcast {
                message,
                reply: Some(reply),
            })
            .await
            .map_err(|_| HubError::Closed)?;
        rx.await.map_err(|_| HubError::Closed)?
    }

    /// Registry size as of the last event the hub finished.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.register_tx.is_closed()
    }
}

/// The actor state. Created with [`Hub::new`] and driven by [`Hub::run`].
pub struct Hub {
    game_id: Arc<str>,
    store: Arc<dyn GameStore>,
    persist: PersistConfig,
    connections: HashMap<ConnectionId, OutboundSender>,
    register_rx: mpsc::Receiver<Registration>,
    unregister_rx: mpsc::Receiver<Unregistration>,
    broadcast_rx: mpsc::Receiver<Broadcast>,
    count: Arc<AtomicUsize>,
    shutdown: CancellationToken,
    on_terminate: Option<OnTerminate>,
}

impl Hub {
    pub fn new(
        game_id: &str,
        store: Arc<dyn GameStore>,
        options: HubOptions,
        shutdown: CancellationToken,
        on_terminate: OnTerminate,
    ) -> (Self, HubHandle) {
        let game_id: Arc<str> = Arc::from(game_id);
        let capacity = options.mailbox_capacity.max(1);
        let (register_tx, register_rx) = mpsc::channel(capacity);
        let (unregister_tx, unregister_rx) = mpsc::channel(capacity);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(capacity);
        let count = Arc::new(AtomicUsize::new(0));

        let handle = HubHandle {
            game_id: Arc::clone(&game_id),
            register_tx,
            unregister_tx,
            broadcast_tx,
            connections: Arc::clone(&count),
        };
        let hub = Self {
            game_id,
            store,
            persist: options.persist,
            connections: HashMap::new(),
            register_rx,
            unregister_rx,
            broadcast_rx,
            count,
            shutdown,
            on_terminate: Some(on_terminate),
        };
        (hub, handle)
    }

    /// Process events until an unregister leaves the registry empty or the
    /// shutdown token fires.
    pub async fn run(mut self) {
        tracing::debug!(game_id = %self.game_id, "Hub started");
        loop {
            let event = tokio::select! {
                () = self.shutdown.cancelled() => Event::Shutdown,
                Some(reg) = self.register_rx.recv() => Event::Register(reg),
                Some(unreg) = self.unregister_rx.recv() => Event::Unregister(unreg),
                Some(msg) = self.broadcast_rx.recv() => Event::Broadcast(msg),
                else => Event::Shutdown,
            };

            match event {
                Event::Register(reg) => {
                    if !self.register(reg) {
                        break;
                    }
                },
                Event::Unregister(Unregistration { id, reply }) => {
                    let remaining = self.unregister(&id);
                    let _ = reply.send(remaining);
                    if remaining == 0 {
                        break;
                    }
                },
                Event::Broadcast(broadcast) => self.broadcast(broadcast).await,
                Event::Shutdown => {
                    tracing::info!(
                        game_id = %self.game_id,
                        connections = self.connections.len(),
                        "Hub shutting down"
                    );
                    break;
                },
            }
        }
        self.terminate();
    }

    /// Returns `false` when the hub should stop: the caller vanished before
    /// hearing back, and its rollback emptied the registry.
    fn register(&mut self, reg: Registration) -> bool {
        let Registration {
            id,
            outbound,
            reply,
        } = reg;
        let result = match self.connections.entry(id.clone()) {
            Entry::Occupied(_) => {
                tracing::warn!(
                    game_id = %self.game_id,
                    connection_id = %id,
                    "Rejected duplicate connection id"
                );
                Err(HubError::DuplicateConnection(id.clone()))
            },
            Entry::Vacant(slot) => {
                slot.insert(outbound);
                tracing::debug!(
                    game_id = %self.game_id,
                    connection_id = %id,
                    "Connection registered"
                );
                Ok(())
            },
        };
        let accepted = result.is_ok();
        self.publish_count();

        if reply.send(result).is_err() && accepted {
            tracing::debug!(
                game_id = %self.game_id,
                connection_id = %id,
                "Registrant gone, rolling back"
            );
            return self.unregister(&id) > 0;
        }
        true
    }

    fn unregister(&mut self, id: &str) -> usize {
        if self.connections.remove(id).is_some() {
            tracing::debug!(game_id = %self.game_id, connection_id = id, "Connection unregistered");
        }
        self.publish_count();
        self.connections.len()
    }

    async fn broadcast(&mut self, broadcast: Broadcast) {
        let Broadcast { message, reply } = broadcast;
        let persisted = Self::persist(
            Arc::clone(&self.game_id),
            Arc::clone(&self.store),
            self.persist.clone(),
            message.payload.clone(),
        )
        .await;
        let result = match persisted {
            Ok(()) => Ok(self.fan_out(&message)),
            Err(e) => {
                tracing::warn!(
                    game_id = %self.game_id,
                    origin = ?message.origin,
                    error = %e,
                    "Dropping update that could not be persisted"
                );
                if let Origin::Connection(id) = &message.origin {
                    self.notify_rejected(id, &e);
                }
                Err(HubError::Persist(e))
            },
        };
        if let Some(reply) = reply {
            let _ = reply.send(result);
        }
    }

    /// Mirror the board to the store, retrying transient failures with
    /// exponential backoff. Blocks this hub only.
    ///
    /// Owns its inputs: `Hub` is not `Sync`, so no `&self` may live across
    /// these awaits.
    async fn persist(
        game_id: Arc<str>,
        store: Arc<dyn GameStore>,
        policy: PersistConfig,
        payload: Bytes,
    ) -> Result<(), StoreError> {
        let mut attempt = 1;
        loop {
            let id = Arc::clone(&game_id);
            let board = payload.clone();
            let result =
                store::blocking(&store, move |store| store.persist_board(&id, &board)).await;

            match result {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                    let delay = policy.backoff(attempt);
                    tracing::warn!(
                        game_id = %game_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Persist failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// Non-blocking delivery to everyone except the origin. A full or closed
    /// mailbox evicts its connection on the spot.
    fn fan_out(&mut self, message: &HubMessage) -> usize {
        let mut delivered = 0;
        let mut evicted = Vec::new();
        for (id, tx) in &self.connections {
            if message.origin.is_connection(id) {
                continue;
            }
            match tx.try_send(Outbound::Payload(message.payload.clone())) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(
                        game_id = %self.game_id,
                        connection_id = %id,
                        "Evicting unresponsive connection"
                    );
                    evicted.push(id.clone());
                },
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(
                        game_id = %self.game_id,
                        connection_id = %id,
                        "Dropping closed connection"
                    );
                    evicted.push(id.clone());
                },
            }
        }
        for id in &evicted {
            self.connections.remove(id);
        }
        self.publish_count();
        delivered
    }

    fn notify_rejected(&mut self, id: &str, error: &StoreError) {
        let Some(tx) = self.connections.get(id) else {
            return;
        };
        if tx.try_send(Outbound::Rejected(error.to_string())).is_err() {
            tracing::warn!(
                game_id = %self.game_id,
                connection_id = id,
                "Evicting connection that cannot take a rejection"
            );
            self.connections.remove(id);
            self.publish_count();
        }
    }

    fn publish_count(&self) {
        self.count.store(self.connections.len(), Ordering::Release);
    }

    /// Close every remaining mailbox and run the cleanup callback. The
    /// mailbox receivers drop with `self`, after the callback has run.
    fn terminate(mut self) {
        self.connections.clear();
        self.publish_count();
        if let Some(on_terminate) = self.on_terminate.take() {
            on_terminate();
        }
        tracing::info!(game_id = %self.game_id, "Hub terminated");
    }
}
