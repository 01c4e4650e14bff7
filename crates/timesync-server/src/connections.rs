//! Connection manager.
//!
//! Every WebSocket observer gets an entry in the [`ConnectionRegistry`]
//! holding its identity, the sender half of its outbound queue, and the
//! handle of its tick task. The entry is the only owner of the tick task:
//! removing the entry aborts it, so a closed connection never leaves a
//! periodic push behind.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use timesync_shared::error::ProtocolError;
use timesync_shared::protocol::{ClientMessage, ServerMessage};
use timesync_shared::types::{ConnectionId, UserId};
use timesync_store::TimerFilter;

use crate::broadcast::SyncBroadcaster;
use crate::session::SessionRegistry;
use crate::timers::TimerStore;

const AUTH_FAILED: &str = "Authentication failed";
const MALFORMED: &str = "Malformed message";

/// Outbound frames a connection may have queued before it is treated as
/// stalled and closed.
pub const QUEUE_CAPACITY: usize = 256;

/// Lifecycle of a registered connection. `Closed` is represented by the
/// entry being absent from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticated(UserId),
}

struct ConnectionEntry {
    identity: Option<UserId>,
    tx: mpsc::Sender<ServerMessage>,
    tick: Option<JoinHandle<()>>,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Concurrent set of live connections.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionEntry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: ConnectionId, tx: mpsc::Sender<ServerMessage>) {
        self.connections.insert(
            id,
            ConnectionEntry {
                identity: None,
                tx,
                tick: None,
            },
        );
    }

    /// Hand ownership of a tick task to connection `id`. If the connection
    /// is already gone the task is aborted on the spot.
    pub fn attach_tick(&self, id: ConnectionId, handle: JoinHandle<()>) {
        match self.connections.get_mut(&id) {
            Some(mut entry) => {
                if let Some(previous) = entry.tick.replace(handle) {
                    previous.abort();
                }
            }
            None => handle.abort(),
        }
    }

    /// Record the identity of `id`. Returns `false` if it is closed.
    pub fn set_identity(&self, id: ConnectionId, user: UserId) -> bool {
        match self.connections.get_mut(&id) {
            Some(mut entry) => {
                entry.identity = Some(user);
                true
            }
            None => false,
        }
    }

    pub fn state(&self, id: ConnectionId) -> Option<ConnectionState> {
        self.connections.get(&id).map(|entry| match entry.identity {
            Some(user) => ConnectionState::Authenticated(user),
            None => ConnectionState::Connecting,
        })
    }

    /// Enqueue `msg` for `id`. A connection that closed in the meantime is
    /// not an error: the message is dropped and `false` returned. A
    /// connection whose queue is full is closed.
    pub fn push(&self, id: ConnectionId, msg: ServerMessage) -> bool {
        let sent = match self.connections.get(&id) {
            Some(entry) => entry.tx.try_send(msg),
            None => return false,
        };
        match sent {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.evict_stalled(id);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Send `build(identity)` to every authenticated connection. Returns the
    /// number of queues that accepted the message. Connections whose queue
    /// is full are closed once the pass is over.
    ///
    /// `build` runs while a registry shard is locked and must not touch the
    /// registry.
    pub fn broadcast_with(&self, mut build: impl FnMut(UserId) -> ServerMessage) -> usize {
        let mut delivered = 0;
        let mut stalled = Vec::new();
        for entry in self.connections.iter() {
            let Some(user) = entry.identity else {
                continue;
            };
            match entry.tx.try_send(build(user)) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => stalled.push(*entry.key()),
                Err(TrySendError::Closed(_)) => {}
            }
        }
        for id in stalled {
            self.evict_stalled(id);
        }
        delivered
    }

    fn evict_stalled(&self, id: ConnectionId) {
        if self.remove(id) {
            warn!(
                conn = %id,
                capacity = QUEUE_CAPACITY,
                "Closing stalled connection: outbound queue full"
            );
        }
    }

    /// Remove `id` and abort its tick. Returns `false` if it was not
    /// registered.
    pub fn remove(&self, id: ConnectionId) -> bool {
        match self.connections.remove(&id) {
            Some((_, entry)) => {
                if let Some(tick) = entry.tick {
                    tick.abort();
                }
                true
            }
            None => false,
        }
    }

    /// Remove every connection; returns how many there were.
    pub fn clear(&self) -> usize {
        let ids: Vec<ConnectionId> = self.connections.iter().map(|e| *e.key()).collect();
        ids.into_iter().filter(|id| self.remove(*id)).count()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn authenticated_count(&self) -> usize {
        self.connections
            .iter()
            .filter(|entry| entry.identity.is_some())
            .count()
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

pub struct ConnectionManager {
    registry: Arc<ConnectionRegistry>,
    store: Arc<TimerStore>,
    sessions: Arc<SessionRegistry>,
    broadcaster: Arc<SyncBroadcaster>,
    tick_interval: Duration,
}

impl ConnectionManager {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        store: Arc<TimerStore>,
        sessions: Arc<SessionRegistry>,
        broadcaster: Arc<SyncBroadcaster>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            registry,
            store,
            sessions,
            broadcaster,
            tick_interval,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Register a new, unauthenticated connection and start its tick.
    ///
    /// The returned receiver yields everything pushed to the connection, in
    /// enqueue order.
    pub fn on_connect(&self) -> (ConnectionId, mpsc::Receiver<ServerMessage>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        self.registry.insert(id, tx);
        self.registry.attach_tick(id, self.spawn_tick(id));

        info!(conn = %id, total = self.registry.len(), "Client connected");
        (id, rx)
    }

    fn spawn_tick(&self, id: ConnectionId) -> JoinHandle<()> {
        let store = self.store.clone();
        let broadcaster = self.broadcaster.clone();
        let period = self.tick_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !broadcaster.tick(id, &store).await {
                    debug!(conn = %id, "Tick loop ended: connection closed");
                    break;
                }
            }
        })
    }

    /// Handle one text frame from connection `id`.
    pub async fn on_message(&self, id: ConnectionId, raw: &str) {
        match ClientMessage::parse(raw) {
            Ok(Some(ClientMessage::Authenticate { session_id })) => {
                self.authenticate(id, &session_id).await;
            }
            Ok(None) => {
                debug!(conn = %id, "Ignoring unknown action");
            }
            Err(ProtocolError::MissingField(field)) => {
                debug!(conn = %id, field, "Authenticate without credentials");
                self.push(id, ServerMessage::error(AUTH_FAILED));
            }
            Err(e) => {
                debug!(conn = %id, error = %e, "Malformed client message");
                self.push(id, ServerMessage::error(MALFORMED));
            }
        }
    }

    async fn authenticate(&self, id: ConnectionId, token: &str) {
        let user = match self.sessions.resolve(token).await {
            Ok(user) => user,
            Err(_) => {
                warn!(conn = %id, "Connection failed to authenticate");
                self.push(id, ServerMessage::error(AUTH_FAILED));
                return;
            }
        };

        if !self.registry.set_identity(id, user) {
            debug!(conn = %id, "Connection closed during authentication");
            return;
        }
        info!(
            conn = %id,
            user = %user.short(),
            authenticated = self.registry.authenticated_count(),
            "Connection authenticated"
        );

        // Read and enqueue under the store lock so no mutation broadcast can
        // slip in between the listing and its delivery.
        let broadcaster = &self.broadcaster;
        let delivered = self
            .store
            .read_with(TimerFilter::owned_by(user), |timers| {
                broadcaster.send_snapshot(id, timers)
            })
            .await;

        if let Err(e) = delivered {
            warn!(conn = %id, error = %e, "Could not load initial snapshot");
            self.push(id, ServerMessage::error("Failed to load timers"));
        }
    }

    /// Tear down connection `id`. Safe to call more than once and for
    /// connections that never authenticated.
    pub fn on_disconnect(&self, id: ConnectionId) -> bool {
        let removed = self.registry.remove(id);
        if removed {
            info!(conn = %id, total = self.registry.len(), "Client disconnected");
        }
        removed
    }

    pub fn push(&self, id: ConnectionId, msg: ServerMessage) -> bool {
        self.registry.push(id, msg)
    }

    /// Close every connection and cancel every tick.
    pub fn shutdown(&self) -> usize {
        let closed = self.registry.clear();
        info!(closed, "Connection manager shut down");
        closed
    }
}
