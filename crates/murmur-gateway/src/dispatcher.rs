use std::sync::Arc;

use murmur_types::events::GatewayEvent;
use murmur_types::models::PresenceRecord;
use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::presence::PresenceStore;
use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::rooms::RoomTable;

/// Manages all connected clients, their presence, and room fan-out.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Global events (userConnected / userDisconnected) for every socket
    broadcast_tx: broadcast::Sender<GatewayEvent>,

    /// Registry, presence and rooms live under one lock so presence is never
    /// observed without the registration that backs it.
    state: RwLock<SharedState>,
}

#[derive(Default)]
struct SharedState {
    registry: ConnectionRegistry,
    presence: PresenceStore,
    rooms: RoomTable,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                state: RwLock::new(SharedState::default()),
            }),
        }
    }

    /// Subscribe to global events.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    pub fn broadcast(&self, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Register a connection and mark the user online in the same step.
    ///
    /// A superseded connection stays open until its own disconnect but is
    /// taken out of every room, so it no longer receives conversation events.
    pub async fn connect(
        &self,
        user_id: Uuid,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<GatewayEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.inner.state.write().await;
        let (conn_id, superseded) = state.registry.register(user_id, tx);
        state.presence.set(user_id, PresenceRecord::online());
        if let Some(old) = superseded {
            let rooms = state.rooms.leave_all(old);
            info!(
                "Connection {} for {} superseded by {}, dropped from {} rooms",
                old,
                user_id,
                conn_id,
                rooms.len()
            );
        }
        (conn_id, rx)
    }

    /// Tear down a connection. Returns true if it was the user's current one,
    /// in which case presence is cleared too. A superseded connection only
    /// removes itself.
    pub async fn disconnect(&self, user_id: Uuid, conn_id: ConnectionId) -> bool {
        let mut state = self.inner.state.write().await;
        state.rooms.leave_all(conn_id);
        let was_current = state.registry.unregister(user_id, conn_id);
        if was_current {
            state.presence.clear(user_id);
        } else {
            debug!("Stale disconnect of {} for {}, keeping newer registration", conn_id, user_id);
        }
        was_current
    }

    pub async fn is_current(&self, user_id: Uuid, conn_id: ConnectionId) -> bool {
        self.inner.state.read().await.registry.is_current(user_id, conn_id)
    }

    /// Whether the user has a current registration, live socket or not.
    pub async fn has_connection(&self, user_id: Uuid) -> bool {
        self.inner.state.read().await.registry.has_current(user_id)
    }

    /// Broadcast `event` only while the user has no current connection.
    /// The check and the send happen under one lock, so a concurrent
    /// `connect` either wins (nothing is sent) or announces itself after.
    pub async fn broadcast_unless_connected(&self, user_id: Uuid, event: GatewayEvent) -> bool {
        let state = self.inner.state.read().await;
        if state.registry.has_current(user_id) {
            return false;
        }
        let _ = self.inner.broadcast_tx.send(event);
        true
    }

    /// Overwrite presence, but only on behalf of the user's current connection.
    pub async fn set_presence(
        &self,
        conn_id: ConnectionId,
        user_id: Uuid,
        record: PresenceRecord,
    ) -> bool {
        let mut state = self.inner.state.write().await;
        if !state.registry.is_current(user_id, conn_id) {
            return false;
        }
        state.presence.set(user_id, record);
        true
    }

    /// Drop focus if it is on `conversation_id`; the online flag is untouched.
    pub async fn clear_focus(
        &self,
        conn_id: ConnectionId,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> bool {
        let mut state = self.inner.state.write().await;
        if !state.registry.is_current(user_id, conn_id) {
            return false;
        }
        match state.presence.get(user_id) {
            Some(mut record) if record.current_conversation_id == Some(conversation_id) => {
                record.current_conversation_id = None;
                state.presence.set(user_id, record);
                true
            }
            _ => false,
        }
    }

    /// Raw presence record, live or not.
    pub async fn presence(&self, user_id: Uuid) -> Option<PresenceRecord> {
        self.inner.state.read().await.presence.get(user_id)
    }

    /// Presence as trusted by delivery: absent unless a live handle backs it.
    pub async fn delivery_snapshot(&self, user_id: Uuid) -> Option<PresenceRecord> {
        let state = self.inner.state.read().await;
        if !state.registry.is_live(user_id) {
            return None;
        }
        state.presence.get(user_id)
    }

    pub async fn online_users(&self) -> Vec<Uuid> {
        let state = self.inner.state.read().await;
        state
            .presence
            .list_online(|user_id| state.registry.is_live(user_id))
    }

    pub async fn is_live(&self, user_id: Uuid) -> bool {
        self.inner.state.read().await.registry.is_live(user_id)
    }

    pub async fn join_room(&self, conversation_id: Uuid, conn_id: ConnectionId) -> bool {
        self.inner.state.write().await.rooms.join(conversation_id, conn_id)
    }

    pub async fn leave_room(&self, conversation_id: Uuid, conn_id: ConnectionId) -> bool {
        self.inner.state.write().await.rooms.leave(conversation_id, conn_id)
    }

    pub async fn is_joined(&self, conversation_id: Uuid, conn_id: ConnectionId) -> bool {
        self.inner
            .state
            .read()
            .await
            .rooms
            .is_joined(conversation_id, conn_id)
    }

    /// Send to every connection in the room. Returns how many accepted it.
    pub async fn publish_to_room(&self, conversation_id: Uuid, event: GatewayEvent) -> usize {
        let state = self.inner.state.read().await;
        let mut delivered = 0;
        for conn_id in state.rooms.members(conversation_id) {
            if let Some(handle) = state.registry.connection(conn_id) {
                if handle.send(event.clone()) {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Send to the user's current connection. A missing or closed connection
    /// is a no-op and returns false.
    pub async fn publish_to_user(&self, user_id: Uuid, event: GatewayEvent) -> bool {
        let state = self.inner.state.read().await;
        match state.registry.lookup(user_id) {
            Some((_, handle)) => handle.send(event),
            None => false,
        }
    }

    pub async fn send_to_connection(&self, conn_id: ConnectionId, event: GatewayEvent) -> bool {
        let state = self.inner.state.read().await;
        match state.registry.connection(conn_id) {
            Some(handle) => handle.send(event),
            None => false,
        }
    }
}
