use std::collections::HashMap;

use murmur_types::events::GatewayEvent;
use tokio::sync::mpsc;
use uuid::Uuid;

pub type ConnectionId = Uuid;

/// Outbound half of one live socket.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub user_id: Uuid,
    tx: mpsc::UnboundedSender<GatewayEvent>,
}

impl ConnectionHandle {
    /// Queue an event for this connection. False once the socket is gone.
    pub fn send(&self, event: GatewayEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Connection id -> handle, plus user id -> current connection id.
///
/// A reconnect points the user at the new connection id while the old
/// handle stays until its own disconnect, so a late cleanup of the old
/// connection can never clear the new registration.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, ConnectionHandle>,
    current: HashMap<Uuid, ConnectionId>,
}

impl ConnectionRegistry {
    /// Register a new connection for `user_id`. Returns the new id and the id
    /// of the connection it superseded, if any.
    pub fn register(
        &mut self,
        user_id: Uuid,
        tx: mpsc::UnboundedSender<GatewayEvent>,
    ) -> (ConnectionId, Option<ConnectionId>) {
        let conn_id = Uuid::new_v4();
        self.connections
            .insert(conn_id, ConnectionHandle { user_id, tx });
        let superseded = self.current.insert(user_id, conn_id);
        (conn_id, superseded)
    }

    /// The user's current handle, skipping one whose socket already closed.
    pub fn lookup(&self, user_id: Uuid) -> Option<(ConnectionId, &ConnectionHandle)> {
        let conn_id = *self.current.get(&user_id)?;
        self.connections
            .get(&conn_id)
            .filter(|handle| !handle.is_closed())
            .map(|handle| (conn_id, handle))
    }

    pub fn connection(&self, conn_id: ConnectionId) -> Option<&ConnectionHandle> {
        self.connections
            .get(&conn_id)
            .filter(|handle| !handle.is_closed())
    }

    pub fn is_current(&self, user_id: Uuid, conn_id: ConnectionId) -> bool {
        self.current.get(&user_id) == Some(&conn_id)
    }

    /// Whether any connection is registered as the user's current one.
    pub fn has_current(&self, user_id: Uuid) -> bool {
        self.current.contains_key(&user_id)
    }

    pub fn is_live(&self, user_id: Uuid) -> bool {
        self.lookup(user_id).is_some()
    }

    /// Drop a connection. The user mapping is only cleared if it still points
    /// at `conn_id`; returns whether it did.
    pub fn unregister(&mut self, user_id: Uuid, conn_id: ConnectionId) -> bool {
        self.connections.remove(&conn_id);
        if self.is_current(user_id, conn_id) {
            self.current.remove(&user_id);
            true
        } else {
            false
        }
    }
}
