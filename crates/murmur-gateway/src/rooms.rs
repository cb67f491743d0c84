use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::registry::ConnectionId;

/// Conversation rooms, keyed both ways so a disconnect can leave every room
/// without scanning.
#[derive(Debug, Default)]
pub struct RoomTable {
    members: HashMap<Uuid, HashSet<ConnectionId>>,
    joined: HashMap<ConnectionId, HashSet<Uuid>>,
}

impl RoomTable {
    /// Returns false if the connection was already in the room.
    pub fn join(&mut self, conversation_id: Uuid, conn_id: ConnectionId) -> bool {
        self.joined
            .entry(conn_id)
            .or_default()
            .insert(conversation_id);
        self.members
            .entry(conversation_id)
            .or_default()
            .insert(conn_id)
    }

    pub fn leave(&mut self, conversation_id: Uuid, conn_id: ConnectionId) -> bool {
        if let Some(rooms) = self.joined.get_mut(&conn_id) {
            rooms.remove(&conversation_id);
            if rooms.is_empty() {
                self.joined.remove(&conn_id);
            }
        }
        match self.members.get_mut(&conversation_id) {
            Some(conns) => {
                let removed = conns.remove(&conn_id);
                if conns.is_empty() {
                    self.members.remove(&conversation_id);
                }
                removed
            }
            None => false,
        }
    }

    /// Remove a connection from every room it joined.
    pub fn leave_all(&mut self, conn_id: ConnectionId) -> Vec<Uuid> {
        let rooms: Vec<Uuid> = self
            .joined
            .remove(&conn_id)
            .map(|rooms| rooms.into_iter().collect())
            .unwrap_or_default();
        for conversation_id in &rooms {
            if let Some(conns) = self.members.get_mut(conversation_id) {
                conns.remove(&conn_id);
                if conns.is_empty() {
                    self.members.remove(conversation_id);
                }
            }
        }
        rooms
    }

    pub fn members(&self, conversation_id: Uuid) -> Vec<ConnectionId> {
        self.members
            .get(&conversation_id)
            .map(|conns| conns.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_joined(&self, conversation_id: Uuid, conn_id: ConnectionId) -> bool {
        self.members
            .get(&conversation_id)
            .is_some_and(|conns| conns.contains(&conn_id))
    }
}
