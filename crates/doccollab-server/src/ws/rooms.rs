//! Per-document rooms and broadcast fan-out.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use doccollab_core::protocol::ServerMessage;
use doccollab_core::{ConnectionId, DocumentId};

use super::connection::ClientConnection;

/// The one shared mutable structure of the session layer: document ID →
/// member connections.
///
/// Rooms are created implicitly on first join and pruned when their last
/// member leaves. Members are held as `Arc` handles; a room never owns a
/// connection's lifetime, so disconnect cleanup must call [`leave_all`].
///
/// [`leave_all`]: RoomRegistry::leave_all
pub struct RoomRegistry {
    rooms: RwLock<HashMap<DocumentId, HashMap<ConnectionId, Arc<ClientConnection>>>>,
}

impl RoomRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Add a connection to a document's room. Idempotent.
    pub async fn join(&self, document: &DocumentId, connection: &Arc<ClientConnection>) {
        let mut rooms = self.rooms.write().await;
        let members = rooms.entry(document.clone()).or_default();
        let _ = members.insert(connection.id.clone(), Arc::clone(connection));
        connection.note_join(document.clone());
        debug!(conn_id = %connection.id, document = %document, members = members.len(), "joined room");
    }

    /// Remove a connection from a document's room. Idempotent; leaving a
    /// room never joined is a no-op.
    pub async fn leave(&self, document: &DocumentId, connection: &ClientConnection) {
        let mut rooms = self.rooms.write().await;
        if let Some(members) = rooms.get_mut(document) {
            let _ = members.remove(&connection.id);
            if members.is_empty() {
                let _ = rooms.remove(document);
            }
        }
        connection.note_leave(document);
        debug!(conn_id = %connection.id, document = %document, "left room");
    }

    /// Remove a connection from every room it joined. Run unconditionally
    /// on disconnect, whatever triggered the teardown.
    pub async fn leave_all(&self, connection: &ClientConnection) {
        for document in connection.joined_documents() {
            self.leave(&document, connection).await;
        }
    }

    /// Deliver `message` to every current member of the document's room
    /// except `exclude` (the originator must not receive an echo).
    ///
    /// The message is serialized once and queued per recipient without
    /// blocking; a full queue drops the frame for that peer only. Returns
    /// the number of members the frame was queued for.
    pub async fn broadcast(
        &self,
        document: &DocumentId,
        message: &ServerMessage,
        exclude: &ConnectionId,
    ) -> usize {
        let json = match serde_json::to_string(message) {
            Ok(json) => Arc::new(json),
            Err(err) => {
                warn!(document = %document, error = %err, "failed to serialize broadcast");
                return 0;
            }
        };

        let rooms = self.rooms.read().await;
        let Some(members) = rooms.get(document) else {
            return 0;
        };

        let mut delivered = 0;
        for (conn_id, member) in members {
            if conn_id == exclude {
                continue;
            }
            if member.send_text(Arc::clone(&json)) {
                delivered += 1;
            } else {
                warn!(conn_id = %conn_id, document = %document, "broadcast frame dropped for slow peer");
            }
        }
        counter!("room_broadcasts_total").increment(1);
        debug!(document = %document, delivered, "broadcast content update");
        delivered
    }

    /// Current member count of a document's room.
    pub async fn member_count(&self, document: &DocumentId) -> usize {
        self.rooms
            .read()
            .await
            .get(document)
            .map_or(0, HashMap::len)
    }

    /// Whether the connection is currently a member of the room.
    pub async fn is_member(&self, document: &DocumentId, connection: &ConnectionId) -> bool {
        self.rooms
            .read()
            .await
            .get(document)
            .is_some_and(|members| members.contains_key(connection))
    }

    /// Number of rooms with at least one member.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}
