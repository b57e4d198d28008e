//! Per-connection session state.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::error;

use doccollab_core::protocol::ServerMessage;
use doccollab_core::{ConnectionId, DocumentId, UserId};

/// Authentication state of one connection.
///
/// `Rejected` is terminal: the connection is about to be closed and any
/// further inbound messages are no-ops.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthState {
    /// Connected, credential not yet presented. No room operations allowed.
    Unauthenticated,
    /// Credential verified; room operations act on behalf of this user.
    Authenticated(UserId),
    /// Credential rejected; terminal.
    Rejected,
}

/// A frame queued for the connection's outbound write task.
#[derive(Clone, Debug)]
pub enum OutboundFrame {
    /// A serialized JSON message.
    Text(Arc<String>),
    /// Close the socket with this code.
    Close(u16),
}

/// Server-side state for one open WebSocket connection.
///
/// Owned by the connection's task; rooms hold `Arc` handles for fan-out but
/// never manage its lifetime — a disconnecting session is actively removed
/// from every room by its own cleanup.
pub struct ClientConnection {
    /// Unique connection ID, used for self-exclusion during broadcast.
    pub id: ConnectionId,
    auth: Mutex<AuthState>,
    joined: Mutex<HashSet<DocumentId>>,
    tx: mpsc::Sender<OutboundFrame>,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Whether the client has responded since the last ping.
    pub is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create connection state backed by the given send channel.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<OutboundFrame>) -> Self {
        let now = Instant::now();
        Self {
            id,
            auth: Mutex::new(AuthState::Unauthenticated),
            joined: Mutex::new(HashSet::new()),
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    // ── Auth state machine ──────────────────────────────────────────

    /// Promote to `Authenticated`. A no-op once rejected.
    pub fn authenticate(&self, user: UserId) {
        let mut auth = self.auth.lock();
        if *auth != AuthState::Rejected {
            *auth = AuthState::Authenticated(user);
        }
    }

    /// Enter the terminal `Rejected` state.
    pub fn reject(&self) {
        *self.auth.lock() = AuthState::Rejected;
    }

    /// Snapshot of the current auth state.
    pub fn auth_state(&self) -> AuthState {
        self.auth.lock().clone()
    }

    /// The authenticated user, if any.
    pub fn user_id(&self) -> Option<UserId> {
        match &*self.auth.lock() {
            AuthState::Authenticated(user) => Some(user.clone()),
            _ => None,
        }
    }

    /// Whether the terminal `Rejected` state has been entered.
    pub fn is_rejected(&self) -> bool {
        *self.auth.lock() == AuthState::Rejected
    }

    // ── Room membership bookkeeping ─────────────────────────────────

    /// Record membership in a document's room.
    pub fn note_join(&self, document: DocumentId) {
        let _ = self.joined.lock().insert(document);
    }

    /// Forget membership in a document's room.
    pub fn note_leave(&self, document: &DocumentId) {
        let _ = self.joined.lock().remove(document);
    }

    /// Whether this connection has joined the document's room.
    pub fn has_joined(&self, document: &DocumentId) -> bool {
        self.joined.lock().contains(document)
    }

    /// Snapshot of every joined room (used by disconnect cleanup).
    pub fn joined_documents(&self) -> Vec<DocumentId> {
        self.joined.lock().iter().cloned().collect()
    }

    // ── Outbound sending ────────────────────────────────────────────

    /// Queue a pre-serialized frame for this client.
    ///
    /// Non-blocking: returns `false` and counts a drop when the queue is
    /// full or closed, so one slow peer never stalls a broadcast.
    pub fn send_text(&self, message: Arc<String>) -> bool {
        if self.tx.try_send(OutboundFrame::Text(message)).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Serialize and queue a [`ServerMessage`].
    pub fn send_message(&self, message: &ServerMessage) -> bool {
        match serde_json::to_string(message) {
            Ok(json) => self.send_text(Arc::new(json)),
            Err(err) => {
                error!(conn_id = %self.id, error = %err, "failed to serialize server message");
                false
            }
        }
    }

    /// Queue a close frame with the given code.
    pub fn close(&self, code: u16) -> bool {
        self.tx.try_send(OutboundFrame::Close(code)).is_ok()
    }

    /// Total frames dropped due to a full or closed queue.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    // ── Liveness ────────────────────────────────────────────────────

    /// Mark the connection alive (pong or any client activity).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Check and reset the alive flag for the heartbeat cycle.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Time since the last pong (or since connecting).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }
}
