//! Message decode, validation, and dispatch.
//!
//! Every inbound frame passes through [`MessageRouter::dispatch`], which is
//! the per-message error boundary: any failure — malformed JSON, a bad
//! credential, a denied join, a write without membership, a store error —
//! becomes a [`SessionError`] here and is reported back to the sender as an
//! `error` envelope by the session loop. Only authentication failures are
//! fatal to the connection.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, info, instrument, warn};

use doccollab_auth::{AuthError, TokenVerifier};
use doccollab_core::AccessOracle;
use doccollab_core::protocol::{
    AuthPayload, ClientEnvelope, ContentChangePayload, JoinPayload, LeavePayload, ServerMessage,
};
use doccollab_core::{DocumentId, StoreError};

use super::connection::ClientConnection;
use super::relay::ContentRelay;
use super::rooms::RoomRegistry;

/// Everything that can go wrong while handling one inbound message.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The envelope was malformed, missing required fields, or of an
    /// unknown type. Reported; connection stays open.
    #[error("{0}")]
    Protocol(String),

    /// A room operation was attempted before authenticating. Reported;
    /// connection stays open.
    #[error("Authentication required")]
    NotAuthenticated,

    /// The presented credential was missing, malformed, or expired.
    /// Reported, then the connection closes with the auth-failure code.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Authenticated, but the access oracle denied the document.
    /// Reported; connection stays open, membership unchanged.
    #[error("You do not have permission to access this file")]
    Forbidden,

    /// A content change for a room this session never joined. Reported
    /// and dropped before it can reach the store.
    #[error("You have not joined this file")]
    NotJoined,

    /// The content store rejected the write; the broadcast was suppressed
    /// and the client may retry.
    #[error("Failed to save content")]
    Persistence(#[source] StoreError),
}

impl SessionError {
    /// Whether this error terminates the connection.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

/// Decodes inbound envelopes, enforces the session state machine, and
/// dispatches to the auth / join / leave / content-change handlers.
pub struct MessageRouter {
    verifier: Arc<TokenVerifier>,
    oracle: Arc<dyn AccessOracle>,
    rooms: Arc<RoomRegistry>,
    relay: ContentRelay,
}

impl MessageRouter {
    /// Build a router over the injected collaborators.
    pub fn new(
        verifier: Arc<TokenVerifier>,
        oracle: Arc<dyn AccessOracle>,
        rooms: Arc<RoomRegistry>,
        relay: ContentRelay,
    ) -> Self {
        Self {
            verifier,
            oracle,
            rooms,
            relay,
        }
    }

    /// Handle one inbound text frame for `connection`.
    ///
    /// Success replies (`auth_success`, `join_success`) are queued on the
    /// connection here; errors are returned for the session loop to report.
    /// Messages arriving after the session was rejected are no-ops.
    #[instrument(skip_all, fields(conn_id = %connection.id, kind))]
    pub async fn dispatch(
        &self,
        connection: &Arc<ClientConnection>,
        raw: &str,
    ) -> Result<(), SessionError> {
        if connection.is_rejected() {
            return Ok(());
        }

        let envelope: ClientEnvelope = serde_json::from_str(raw)
            .map_err(|err| SessionError::Protocol(format!("Error processing message: {err}")))?;
        let _ = tracing::Span::current().record("kind", envelope.kind.as_str());
        counter!("ws_messages_total", "kind" => envelope.kind.clone()).increment(1);

        match envelope.kind.as_str() {
            "auth" => self.handle_auth(connection, &envelope),
            "join" => self.handle_join(connection, &envelope).await,
            "leave" => self.handle_leave(connection, &envelope).await,
            "content-change" => self.handle_content_change(connection, &envelope).await,
            other => Err(SessionError::Protocol(format!(
                "Unknown message type '{other}'"
            ))),
        }
    }

    /// `auth`: verify the bearer token and promote the session.
    fn handle_auth(
        &self,
        connection: &Arc<ClientConnection>,
        envelope: &ClientEnvelope,
    ) -> Result<(), SessionError> {
        let payload: AuthPayload = decode_payload(envelope)?;
        let user = self.verifier.verify(payload.token.as_deref())?;
        connection.authenticate(user.clone());
        let _ = connection.send_message(&ServerMessage::auth_success());
        info!(conn_id = %connection.id, user_id = %user, "session authenticated");
        Ok(())
    }

    /// `join`: access-check with the oracle, then add to the room.
    async fn handle_join(
        &self,
        connection: &Arc<ClientConnection>,
        envelope: &ClientEnvelope,
    ) -> Result<(), SessionError> {
        let user = connection.user_id().ok_or(SessionError::NotAuthenticated)?;
        let payload: JoinPayload = decode_payload(envelope)?;
        let document = require_file_id(payload.file_id)?;

        if !self.oracle.can_access(&user, &document).await {
            warn!(user_id = %user, document = %document, "join denied by access oracle");
            return Err(SessionError::Forbidden);
        }

        self.rooms.join(&document, connection).await;
        let _ = connection.send_message(&ServerMessage::JoinSuccess {
            file_id: document.clone(),
        });
        info!(user_id = %user, document = %document, "joined document room");
        Ok(())
    }

    /// `leave`: drop room membership. A missing `fileId` is ignored.
    async fn handle_leave(
        &self,
        connection: &Arc<ClientConnection>,
        envelope: &ClientEnvelope,
    ) -> Result<(), SessionError> {
        let user = connection.user_id().ok_or(SessionError::NotAuthenticated)?;
        let payload: LeavePayload = decode_payload(envelope)?;
        if let Some(document) = payload.file_id {
            self.rooms.leave(&document, connection).await;
            debug!(user_id = %user, document = %document, "left document room");
        }
        Ok(())
    }

    /// `content-change`: membership-gated persist-then-publish.
    async fn handle_content_change(
        &self,
        connection: &Arc<ClientConnection>,
        envelope: &ClientEnvelope,
    ) -> Result<(), SessionError> {
        let _user = connection.user_id().ok_or(SessionError::NotAuthenticated)?;
        let payload: ContentChangePayload = decode_payload(envelope)?;
        let document = require_file_id(payload.file_id)?;
        let content = payload
            .content
            .ok_or_else(|| SessionError::Protocol("Content required".into()))?;

        // Only a joined (already access-checked) room accepts writes.
        if !connection.has_joined(&document) {
            return Err(SessionError::NotJoined);
        }

        let _ = self
            .relay
            .publish(&connection.id, &document, content)
            .await
            .map_err(SessionError::Persistence)?;
        Ok(())
    }
}

fn decode_payload<T: serde::de::DeserializeOwned>(
    envelope: &ClientEnvelope,
) -> Result<T, SessionError> {
    envelope
        .decode()
        .map_err(|err| SessionError::Protocol(format!("Error processing message: {err}")))
}

fn require_file_id(file_id: Option<DocumentId>) -> Result<DocumentId, SessionError> {
    file_id.ok_or_else(|| SessionError::Protocol("File ID required".into()))
}
