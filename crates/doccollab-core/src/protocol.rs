//! The JSON wire protocol spoken over the persistent connection.
//!
//! Inbound frames are decoded once at the boundary into a [`ClientEnvelope`]
//! carrying the `type` tag and the remaining fields; the router matches on
//! the tag and decodes the typed payload. Outbound frames are the tagged
//! [`ServerMessage`] enum.
//!
//! Field names on the wire are camelCase (`fileId`), matching the client.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::DocumentId;
use crate::store::DocumentBody;

/// WebSocket close code sent when authentication fails, distinguishable
/// from a normal close by the client.
pub const AUTH_FAILURE_CLOSE_CODE: u16 = 4001;

/// An inbound message envelope: the `type` tag plus whatever other fields
/// the client sent, decoded lazily per message type.
#[derive(Clone, Debug, Deserialize)]
pub struct ClientEnvelope {
    /// Message type tag (`auth`, `join`, `leave`, `content-change`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// All remaining fields of the envelope.
    #[serde(flatten)]
    pub payload: Value,
}

impl ClientEnvelope {
    /// Decode the non-tag fields into a typed payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// Payload of an `auth` envelope.
///
/// The token is optional at the decode layer so that a missing credential
/// can be reported the same way as an invalid one.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AuthPayload {
    /// Opaque signed bearer token.
    pub token: Option<String>,
}

/// Payload of a `join` envelope.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPayload {
    /// Document whose room to join.
    pub file_id: Option<DocumentId>,
}

/// Payload of a `leave` envelope.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeavePayload {
    /// Document whose room to leave.
    pub file_id: Option<DocumentId>,
}

/// Payload of a `content-change` envelope.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentChangePayload {
    /// Document being edited.
    pub file_id: Option<DocumentId>,
    /// Full replacement body (last writer wins).
    pub content: Option<DocumentBody>,
}

/// Outbound messages sent to a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Credential accepted; the session is now authenticated.
    #[serde(rename = "auth_success")]
    AuthSuccess {
        /// Human-readable confirmation.
        message: String,
    },
    /// Room membership granted.
    #[serde(rename = "join_success", rename_all = "camelCase")]
    JoinSuccess {
        /// The joined document.
        file_id: DocumentId,
    },
    /// A peer changed the document; the store already reflects this body.
    #[serde(rename = "content-updated", rename_all = "camelCase")]
    ContentUpdated {
        /// The changed document.
        file_id: DocumentId,
        /// The new full body.
        content: DocumentBody,
    },
    /// Something about the last message was rejected.
    #[serde(rename = "error")]
    Error {
        /// What went wrong.
        message: String,
    },
}

impl ServerMessage {
    /// The standard `auth_success` acknowledgement.
    #[must_use]
    pub fn auth_success() -> Self {
        Self::AuthSuccess {
            message: "Authentication successful".to_owned(),
        }
    }

    /// Build an `error` message.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}
