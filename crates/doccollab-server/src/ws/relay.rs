//! Persist-then-publish relay for content changes.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, instrument};

use doccollab_core::protocol::ServerMessage;
use doccollab_core::{ConnectionId, ContentStore, DocumentBody, DocumentId, StoreError};

use super::rooms::RoomRegistry;

/// Fans a validated content change out to a document's room, after — and
/// only after — the content store accepted the write.
///
/// The ordering guarantees that any peer receiving a live update can assume
/// the store already reflects it: a late joiner reading through `get` is
/// never behind a peer that saw the broadcast.
pub struct ContentRelay {
    store: Arc<dyn ContentStore>,
    rooms: Arc<RoomRegistry>,
}

impl ContentRelay {
    /// Build a relay over the given store and registry.
    pub fn new(store: Arc<dyn ContentStore>, rooms: Arc<RoomRegistry>) -> Self {
        Self { store, rooms }
    }

    /// Persist `body` for `document`, then broadcast it to every room
    /// member except `origin`.
    ///
    /// On store failure nothing is broadcast and the error propagates to
    /// the originating connection only. Returns the number of peers the
    /// update was queued for.
    #[instrument(skip(self, body), fields(document = %document, origin = %origin))]
    pub async fn publish(
        &self,
        origin: &ConnectionId,
        document: &DocumentId,
        body: DocumentBody,
    ) -> Result<usize, StoreError> {
        self.store.put(document, body.clone()).await?;
        counter!("content_changes_persisted_total").increment(1);

        let message = ServerMessage::ContentUpdated {
            file_id: document.clone(),
            content: body,
        };
        let delivered = self.rooms.broadcast(document, &message, origin).await;
        debug!(delivered, "content change relayed");
        Ok(delivered)
    }
}
