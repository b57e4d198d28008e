//! The content store: external durable storage for document bodies.
//!
//! Bodies are structured JSON (the editor's document tree), replaced whole
//! on every write — last writer wins, no merging. A document that has never
//! been written reads as [`empty_document`], and the store writes that
//! default back so subsequent reads are stable.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::ids::DocumentId;

/// A document body as stored and broadcast: arbitrary structured JSON.
pub type DocumentBody = Value;

/// The body every document starts with: a single empty paragraph.
#[must_use]
pub fn empty_document() -> DocumentBody {
    json!({
        "type": "doc",
        "content": [
            {
                "type": "paragraph",
                "content": [{"type": "text", "text": ""}]
            }
        ]
    })
}

/// Errors from the content store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// File I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored bytes were not valid JSON.
    #[error("corrupt document body: {0}")]
    Corrupt(#[from] serde_json::Error),

    /// Backend-specific failure.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Durable get/put of document bodies, keyed by document ID.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Read a document's body.
    ///
    /// When the document has never been written, returns
    /// [`empty_document`] *and persists it* so the default is stable.
    async fn get(&self, document: &DocumentId) -> Result<DocumentBody, StoreError>;

    /// Replace a document's body (full-document replace, last writer wins).
    async fn put(&self, document: &DocumentId, body: DocumentBody) -> Result<(), StoreError>;
}
