//! Reference implementations of the external collaborators.
//!
//! Production deployments back these with the workspace service; the
//! implementations here cover local development and tests.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;

use doccollab_core::{
    AccessOracle, ContentStore, DocumentBody, DocumentId, StoreError, UserId, empty_document,
};

/// An oracle that allows every (user, document) pair. Development only.
pub struct OpenAccessOracle;

#[async_trait]
impl AccessOracle for OpenAccessOracle {
    async fn can_access(&self, _user: &UserId, _document: &DocumentId) -> bool {
        true
    }
}

/// An oracle backed by an explicit grant table, loadable from JSON
/// (`{"user-id": ["doc-id", ...], ...}`).
#[derive(Default, Deserialize)]
#[serde(transparent)]
pub struct StaticAccessOracle {
    grants: HashMap<UserId, HashSet<DocumentId>>,
}

impl StaticAccessOracle {
    /// An oracle that denies everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant `user` access to `document`.
    #[must_use]
    pub fn grant(mut self, user: UserId, document: DocumentId) -> Self {
        let _ = self.grants.entry(user).or_default().insert(document);
        self
    }
}

#[async_trait]
impl AccessOracle for StaticAccessOracle {
    async fn can_access(&self, user: &UserId, document: &DocumentId) -> bool {
        self.grants
            .get(user)
            .is_some_and(|docs| docs.contains(document))
    }
}

/// In-memory content store. Bodies live for the process lifetime.
pub struct MemoryContentStore {
    documents: RwLock<HashMap<DocumentId, DocumentBody>>,
}

impl MemoryContentStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryContentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn get(&self, document: &DocumentId) -> Result<DocumentBody, StoreError> {
        {
            let documents = self.documents.read().await;
            if let Some(body) = documents.get(document) {
                return Ok(body.clone());
            }
        }
        // First read: persist the default so subsequent reads are stable.
        let mut documents = self.documents.write().await;
        let body = documents
            .entry(document.clone())
            .or_insert_with(empty_document)
            .clone();
        Ok(body)
    }

    async fn put(&self, document: &DocumentId, body: DocumentBody) -> Result<(), StoreError> {
        let _ = self
            .documents
            .write()
            .await
            .insert(document.clone(), body);
        Ok(())
    }
}

/// Content store persisting each document as one JSON file under a data
/// directory. Good enough for single-node deployments.
pub struct JsonFileContentStore {
    root: PathBuf,
}

impl JsonFileContentStore {
    /// Create a store rooted at `root`. The directory is created lazily on
    /// first write.
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Document IDs come from clients; only plain identifiers may become
    /// file names.
    fn path_for(&self, document: &DocumentId) -> Result<PathBuf, StoreError> {
        let id = document.as_str();
        if id.is_empty()
            || id.contains(['/', '\\'])
            || id.contains("..")
            || id.starts_with('.')
        {
            return Err(StoreError::Backend(format!("invalid document id: {id:?}")));
        }
        Ok(self.root.join(format!("{id}.json")))
    }
}

#[async_trait]
impl ContentStore for JsonFileContentStore {
    async fn get(&self, document: &DocumentId) -> Result<DocumentBody, StoreError> {
        let path = self.path_for(document)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let body = empty_document();
                self.put(document, body.clone()).await?;
                debug!(document = %document, "initialized document with empty default");
                Ok(body)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn put(&self, document: &DocumentId, body: DocumentBody) -> Result<(), StoreError> {
        let path = self.path_for(document)?;
        tokio::fs::create_dir_all(&self.root).await?;
        let bytes = serde_json::to_vec(&body)?;
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }
}
