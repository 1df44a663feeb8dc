//! Content store: immutable, identifier-addressed payload blobs
//!
//! Blobs are written once under a fresh [`BlobId`] and never modified. A
//! content edit stores a new blob; the old one is reclaimed by the
//! repository once the sibling index reports no remaining references.

use crate::address::ContentAddress;
use crate::entities::{BlobId, ContentRef};
use crate::error::{Result, VellumError};
use crate::storage::{ObjectStore, StorageError};
use std::sync::Arc;
use tracing::debug;

pub struct ContentStore {
    store: Arc<dyn ObjectStore>,
}

impl ContentStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Store a payload under a fresh blob id
    pub async fn put(&self, payload: Vec<u8>) -> Result<ContentRef> {
        let content = ContentRef {
            blob: BlobId::new(),
            digest: ContentAddress::hash(&payload),
            size: payload.len() as u64,
        };
        self.store
            .put(&ContentAddress::blob_key(&content.blob), payload)
            .await?;
        debug!(blob = %content.blob, size = content.size, "Stored content blob");
        Ok(content)
    }

    /// Read a payload and verify it against the digest in `content`.
    ///
    /// Backend failures surface as [`VellumError::UnreadableContent`], not
    /// as storage faults: a bad blob spoils one resource, not a batch.
    pub async fn read(&self, content: &ContentRef) -> Result<Vec<u8>> {
        let payload = self
            .store
            .get(&ContentAddress::blob_key(&content.blob))
            .await
            .map_err(|e| VellumError::UnreadableContent {
                blob: content.blob.to_string(),
                reason: e.to_string(),
            })?;

        if !ContentAddress::verify(&payload, &content.digest) {
            return Err(VellumError::CorruptContent {
                blob: content.blob.to_string(),
                expected: content.digest.clone(),
                actual: ContentAddress::hash(&payload),
            });
        }
        Ok(payload)
    }

    /// Check that the blob behind `content` is present and intact
    pub async fn verify(&self, content: &ContentRef) -> Result<()> {
        self.read(content).await.map(|_| ())
    }

    /// Delete a blob that no resource references any more
    pub async fn reclaim(&self, blob: &BlobId) -> std::result::Result<(), StorageError> {
        self.store.delete(&ContentAddress::blob_key(blob)).await?;
        debug!(blob = %blob, "Reclaimed content blob");
        Ok(())
    }

    pub async fn exists(&self, blob: &BlobId) -> Result<bool> {
        Ok(self.store.exists(&ContentAddress::blob_key(blob)).await?)
    }
}
