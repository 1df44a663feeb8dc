//! Version history
//!
//! An append-only log of the online records superseded by publishing,
//! together with the payload bytes they pointed at, and the persisted
//! publish-tag counter.

use crate::address::ContentAddress;
use crate::entities::{Actor, Resource, ResourceId};
use crate::error::{Result, VellumError};
use crate::storage::ObjectStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::debug;

/// Immutable copy of a resource as it was online before a publish
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionSnapshot {
    pub resource_id: ResourceId,
    pub tag: u64,
    pub record: Resource,

    /// Whether the payload bytes were captured alongside the record
    pub has_payload: bool,

    pub published_by: Actor,

    #[serde(with = "time::serde::rfc3339")]
    pub published_at: OffsetDateTime,
}

#[derive(Debug, Serialize, Deserialize)]
struct TagState {
    last_tag: u64,
}

pub struct VersionHistory {
    store: Arc<dyn ObjectStore>,
    last_tag: Mutex<u64>,
}

impl VersionHistory {
    /// Load the tag counter. The counter resumes from the highest of the
    /// persisted value and any tag found in history, so a lost counter
    /// write can never cause a tag to be reused.
    pub async fn load(store: Arc<dyn ObjectStore>) -> Result<Self> {
        let persisted = if store.exists(ContentAddress::publish_tag_key()).await? {
            let bytes = store.get(ContentAddress::publish_tag_key()).await?;
            serde_json::from_slice::<TagState>(&bytes)?.last_tag
        } else {
            0
        };

        let recorded = store
            .list_keys(ContentAddress::history_prefix())
            .await?
            .iter()
            .filter_map(|key| Self::tag_of_key(key))
            .max()
            .unwrap_or(0);

        Ok(Self {
            store,
            last_tag: Mutex::new(persisted.max(recorded)),
        })
    }

    fn tag_of_key(key: &str) -> Option<u64> {
        key.rsplit('/')
            .next()?
            .strip_suffix(".json")?
            .parse()
            .ok()
    }

    /// Issue the next publish tag, persisting it before returning
    pub async fn next_tag(&self) -> Result<u64> {
        let mut last_tag = self.last_tag.lock().await;
        let tag = *last_tag + 1;
        let state = serde_json::to_vec(&TagState { last_tag: tag })?;
        self.store
            .put(ContentAddress::publish_tag_key(), state)
            .await?;
        *last_tag = tag;
        Ok(tag)
    }

    /// The most recently issued tag (0 before the first publish)
    pub async fn current_tag(&self) -> u64 {
        *self.last_tag.lock().await
    }

    /// Append a snapshot of `record` under `tag`
    pub async fn record(
        &self,
        record: &Resource,
        payload: Option<Vec<u8>>,
        tag: u64,
        published_by: &Actor,
    ) -> Result<VersionSnapshot> {
        let key = ContentAddress::snapshot_key(&record.id, tag);
        if self.store.exists(&key).await? {
            return Err(VellumError::Conflict(format!(
                "Version {} of resource {} already recorded",
                tag, record.id
            )));
        }

        let snapshot = VersionSnapshot {
            resource_id: record.id,
            tag,
            record: record.clone(),
            has_payload: payload.is_some(),
            published_by: published_by.clone(),
            published_at: OffsetDateTime::now_utc(),
        };

        // payload first: a snapshot record never points at missing bytes
        if let Some(payload) = payload {
            self.store
                .put(&ContentAddress::snapshot_payload_key(&record.id, tag), payload)
                .await?;
        }
        self.store.put(&key, serde_json::to_vec(&snapshot)?).await?;

        debug!(resource = %record.id, path = %record.path, tag, "Recorded version snapshot");
        Ok(snapshot)
    }

    /// Every snapshot of a resource, oldest first
    pub async fn list_versions(&self, id: &ResourceId) -> Result<Vec<VersionSnapshot>> {
        let keys = self
            .store
            .list_keys(&ContentAddress::resource_history_prefix(id))
            .await?;

        let mut versions = Vec::new();
        for key in keys.iter().filter(|k| k.ends_with(".json")) {
            let bytes = self.store.get(key).await?;
            versions.push(serde_json::from_slice::<VersionSnapshot>(&bytes)?);
        }
        versions.sort_by_key(|v| v.tag);
        Ok(versions)
    }

    pub async fn get_version(&self, id: &ResourceId, tag: u64) -> Result<VersionSnapshot> {
        let key = ContentAddress::snapshot_key(id, tag);
        if !self.store.exists(&key).await? {
            return Err(VellumError::not_found(format!(
                "version {} of resource {}",
                tag, id
            )));
        }
        let bytes = self.store.get(&key).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Payload bytes captured with a snapshot
    pub async fn read_version_content(&self, id: &ResourceId, tag: u64) -> Result<Vec<u8>> {
        let snapshot = self.get_version(id, tag).await?;
        if !snapshot.has_payload {
            return Err(VellumError::not_found(format!(
                "content of version {} of resource {}",
                tag, id
            )));
        }
        Ok(self
            .store
            .get(&ContentAddress::snapshot_payload_key(id, tag))
            .await?)
    }
}
