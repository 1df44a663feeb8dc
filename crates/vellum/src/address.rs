use crate::entities::{BlobId, ProjectId, ResourceId, View};
use sha2::{Digest, Sha256};

/// Content digests and the storage key layout of a repository
pub struct ContentAddress;

impl ContentAddress {
    /// Generate SHA-256 hash of content, returns hash with "sha256:" prefix
    pub fn hash(content: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content);
        let result = hasher.finalize();
        format!("sha256:{:x}", result)
    }

    /// Verify content matches expected hash
    pub fn verify(content: &[u8], expected_hash: &str) -> bool {
        Self::hash(content) == expected_hash
    }

    pub fn blob_prefix() -> &'static str {
        "blobs/"
    }

    /// Storage key for blob content
    /// Example: "blobs/6f1c..."
    pub fn blob_key(blob: &BlobId) -> String {
        format!("blobs/{}", blob)
    }

    /// Inverse of [`ContentAddress::blob_key`]
    pub fn blob_of_key(key: &str) -> Option<BlobId> {
        let id = key.strip_prefix(Self::blob_prefix())?;
        uuid::Uuid::parse_str(id).ok().map(BlobId)
    }

    /// Prefix of every resource record in a view
    /// Example: "resources/online/"
    pub fn view_prefix(view: View) -> String {
        format!("resources/{}/", view)
    }

    /// Storage key for a resource record in a view
    /// Example: "resources/offline/0c7e....json"
    pub fn resource_key(view: View, id: &ResourceId) -> String {
        format!("resources/{}/{}.json", view, id)
    }

    pub fn project_prefix() -> &'static str {
        "projects/"
    }

    /// Example: "projects/00000000-0000-0000-0000-000000000002.json"
    pub fn project_key(id: &ProjectId) -> String {
        format!("projects/{}.json", id)
    }

    pub fn history_prefix() -> &'static str {
        "history/"
    }

    /// Prefix of every snapshot of one resource
    pub fn resource_history_prefix(id: &ResourceId) -> String {
        format!("history/{}/", id)
    }

    /// Storage key for a version snapshot record. Tags are zero padded
    /// so lexical key order is publish order.
    /// Example: "history/0c7e.../00000000000000000007.json"
    pub fn snapshot_key(id: &ResourceId, tag: u64) -> String {
        format!("history/{}/{:020}.json", id, tag)
    }

    /// Storage key for the payload captured with a snapshot
    pub fn snapshot_payload_key(id: &ResourceId, tag: u64) -> String {
        format!("history/{}/{:020}.bin", id, tag)
    }

    pub fn publish_tag_key() -> &'static str {
        "state/publish_tag.json"
    }

    pub fn property_definitions_key() -> &'static str {
        "state/property_definitions.json"
    }
}
