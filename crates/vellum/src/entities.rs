//! Core data structures for the vellum repository

use crate::path::ResourcePath;
use crate::state::ResourceState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Stable identifier of a resource, kept across edits and publishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub Uuid);

impl ResourceId {
    pub fn new() -> Self {
        ResourceId(Uuid::new_v4())
    }
}

impl Default for ResourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an immutable content blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobId(pub Uuid);

impl BlobId {
    pub fn new() -> Self {
        BlobId(Uuid::new_v4())
    }
}

impl Default for BlobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier of a project
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(pub Uuid);

impl ProjectId {
    /// The published, read-only project
    pub const ONLINE: ProjectId = ProjectId(Uuid::from_u128(1));

    /// The default working project
    pub const OFFLINE: ProjectId = ProjectId(Uuid::from_u128(2));

    pub fn new() -> Self {
        ProjectId(Uuid::new_v4())
    }

    pub fn is_online(&self) -> bool {
        *self == Self::ONLINE
    }
}

impl Default for ProjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The user or service performing an operation
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Actor(pub String);

impl From<String> for Actor {
    fn from(s: String) -> Self {
        Actor(s)
    }
}

impl From<&str> for Actor {
    fn from(s: &str) -> Self {
        Actor(s.to_string())
    }
}

impl AsRef<str> for Actor {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Explicit request context threaded through every mutating call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    pub actor: Actor,
    pub project: ProjectId,
}

impl Context {
    pub fn new(actor: impl Into<Actor>, project: ProjectId) -> Self {
        Self {
            actor: actor.into(),
            project,
        }
    }

    /// The same actor working in another project
    pub fn with_project(&self, project: ProjectId) -> Self {
        Self {
            actor: self.actor.clone(),
            project,
        }
    }
}

/// One of the two directory views
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum View {
    /// Working area shared by every non-online project
    Offline,
    /// Published area, mutated only by the publish engine
    Online,
}

impl View {
    pub fn as_str(&self) -> &'static str {
        match self {
            View::Offline => "offline",
            View::Online => "online",
        }
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    File,
    Folder,
}

/// Reference from a resource to its content blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRef {
    pub blob: BlobId,
    /// `sha256:<hex>` digest of the payload
    pub digest: String,
    pub size: u64,
}

/// A resource record as stored in one directory view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub path: ResourcePath,
    pub resource_type: ResourceType,

    /// `None` for folders
    pub content: Option<ContentRef>,

    /// Per-path properties, never shared between siblings
    pub properties: BTreeMap<String, String>,

    pub state: ResourceState,

    /// The project that last modified this resource and therefore owns it
    pub project_last_modified: ProjectId,

    pub user_last_modified: Actor,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    #[serde(with = "time::serde::rfc3339")]
    pub last_modified_at: OffsetDateTime,
}

impl Resource {
    /// A new, unpublished file
    pub fn new_file(
        path: ResourcePath,
        content: ContentRef,
        properties: BTreeMap<String, String>,
        ctx: &Context,
    ) -> Self {
        Self::new(path, ResourceType::File, Some(content), properties, ctx)
    }

    /// A new, unpublished folder
    pub fn new_folder(path: ResourcePath, ctx: &Context) -> Self {
        Self::new(path, ResourceType::Folder, None, BTreeMap::new(), ctx)
    }

    fn new(
        path: ResourcePath,
        resource_type: ResourceType,
        content: Option<ContentRef>,
        properties: BTreeMap<String, String>,
        ctx: &Context,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: ResourceId::new(),
            path,
            resource_type,
            content,
            properties,
            state: ResourceState::New,
            project_last_modified: ctx.project,
            user_last_modified: ctx.actor.clone(),
            created_at: now,
            last_modified_at: now,
        }
    }

    pub fn is_folder(&self) -> bool {
        self.resource_type == ResourceType::Folder
    }

    pub fn blob(&self) -> Option<BlobId> {
        self.content.as_ref().map(|c| c.blob)
    }

    /// Record a modification made in `ctx`
    pub(crate) fn touch_by(&mut self, ctx: &Context, at: OffsetDateTime) {
        self.user_last_modified = ctx.actor.clone();
        self.last_modified_at = at;
    }

    /// Whether content and properties match another record
    pub fn same_payload(&self, other: &Resource) -> bool {
        self.content == other.content && self.properties == other.properties
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_known_projects_are_distinct() {
        assert_ne!(ProjectId::ONLINE, ProjectId::OFFLINE);
        assert!(ProjectId::ONLINE.is_online());
        assert!(!ProjectId::OFFLINE.is_online());
    }

    #[test]
    fn test_new_file_is_new_and_owned_by_context() {
        let ctx = Context::new("alice", ProjectId::OFFLINE);
        let content = ContentRef {
            blob: BlobId::new(),
            digest: "sha256:00".to_string(),
            size: 0,
        };
        let resource = Resource::new_file(
            ResourcePath::parse("/a.txt").unwrap(),
            content,
            BTreeMap::new(),
            &ctx,
        );

        assert_eq!(resource.state, ResourceState::New);
        assert_eq!(resource.project_last_modified, ProjectId::OFFLINE);
        assert_eq!(resource.user_last_modified, Actor::from("alice"));
        assert!(!resource.is_folder());
        assert!(resource.blob().is_some());
    }

    #[test]
    fn test_record_serialization_roundtrip() {
        let ctx = Context::new("bob", ProjectId::OFFLINE);
        let folder = Resource::new_folder(ResourcePath::parse("/docs").unwrap(), &ctx);

        let json = serde_json::to_string(&folder).unwrap();
        let back: Resource = serde_json::from_str(&json).unwrap();
        assert_eq!(folder.id, back.id);
        assert_eq!(back.resource_type, ResourceType::Folder);
        assert!(back.content.is_none());
    }
}
