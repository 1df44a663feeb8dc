use crate::entities::{Actor, ResourceId};
use crate::path::ResourcePath;
use crate::project::Project;

/// Opaque authorization hook consulted before edits and publishing.
///
/// `resource` is `None` when the write creates a new resource.
pub trait PermissionCheck: Send + Sync {
    fn can_write(&self, actor: &Actor, resource: Option<ResourceId>, path: &ResourcePath) -> bool;

    fn can_publish(&self, actor: &Actor, project: &Project) -> bool;
}

/// Grants everything
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl PermissionCheck for AllowAll {
    fn can_write(
        &self,
        _actor: &Actor,
        _resource: Option<ResourceId>,
        _path: &ResourcePath,
    ) -> bool {
        true
    }

    fn can_publish(&self, _actor: &Actor, _project: &Project) -> bool {
        true
    }
}
