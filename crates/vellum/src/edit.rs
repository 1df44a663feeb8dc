//! Offline edits: writing, deleting, copying and touching resources
//!
//! Every edit runs in a [`Context`] naming the acting project. The project
//! that last modified a resource owns it until the change is published.

use crate::entities::{ContentRef, Context, ProjectId, Resource, ResourceId, View};
use crate::error::{Result, VellumError};
use crate::lock::unpoisoned;
use crate::path::ResourcePath;
use crate::project::Project;
use crate::repository::Repository;
use crate::state::{NextState, ResourceState, Transition};
use std::collections::BTreeMap;
use time::OffsetDateTime;
use tracing::{debug, info};

/// Content and property changes applied by [`Repository::write`]
#[derive(Debug, Clone, Default)]
pub struct WriteRequest {
    pub content: Option<Vec<u8>>,
    /// `Some` sets a property, `None` removes it
    pub properties: BTreeMap<String, Option<String>>,
}

impl WriteRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(mut self, content: impl Into<Vec<u8>>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), Some(value.into()));
        self
    }

    pub fn remove_property(mut self, name: impl Into<String>) -> Self {
        self.properties.insert(name.into(), None);
        self
    }

    fn apply_properties(&self, properties: &mut BTreeMap<String, String>) {
        for (name, value) in &self.properties {
            match value {
                Some(value) => properties.insert(name.clone(), value.clone()),
                None => properties.remove(name),
            };
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyMode {
    /// A new resource with its own copy of the content
    AsNew,
    /// A new path sharing the source's content blob
    AsSibling,
}

/// A resource whose ownership may move to `project`: it is already owned
/// by it, or carries no pending change in any project
pub(crate) fn claimable(record: &Resource, project: ProjectId) -> bool {
    record.project_last_modified == project || record.state == ResourceState::Unchanged
}

enum Slot {
    Created(Resource),
    Occupied(Resource),
}

impl Repository {
    /// Create or update a file in the offline view.
    ///
    /// New content is shared by every live sibling; properties only
    /// change on `path` itself.
    pub async fn write(
        &self,
        ctx: &Context,
        path: &str,
        request: WriteRequest,
    ) -> Result<Resource> {
        let path = ResourcePath::parse(path)?;
        if path.is_root() {
            return Err(VellumError::InvalidOperation(
                "The root folder cannot be written".to_string(),
            ));
        }
        self.writable_project(ctx, &path)?;
        self.inner
            .properties
            .define_all(
                request
                    .properties
                    .iter()
                    .filter(|(_, value)| value.is_some())
                    .map(|(name, _)| name.as_str()),
            )
            .await?;

        let existing = match self.record(View::Offline, &path) {
            Some(existing) => existing,
            None => match self.create_file(ctx, &path, &request).await? {
                Slot::Created(record) => return Ok(record),
                Slot::Occupied(existing) => existing,
            },
        };

        self.check_write_permission(ctx, Some(existing.id), &path)?;
        existing.state.apply(Transition::Edit)?;
        if request.content.is_none() {
            return self.write_properties(ctx, existing.id, &request).await;
        }
        if existing.is_folder() {
            return Err(VellumError::InvalidOperation(format!(
                "{} is a folder and has no content",
                path
            )));
        }
        self.write_content(ctx, existing.id, request).await
    }

    async fn create_file(
        &self,
        ctx: &Context,
        path: &ResourcePath,
        request: &WriteRequest,
    ) -> Result<Slot> {
        let _structure = self.inner.structure.lock().await;
        if let Some(existing) = self.record(View::Offline, path) {
            return Ok(Slot::Occupied(existing));
        }
        self.check_parent(path)?;
        self.check_write_permission(ctx, None, path)?;

        let content = self
            .inner
            .content
            .put(request.content.clone().unwrap_or_default())
            .await?;
        let blob = content.blob;
        let mut properties = BTreeMap::new();
        request.apply_properties(&mut properties);

        let record = Resource::new_file(path.clone(), content, properties, ctx);
        if let Err(e) = self.commit_record(View::Offline, record.clone()).await {
            self.reclaim(vec![blob]).await;
            return Err(e);
        }
        info!(%path, project = %ctx.project, actor = %ctx.actor, "Created file");
        Ok(Slot::Created(record))
    }

    async fn write_content(
        &self,
        ctx: &Context,
        target: ResourceId,
        request: WriteRequest,
    ) -> Result<Resource> {
        let payload = request.content.clone().unwrap_or_default();
        let content = self.inner.content.put(payload).await?;
        let blob = content.blob;

        let written = self.cascade_content(ctx, target, content, &request).await;
        if written.is_err() {
            self.reclaim(vec![blob]).await;
        }
        written
    }

    /// Move every live member of the target's sibling group to `content`
    async fn cascade_content(
        &self,
        ctx: &Context,
        target: ResourceId,
        content: ContentRef,
        request: &WriteRequest,
    ) -> Result<Resource> {
        let (members, _guards) = self
            .guard_set(|repo| {
                let record = repo
                    .record_by_id(View::Offline, &target)
                    .ok_or_else(|| VellumError::not_found(format!("resource {}", target)))?;
                Ok(repo.group_of(&record))
            })
            .await?;

        // validate the whole group before anything is written
        let now = OffsetDateTime::now_utc();
        let mut updates = Vec::with_capacity(members.len());
        for id in &members {
            let Some(mut record) = self.record_by_id(View::Offline, id) else {
                continue;
            };
            let is_target = *id == target;
            if record.state == ResourceState::Deleted && !is_target {
                continue;
            }
            self.check_unlocked(&record, &ctx.actor)?;

            let claim = is_target || claimable(&record, ctx.project);
            record.state = record.state.after(Transition::Edit)?;
            if claim {
                record.project_last_modified = ctx.project;
            }
            record.content = Some(content.clone());
            record.touch_by(ctx, now);
            if is_target {
                request.apply_properties(&mut record.properties);
            }
            updates.push(record);
        }

        let mut written = None;
        let mut orphaned = Vec::new();
        for record in updates {
            if record.id == target {
                written = Some(record.clone());
            }
            orphaned.extend(self.commit_record(View::Offline, record).await?);
        }
        self.reclaim(orphaned).await;

        let written =
            written.ok_or_else(|| VellumError::not_found(format!("resource {}", target)))?;
        info!(
            path = %written.path,
            siblings = members.len() - 1,
            project = %ctx.project,
            actor = %ctx.actor,
            "Wrote content"
        );
        Ok(written)
    }

    async fn write_properties(
        &self,
        ctx: &Context,
        target: ResourceId,
        request: &WriteRequest,
    ) -> Result<Resource> {
        let _guard = self.inner.guards.lock(target).await;
        let mut record = self
            .record_by_id(View::Offline, &target)
            .ok_or_else(|| VellumError::not_found(format!("resource {}", target)))?;
        self.check_unlocked(&record, &ctx.actor)?;

        record.state = record.state.after(Transition::Edit)?;
        request.apply_properties(&mut record.properties);
        record.project_last_modified = ctx.project;
        record.touch_by(ctx, OffsetDateTime::now_utc());
        self.commit_record(View::Offline, record.clone()).await?;

        debug!(path = %record.path, project = %ctx.project, "Wrote properties");
        Ok(record)
    }

    /// Create a new, empty folder
    pub async fn create_folder(&self, ctx: &Context, path: &str) -> Result<Resource> {
        let path = ResourcePath::parse(path)?;
        if path.is_root() {
            return Err(VellumError::Conflict("The root folder always exists".to_string()));
        }
        self.writable_project(ctx, &path)?;
        self.check_write_permission(ctx, None, &path)?;

        let _structure = self.inner.structure.lock().await;
        if self.record(View::Offline, &path).is_some() {
            return Err(VellumError::Conflict(format!("{} already exists", path)));
        }
        self.check_parent(&path)?;

        let record = Resource::new_folder(path, ctx);
        self.commit_record(View::Offline, record.clone()).await?;
        info!(path = %record.path, project = %ctx.project, "Created folder");
        Ok(record)
    }

    /// Delete a resource, or a folder with its whole subtree.
    ///
    /// With `cascade_siblings`, siblings this project may claim are
    /// deleted as well. New resources disappear at once; everything else
    /// becomes a tombstone until the deletion is published.
    pub async fn delete(&self, ctx: &Context, path: &str, cascade_siblings: bool) -> Result<()> {
        let path = ResourcePath::parse(path)?;
        if path.is_root() {
            return Err(VellumError::InvalidOperation(
                "The root folder cannot be deleted".to_string(),
            ));
        }
        self.writable_project(ctx, &path)?;
        let record = self.require(View::Offline, &path)?;
        self.check_write_permission(ctx, Some(record.id), &path)?;

        let _structure = if record.is_folder() {
            Some(self.inner.structure.lock().await)
        } else {
            None
        };
        let target = record.id;
        let project = ctx.project;
        let (ids, _guards) = self
            .guard_set(|repo| repo.deletion_set(target, cascade_siblings, project))
            .await?;

        let mut records: Vec<Resource> = ids
            .iter()
            .filter_map(|id| self.record_by_id(View::Offline, id))
            .filter(|r| r.state != ResourceState::Deleted)
            .collect();
        for record in &records {
            self.check_unlocked(record, &ctx.actor)?;
        }
        // children before their parents
        records.sort_by(|a, b| b.path.cmp(&a.path));

        let now = OffsetDateTime::now_utc();
        let mut orphaned = Vec::new();
        let (mut removed, mut tombstoned) = (0, 0);
        for mut record in records {
            match record.state.apply(Transition::Delete)? {
                NextState::Removed => {
                    orphaned.extend(self.remove_record(View::Offline, &record.id).await?);
                    self.inner.guards.forget(&record.id);
                    removed += 1;
                }
                NextState::Keep(state) => {
                    record.state = state;
                    record.project_last_modified = project;
                    record.touch_by(ctx, now);
                    orphaned.extend(self.commit_record(View::Offline, record).await?);
                    tombstoned += 1;
                }
            }
        }
        self.reclaim(orphaned).await;

        info!(%path, removed, tombstoned, project = %project, "Deleted resource");
        Ok(())
    }

    /// The target, its subtree and, with `cascade`, claimable siblings of
    /// every file among them
    fn deletion_set(
        &self,
        target: ResourceId,
        cascade: bool,
        project: ProjectId,
    ) -> Result<Vec<ResourceId>> {
        let record = self
            .record_by_id(View::Offline, &target)
            .ok_or_else(|| VellumError::not_found(format!("resource {}", target)))?;

        let mut scope = vec![record.clone()];
        if record.is_folder() {
            let directory = unpoisoned(&self.inner.directory);
            scope.extend(
                directory
                    .descendants(View::Offline, &record.path)
                    .into_iter()
                    .cloned(),
            );
        }

        let mut ids: Vec<ResourceId> = scope.iter().map(|r| r.id).collect();
        if cascade {
            for file in scope.iter().filter(|r| !r.is_folder()) {
                for sibling in self.group_of(file) {
                    if ids.contains(&sibling) {
                        continue;
                    }
                    let claim = self
                        .record_by_id(View::Offline, &sibling)
                        .is_some_and(|s| {
                            s.state != ResourceState::Deleted && claimable(&s, project)
                        });
                    if claim {
                        ids.push(sibling);
                    }
                }
            }
        }
        Ok(ids)
    }

    /// Copy a file to a new path
    pub async fn copy(
        &self,
        ctx: &Context,
        source: &str,
        destination: &str,
        mode: CopyMode,
    ) -> Result<Resource> {
        let source = ResourcePath::parse(source)?;
        let destination = ResourcePath::parse(destination)?;
        self.writable_project(ctx, &destination)?;
        self.check_write_permission(ctx, None, &destination)?;

        let _structure = self.inner.structure.lock().await;
        if self.record(View::Offline, &destination).is_some() {
            return Err(VellumError::Conflict(format!("{} already exists", destination)));
        }
        self.check_parent(&destination)?;

        let original = self.require(View::Offline, &source)?;
        if original.is_folder() {
            return Err(VellumError::InvalidOperation(format!(
                "{} is a folder; only files can be copied",
                source
            )));
        }

        let copied = match mode {
            CopyMode::AsNew => self.copy_as_new(ctx, &original, destination).await?,
            CopyMode::AsSibling => self.copy_as_sibling(ctx, original.id, destination).await?,
        };
        info!(
            %source,
            destination = %copied.path,
            ?mode,
            project = %ctx.project,
            "Copied resource"
        );
        Ok(copied)
    }

    async fn copy_as_new(
        &self,
        ctx: &Context,
        original: &Resource,
        destination: ResourcePath,
    ) -> Result<Resource> {
        let source_content = Self::live_content(original)?;
        let payload = self.inner.content.read(source_content).await?;
        let content = self.inner.content.put(payload).await?;
        let blob = content.blob;

        let record = Resource::new_file(destination, content, original.properties.clone(), ctx);
        if let Err(e) = self.commit_record(View::Offline, record.clone()).await {
            self.reclaim(vec![blob]).await;
            return Err(e);
        }
        Ok(record)
    }

    async fn copy_as_sibling(
        &self,
        ctx: &Context,
        source: ResourceId,
        destination: ResourcePath,
    ) -> Result<Resource> {
        let (_members, _guards) = self
            .guard_set(|repo| {
                let record = repo
                    .record_by_id(View::Offline, &source)
                    .ok_or_else(|| VellumError::not_found(format!("resource {}", source)))?;
                Ok(repo.group_of(&record))
            })
            .await?;

        let mut original = self
            .record_by_id(View::Offline, &source)
            .ok_or_else(|| VellumError::not_found(format!("resource {}", source)))?;
        self.check_unlocked(&original, &ctx.actor)?;
        let content = Self::live_content(&original)?.clone();

        let record = Resource::new_file(destination, content, original.properties.clone(), ctx);
        self.commit_record(View::Offline, record.clone()).await?;

        // joining a group claims the source for this project
        if original.project_last_modified != ctx.project && claimable(&original, ctx.project) {
            original.project_last_modified = ctx.project;
            self.commit_record(View::Offline, original).await?;
        }
        Ok(record)
    }

    fn live_content(record: &Resource) -> Result<&ContentRef> {
        if record.state == ResourceState::Deleted {
            return Err(VellumError::InvalidOperation(format!(
                "{} is deleted",
                record.path
            )));
        }
        record
            .content
            .as_ref()
            .ok_or_else(|| VellumError::InvalidOperation(format!("{} has no content", record.path)))
    }

    /// Update the last-modified time of a resource, marking it changed
    pub async fn touch(
        &self,
        ctx: &Context,
        path: &str,
        at: Option<OffsetDateTime>,
    ) -> Result<Resource> {
        let path = ResourcePath::parse(path)?;
        self.writable_project(ctx, &path)?;
        let existing = self.require(View::Offline, &path)?;
        self.check_write_permission(ctx, Some(existing.id), &path)?;

        let _guard = self.inner.guards.lock(existing.id).await;
        let mut record = self.require(View::Offline, &path)?;
        self.check_unlocked(&record, &ctx.actor)?;
        record.state = record.state.after(Transition::Edit)?;
        record.project_last_modified = ctx.project;
        record.touch_by(ctx, at.unwrap_or_else(OffsetDateTime::now_utc));
        self.commit_record(View::Offline, record.clone()).await?;

        debug!(%path, at = %record.last_modified_at, "Touched resource");
        Ok(record)
    }

    /// Write the content and properties of a historical version back
    /// into the offline view
    pub async fn restore_version(&self, ctx: &Context, path: &str, tag: u64) -> Result<Resource> {
        let current = self.read(View::Offline, path)?;
        let snapshot = self.inner.history.get_version(&current.id, tag).await?;

        let mut request = WriteRequest::new();
        if !current.is_folder() {
            let payload = self
                .inner
                .history
                .read_version_content(&current.id, tag)
                .await?;
            request = request.content(payload);
        }
        for name in current.properties.keys() {
            if !snapshot.record.properties.contains_key(name) {
                request = request.remove_property(name.as_str());
            }
        }
        for (name, value) in &snapshot.record.properties {
            request = request.property(name.as_str(), value.as_str());
        }

        let restored = self.write(ctx, path, request).await?;
        info!(path = %restored.path, tag, project = %ctx.project, "Restored version");
        Ok(restored)
    }

    // === Checks ===

    /// The context's project, if it may modify `path`
    pub(crate) fn writable_project(&self, ctx: &Context, path: &ResourcePath) -> Result<Project> {
        let project = self.project(&ctx.project)?;
        if project.is_online() {
            return Err(VellumError::ReadOnlyProject(project.name));
        }
        if !project.contains(path) {
            return Err(VellumError::OutsideProject {
                path: path.to_string(),
                project: project.name,
            });
        }
        Ok(project)
    }

    pub(crate) fn check_write_permission(
        &self,
        ctx: &Context,
        resource: Option<ResourceId>,
        path: &ResourcePath,
    ) -> Result<()> {
        if !self.inner.permissions.can_write(&ctx.actor, resource, path) {
            return Err(VellumError::PermissionDenied(format!(
                "{} may not write {}",
                ctx.actor, path
            )));
        }
        Ok(())
    }

    /// The parent of `path` must be a live offline folder
    fn check_parent(&self, path: &ResourcePath) -> Result<()> {
        let parent = path.parent().ok_or_else(|| VellumError::InvalidPath {
            path: path.to_string(),
            reason: "Path has no parent".to_string(),
        })?;
        if parent.is_root() {
            return Ok(());
        }
        match self.record(View::Offline, &parent) {
            None => Err(VellumError::not_found(format!("parent folder {}", parent))),
            Some(folder) if !folder.is_folder() => Err(VellumError::InvalidOperation(format!(
                "{} is not a folder",
                parent
            ))),
            Some(folder) if folder.state == ResourceState::Deleted => Err(
                VellumError::not_found(format!("parent folder {} (deleted)", parent)),
            ),
            Some(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_request_merges_properties() {
        let request = WriteRequest::new()
            .property("Title", "Home")
            .remove_property("Keywords");
        let mut properties = BTreeMap::from([
            ("Keywords".to_string(), "a,b".to_string()),
            ("NavPos".to_string(), "1".to_string()),
        ]);
        request.apply_properties(&mut properties);

        assert_eq!(properties.get("Title").map(String::as_str), Some("Home"));
        assert!(!properties.contains_key("Keywords"));
        assert_eq!(properties.get("NavPos").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_claimable() {
        let ctx = Context::new("tester", ProjectId::OFFLINE);
        let other = ProjectId::new();
        let mut record = Resource::new_folder(ResourcePath::parse("/a").unwrap(), &ctx);

        assert!(claimable(&record, ProjectId::OFFLINE));
        assert!(!claimable(&record, other));
        record.state = ResourceState::Unchanged;
        assert!(claimable(&record, other));
    }
}
