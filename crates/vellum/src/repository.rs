//! Repository handle
//!
//! [`Repository`] ties the object store, the in-memory indices and the
//! version history together. It is cheap to clone and safe to share
//! between tasks. Mutating operations live in `edit` and `publish`; this
//! module holds construction, reads, projects, locks and the record
//! persistence primitives they build on.

use crate::address::ContentAddress;
use crate::content::ContentStore;
use crate::directory::Directory;
use crate::entities::{Actor, BlobId, Context, ProjectId, Resource, ResourceId, View};
use crate::error::{Result, VellumError};
use crate::history::{VersionHistory, VersionSnapshot};
use crate::lock::{CommitGuards, Lock, LockTable, unpoisoned};
use crate::path::ResourcePath;
use crate::permission::{AllowAll, PermissionCheck};
use crate::project::{Project, ProjectRegistry};
use crate::properties::PropertyDefinitions;
use crate::siblings::SiblingIndex;
use crate::state::ResourceState;
use crate::storage::{MemoryStorage, ObjectStore};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

pub(crate) struct Inner {
    pub(crate) store: Arc<dyn ObjectStore>,
    pub(crate) content: ContentStore,
    pub(crate) directory: Mutex<Directory>,
    pub(crate) siblings: Mutex<SiblingIndex>,
    pub(crate) projects: ProjectRegistry,
    pub(crate) locks: LockTable,
    pub(crate) guards: CommitGuards,
    pub(crate) history: VersionHistory,
    pub(crate) properties: PropertyDefinitions,
    pub(crate) permissions: Arc<dyn PermissionCheck>,
    /// Held while resources are created or folders removed
    pub(crate) structure: AsyncMutex<()>,
    /// Held while project records are rewritten
    project_writes: AsyncMutex<()>,
}

/// A staged publishing repository
#[derive(Clone)]
pub struct Repository {
    pub(crate) inner: Arc<Inner>,
}

impl Repository {
    /// Open a repository over `store`, rebuilding every index from it
    pub async fn open(store: Arc<dyn ObjectStore>) -> Result<Self> {
        Self::open_with(store, Arc::new(AllowAll)).await
    }

    /// Open a repository with a custom permission check
    pub async fn open_with(
        store: Arc<dyn ObjectStore>,
        permissions: Arc<dyn PermissionCheck>,
    ) -> Result<Self> {
        let history = VersionHistory::load(store.clone()).await?;
        let properties = PropertyDefinitions::load(store.clone()).await?;

        let projects = ProjectRegistry::new();
        for key in store.list_keys(ContentAddress::project_prefix()).await? {
            let project: Project = serde_json::from_slice(&store.get(&key).await?)?;
            projects.insert(project);
        }
        for project in [Project::online(), Project::offline()] {
            let key = ContentAddress::project_key(&project.id);
            if !store.exists(&key).await? {
                store.put(&key, serde_json::to_vec(&project)?).await?;
            }
        }

        let mut directory = Directory::new();
        let mut siblings = SiblingIndex::new();
        for view in [View::Offline, View::Online] {
            for key in store.list_keys(&ContentAddress::view_prefix(view)).await? {
                let record: Resource = serde_json::from_slice(&store.get(&key).await?)?;
                if let Some(blob) = record.blob() {
                    siblings.add_ref(blob, view, record.id);
                }
                if view == View::Offline {
                    projects.set_owner(record.id, record.project_last_modified);
                }
                directory.upsert(view, record);
            }
        }

        let repository = Self {
            inner: Arc::new(Inner {
                content: ContentStore::new(store.clone()),
                store,
                directory: Mutex::new(directory),
                siblings: Mutex::new(siblings),
                projects,
                locks: LockTable::new(),
                guards: CommitGuards::new(),
                history,
                properties,
                permissions,
                structure: AsyncMutex::new(()),
                project_writes: AsyncMutex::new(()),
            }),
        };

        let swept = repository.sweep_orphan_blobs().await?;
        info!(
            offline = repository.resource_count(View::Offline),
            online = repository.resource_count(View::Online),
            last_tag = repository.inner.history.current_tag().await,
            swept,
            "Opened repository"
        );
        Ok(repository)
    }

    /// An empty repository backed by memory
    pub async fn in_memory() -> Result<Self> {
        Self::open(Arc::new(MemoryStorage::new())).await
    }

    /// Delete blobs left behind by interrupted writes
    async fn sweep_orphan_blobs(&self) -> Result<usize> {
        let keys = self
            .inner
            .store
            .list_keys(ContentAddress::blob_prefix())
            .await?;

        let mut swept = 0;
        for key in keys {
            let Some(blob) = ContentAddress::blob_of_key(&key) else {
                warn!(%key, "Ignoring unrecognized blob key");
                continue;
            };
            if unpoisoned(&self.inner.siblings).ref_count(&blob) == 0 {
                self.inner.content.reclaim(&blob).await?;
                swept += 1;
            }
        }
        Ok(swept)
    }

    // === Reads ===

    pub fn read(&self, view: View, path: &str) -> Result<Resource> {
        self.require(view, &ResourcePath::parse(path)?)
    }

    /// Payload of a file, verified against its digest
    pub async fn read_content(&self, view: View, path: &str) -> Result<Vec<u8>> {
        let record = self.read(view, path)?;
        let content = record.content.as_ref().ok_or_else(|| {
            VellumError::InvalidOperation(format!("{} is a folder", record.path))
        })?;
        self.inner.content.read(content).await
    }

    /// Direct children of a folder, in path order
    pub fn list_folder(&self, view: View, path: &str) -> Result<Vec<Resource>> {
        let path = ResourcePath::parse(path)?;
        let directory = unpoisoned(&self.inner.directory);
        if !path.is_root() {
            let folder = directory
                .get(view, &path)
                .ok_or_else(|| VellumError::not_found(&path))?;
            if !folder.is_folder() {
                return Err(VellumError::InvalidOperation(format!(
                    "{} is not a folder",
                    path
                )));
            }
        }
        Ok(directory.children(view, &path).into_iter().cloned().collect())
    }

    /// Other resources sharing the content blob of `path`
    pub fn siblings(&self, view: View, path: &str) -> Result<Vec<Resource>> {
        let record = self.read(view, path)?;
        let Some(blob) = record.blob() else {
            return Ok(Vec::new());
        };
        let members = unpoisoned(&self.inner.siblings).members(&blob, view);
        let directory = unpoisoned(&self.inner.directory);
        let mut siblings: Vec<Resource> = members
            .iter()
            .filter(|id| **id != record.id)
            .filter_map(|id| directory.get_by_id(view, id).cloned())
            .collect();
        siblings.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(siblings)
    }

    /// Every resource of a view carrying property `name`
    pub fn resources_with_property(&self, view: View, name: &str) -> Vec<Resource> {
        unpoisoned(&self.inner.directory)
            .iter(view)
            .filter(|r| r.properties.contains_key(name))
            .cloned()
            .collect()
    }

    /// Every resource of a view in a given state, in path order
    pub fn resources_in_state(&self, view: View, state: ResourceState) -> Vec<Resource> {
        unpoisoned(&self.inner.directory)
            .iter(view)
            .filter(|r| r.state == state)
            .cloned()
            .collect()
    }

    pub fn resource_count(&self, view: View) -> usize {
        unpoisoned(&self.inner.directory).len(view)
    }

    /// Number of content blobs with at least one reference
    pub fn blob_count(&self) -> usize {
        unpoisoned(&self.inner.siblings).blob_count()
    }

    /// Current reference count of a blob across both views
    pub fn ref_count(&self, blob: &BlobId) -> usize {
        unpoisoned(&self.inner.siblings).ref_count(blob)
    }

    /// Whether the payload of a blob is still stored
    pub async fn blob_exists(&self, blob: &BlobId) -> Result<bool> {
        self.inner.content.exists(blob).await
    }

    // === History ===

    pub async fn list_versions(&self, id: &ResourceId) -> Result<Vec<VersionSnapshot>> {
        self.inner.history.list_versions(id).await
    }

    /// History of the resource currently at `path` (offline first, then online)
    pub async fn list_versions_by_path(&self, path: &str) -> Result<Vec<VersionSnapshot>> {
        let path = ResourcePath::parse(path)?;
        let id = self
            .record(View::Offline, &path)
            .or_else(|| self.record(View::Online, &path))
            .map(|r| r.id)
            .ok_or_else(|| VellumError::not_found(&path))?;
        self.list_versions(&id).await
    }

    pub async fn read_version_content(&self, id: &ResourceId, tag: u64) -> Result<Vec<u8>> {
        self.inner.history.read_version_content(id, tag).await
    }

    /// The most recently issued publish tag
    pub async fn current_tag(&self) -> u64 {
        self.inner.history.current_tag().await
    }

    // === Projects ===

    pub fn resolve_project(&self, name: &str) -> Result<Project> {
        self.inner.projects.resolve(name)
    }

    pub fn project(&self, id: &ProjectId) -> Result<Project> {
        self.inner.projects.get(id)
    }

    pub fn list_projects(&self) -> Vec<Project> {
        self.inner.projects.list()
    }

    /// A context for `actor` working in the project named `project`
    pub fn context(&self, actor: impl Into<Actor>, project: &str) -> Result<Context> {
        Ok(Context::new(actor, self.resolve_project(project)?.id))
    }

    pub async fn create_project(
        &self,
        name: &str,
        manager_group: &str,
        user_group: &str,
    ) -> Result<Project> {
        let _writes = self.inner.project_writes.lock().await;
        let project = self.inner.projects.create(name, manager_group, user_group)?;
        if let Err(e) = self.save_project(&project).await {
            self.inner.projects.remove(&project.id)?;
            return Err(e);
        }
        info!(project = %project.name, id = %project.id, "Created project");
        Ok(project)
    }

    /// Delete a user project. Its unchanged resources fall back to the
    /// Offline project; pending changes must be published first.
    pub async fn delete_project(&self, name: &str) -> Result<()> {
        let _writes = self.inner.project_writes.lock().await;
        let project = self.resolve_project(name)?;
        if project.is_builtin() {
            return Err(VellumError::InvalidOperation(format!(
                "Project {} cannot be deleted",
                project.name
            )));
        }

        let owned = self.owned_records(&project.id);
        if let Some(pending) = owned.iter().find(|r| r.state.is_pending()) {
            return Err(VellumError::Conflict(format!(
                "Project {} still has pending changes, e.g. {}",
                project.name, pending.path
            )));
        }

        for record in owned {
            let _guard = self.inner.guards.lock(record.id).await;
            let Some(mut current) = self.record_by_id(View::Offline, &record.id) else {
                continue;
            };
            if current.project_last_modified == project.id {
                current.project_last_modified = ProjectId::OFFLINE;
                self.commit_record(View::Offline, current).await?;
            }
        }

        let released = self.inner.locks.release_project(&project.id);
        self.inner
            .store
            .delete(&ContentAddress::project_key(&project.id))
            .await?;
        self.inner.projects.remove(&project.id)?;
        info!(project = %project.name, released_locks = released, "Deleted project");
        Ok(())
    }

    /// Add a subtree to a project's resources. Once a project has
    /// resources, writes from it are restricted to them.
    pub async fn add_project_resource(&self, project: &str, path: &str) -> Result<Project> {
        let _writes = self.inner.project_writes.lock().await;
        let id = self.resolve_project(project)?.id;
        let path = ResourcePath::parse(path)?;
        if !path.is_root() {
            self.require(View::Offline, &path)?;
        }
        let updated = self.inner.projects.add_resource(&id, path)?;
        self.save_project(&updated).await?;
        Ok(updated)
    }

    /// Offline resources owned by a project, in path order
    pub fn owned_resources(&self, project: &str) -> Result<Vec<Resource>> {
        let project = self.resolve_project(project)?;
        Ok(self.owned_records(&project.id))
    }

    /// The project owning the offline resource at `path`
    pub fn owner_of(&self, path: &str) -> Result<Project> {
        let record = self.read(View::Offline, path)?;
        let owner = self
            .inner
            .projects
            .owner_of(&record.id)
            .unwrap_or(record.project_last_modified);
        self.project(&owner)
    }

    async fn save_project(&self, project: &Project) -> Result<()> {
        self.inner
            .store
            .put(
                &ContentAddress::project_key(&project.id),
                serde_json::to_vec(project)?,
            )
            .await?;
        Ok(())
    }

    pub(crate) fn owned_records(&self, project: &ProjectId) -> Vec<Resource> {
        let owned = self.inner.projects.owned_by(project);
        let directory = unpoisoned(&self.inner.directory);
        let mut records: Vec<Resource> = owned
            .iter()
            .filter_map(|id| directory.get_by_id(View::Offline, id).cloned())
            .collect();
        records.sort_by(|a, b| a.path.cmp(&b.path));
        records
    }

    // === Locks ===

    /// Lock a resource for `ctx.actor`. Its siblings are locked shared.
    pub fn lock(&self, ctx: &Context, path: &str) -> Result<Lock> {
        let project = self.project(&ctx.project)?;
        if project.is_online() {
            return Err(VellumError::ReadOnlyProject(project.name));
        }
        let record = self.read(View::Offline, path)?;
        self.check_write_permission(ctx, Some(record.id), &record.path)?;
        let siblings: Vec<ResourceId> = self
            .group_of(&record)
            .into_iter()
            .filter(|id| *id != record.id)
            .collect();

        self.inner
            .locks
            .acquire(record.id, &siblings, ctx)
            .map_err(|holder| VellumError::AlreadyLocked {
                path: record.path.to_string(),
                holder: holder.to_string(),
            })?;
        debug!(
            path = %record.path,
            actor = %ctx.actor,
            siblings = siblings.len(),
            "Locked resource"
        );

        self.inner
            .locks
            .lock_of(&record.id)
            .ok_or_else(|| VellumError::not_found(format!("lock on {}", record.path)))
    }

    /// Release the lock on a resource; unlocking an unlocked resource is
    /// not an error
    pub fn unlock(&self, path: &str) -> Result<()> {
        let record = self.read(View::Offline, path)?;
        if let Some(lock) = self.inner.locks.release(&record.id) {
            debug!(path = %record.path, holder = %lock.holder, "Unlocked resource");
        }
        Ok(())
    }

    /// Release every lock acquired in a project
    pub fn unlock_project(&self, project: &str) -> Result<usize> {
        let project = self.resolve_project(project)?;
        let released = self.inner.locks.release_project(&project.id);
        info!(project = %project.name, released, "Unlocked project");
        Ok(released)
    }

    pub fn lock_of(&self, path: &str) -> Result<Option<Lock>> {
        let record = self.read(View::Offline, path)?;
        Ok(self.inner.locks.lock_of(&record.id))
    }

    // === Property definitions ===

    pub async fn define_property(&self, name: &str) -> Result<bool> {
        self.inner.properties.define(name).await
    }

    pub async fn property_definitions(&self) -> Vec<String> {
        self.inner.properties.list().await
    }

    /// Delete a property definition that no resource in either view uses
    pub async fn delete_property_definition(&self, name: &str) -> Result<()> {
        self.inner
            .properties
            .remove(name, || {
                let directory = unpoisoned(&self.inner.directory);
                [View::Offline, View::Online].into_iter().any(|view| {
                    directory
                        .iter(view)
                        .any(|r| r.properties.contains_key(name))
                })
            })
            .await
    }

    // === Internals shared by edit and publish ===

    pub(crate) fn record(&self, view: View, path: &ResourcePath) -> Option<Resource> {
        unpoisoned(&self.inner.directory).get(view, path).cloned()
    }

    pub(crate) fn record_by_id(&self, view: View, id: &ResourceId) -> Option<Resource> {
        unpoisoned(&self.inner.directory).get_by_id(view, id).cloned()
    }

    pub(crate) fn require(&self, view: View, path: &ResourcePath) -> Result<Resource> {
        self.record(view, path)
            .ok_or_else(|| VellumError::not_found(path))
    }

    /// Offline members of the sibling group of `record`, sorted, itself
    /// included
    pub(crate) fn group_of(&self, record: &Resource) -> Vec<ResourceId> {
        match record.blob() {
            Some(blob) => {
                let mut members = unpoisoned(&self.inner.siblings).members(&blob, View::Offline);
                if !members.contains(&record.id) {
                    members.push(record.id);
                    members.sort();
                }
                members
            }
            None => vec![record.id],
        }
    }

    /// Acquire the commit guards of the set computed by `compute`, then
    /// recompute it. If the set moved while waiting, start over.
    pub(crate) async fn guard_set<F>(
        &self,
        compute: F,
    ) -> Result<(Vec<ResourceId>, Vec<OwnedMutexGuard<()>>)>
    where
        F: Fn(&Self) -> Result<Vec<ResourceId>>,
    {
        loop {
            let mut ids = compute(self)?;
            ids.sort();
            ids.dedup();
            let guards = self.inner.guards.lock_all(&ids).await;

            let mut again = compute(self)?;
            again.sort();
            again.dedup();
            if again == ids {
                return Ok((ids, guards));
            }
            debug!("Resource set changed while acquiring guards, retrying");
        }
    }

    /// Fail with `Locked` if another actor holds a lock on `record`
    pub(crate) fn check_unlocked(&self, record: &Resource, actor: &Actor) -> Result<()> {
        match self.inner.locks.blocking(&record.id, actor) {
            Some(lock) => Err(VellumError::Locked {
                path: record.path.to_string(),
                holder: lock.holder.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Persist a record, then apply it to the in-memory indices. Returns
    /// blobs whose reference count dropped to zero.
    pub(crate) async fn commit_record(&self, view: View, record: Resource) -> Result<Vec<BlobId>> {
        self.inner
            .store
            .put(
                &ContentAddress::resource_key(view, &record.id),
                serde_json::to_vec(&record)?,
            )
            .await?;

        let id = record.id;
        let owner = record.project_last_modified;
        let new_blob = record.blob();
        let previous = unpoisoned(&self.inner.directory).upsert(view, record);

        let mut orphaned = Vec::new();
        let old_blob = previous.as_ref().and_then(|p| p.blob());
        if old_blob != new_blob {
            let mut siblings = unpoisoned(&self.inner.siblings);
            if let Some(blob) = new_blob {
                siblings.add_ref(blob, view, id);
            }
            if let Some(blob) = old_blob {
                if siblings.remove_ref(blob, view, id) == 0 {
                    orphaned.push(blob);
                }
            }
        }

        if view == View::Offline {
            let expected = previous.map(|p| p.project_last_modified);
            if let Err(actual) = self.inner.projects.claim(id, expected, owner) {
                warn!(resource = %id, ?actual, ?expected, "Ownership index out of step, repairing");
                self.inner.projects.set_owner(id, owner);
            }
        }
        Ok(orphaned)
    }

    /// Delete a record from storage and the indices. Returns blobs whose
    /// reference count dropped to zero.
    pub(crate) async fn remove_record(&self, view: View, id: &ResourceId) -> Result<Vec<BlobId>> {
        self.inner
            .store
            .delete(&ContentAddress::resource_key(view, id))
            .await?;

        let removed = unpoisoned(&self.inner.directory).remove(view, id);
        let mut orphaned = Vec::new();
        if let Some(blob) = removed.as_ref().and_then(|r| r.blob()) {
            if unpoisoned(&self.inner.siblings).remove_ref(blob, view, *id) == 0 {
                orphaned.push(blob);
            }
        }
        if view == View::Offline {
            self.inner.projects.release(id);
            self.inner.locks.forget(id);
        }
        Ok(orphaned)
    }

    /// Delete blobs nothing references any more. Failures leave the blob
    /// for the sweep on the next open.
    pub(crate) async fn reclaim(&self, blobs: Vec<BlobId>) {
        for blob in blobs {
            if self.ref_count(&blob) > 0 {
                continue;
            }
            if let Err(e) = self.inner.content.reclaim(&blob).await {
                warn!(blob = %blob, error = %e, "Failed to reclaim blob");
            }
        }
    }
}
