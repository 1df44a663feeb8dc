//! Project registry
//!
//! Projects are named change-set scopes. Every offline resource is owned by
//! the project that last modified it; only that project may publish it.
//! The registry keeps the project table and the resource ownership map.

use crate::entities::{ProjectId, ResourceId};
use crate::error::{Result, VellumError};
use crate::lock::unpoisoned as lock;
use crate::path::ResourcePath;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use time::OffsetDateTime;

pub const ONLINE_PROJECT_NAME: &str = "Online";
pub const OFFLINE_PROJECT_NAME: &str = "Offline";

/// A named, isolated change-set scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub description: String,

    /// Group allowed to manage (and publish) the project
    pub manager_group: String,

    /// Group allowed to work in the project
    pub user_group: String,

    /// Subtrees this project may modify; empty means unrestricted
    pub resources: Vec<ResourcePath>,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Project {
    fn seeded(id: ProjectId, name: &str, description: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            description: description.to_string(),
            manager_group: "Administrators".to_string(),
            user_group: "Users".to_string(),
            resources: Vec::new(),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn online() -> Self {
        Self::seeded(ProjectId::ONLINE, ONLINE_PROJECT_NAME, "The published project")
    }

    pub fn offline() -> Self {
        Self::seeded(ProjectId::OFFLINE, OFFLINE_PROJECT_NAME, "The default working project")
    }

    pub fn is_online(&self) -> bool {
        self.id.is_online()
    }

    /// Seeded projects cannot be deleted
    pub fn is_builtin(&self) -> bool {
        self.id == ProjectId::ONLINE || self.id == ProjectId::OFFLINE
    }

    /// Whether the project may modify `path`
    pub fn contains(&self, path: &ResourcePath) -> bool {
        self.resources.is_empty() || self.resources.iter().any(|root| path.is_within(root))
    }

    /// Validate a project name: 1-64 letters, digits, spaces, `-`, `_` or `.`
    pub fn validate_name(name: &str) -> Result<()> {
        let invalid = |reason: &str| VellumError::InvalidProjectName {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        if name.trim().is_empty() {
            return Err(invalid("Name cannot be empty"));
        }
        if name.chars().count() > 64 {
            return Err(invalid("Name cannot exceed 64 characters"));
        }
        let valid_chars = name
            .chars()
            .all(|c| c.is_alphanumeric() || c == ' ' || c == '-' || c == '_' || c == '.');
        if !valid_chars {
            return Err(invalid(
                "Name can only contain letters, digits, spaces, dots, dashes, and underscores",
            ));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct ProjectRegistry {
    projects: Mutex<HashMap<ProjectId, Project>>,
    ownership: Mutex<HashMap<ResourceId, ProjectId>>,
}

impl Default for ProjectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectRegistry {
    /// A registry seeded with the Online and Offline projects
    pub fn new() -> Self {
        let mut projects = HashMap::new();
        for project in [Project::online(), Project::offline()] {
            projects.insert(project.id, project);
        }
        Self {
            projects: Mutex::new(projects),
            ownership: Mutex::new(HashMap::new()),
        }
    }

    /// Insert a project as loaded from storage
    pub fn insert(&self, project: Project) {
        lock(&self.projects).insert(project.id, project);
    }

    /// Allocate a new project scope
    pub fn create(&self, name: &str, manager_group: &str, user_group: &str) -> Result<Project> {
        Project::validate_name(name)?;

        let mut projects = lock(&self.projects);
        if projects.values().any(|p| p.name == name) {
            return Err(VellumError::Conflict(format!("Project {} already exists", name)));
        }

        let project = Project {
            id: ProjectId::new(),
            name: name.to_string(),
            description: String::new(),
            manager_group: manager_group.to_string(),
            user_group: user_group.to_string(),
            resources: Vec::new(),
            created_at: OffsetDateTime::now_utc(),
        };
        projects.insert(project.id, project.clone());
        Ok(project)
    }

    pub fn resolve(&self, name: &str) -> Result<Project> {
        lock(&self.projects)
            .values()
            .find(|p| p.name == name)
            .cloned()
            .ok_or_else(|| VellumError::not_found(format!("project {}", name)))
    }

    pub fn get(&self, id: &ProjectId) -> Result<Project> {
        lock(&self.projects)
            .get(id)
            .cloned()
            .ok_or_else(|| VellumError::not_found(format!("project {}", id)))
    }

    /// All projects ordered by name
    pub fn list(&self) -> Vec<Project> {
        let mut projects: Vec<Project> = lock(&self.projects).values().cloned().collect();
        projects.sort_by(|a, b| a.name.cmp(&b.name));
        projects
    }

    pub fn remove(&self, id: &ProjectId) -> Result<Project> {
        let mut projects = lock(&self.projects);
        let project = projects
            .get(id)
            .ok_or_else(|| VellumError::not_found(format!("project {}", id)))?;
        if project.is_builtin() {
            return Err(VellumError::InvalidOperation(format!(
                "Project {} cannot be deleted",
                project.name
            )));
        }
        let removed = projects.remove(id);
        removed.ok_or_else(|| VellumError::not_found(format!("project {}", id)))
    }

    /// Add a subtree to the project's resources
    pub fn add_resource(&self, id: &ProjectId, path: ResourcePath) -> Result<Project> {
        let mut projects = lock(&self.projects);
        let project = projects
            .get_mut(id)
            .ok_or_else(|| VellumError::not_found(format!("project {}", id)))?;
        if project.is_online() {
            return Err(VellumError::ReadOnlyProject(project.name.clone()));
        }
        if !project.resources.iter().any(|root| path.is_within(root)) {
            project.resources.retain(|root| !root.is_within(&path));
            project.resources.push(path);
            project.resources.sort();
        }
        Ok(project.clone())
    }

    // === Ownership ===

    pub fn owner_of(&self, resource: &ResourceId) -> Option<ProjectId> {
        lock(&self.ownership).get(resource).copied()
    }

    /// Compare-and-set ownership. Fails with the actual owner when it is
    /// not `expected`.
    pub fn claim(
        &self,
        resource: ResourceId,
        expected: Option<ProjectId>,
        project: ProjectId,
    ) -> std::result::Result<(), Option<ProjectId>> {
        let mut ownership = lock(&self.ownership);
        let actual = ownership.get(&resource).copied();
        if actual != expected {
            return Err(actual);
        }
        ownership.insert(resource, project);
        Ok(())
    }

    /// Unconditionally record an owner (used when loading)
    pub fn set_owner(&self, resource: ResourceId, project: ProjectId) {
        lock(&self.ownership).insert(resource, project);
    }

    /// Forget a resource that left the offline view
    pub fn release(&self, resource: &ResourceId) {
        lock(&self.ownership).remove(resource);
    }

    /// Every resource currently owned by `project`
    pub fn owned_by(&self, project: &ProjectId) -> Vec<ResourceId> {
        let mut owned: Vec<ResourceId> = lock(&self.ownership)
            .iter()
            .filter(|(_, owner)| *owner == project)
            .map(|(id, _)| *id)
            .collect();
        owned.sort();
        owned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_projects() {
        let registry = ProjectRegistry::new();
        assert_eq!(registry.resolve("Online").unwrap().id, ProjectId::ONLINE);
        assert_eq!(registry.resolve("Offline").unwrap().id, ProjectId::OFFLINE);
        assert!(matches!(
            registry.remove(&ProjectId::ONLINE),
            Err(VellumError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_create_and_conflict() {
        let registry = ProjectRegistry::new();
        let project = registry.create("Test", "Administrators", "Users").unwrap();
        assert_eq!(registry.resolve("Test").unwrap().id, project.id);

        assert!(matches!(
            registry.create("Test", "Administrators", "Users"),
            Err(VellumError::Conflict(_))
        ));
        assert!(matches!(
            registry.create("Offline", "a", "b"),
            Err(VellumError::Conflict(_))
        ));
        assert!(matches!(
            registry.resolve("Missing"),
            Err(VellumError::NotFound(_))
        ));
    }

    #[test]
    fn test_name_validation() {
        assert!(Project::validate_name("Spring campaign 2024").is_ok());
        assert!(Project::validate_name("").is_err());
        assert!(Project::validate_name("a/b").is_err());
        assert!(Project::validate_name(&"x".repeat(65)).is_err());
    }

    #[test]
    fn test_ownership_compare_and_set() {
        let registry = ProjectRegistry::new();
        let resource = ResourceId::new();
        let test = registry.create("Test", "a", "b").unwrap();

        registry.claim(resource, None, ProjectId::OFFLINE).unwrap();
        assert_eq!(registry.owner_of(&resource), Some(ProjectId::OFFLINE));

        // stale expectation loses
        assert_eq!(
            registry.claim(resource, None, test.id),
            Err(Some(ProjectId::OFFLINE))
        );
        registry
            .claim(resource, Some(ProjectId::OFFLINE), test.id)
            .unwrap();
        assert_eq!(registry.owned_by(&test.id), vec![resource]);
        assert!(registry.owned_by(&ProjectId::OFFLINE).is_empty());

        registry.release(&resource);
        assert_eq!(registry.owner_of(&resource), None);
    }

    #[test]
    fn test_project_resources_restrict_scope() {
        let registry = ProjectRegistry::new();
        let project = registry.create("Test", "a", "b").unwrap();
        assert!(project.contains(&ResourcePath::parse("/anything").unwrap()));

        let folder = ResourcePath::parse("/folder1").unwrap();
        let project = registry.add_resource(&project.id, folder.clone()).unwrap();
        assert!(project.contains(&ResourcePath::parse("/folder1/page1.html").unwrap()));
        assert!(!project.contains(&ResourcePath::parse("/folder2/page1.html").unwrap()));

        // adding a nested path is a no-op, adding the parent subsumes
        let project = registry
            .add_resource(&project.id, ResourcePath::parse("/folder1/sub").unwrap())
            .unwrap();
        assert_eq!(project.resources, vec![folder]);
        let project = registry.add_resource(&project.id, ResourcePath::root()).unwrap();
        assert_eq!(project.resources, vec![ResourcePath::root()]);
    }
}
