//! Error types for the vellum repository

use crate::storage::StorageError;
use thiserror::Error;

/// Repository-specific errors
#[derive(Error, Debug)]
pub enum VellumError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Resource {path} is locked by {holder}")]
    Locked { path: String, holder: String },

    #[error("Resource {path} is already locked by {holder}")]
    AlreadyLocked { path: String, holder: String },

    #[error("Resource {path} is not owned by project {project}")]
    NotOwned { path: String, project: String },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid resource path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Invalid project name '{name}': {reason}")]
    InvalidProjectName { name: String, reason: String },

    #[error("Project {0} is read-only")]
    ReadOnlyProject(String),

    #[error("Path {path} is outside the resources of project {project}")]
    OutsideProject { path: String, project: String },

    #[error("Cannot apply {transition} to a resource in state {state}")]
    InvalidTransition { state: String, transition: String },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Content blob {blob} is unreadable: {reason}")]
    UnreadableContent { blob: String, reason: String },

    #[error("Content blob {blob} is corrupt: expected {expected}, found {actual}")]
    CorruptContent {
        blob: String,
        expected: String,
        actual: String,
    },

    #[error("Storage fault: {0}")]
    StorageFault(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl VellumError {
    /// Whether this error must abort a publish batch instead of being
    /// reported against a single resource
    pub fn is_fatal(&self) -> bool {
        matches!(self, VellumError::StorageFault(_))
    }

    pub(crate) fn not_found(what: impl std::fmt::Display) -> Self {
        VellumError::NotFound(what.to_string())
    }
}

/// Result type for repository operations
pub type Result<T> = std::result::Result<T, VellumError>;
