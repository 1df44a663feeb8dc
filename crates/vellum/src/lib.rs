//! # Vellum
//!
//! A staged publishing engine for content repositories:
//! - Offline working view and read-only Online view of one resource tree
//! - Siblings: several paths sharing one content blob, with per-path properties
//! - Projects that own their pending changes and publish them independently
//! - Advisory locks that gate both edits and publishing
//! - Append-only version history tagged per publish
//!
//! ## Core Concepts
//!
//! - **Resources** move through NEW → UNCHANGED → CHANGED → DELETED
//! - **Publishing** promotes owned, unlocked changes from Offline to Online
//! - **Blobs** are immutable and reclaimed once no record references them
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::result::Result;
//! use vellum::*;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let repository = Repository::in_memory().await?;
//! let ctx = repository.context("alice", "Offline")?;
//!
//! repository.create_folder(&ctx, "/news").await?;
//! repository
//!     .write(&ctx, "/news/index.html", WriteRequest::new().content("<h1>News</h1>"))
//!     .await?;
//!
//! let report = repository
//!     .publish(&ctx, PublishTarget::Project, PublishOptions::default())
//!     .await?;
//! println!("Published {} resources under tag {}", report.published(), report.tag);
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod content;
pub mod directory;
pub mod edit;
pub mod entities;
pub mod error;
pub mod history;
pub mod lock;
pub mod path;
pub mod permission;
pub mod project;
pub mod properties;
pub mod publish;
pub mod report;
pub mod repository;
pub mod siblings;
pub mod state;
pub mod storage;

pub use edit::{CopyMode, WriteRequest};
pub use entities::{
    Actor, BlobId, ContentRef, Context, ProjectId, Resource, ResourceId, ResourceType, View,
};
pub use error::{Result, VellumError};
pub use history::VersionSnapshot;
pub use lock::{Lock, LockKind};
pub use path::ResourcePath;
pub use permission::{AllowAll, PermissionCheck};
pub use project::Project;
pub use publish::{CancelFlag, PublishOptions, PublishTarget};
pub use report::{
    MemoryReport, NullReport, PublishOutcome, PublishReport, ReportEntry, ReportSink, TracingReport,
};
pub use repository::Repository;
pub use state::ResourceState;
pub use storage::{MemoryStorage, ObjectStore, StorageError};

#[cfg(feature = "fs")]
pub use storage::FileStorage;

#[cfg(feature = "sqlite")]
pub use storage::SqliteStorage;
