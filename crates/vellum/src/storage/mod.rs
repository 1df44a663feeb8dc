//! Storage abstraction for repository data

pub mod object_store;

pub use object_store::{MemoryStorage, ObjectStore, StorageError};

// Directory-backed implementation
#[cfg(feature = "fs")]
pub mod file_storage;

#[cfg(feature = "fs")]
pub use file_storage::FileStorage;

// SQLite implementation
#[cfg(feature = "sqlite")]
pub mod sqlite_storage;

#[cfg(feature = "sqlite")]
pub use sqlite_storage::SqliteStorage;
