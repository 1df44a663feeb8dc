//! Shell configuration management

use crate::error::{Result, ShellError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Backend holding the repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Memory,
    Fs,
    Sqlite,
}

impl FromStr for StorageKind {
    type Err = ShellError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(StorageKind::Memory),
            "fs" | "file" => Ok(StorageKind::Fs),
            "sqlite" => Ok(StorageKind::Sqlite),
            other => Err(ShellError::Config(format!(
                "Invalid VELLUM_STORAGE value: {} (expected memory, fs or sqlite)",
                other
            ))),
        }
    }
}

/// Shell configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellConfig {
    /// Which backend to open
    pub storage: StorageKind,

    /// Root directory of the `fs` backend
    pub data_dir: PathBuf,

    /// Connection string of the `sqlite` backend
    pub database_url: String,

    /// Actor recorded on every change
    pub actor: String,

    /// Project the session starts in
    pub project: String,

    /// Whether to enable debug logging
    pub debug: bool,
}

impl ShellConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, falling back to defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let actor = lookup("VELLUM_ACTOR").unwrap_or(defaults.actor);
        if actor.trim().is_empty() {
            return Err(ShellError::Config("VELLUM_ACTOR must not be empty".to_string()));
        }

        Ok(Self {
            storage: match lookup("VELLUM_STORAGE") {
                Some(value) => value.parse()?,
                None => defaults.storage,
            },
            data_dir: lookup("VELLUM_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            database_url: lookup("DATABASE_URL").unwrap_or(defaults.database_url),
            actor,
            project: lookup("VELLUM_PROJECT").unwrap_or(defaults.project),
            debug: match lookup("DEBUG") {
                Some(value) => parse_bool(&value)?,
                None => defaults.debug,
            },
        })
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        _ => Err(ShellError::Config(format!("Invalid DEBUG value: {}", value))),
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            storage: StorageKind::Fs,
            data_dir: PathBuf::from("./data/vellum"),
            database_url: "sqlite:./data/vellum.db".to_string(),
            actor: "admin".to_string(),
            project: "Offline".to_string(),
            debug: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ShellConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.storage, StorageKind::Fs);
        assert_eq!(config.data_dir, PathBuf::from("./data/vellum"));
        assert_eq!(config.actor, "admin");
        assert_eq!(config.project, "Offline");
        assert!(!config.debug);
    }

    #[test]
    fn test_overrides() {
        let config = ShellConfig::from_lookup(lookup(&[
            ("VELLUM_STORAGE", "memory"),
            ("VELLUM_ACTOR", "alice"),
            ("VELLUM_PROJECT", "Docs"),
            ("DEBUG", "TRUE"),
        ]))
        .unwrap();
        assert_eq!(config.storage, StorageKind::Memory);
        assert_eq!(config.actor, "alice");
        assert_eq!(config.project, "Docs");
        assert!(config.debug);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            ShellConfig::from_lookup(lookup(&[("VELLUM_STORAGE", "s3")])),
            Err(ShellError::Config(_))
        ));
        assert!(matches!(
            ShellConfig::from_lookup(lookup(&[("DEBUG", "maybe")])),
            Err(ShellError::Config(_))
        ));
        assert!(matches!(
            ShellConfig::from_lookup(lookup(&[("VELLUM_ACTOR", " ")])),
            Err(ShellError::Config(_))
        ));
    }
}
