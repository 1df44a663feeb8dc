//! Property definitions
//!
//! Resources carry free-form string properties; each key in use must be a
//! defined property name. Writing a property defines its name implicitly.

use crate::address::ContentAddress;
use crate::error::{Result, VellumError};
use crate::storage::ObjectStore;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

pub struct PropertyDefinitions {
    store: Arc<dyn ObjectStore>,
    names: Mutex<BTreeSet<String>>,
}

impl PropertyDefinitions {
    pub async fn load(store: Arc<dyn ObjectStore>) -> Result<Self> {
        let key = ContentAddress::property_definitions_key();
        let names = if store.exists(key).await? {
            serde_json::from_slice(&store.get(key).await?)?
        } else {
            BTreeSet::new()
        };
        Ok(Self {
            store,
            names: Mutex::new(names),
        })
    }

    /// Validate a property name: 1-128 letters, digits, `-`, `_` or `.`
    pub fn validate_name(name: &str) -> Result<()> {
        let valid = !name.is_empty()
            && name.len() <= 128
            && name
                .chars()
                .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.');
        if !valid {
            return Err(VellumError::InvalidOperation(format!(
                "Invalid property name '{}'",
                name
            )));
        }
        Ok(())
    }

    /// Define every name in `names`; returns the ones that were new
    pub async fn define_all<'a, I>(&self, names: I) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut defined = self.names.lock().await;
        let mut created = Vec::new();
        for name in names {
            Self::validate_name(name)?;
            if !defined.contains(name) && !created.iter().any(|c| c == name) {
                created.push(name.to_string());
            }
        }
        if created.is_empty() {
            return Ok(created);
        }

        let mut next = defined.clone();
        next.extend(created.iter().cloned());
        self.save(&next).await?;
        *defined = next;
        debug!(names = ?created, "Defined properties");
        Ok(created)
    }

    /// Define one name; false if it already existed
    pub async fn define(&self, name: &str) -> Result<bool> {
        Ok(!self.define_all([name]).await?.is_empty())
    }

    pub async fn list(&self) -> Vec<String> {
        self.names.lock().await.iter().cloned().collect()
    }

    /// Remove a definition. `in_use` is consulted under the definitions
    /// lock so no write can define the name concurrently.
    pub async fn remove(&self, name: &str, in_use: impl FnOnce() -> bool) -> Result<()> {
        let mut defined = self.names.lock().await;
        if !defined.contains(name) {
            return Err(VellumError::not_found(format!("property definition {}", name)));
        }
        if in_use() {
            return Err(VellumError::Conflict(format!(
                "Property {} is still set on resources",
                name
            )));
        }

        let mut next = defined.clone();
        next.remove(name);
        self.save(&next).await?;
        *defined = next;
        Ok(())
    }

    async fn save(&self, names: &BTreeSet<String>) -> Result<()> {
        self.store
            .put(
                ContentAddress::property_definitions_key(),
                serde_json::to_vec(names)?,
            )
            .await?;
        Ok(())
    }
}
