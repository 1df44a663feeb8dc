//! Resource lifecycle state machine
//!
//! ```text
//!            Edit            Delete          Publish
//! NEW        NEW             (removed)       UNCHANGED
//! UNCHANGED  CHANGED         DELETED         UNCHANGED
//! CHANGED    CHANGED         DELETED         UNCHANGED
//! DELETED    -               DELETED         (removed)
//! ```

use crate::error::VellumError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Divergence between the offline and online record of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceState {
    /// Exists only offline
    New,
    /// Identical offline and online
    Unchanged,
    /// Exists in both views with diverging content or properties
    Changed,
    /// Tombstoned offline, pending purge online
    Deleted,
}

/// Events that move a resource through its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Edit,
    Delete,
    Publish,
}

/// Result of applying a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextState {
    Keep(ResourceState),
    /// The record disappears from the offline view
    Removed,
}

impl ResourceState {
    /// Apply a transition, rejecting moves that are not in the table
    pub fn apply(self, transition: Transition) -> Result<NextState, VellumError> {
        use ResourceState::*;
        use Transition::*;

        let next = match (self, transition) {
            (New, Edit) => NextState::Keep(New),
            (New, Delete) => NextState::Removed,
            (New, Publish) => NextState::Keep(Unchanged),
            (Unchanged, Edit) | (Changed, Edit) => NextState::Keep(Changed),
            (Unchanged, Delete) | (Changed, Delete) => NextState::Keep(Deleted),
            (Unchanged, Publish) | (Changed, Publish) => NextState::Keep(Unchanged),
            (Deleted, Delete) => NextState::Keep(Deleted),
            (Deleted, Publish) => NextState::Removed,
            (Deleted, Edit) => {
                return Err(VellumError::InvalidTransition {
                    state: self.to_string(),
                    transition: format!("{:?}", transition).to_lowercase(),
                });
            }
        };
        Ok(next)
    }

    /// Apply a transition that must leave the record in place
    pub fn after(self, transition: Transition) -> Result<ResourceState, VellumError> {
        match self.apply(transition)? {
            NextState::Keep(state) => Ok(state),
            NextState::Removed => Err(VellumError::InvalidTransition {
                state: self.to_string(),
                transition: format!("{:?}", transition).to_lowercase(),
            }),
        }
    }

    /// Whether the resource has offline work not yet published
    pub fn is_pending(&self) -> bool {
        !matches!(self, ResourceState::Unchanged)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceState::New => "new",
            ResourceState::Unchanged => "unchanged",
            ResourceState::Changed => "changed",
            ResourceState::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_settles_every_live_state() {
        for state in [
            ResourceState::New,
            ResourceState::Unchanged,
            ResourceState::Changed,
        ] {
            assert_eq!(
                state.apply(Transition::Publish).unwrap(),
                NextState::Keep(ResourceState::Unchanged)
            );
        }
        assert_eq!(
            ResourceState::Deleted.apply(Transition::Publish).unwrap(),
            NextState::Removed
        );
    }

    #[test]
    fn test_new_resources_stay_new_when_edited() {
        assert_eq!(
            ResourceState::New.after(Transition::Edit).unwrap(),
            ResourceState::New
        );
        assert_eq!(
            ResourceState::Unchanged.after(Transition::Edit).unwrap(),
            ResourceState::Changed
        );
    }

    #[test]
    fn test_deleting_new_resource_removes_it() {
        assert_eq!(
            ResourceState::New.apply(Transition::Delete).unwrap(),
            NextState::Removed
        );
        assert!(ResourceState::New.after(Transition::Delete).is_err());
        assert_eq!(
            ResourceState::Changed.after(Transition::Delete).unwrap(),
            ResourceState::Deleted
        );
    }

    #[test]
    fn test_deleted_resources_cannot_be_edited() {
        assert!(matches!(
            ResourceState::Deleted.apply(Transition::Edit),
            Err(VellumError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_serialized_form() {
        assert_eq!(
            serde_json::to_string(&ResourceState::Unchanged).unwrap(),
            "\"unchanged\""
        );
    }
}
