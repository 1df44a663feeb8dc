//! Validated, normalized resource paths

use crate::error::VellumError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Absolute path of a resource within a directory view.
///
/// Normalized form: `/` for the root, otherwise `/seg/seg` with no
/// trailing slash, no empty segments and no `.`/`..` segments.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourcePath(String);

impl ResourcePath {
    /// Parse and normalize a path; a single trailing slash is accepted
    pub fn parse(path: &str) -> Result<Self, VellumError> {
        let invalid = |reason: &str| VellumError::InvalidPath {
            path: path.to_string(),
            reason: reason.to_string(),
        };

        if !path.starts_with('/') {
            return Err(invalid("Path must be absolute"));
        }
        if path.len() > 1024 {
            return Err(invalid("Path cannot exceed 1024 characters"));
        }

        let trimmed = path.strip_suffix('/').unwrap_or(path);
        if trimmed.is_empty() {
            return Ok(Self::root());
        }

        for segment in trimmed[1..].split('/') {
            if segment.is_empty() {
                return Err(invalid("Path cannot contain empty segments"));
            }
            if segment == "." || segment == ".." {
                return Err(invalid("Path cannot contain '.' or '..' segments"));
            }
            if segment.chars().any(|c| c.is_control()) {
                return Err(invalid("Path cannot contain control characters"));
            }
        }

        Ok(ResourcePath(trimmed.to_string()))
    }

    pub fn root() -> Self {
        ResourcePath("/".to_string())
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parent folder, `None` for the root
    pub fn parent(&self) -> Option<ResourcePath> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(Self::root()),
            Some(pos) => Some(ResourcePath(self.0[..pos].to_string())),
            None => None,
        }
    }

    /// Last path segment, empty for the root
    pub fn name(&self) -> &str {
        match self.0.rfind('/') {
            Some(pos) => &self.0[pos + 1..],
            None => &self.0,
        }
    }

    /// Child path with the given name
    pub fn join(&self, name: &str) -> Result<ResourcePath, VellumError> {
        if self.is_root() {
            Self::parse(&format!("/{}", name))
        } else {
            Self::parse(&format!("{}/{}", self.0, name))
        }
    }

    /// Prefix shared by every strict descendant of this path
    pub fn descendant_prefix(&self) -> String {
        if self.is_root() {
            "/".to_string()
        } else {
            format!("{}/", self.0)
        }
    }

    /// Whether `self` equals `ancestor` or lies beneath it
    pub fn is_within(&self, ancestor: &ResourcePath) -> bool {
        self == ancestor || self.0.starts_with(&ancestor.descendant_prefix())
    }
}

impl FromStr for ResourcePath {
    type Err = VellumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ResourcePath {
    type Error = VellumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ResourcePath> for String {
    fn from(path: ResourcePath) -> Self {
        path.0
    }
}

impl AsRef<str> for ResourcePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_normalizes_trailing_slash() {
        let path = ResourcePath::parse("/new_folder/").unwrap();
        assert_eq!(path.as_str(), "/new_folder");
        assert_eq!(ResourcePath::parse("/").unwrap(), ResourcePath::root());
    }

    #[test]
    fn test_parent_and_name() {
        let path = ResourcePath::parse("/folder2/subfolder21/image1.gif").unwrap();
        assert_eq!(path.name(), "image1.gif");
        assert_eq!(path.parent().unwrap().as_str(), "/folder2/subfolder21");
        assert_eq!(
            ResourcePath::parse("/folder2").unwrap().parent(),
            Some(ResourcePath::root())
        );
        assert_eq!(ResourcePath::root().parent(), None);
    }

    #[test]
    fn test_invalid_paths() {
        assert!(ResourcePath::parse("relative/path").is_err());
        assert!(ResourcePath::parse("/a//b").is_err());
        assert!(ResourcePath::parse("/a/../b").is_err());
        assert!(ResourcePath::parse("/a/./b").is_err());
        assert!(ResourcePath::parse("").is_err());
    }

    #[test]
    fn test_is_within() {
        let folder = ResourcePath::parse("/a").unwrap();
        assert!(ResourcePath::parse("/a/b").unwrap().is_within(&folder));
        assert!(folder.is_within(&folder));
        assert!(!ResourcePath::parse("/ab").unwrap().is_within(&folder));
        assert!(folder.is_within(&ResourcePath::root()));
    }

    #[test]
    fn test_join() {
        let root = ResourcePath::root();
        assert_eq!(root.join("x").unwrap().as_str(), "/x");
        assert_eq!(
            ResourcePath::parse("/x").unwrap().join("y").unwrap().as_str(),
            "/x/y"
        );
        assert!(root.join("..").is_err());
    }
}
