//! Resource directory: the offline and online views of the resource tree
//!
//! Each view maps a path to at most one resource record. The root folder
//! is implicit and exists in both views.

use crate::entities::{Resource, ResourceId, View};
use crate::path::ResourcePath;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default)]
struct ViewIndex {
    by_path: BTreeMap<ResourcePath, ResourceId>,
    records: HashMap<ResourceId, Resource>,
}

impl ViewIndex {
    fn upsert(&mut self, resource: Resource) -> Option<Resource> {
        if let Some(previous) = self.records.get(&resource.id) {
            if previous.path != resource.path {
                self.by_path.remove(&previous.path);
            }
        }
        self.by_path.insert(resource.path.clone(), resource.id);
        self.records.insert(resource.id, resource)
    }

    fn remove(&mut self, id: &ResourceId) -> Option<Resource> {
        let removed = self.records.remove(id)?;
        self.by_path.remove(&removed.path);
        Some(removed)
    }
}

#[derive(Debug, Default)]
pub struct Directory {
    offline: ViewIndex,
    online: ViewIndex,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    fn view(&self, view: View) -> &ViewIndex {
        match view {
            View::Offline => &self.offline,
            View::Online => &self.online,
        }
    }

    fn view_mut(&mut self, view: View) -> &mut ViewIndex {
        match view {
            View::Offline => &mut self.offline,
            View::Online => &mut self.online,
        }
    }

    pub fn get(&self, view: View, path: &ResourcePath) -> Option<&Resource> {
        let index = self.view(view);
        index.by_path.get(path).and_then(|id| index.records.get(id))
    }

    pub fn get_by_id(&self, view: View, id: &ResourceId) -> Option<&Resource> {
        self.view(view).records.get(id)
    }

    /// Whether a folder exists at `path` (the root always does)
    pub fn folder_exists(&self, view: View, path: &ResourcePath) -> bool {
        path.is_root() || self.get(view, path).is_some_and(|r| r.is_folder())
    }

    /// Insert or replace a record, returning the previous one for its id.
    ///
    /// Panics in debug builds if another resource already holds the path.
    pub fn upsert(&mut self, view: View, resource: Resource) -> Option<Resource> {
        debug_assert!(
            self.view(view)
                .by_path
                .get(&resource.path)
                .is_none_or(|id| *id == resource.id),
            "path {} already occupied in {} view",
            resource.path,
            view
        );
        self.view_mut(view).upsert(resource)
    }

    pub fn remove(&mut self, view: View, id: &ResourceId) -> Option<Resource> {
        self.view_mut(view).remove(id)
    }

    /// Direct children of a folder, in path order
    pub fn children(&self, view: View, folder: &ResourcePath) -> Vec<&Resource> {
        self.descendants(view, folder)
            .into_iter()
            .filter(|r| r.path.parent().as_ref() == Some(folder))
            .collect()
    }

    /// Every record strictly beneath `folder`, in path order
    pub fn descendants(&self, view: View, folder: &ResourcePath) -> Vec<&Resource> {
        let index = self.view(view);
        let prefix = folder.descendant_prefix();
        index
            .by_path
            .iter()
            .skip_while(|(path, _)| path.as_str() < prefix.as_str())
            .take_while(|(path, _)| path.as_str().starts_with(&prefix))
            .filter_map(|(_, id)| index.records.get(id))
            .collect()
    }

    /// Every record of a view, in path order
    pub fn iter(&self, view: View) -> impl Iterator<Item = &Resource> {
        let index = self.view(view);
        index
            .by_path
            .values()
            .filter_map(move |id| index.records.get(id))
    }

    pub fn len(&self, view: View) -> usize {
        self.view(view).records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Context, ProjectId};

    fn folder(path: &str) -> Resource {
        let ctx = Context::new("tester", ProjectId::OFFLINE);
        Resource::new_folder(ResourcePath::parse(path).unwrap(), &ctx)
    }

    #[test]
    fn test_one_record_per_path() {
        let mut dir = Directory::new();
        let a = folder("/a");
        let id = a.id;
        assert!(dir.upsert(View::Offline, a.clone()).is_none());
        assert!(dir.upsert(View::Offline, a).is_some());
        assert_eq!(dir.len(View::Offline), 1);
        assert_eq!(dir.len(View::Online), 0);

        let path = ResourcePath::parse("/a").unwrap();
        assert_eq!(dir.get(View::Offline, &path).unwrap().id, id);
        assert!(dir.get(View::Online, &path).is_none());

        dir.remove(View::Offline, &id);
        assert!(dir.get(View::Offline, &path).is_none());
    }

    #[test]
    fn test_children_and_descendants() {
        let mut dir = Directory::new();
        for path in ["/a", "/a/b", "/a/b/c", "/a-b", "/ab", "/z"] {
            dir.upsert(View::Offline, folder(path));
        }

        let a = ResourcePath::parse("/a").unwrap();
        let children: Vec<&str> = dir
            .children(View::Offline, &a)
            .iter()
            .map(|r| r.path.as_str())
            .collect();
        assert_eq!(children, vec!["/a/b"]);

        let descendants: Vec<&str> = dir
            .descendants(View::Offline, &a)
            .iter()
            .map(|r| r.path.as_str())
            .collect();
        assert_eq!(descendants, vec!["/a/b", "/a/b/c"]);

        let top: Vec<&str> = dir
            .children(View::Offline, &ResourcePath::root())
            .iter()
            .map(|r| r.path.as_str())
            .collect();
        assert_eq!(top, vec!["/a", "/a-b", "/ab", "/z"]);
    }

    #[test]
    fn test_root_folder_is_implicit() {
        let dir = Directory::new();
        assert!(dir.folder_exists(View::Online, &ResourcePath::root()));
        assert!(!dir.folder_exists(View::Online, &ResourcePath::parse("/x").unwrap()));
    }
}
