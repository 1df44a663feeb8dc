//! Sibling index: which resources share which content blob
//!
//! A blob is referenced by every record (offline or online) that points at
//! it. Offline references define sibling groups; the total count across
//! both views decides when a blob can be reclaimed.

use crate::entities::{BlobId, ResourceId, View};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Default)]
pub struct SiblingIndex {
    refs: HashMap<BlobId, BTreeSet<(View, ResourceId)>>,
}

impl SiblingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reference; returns the new count
    pub fn add_ref(&mut self, blob: BlobId, view: View, resource: ResourceId) -> usize {
        let entry = self.refs.entry(blob).or_default();
        entry.insert((view, resource));
        entry.len()
    }

    /// Drop a reference; returns the remaining count. At zero the blob
    /// entry is removed and the caller owns reclamation of the payload.
    pub fn remove_ref(&mut self, blob: BlobId, view: View, resource: ResourceId) -> usize {
        let Some(entry) = self.refs.get_mut(&blob) else {
            return 0;
        };
        entry.remove(&(view, resource));
        let remaining = entry.len();
        if remaining == 0 {
            self.refs.remove(&blob);
        }
        remaining
    }

    pub fn ref_count(&self, blob: &BlobId) -> usize {
        self.refs.get(blob).map(|e| e.len()).unwrap_or(0)
    }

    /// Resources of one view referencing `blob`, in id order
    pub fn members(&self, blob: &BlobId, view: View) -> Vec<ResourceId> {
        self.refs
            .get(blob)
            .map(|entry| {
                entry
                    .iter()
                    .filter(|(v, _)| *v == view)
                    .map(|(_, id)| *id)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of blobs with at least one reference
    pub fn blob_count(&self) -> usize {
        self.refs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_across_views() {
        let mut index = SiblingIndex::new();
        let blob = BlobId::new();
        let a = ResourceId::new();
        let b = ResourceId::new();

        assert_eq!(index.add_ref(blob, View::Offline, a), 1);
        assert_eq!(index.add_ref(blob, View::Offline, b), 2);
        assert_eq!(index.add_ref(blob, View::Online, a), 3);
        // re-adding is idempotent
        assert_eq!(index.add_ref(blob, View::Online, a), 3);

        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(index.members(&blob, View::Offline), expected);
        assert_eq!(index.members(&blob, View::Online), vec![a]);

        assert_eq!(index.remove_ref(blob, View::Offline, a), 2);
        assert_eq!(index.remove_ref(blob, View::Online, a), 1);
        assert_eq!(index.remove_ref(blob, View::Offline, b), 0);
        assert_eq!(index.ref_count(&blob), 0);
        assert_eq!(index.blob_count(), 0);
    }

    #[test]
    fn test_removing_unknown_reference() {
        let mut index = SiblingIndex::new();
        assert_eq!(
            index.remove_ref(BlobId::new(), View::Offline, ResourceId::new()),
            0
        );
    }
}
