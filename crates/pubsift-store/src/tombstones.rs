//! Identifiers deleted upstream, collected from every bulk deletion list.

use rustc_hash::FxHashSet;

use crate::blob::{BlobStore, StoreError, list_all};
use crate::objects::{RemovedId, get_objects, paths};

/// Union of all `removed/` lists of a container.
#[derive(Debug, Clone, Default)]
pub struct Tombstones {
    ids: FxHashSet<String>,
}

impl Tombstones {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read every deletion list stored in `container`.
    pub fn load<S: BlobStore + ?Sized>(store: &S, container: &str) -> Result<Self, StoreError> {
        let mut tombstones = Self::new();
        for name in list_all(store, container, paths::REMOVED_PREFIX)? {
            let removed: Vec<RemovedId> = get_objects(store, container, &name)?;
            tombstones.extend(removed.into_iter().map(|r| r.pmid));
        }
        log::debug!("{} removed identifiers in {container}", tombstones.len());
        Ok(tombstones)
    }

    pub fn contains(&self, pmid: &str) -> bool {
        self.ids.contains(pmid)
    }

    pub fn insert(&mut self, pmid: impl Into<String>) -> bool {
        self.ids.insert(pmid.into())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl Extend<String> for Tombstones {
    fn extend<I: IntoIterator<Item = String>>(&mut self, iter: I) {
        self.ids.extend(iter);
    }
}

impl FromIterator<String> for Tombstones {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}
