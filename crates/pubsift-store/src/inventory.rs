//! Inventory Store: per-partition record of when each identifier was last synced.
//!
//! Stored as plain JSON at `notices_inventory/inventory_{yyyymmdd}`:
//!
//! ```json
//! {"entries": {"123": {"last_synced_at": "2024-05-02"}}, "tombstones": ["77"]}
//! ```

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::blob::{BlobStore, StoreError};
use crate::objects::paths;

/// One tracked identifier of a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryEntry {
    pub partition: NaiveDate,
    pub pmid: String,
    pub last_synced_at: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct EntryState {
    last_synced_at: NaiveDate,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct InventoryDoc {
    #[serde(default)]
    entries: BTreeMap<String, EntryState>,
    #[serde(default)]
    tombstones: BTreeSet<String>,
}

/// Inventory of one date partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inventory {
    partition: NaiveDate,
    entries: BTreeMap<String, NaiveDate>,
    tombstones: BTreeSet<String>,
}

impl Inventory {
    pub fn empty(partition: NaiveDate) -> Self {
        Self {
            partition,
            entries: BTreeMap::new(),
            tombstones: BTreeSet::new(),
        }
    }

    /// Load the stored inventory; missing or unreadable documents are empty.
    pub fn load<S: BlobStore + ?Sized>(
        store: &S,
        container: &str,
        partition: NaiveDate,
    ) -> Result<Self, StoreError> {
        let path = paths::inventory(partition);
        let Some(bytes) = store.get(container, &path)? else {
            return Ok(Self::empty(partition));
        };
        let doc: InventoryDoc = match serde_json::from_slice(&bytes) {
            Ok(doc) => doc,
            Err(e) => {
                log::warn!("{container}/{path}: unreadable inventory ({e}), starting empty");
                return Ok(Self::empty(partition));
            }
        };
        Ok(Self {
            partition,
            entries: doc
                .entries
                .into_iter()
                .map(|(pmid, state)| (pmid, state.last_synced_at))
                .collect(),
            tombstones: doc.tombstones,
        })
    }

    pub fn save<S: BlobStore + ?Sized>(&self, store: &S, container: &str) -> Result<(), StoreError> {
        let doc = InventoryDoc {
            entries: self
                .entries
                .iter()
                .map(|(pmid, &last_synced_at)| (pmid.clone(), EntryState { last_synced_at }))
                .collect(),
            tombstones: self.tombstones.clone(),
        };
        let bytes = serde_json::to_vec(&doc).map_err(|e| StoreError::Encode(e.to_string()))?;
        store.put(container, &paths::inventory(self.partition), &bytes)
    }

    pub fn partition(&self) -> NaiveDate {
        self.partition
    }

    /// Most recent sync date of any entry: the lower bound of the next query window.
    pub fn window_anchor(&self) -> Option<NaiveDate> {
        self.entries.values().max().copied()
    }

    /// Forget every sync date, keeping tombstones (full resync).
    pub fn clear_entries(&mut self) {
        self.entries.clear();
    }

    pub fn mark_synced(&mut self, pmid: &str, at: NaiveDate) {
        self.entries.insert(pmid.to_string(), at);
    }

    /// Remove `pmid` from the live set of this partition for good.
    pub fn tombstone(&mut self, pmid: &str) -> bool {
        self.tombstones.insert(pmid.to_string())
    }

    pub fn is_tombstoned(&self, pmid: &str) -> bool {
        self.tombstones.contains(pmid)
    }

    pub fn tombstones(&self) -> impl Iterator<Item = &str> {
        self.tombstones.iter().map(String::as_str)
    }

    pub fn get(&self, pmid: &str) -> Option<InventoryEntry> {
        self.entries.get(pmid).map(|&last_synced_at| InventoryEntry {
            partition: self.partition,
            pmid: pmid.to_string(),
            last_synced_at,
        })
    }

    pub fn entries(&self) -> impl Iterator<Item = InventoryEntry> + '_ {
        self.entries.iter().map(|(pmid, &last_synced_at)| InventoryEntry {
            partition: self.partition,
            pmid: pmid.clone(),
            last_synced_at,
        })
    }

    /// Number of tracked identifiers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn missing_inventory_is_empty() {
        let store = MemoryBlobStore::new();
        let inv = Inventory::load(&store, "pubmed", date(2024, 1, 1)).unwrap();
        assert!(inv.is_empty());
        assert_eq!(inv.window_anchor(), None);
    }

    #[test]
    fn anchor_is_most_recent_sync() {
        let mut inv = Inventory::empty(date(2024, 1, 1));
        inv.mark_synced("1", date(2024, 1, 3));
        inv.mark_synced("2", date(2024, 2, 10));
        inv.mark_synced("3", date(2024, 1, 20));
        assert_eq!(inv.window_anchor(), Some(date(2024, 2, 10)));
    }

    #[test]
    fn save_then_load() {
        let store = MemoryBlobStore::new();
        let partition = date(2021, 4, 26);
        let mut inv = Inventory::empty(partition);
        inv.mark_synced("123", date(2021, 5, 1));
        inv.tombstone("77");
        inv.save(&store, "pubmed").unwrap();

        let back = Inventory::load(&store, "pubmed", partition).unwrap();
        assert_eq!(back, inv);
        assert!(back.is_tombstoned("77"));
        assert_eq!(
            back.get("123"),
            Some(InventoryEntry {
                partition,
                pmid: "123".into(),
                last_synced_at: date(2021, 5, 1),
            })
        );
    }

    #[test]
    fn stored_document_shape() {
        let store = MemoryBlobStore::new();
        let mut inv = Inventory::empty(date(2021, 4, 26));
        inv.mark_synced("123", date(2021, 5, 1));
        inv.save(&store, "pubmed").unwrap();
        let raw = store
            .get("pubmed", "notices_inventory/inventory_20210426")
            .unwrap()
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(json["entries"]["123"]["last_synced_at"], "2021-05-01");
        assert_eq!(json["tombstones"], serde_json::json!([]));
    }

    #[test]
    fn unreadable_inventory_starts_empty() {
        let store = MemoryBlobStore::new();
        store
            .put("pubmed", "notices_inventory/inventory_20240101", b"{oops")
            .unwrap();
        let inv = Inventory::load(&store, "pubmed", date(2024, 1, 1)).unwrap();
        assert!(inv.is_empty());
    }

    #[test]
    fn clearing_keeps_tombstones() {
        let mut inv = Inventory::empty(date(2021, 4, 26));
        inv.mark_synced("1", date(2021, 5, 1));
        inv.tombstone("2");
        inv.clear_entries();
        assert!(inv.is_empty());
        assert_eq!(inv.window_anchor(), None);
        assert!(inv.is_tombstoned("2"));
    }

    #[test]
    fn tombstone_is_idempotent() {
        let mut inv = Inventory::empty(date(2024, 1, 1));
        assert!(inv.tombstone("5"));
        assert!(!inv.tombstone("5"));
        assert_eq!(inv.tombstones().collect::<Vec<_>>(), vec!["5"]);
    }
}
