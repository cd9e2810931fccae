//! Stored objects: gzip-compressed JSON arrays, and the paths they live at.

use std::io::{Read, Write};

use chrono::NaiveDate;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::blob::{BlobStore, StoreError};

/// Raw payload of one PubMed record as harvested.
///
/// Stored as `{"id": "pmid<N>", "pmid": "<N>", "notice": "<xml>"}`; an empty
/// `notice` is a placeholder left by a failed fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawNotice {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub pmid: String,
    #[serde(default)]
    pub notice: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
}

impl RawNotice {
    pub fn new(pmid: impl Into<String>, notice: impl Into<String>) -> Self {
        let pmid = pmid.into();
        Self {
            id: format!("pmid{pmid}"),
            pmid,
            notice: notice.into(),
            deleted: false,
        }
    }

    /// Placeholder for a fetch that failed; re-queued on the next sync.
    pub fn placeholder(pmid: impl Into<String>) -> Self {
        Self::new(pmid, String::new())
    }

    /// Payload missing (failed fetch).
    pub fn is_empty(&self) -> bool {
        self.notice.is_empty()
    }
}

/// Identifier listed in a bulk file's deletion list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemovedId {
    pub pmid: String,
}

/// Serialize `items` as a JSON array and gzip it.
pub fn encode_objects<T: Serialize>(items: &[T]) -> Result<Vec<u8>, StoreError> {
    let mut gz = GzEncoder::new(Vec::new(), Compression::default());
    serde_json::to_writer(&mut gz, items).map_err(|e| StoreError::Encode(e.to_string()))?;
    gz.flush()?;
    Ok(gz.finish()?)
}

/// Inverse of [`encode_objects`].
pub fn decode_objects<T: DeserializeOwned>(path: &str, bytes: &[u8]) -> Result<Vec<T>, StoreError> {
    let mut json = Vec::new();
    GzDecoder::new(bytes)
        .read_to_end(&mut json)
        .map_err(|e| StoreError::Corrupt {
            path: path.to_string(),
            message: e.to_string(),
        })?;
    serde_json::from_slice(&json).map_err(|e| StoreError::Corrupt {
        path: path.to_string(),
        message: e.to_string(),
    })
}

/// Load an object array. Missing objects are empty.
///
/// An object that exists but does not decode is logged and treated as
/// empty, so the next run rebuilds it instead of failing forever.
pub fn get_objects<T, S>(store: &S, container: &str, path: &str) -> Result<Vec<T>, StoreError>
where
    T: DeserializeOwned,
    S: BlobStore + ?Sized,
{
    let Some(bytes) = store.get(container, path)? else {
        return Ok(Vec::new());
    };
    match decode_objects(path, &bytes) {
        Ok(items) => Ok(items),
        Err(e @ StoreError::Corrupt { .. }) => {
            log::warn!("{container}: {e}, treating as empty");
            Ok(Vec::new())
        }
        Err(e) => Err(e),
    }
}

/// Encode and store an object array, replacing any previous version.
pub fn put_objects<T, S>(store: &S, container: &str, path: &str, items: &[T]) -> Result<(), StoreError>
where
    T: Serialize,
    S: BlobStore + ?Sized,
{
    let bytes = encode_objects(items)?;
    store.put(container, path, &bytes)?;
    log::debug!("stored {} objects at {container}/{path}", items.len());
    Ok(())
}

/// Object paths shared by the harvest and bulk pipelines.
pub mod paths {
    use super::NaiveDate;

    /// `YYYY/MM/DD`, the directory of a date partition.
    pub fn date_dir(date: NaiveDate) -> String {
        date.format("%Y/%m/%d").to_string()
    }

    fn compact(date: NaiveDate) -> String {
        date.format("%Y%m%d").to_string()
    }

    /// Harvested notices of one date partition.
    pub fn notices(date: NaiveDate) -> String {
        format!("notices/{}/notices_{}.json.gz", date_dir(date), compact(date))
    }

    /// Parsed publications of one date partition, optionally the regional subset.
    pub fn parsed(date: NaiveDate, region: Option<&str>) -> String {
        let file = format!("{}/parsed_{}.json.gz", date_dir(date), compact(date));
        match region {
            Some(region) => format!("parsed/{region}/{file}"),
            None => format!("parsed/{file}"),
        }
    }

    /// Inventory document of one date partition.
    pub fn inventory(date: NaiveDate) -> String {
        format!("notices_inventory/inventory_{}", compact(date))
    }

    /// Raw chunk `index` of a bulk file.
    pub fn chunk(file_key: &str, index: usize) -> String {
        format!("notices/{file_key}_{index}")
    }

    /// Processed output of chunk `index`, optionally the regional subset.
    pub fn processed(file_key: &str, index: usize, region: Option<&str>) -> String {
        match region {
            Some(region) => format!("parsed/{region}/{file_key}_{index}"),
            None => format!("parsed/{file_key}_{index}"),
        }
    }

    /// Prefix of every bulk deletion list.
    pub const REMOVED_PREFIX: &str = "removed/";

    /// Deletion list of a bulk file.
    pub fn removed(file_key: &str) -> String {
        format!("{REMOVED_PREFIX}{file_key}")
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
    fn raw_notice_wire_format() {
        let json = serde_json::to_string(&RawNotice::new("123", "<x/>")).unwrap();
        assert_eq!(json, r#"{"id":"pmid123","pmid":"123","notice":"<x/>"}"#);

        let tombstone = RawNotice {
            deleted: true,
            ..RawNotice::placeholder("9")
        };
        let json = serde_json::to_value(&tombstone).unwrap();
        assert_eq!(json["deleted"], true);
    }

    #[test]
    fn raw_notice_tolerates_missing_fields() {
        let notice: RawNotice = serde_json::from_str(r#"{"notice": "<a/>"}"#).unwrap();
        assert_eq!(notice.pmid, "");
        assert!(!notice.is_empty());
        assert!(!notice.deleted);
    }

    #[test]
    fn objects_roundtrip_through_store() {
        let store = MemoryBlobStore::new();
        let items = vec![RawNotice::new("1", "<a/>"), RawNotice::placeholder("2")];
        put_objects(&store, "pubmed", "notices/x.json.gz", &items).unwrap();
        let back: Vec<RawNotice> = get_objects(&store, "pubmed", "notices/x.json.gz").unwrap();
        assert_eq!(back, items);
    }

    #[test]
    fn missing_object_is_empty() {
        let store = MemoryBlobStore::new();
        let items: Vec<RemovedId> = get_objects(&store, "medline", "removed/none").unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn corrupt_object_is_empty() {
        let store = MemoryBlobStore::new();
        store.put("pubmed", "bad", b"not gzip").unwrap();
        let items: Vec<RawNotice> = get_objects(&store, "pubmed", "bad").unwrap();
        assert!(items.is_empty());
        assert!(matches!(
            decode_objects::<RawNotice>("bad", b"not gzip"),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn partition_paths() {
        let d = date(2021, 4, 26);
        assert_eq!(paths::notices(d), "notices/2021/04/26/notices_20210426.json.gz");
        assert_eq!(paths::parsed(d, None), "parsed/2021/04/26/parsed_20210426.json.gz");
        assert_eq!(
            paths::parsed(d, Some("fr")),
            "parsed/fr/2021/04/26/parsed_20210426.json.gz"
        );
        assert_eq!(paths::inventory(d), "notices_inventory/inventory_20210426");
    }

    #[test]
    fn bulk_paths() {
        assert_eq!(paths::chunk("pubmed24n0001", 3), "notices/pubmed24n0001_3");
        assert_eq!(paths::processed("pubmed24n0001", 3, None), "parsed/pubmed24n0001_3");
        assert_eq!(
            paths::processed("pubmed24n0001", 3, Some("fr")),
            "parsed/fr/pubmed24n0001_3"
        );
        assert_eq!(paths::removed("pubmed24n1300"), "removed/pubmed24n1300");
    }
}
