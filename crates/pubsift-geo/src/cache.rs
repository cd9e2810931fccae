//! Affiliation cache: exact affiliation string → resolved country codes.
//!
//! Entries are immutable. Writers only ever create missing entries, so a
//! cached value is never replaced by a later resolution.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use pubsift_core::record::CountrySet;
use pubsift_core::{Retryable, StreamError, http_client, send_json, send_text};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// One cached resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub affiliation: String,
    pub countries: CountrySet,
}

#[derive(Debug)]
pub enum CacheError {
    Stream(StreamError),
    /// Response did not have the expected shape
    Protocol(String),
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stream(e) => write!(f, "cache request failed: {e}"),
            Self::Protocol(msg) => write!(f, "unexpected cache response: {msg}"),
        }
    }
}

impl std::error::Error for CacheError {}

impl From<StreamError> for CacheError {
    fn from(e: StreamError) -> Self {
        Self::Stream(e)
    }
}

impl Retryable for CacheError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Stream(e) => e.is_retryable(),
            Self::Protocol(_) => false,
        }
    }
}

pub trait AffiliationCache: Send + Sync {
    /// Exact-match lookup.
    fn lookup(&self, affiliation: &str) -> Result<Option<CountrySet>, CacheError>;

    /// Store entries whose affiliation is not cached yet; existing entries win.
    fn insert_absent(&self, entries: &[CacheEntry]) -> Result<(), CacheError>;
}

/// Process-local cache for tests and offline runs.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<FxHashMap<String, CountrySet>>,
    lookups: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: impl IntoIterator<Item = CacheEntry>) -> Self {
        let cache = Self::new();
        cache
            .lock()
            .extend(entries.into_iter().map(|e| (e.affiliation, e.countries)));
        cache
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of lookups served so far.
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }

    /// Number of entries actually created so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FxHashMap<String, CountrySet>> {
        self.entries.lock().expect("memory cache lock poisoned")
    }
}

impl AffiliationCache for MemoryCache {
    fn lookup(&self, affiliation: &str) -> Result<Option<CountrySet>, CacheError> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        Ok(self.lock().get(affiliation).cloned())
    }

    fn insert_absent(&self, entries: &[CacheEntry]) -> Result<(), CacheError> {
        let mut map = self.lock();
        for entry in entries {
            if !map.contains_key(&entry.affiliation) {
                map.insert(entry.affiliation.clone(), entry.countries.clone());
                self.writes.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

/// Cache backed by an Elasticsearch index of `{affiliation, countries}` documents.
///
/// Lookups are `term` queries on `affiliation.keyword`. Writes use `_bulk`
/// `create` actions keyed by the blake3 digest of the affiliation, which the
/// server rejects when the document already exists.
#[derive(Debug, Clone)]
pub struct ElasticCache {
    base_url: String,
    index: String,
    timeout: Duration,
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: Hits,
}

#[derive(Deserialize)]
struct Hits {
    hits: Vec<Hit>,
}

#[derive(Deserialize)]
struct Hit {
    #[serde(rename = "_source")]
    source: CacheEntry,
}

impl ElasticCache {
    pub fn new(base_url: &str, index: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            index: index.to_string(),
            timeout,
        }
    }

    /// Document id of an affiliation string.
    pub fn doc_id(affiliation: &str) -> String {
        blake3::hash(affiliation.as_bytes()).to_hex().to_string()
    }

    /// NDJSON body of a `_bulk` request creating `entries`.
    pub fn bulk_body(&self, entries: &[CacheEntry]) -> Result<String, CacheError> {
        let mut body = String::new();
        for entry in entries {
            let action = serde_json::json!({
                "create": { "_index": self.index, "_id": Self::doc_id(&entry.affiliation) }
            });
            body.push_str(&action.to_string());
            body.push('\n');
            let doc = serde_json::to_string(entry).map_err(|e| CacheError::Protocol(e.to_string()))?;
            body.push_str(&doc);
            body.push('\n');
        }
        Ok(body)
    }
}

impl AffiliationCache for ElasticCache {
    fn lookup(&self, affiliation: &str) -> Result<Option<CountrySet>, CacheError> {
        let query = serde_json::json!({
            "size": 1,
            "query": { "term": { "affiliation.keyword": affiliation } }
        });
        let request = http_client()
            .post(format!("{}/{}/_search", self.base_url, self.index))
            .json(&query);
        match send_json::<SearchResponse>(request, self.timeout) {
            Ok(resp) => Ok(resp.hits.hits.into_iter().next().map(|h| h.source.countries)),
            // Index not created yet
            Err(e) if e.status() == Some(404) => Ok(None),
            Err(StreamError::Decode(msg)) => Err(CacheError::Protocol(msg)),
            Err(e) => Err(e.into()),
        }
    }

    fn insert_absent(&self, entries: &[CacheEntry]) -> Result<(), CacheError> {
        if entries.is_empty() {
            return Ok(());
        }
        let request = http_client()
            .post(format!("{}/_bulk", self.base_url))
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(self.bulk_body(entries)?);
        // Per-item 409 conflicts are expected for entries that already exist
        send_text(request, self.timeout)?;
        log::debug!("cached {} affiliations in {}", entries.len(), self.index);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(aff: &str, countries: &[&str]) -> CacheEntry {
        CacheEntry {
            affiliation: aff.to_string(),
            countries: countries.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[test]
    fn memory_insert_never_overwrites() {
        let cache = MemoryCache::new();
        cache.insert_absent(&[entry("Inserm, Paris", &["fr"])]).unwrap();
        cache.insert_absent(&[entry("Inserm, Paris", &["us"])]).unwrap();
        assert_eq!(
            cache.lookup("Inserm, Paris").unwrap(),
            Some(["fr".to_string()].into())
        );
        assert_eq!(cache.write_count(), 1);
    }

    #[test]
    fn memory_lookup_is_exact() {
        let cache = MemoryCache::with_entries([entry("CNRS", &["fr"])]);
        assert!(cache.lookup("cnrs").unwrap().is_none());
        assert!(cache.lookup("CNRS").unwrap().is_some());
        assert_eq!(cache.lookup_count(), 2);
    }

    #[test]
    fn doc_id_is_stable_digest() {
        let a = ElasticCache::doc_id("Institut Pasteur");
        assert_eq!(a, ElasticCache::doc_id("Institut Pasteur"));
        assert_ne!(a, ElasticCache::doc_id("institut pasteur"));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn bulk_body_uses_create_actions() {
        let cache = ElasticCache::new("http://localhost:9200/", "bso-cache-country", Duration::from_secs(5));
        let body = cache.bulk_body(&[entry("MIT", &["us"])]).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        let action: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(action["create"]["_index"], "bso-cache-country");
        assert_eq!(action["create"]["_id"], ElasticCache::doc_id("MIT"));
        let doc: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(doc["affiliation"], "MIT");
        assert_eq!(doc["countries"], serde_json::json!(["us"]));
        assert!(body.ends_with('\n'));
    }

    #[test]
    fn search_hit_decodes() {
        let raw = r#"{"hits":{"hits":[{"_source":{"affiliation":"MIT","countries":["us"]}}]}}"#;
        let resp: SearchResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.hits.hits[0].source, entry("MIT", &["us"]));
    }
}
