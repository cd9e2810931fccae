//! Harvest Synchronizer: reconcile one Entrez-date partition with the feed.
//!
//! A sync loads the partition's inventory and stored notices, asks the feed
//! for every identifier modified since the last sync, re-queues empty
//! placeholders, fetches each candidate one at a time and writes notices and
//! inventory back only when something changed.

use std::thread;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use pubsift_core::{is_shutdown_requested, retry_with_backoff};
use pubsift_store::objects::paths;
use pubsift_store::{BlobStore, Inventory, RawNotice, Tombstones, get_objects, put_objects};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::config::HarvestConfig;
use crate::feed::{FeedError, FetchOutcome, NoticeFeed, SearchWindow};

/// What one partition sync did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub partition: Option<NaiveDate>,
    /// Identifiers returned by the search
    pub matched: usize,
    /// Distinct identifiers fetched or attempted
    pub candidates: usize,
    pub fetched: usize,
    /// Reported deleted upstream, tombstoned
    pub deleted: usize,
    /// Left as (or turned into) empty placeholders
    pub failed: usize,
    /// Stale copies dropped by the dedup pass
    pub duplicates: usize,
    /// Notices and inventory were written back
    pub written: bool,
    /// Stopped early on a shutdown request
    pub interrupted: bool,
}

pub struct Synchronizer<'a> {
    feed: &'a dyn NoticeFeed,
    store: &'a dyn BlobStore,
    config: HarvestConfig,
    removed: Tombstones,
    today: NaiveDate,
}

impl<'a> Synchronizer<'a> {
    pub fn new(feed: &'a dyn NoticeFeed, store: &'a dyn BlobStore, config: HarvestConfig) -> Self {
        Self {
            feed,
            store,
            config,
            removed: Tombstones::new(),
            today: chrono::Local::now().date_naive(),
        }
    }

    /// Identifiers deleted by the bulk source, never fetched again.
    pub fn with_removed(mut self, removed: Tombstones) -> Self {
        self.removed = removed;
        self
    }

    /// Date recorded as `last_synced_at` for fetched notices.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn store(&self) -> &'a dyn BlobStore {
        self.store
    }

    pub fn container(&self) -> &str {
        &self.config.container
    }

    /// Bring `partition` up to date; `full` ignores previous sync dates.
    pub fn sync_partition(&self, partition: NaiveDate, full: bool) -> Result<SyncReport> {
        let container = self.config.container.as_str();
        let mut report = SyncReport {
            partition: Some(partition),
            ..Default::default()
        };

        let mut inventory = Inventory::load(self.store, container, partition)
            .with_context(|| format!("Failed to load inventory of {partition}"))?;
        if full {
            inventory.clear_entries();
        }
        let window = SearchWindow {
            partition,
            modified_since: inventory.window_anchor(),
        };

        let matched = self
            .search_all(&window)
            .with_context(|| format!("Search of {partition} failed"))?;
        report.matched = matched.len();
        log::debug!(
            "{partition} modified since {:?}: {} results",
            window.modified_since,
            matched.len()
        );

        let notices_path = paths::notices(partition);
        let mut notices: Vec<RawNotice> = get_objects(self.store, container, &notices_path)
            .with_context(|| format!("Failed to load notices of {partition}"))?;

        let before = notices.len();
        notices.retain(|n| !self.is_tombstoned(&inventory, &n.pmid));
        let mut modified = notices.len() != before;

        let placeholders: Vec<String> = notices
            .iter()
            .filter(|n| n.is_empty() && !n.pmid.is_empty())
            .map(|n| n.pmid.clone())
            .collect();
        let mut seen = FxHashSet::default();
        let candidates: Vec<String> = matched
            .into_iter()
            .chain(placeholders)
            .filter(|pmid| !pmid.is_empty() && seen.insert(pmid.clone()))
            .filter(|pmid| !self.is_tombstoned(&inventory, pmid))
            .collect();
        report.candidates = candidates.len();
        log::debug!("{partition}: {} ids to download", candidates.len());

        let stored = notices.len();
        let present: FxHashSet<String> = notices.iter().map(|n| n.pmid.clone()).collect();
        let mut replaced: FxHashSet<String> = FxHashSet::default();

        for (ix, pmid) in candidates.iter().enumerate() {
            if is_shutdown_requested() {
                log::warn!("{partition}: shutdown requested after {ix} fetches");
                report.interrupted = true;
                break;
            }
            if ix > 0 && ix % 50 == 0 {
                log::debug!("{partition}: {ix} / {}", candidates.len());
            }

            match self.fetch_with_fallback(pmid) {
                Some(FetchOutcome::Notice(xml)) => {
                    replaced.insert(pmid.clone());
                    notices.push(RawNotice::new(pmid.clone(), xml));
                    inventory.mark_synced(pmid, self.today);
                    report.fetched += 1;
                    modified = true;
                }
                Some(FetchOutcome::Deleted) => {
                    inventory.tombstone(pmid);
                    replaced.insert(pmid.clone());
                    report.deleted += 1;
                    modified = true;
                }
                None => {
                    report.failed += 1;
                    if !present.contains(pmid) {
                        notices.push(RawNotice::placeholder(pmid.clone()));
                        modified = true;
                    }
                }
            }

            if !self.config.request_delay.is_zero() {
                thread::sleep(self.config.request_delay);
            }
        }

        // Stored copies of refetched or deleted identifiers go away
        if !replaced.is_empty() {
            let mut ix = 0;
            notices.retain(|n| {
                let keep = ix >= stored || !replaced.contains(&n.pmid);
                ix += 1;
                keep
            });
        }

        if notices.len() > inventory.len() {
            let (deduped, dropped) = dedup_latest(notices);
            notices = deduped;
            if dropped > 0 {
                log::debug!("{partition}: removed {dropped} duplicates, now {} notices", notices.len());
                report.duplicates = dropped;
                modified = true;
            }
        }

        if modified {
            put_objects(self.store, container, &notices_path, &notices)
                .with_context(|| format!("Failed to store notices of {partition}"))?;
            inventory
                .save(self.store, container)
                .with_context(|| format!("Failed to store inventory of {partition}"))?;
            report.written = true;
            log::info!(
                "{partition}: {} fetched, {} deleted, {} failed, {} notices stored",
                report.fetched,
                report.deleted,
                report.failed,
                notices.len()
            );
        } else {
            log::debug!("{partition}: up to date");
        }

        Ok(report)
    }

    fn is_tombstoned(&self, inventory: &Inventory, pmid: &str) -> bool {
        inventory.is_tombstoned(pmid) || self.removed.contains(pmid)
    }

    /// Every identifier of the window, page by page.
    fn search_all(&self, window: &SearchWindow) -> Result<Vec<String>, FeedError> {
        let page_size = self.config.page_size.max(1);
        let mut ids = Vec::new();
        let mut start = 0;
        loop {
            let page = retry_with_backoff("esearch", self.config.search_retry, || {
                self.feed.search(window, start, page_size)
            })?;
            let received = page.ids.len();
            ids.extend(page.ids);
            start += received;
            if received == 0 || start >= page.count {
                break;
            }
        }
        Ok(ids)
    }

    /// Fast attempt, then one slow attempt after a pause. `None` when both fail.
    fn fetch_with_fallback(&self, pmid: &str) -> Option<FetchOutcome> {
        match self.feed.fetch(pmid, self.config.fast_timeout) {
            Ok(outcome) => return Some(outcome),
            Err(e) => log::debug!("pmid {pmid}: {e}, retrying in {:?}", self.config.retry_wait),
        }
        if !self.config.retry_wait.is_zero() {
            thread::sleep(self.config.retry_wait);
        }
        match self.feed.fetch(pmid, self.config.slow_timeout) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                log::error!("pmid {pmid}: page not responding: {e}");
                None
            }
        }
    }
}

/// Keep the latest notice of each identifier, in the order of those latest
/// occurrences. Returns the survivors and how many were dropped.
pub fn dedup_latest(notices: Vec<RawNotice>) -> (Vec<RawNotice>, usize) {
    fn key(n: &RawNotice) -> &str {
        if n.pmid.is_empty() {
            n.id.as_str()
        } else {
            n.pmid.as_str()
        }
    }

    let mut latest: FxHashMap<&str, usize> = FxHashMap::default();
    for (ix, notice) in notices.iter().enumerate() {
        latest.insert(key(notice), ix);
    }
    let keep: Vec<bool> = notices
        .iter()
        .enumerate()
        .map(|(ix, n)| latest.get(key(n)) == Some(&ix))
        .collect();

    let total = notices.len();
    let survivors: Vec<RawNotice> = notices
        .into_iter()
        .zip(keep)
        .filter_map(|(n, keep)| keep.then_some(n))
        .collect();
    let dropped = total - survivors.len();
    (survivors, dropped)
}
