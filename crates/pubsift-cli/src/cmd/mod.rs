//! Subcommands: a sequential dispatch layer over the pipeline crates.

pub mod chunk;
pub mod export;
pub mod harvest;
pub mod medline;

use std::time::Duration;

use anyhow::Result;
use chrono::NaiveDate;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use pubsift_core::{RetryPolicy, SingleFlight};
use pubsift_geo::{AffiliationCache, ElasticCache, Enricher, MatcherClient, MemoryCache, Resolver};
use pubsift_store::{FsBlobStore, RetryingStore};

use crate::config::Config;

pub type Store = RetryingStore<FsBlobStore>;

/// Storage and enrichment handles shared by the subcommands.
pub struct Services {
    pub store: Store,
    matcher: Option<MatcherClient>,
    cache: Box<dyn AffiliationCache>,
}

impl Services {
    pub fn open(config: &Config) -> Self {
        let store = RetryingStore::new(
            FsBlobStore::new(&config.storage.root),
            RetryPolicy::from_http_config(),
        );
        let matcher = config
            .matcher
            .url
            .as_deref()
            .map(|url| MatcherClient::new(url, Duration::from_secs(config.matcher.timeout)));
        let cache: Box<dyn AffiliationCache> = match (&config.cache.url, config.cache.enabled) {
            (Some(url), true) => Box::new(ElasticCache::new(
                url,
                &config.cache.index,
                Duration::from_secs(config.cache.timeout),
            )),
            _ => {
                log::debug!("no affiliation cache configured, using an in-memory one");
                Box::new(MemoryCache::new())
            }
        };
        Self {
            store,
            matcher,
            cache,
        }
    }

    /// Enrichment chosen from the configuration: local resolution, the
    /// matcher's remote task, or none without a matcher.
    pub fn enricher(&self, config: &Config, workers: Option<usize>) -> Enricher<'_> {
        let Some(matcher) = &self.matcher else {
            log::warn!("no matcher configured, publications are not annotated");
            return Enricher::Disabled;
        };
        if config.matcher.remote_enrich {
            return Enricher::Remote {
                matcher,
                settings: config.enrich_settings(),
            };
        }
        Enricher::Local(Resolver::new(matcher, self.cache.as_ref(), config.resolver(workers)))
    }
}

/// Single-flight guard shared by every pubsift process on the same store.
/// `scope` separates the key spaces of the subcommands.
pub fn flights(config: &Config, scope: &str) -> SingleFlight {
    SingleFlight::with_lock_dir(config.storage.root.join("locks").join(scope))
}

/// Run `work` unless another run, in this process or another, holds `key`.
pub fn dispatch<T>(flights: &SingleFlight, key: &str, work: impl FnOnce() -> Result<T>) -> Option<Result<T>> {
    let Some(_guard) = flights.try_acquire(key) else {
        log::warn!("{key}: already running, skipped");
        return None;
    };
    Some(work())
}

pub fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("Invalid date format: {e}"))
}

/// Print a key-value summary table on stderr
pub fn print_summary(title: &str, rows: &[(&str, String)]) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new(title).fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);
    for (label, value) in rows {
        table.add_row(vec![Cell::new(label), Cell::new(value)]);
    }
    eprintln!("\n{table}");
}
