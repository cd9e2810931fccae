//! Cache-aside affiliation → country resolution.
//!
//! Each distinct affiliation string is resolved at most once per call: the
//! cache is consulted first, the matcher only on a miss, and every string the
//! matcher resolved is written back after its batch, before the next batch
//! starts. Cache hits are never written back.

use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use pubsift_core::{WorkQueue, http_config};
use pubsift_core::record::CountrySet;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::cache::{AffiliationCache, CacheEntry};
use crate::matcher::{COUNTRY_STRATEGIES, CountryMatcher};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverConfig {
    /// Concurrent lookups per batch (1 = sequential)
    pub workers: usize,
    /// Strings per batch; write-back happens between batches
    pub batch_size: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            batch_size: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveStats {
    /// Distinct non-empty strings requested
    pub distinct: usize,
    pub cache_hits: usize,
    /// Resolved by the matcher and written back
    pub resolved: usize,
    /// Matcher failed; resolved to no country and not cached
    pub failed: usize,
}

/// Affiliation → countries for one call, plus counters.
#[derive(Debug, Default)]
pub struct Resolution {
    pub countries: FxHashMap<String, CountrySet>,
    pub stats: ResolveStats,
}

/// How one string was resolved.
#[derive(Debug)]
enum Lookup {
    Hit(CountrySet),
    Resolved(CountrySet),
    Failed,
}

pub struct Resolver<'a> {
    matcher: &'a dyn CountryMatcher,
    cache: &'a dyn AffiliationCache,
    config: ResolverConfig,
}

impl<'a> Resolver<'a> {
    pub fn new(
        matcher: &'a dyn CountryMatcher,
        cache: &'a dyn AffiliationCache,
        config: ResolverConfig,
    ) -> Self {
        Self {
            matcher,
            cache,
            config: ResolverConfig {
                workers: config.workers.max(1),
                batch_size: config.batch_size.max(1),
            },
        }
    }

    pub fn matcher(&self) -> &dyn CountryMatcher {
        self.matcher
    }

    /// Make sure the matcher answers; issue one warm-up when it does not.
    pub fn ensure_ready(&self) {
        if self.matcher.probe() {
            log::debug!("matcher seems healthy");
            return;
        }
        log::info!("matcher does not answer, asking it to load");
        if let Err(e) = self.matcher.warm_up() {
            log::warn!("matcher warm-up failed: {e}");
        }
    }

    /// Resolve every distinct non-empty string of `affiliations`.
    pub fn resolve<'s>(&self, affiliations: impl IntoIterator<Item = &'s str>) -> Resolution {
        let distinct = dedup(affiliations);
        let mut resolution = Resolution {
            countries: FxHashMap::default(),
            stats: ResolveStats {
                distinct: distinct.len(),
                ..Default::default()
            },
        };
        if distinct.is_empty() {
            return resolution;
        }
        log::debug!("{} distinct affiliations to resolve", distinct.len());
        self.ensure_ready();

        for batch in distinct.chunks(self.config.batch_size) {
            let lookups = self.lookup_batch(batch);

            let mut write_back = Vec::new();
            for (affiliation, lookup) in batch.iter().zip(lookups) {
                let countries = match lookup {
                    Lookup::Hit(countries) => {
                        resolution.stats.cache_hits += 1;
                        countries
                    }
                    Lookup::Resolved(countries) => {
                        resolution.stats.resolved += 1;
                        write_back.push(CacheEntry {
                            affiliation: affiliation.to_string(),
                            countries: countries.clone(),
                        });
                        countries
                    }
                    Lookup::Failed => {
                        resolution.stats.failed += 1;
                        CountrySet::new()
                    }
                };
                resolution.countries.insert(affiliation.to_string(), countries);
            }

            if let Err(e) = self.cache.insert_absent(&write_back) {
                log::warn!("cache write-back of {} entries failed: {e}", write_back.len());
            }
            log::debug!(
                "{} / {} affiliations resolved",
                resolution.countries.len(),
                distinct.len()
            );
        }
        resolution
    }

    /// Look up one batch, in input order.
    fn lookup_batch(&self, batch: &[&str]) -> Vec<Lookup> {
        if self.config.workers == 1 || batch.len() == 1 {
            return batch.iter().map(|a| self.lookup_one(a)).collect();
        }

        let queue = WorkQueue::new(batch.to_vec());
        let workers = self.config.workers.min(batch.len());
        // One output vector per worker; merged after the scope joins
        let slots: Vec<Mutex<Vec<(usize, Lookup)>>> =
            (0..workers).map(|_| Mutex::new(Vec::new())).collect();

        let stagger = http_config().stagger_ms;
        rayon::scope(|s| {
            for (w, slot) in slots.iter().enumerate() {
                let queue = &queue;
                s.spawn(move |_| {
                    if w > 0 && stagger > 0 {
                        thread::sleep(Duration::from_millis(stagger * w as u64));
                    }
                    let mut out = slot.lock().expect("worker thread panicked");
                    while let Some((i, affiliation)) = queue.next_indexed() {
                        out.push((i, self.lookup_one(affiliation)));
                    }
                });
            }
        });

        let mut ordered: Vec<Option<Lookup>> = (0..batch.len()).map(|_| None).collect();
        for slot in slots {
            for (i, lookup) in slot.into_inner().expect("worker thread panicked") {
                ordered[i] = Some(lookup);
            }
        }
        ordered
            .into_iter()
            .map(|l| l.unwrap_or(Lookup::Failed))
            .collect()
    }

    fn lookup_one(&self, affiliation: &str) -> Lookup {
        match self.cache.lookup(affiliation) {
            Ok(Some(countries)) => return Lookup::Hit(countries),
            Ok(None) => {}
            Err(e) => log::debug!("cache lookup failed for {affiliation:?}: {e}"),
        }
        match self.matcher.match_countries(affiliation, COUNTRY_STRATEGIES) {
            Ok(countries) => Lookup::Resolved(countries),
            Err(e) => {
                log::debug!("matcher failed for {affiliation:?}: {e}");
                Lookup::Failed
            }
        }
    }
}

/// Distinct non-empty strings in first-seen order (exact, case-sensitive).
fn dedup<'s>(affiliations: impl IntoIterator<Item = &'s str>) -> Vec<&'s str> {
    let mut seen = FxHashSet::default();
    affiliations
        .into_iter()
        .filter(|a| !a.is_empty() && seen.insert(*a))
        .collect()
}
