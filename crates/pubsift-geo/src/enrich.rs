//! Enrichment entry points: local (resolver + filter) or delegated to the
//! matcher's remote annotate-and-filter task.

use std::time::Duration;

use pubsift_core::{PollOutcome, Publication, poll_until};
use rustc_hash::FxHashMap;

use crate::filter::{FilterOutput, filter_by_country};
use crate::matcher::{CountryMatcher, TaskState};
use crate::resolver::Resolver;

/// Polling of a remote enrich task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnrichSettings {
    pub poll_interval: Duration,
    pub deadline: Duration,
}

impl Default for EnrichSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            deadline: Duration::from_secs(3600),
        }
    }
}

/// How a batch of parsed publications gets its countries.
pub enum Enricher<'a> {
    /// Cache-aside resolution in this process
    Local(Resolver<'a>),
    /// Delegated to the matcher's annotate-and-filter task
    Remote {
        matcher: &'a dyn CountryMatcher,
        settings: EnrichSettings,
    },
    /// No annotation; only an empty allow-list keeps anything
    Disabled,
}

impl Enricher<'_> {
    pub fn apply(&self, publications: Vec<Publication>, countries_to_keep: &[String]) -> FilterOutput {
        match self {
            Self::Local(resolver) => enrich_local(resolver, publications, countries_to_keep),
            Self::Remote { matcher, settings } => {
                enrich_remote(*matcher, publications, countries_to_keep, *settings)
            }
            Self::Disabled => filter_by_country(publications, &FxHashMap::default(), countries_to_keep),
        }
    }
}

/// Resolve every affiliation of `publications` through the cache-aside
/// resolver, then annotate and filter.
pub fn enrich_local(
    resolver: &Resolver<'_>,
    publications: Vec<Publication>,
    countries_to_keep: &[String],
) -> FilterOutput {
    let resolution = resolver.resolve(publications.iter().flat_map(|p| p.affiliation_names()));
    let stats = resolution.stats;
    log::debug!(
        "affiliations: {} distinct, {} cached, {} resolved, {} failed",
        stats.distinct,
        stats.cache_hits,
        stats.resolved,
        stats.failed
    );
    filter_by_country(publications, &resolution.countries, countries_to_keep)
}

/// Submit `publications` to the matcher's enrich task and wait for the result.
///
/// Fails open: a rejected submission, failed task, unknown status or
/// deadline returns the publications unannotated with an empty filtered set.
pub fn enrich_remote(
    matcher: &dyn CountryMatcher,
    publications: Vec<Publication>,
    countries_to_keep: &[String],
    settings: EnrichSettings,
) -> FilterOutput {
    let fail_open = |publications: Vec<Publication>| FilterOutput {
        publications,
        filtered: Vec::new(),
    };

    let task_id = match matcher.submit_enrich(&publications, countries_to_keep) {
        Ok(id) => id,
        Err(e) => {
            log::error!("enrich submission failed: {e}");
            return fail_open(publications);
        }
    };
    log::debug!("new matcher task {task_id}");

    let outcome = poll_until(settings.deadline, settings.poll_interval, || {
        match matcher.task_status(&task_id) {
            Ok(state) if state.is_pending() => None,
            Ok(TaskState::Finished(result)) => Some(Ok(result)),
            Ok(TaskState::Failed(reason)) => Some(Err(reason)),
            Ok(_) => None,
            Err(e) => Some(Err(e.to_string())),
        }
    });

    match outcome {
        PollOutcome::Ready(Ok(result)) => FilterOutput {
            publications: result.publications,
            filtered: result.filtered_publications,
        },
        PollOutcome::Ready(Err(reason)) => {
            log::error!("matcher task {task_id} failed: {reason}");
            fail_open(publications)
        }
        PollOutcome::TimedOut => {
            log::error!("matcher task {task_id} still running after {:?}", settings.deadline);
            fail_open(publications)
        }
        PollOutcome::Cancelled => {
            log::warn!("shutdown requested while waiting for matcher task {task_id}");
            fail_open(publications)
        }
    }
}
