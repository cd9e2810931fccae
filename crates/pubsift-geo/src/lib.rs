//! Geographic enrichment of publications from free-text affiliations
//!
//! Affiliation strings are resolved to country codes through a cache-aside
//! layer in front of an external matcher service, then each publication
//! is annotated with the union of its affiliations' countries and filtered
//! against an allow-list.

pub mod cache;
pub mod countries;
pub mod enrich;
pub mod filter;
pub mod matcher;
pub mod resolver;

pub use cache::{AffiliationCache, CacheEntry, CacheError, ElasticCache, MemoryCache};
pub use countries::FRENCH_TERRITORIES;
pub use enrich::{EnrichSettings, Enricher, enrich_local, enrich_remote};
pub use filter::{FilterOutput, annotate, filter_by_country};
pub use matcher::{COUNTRY_STRATEGIES, CountryMatcher, MatcherClient, MatcherError, TaskState};
pub use resolver::{Resolution, ResolveStats, Resolver, ResolverConfig};
