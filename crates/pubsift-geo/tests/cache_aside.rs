use std::sync::Mutex;

use pubsift_core::record::{Affiliation, Author, CountrySet};
use pubsift_core::Publication;
use pubsift_geo::matcher::{EnrichResult, Strategy};
use pubsift_geo::{
    AffiliationCache, CountryMatcher, FRENCH_TERRITORIES, MatcherError, MemoryCache, Resolver,
    ResolverConfig, TaskState, enrich_local,
};

/// Matcher that records every query it answers.
#[derive(Default)]
struct RecordingMatcher {
    queries: Mutex<Vec<String>>,
}

impl RecordingMatcher {
    fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

impl CountryMatcher for RecordingMatcher {
    fn probe(&self) -> bool {
        true
    }

    fn warm_up(&self) -> Result<(), MatcherError> {
        Ok(())
    }

    fn match_countries(&self, query: &str, _strategies: &[Strategy]) -> Result<CountrySet, MatcherError> {
        self.queries.lock().unwrap().push(query.to_string());
        let code = if query.contains("Guadeloupe") {
            "gp"
        } else if query.contains("Paris") {
            "fr"
        } else {
            "us"
        };
        Ok([code.to_string()].into())
    }

    fn submit_enrich(&self, _: &[Publication], _: &[String]) -> Result<String, MatcherError> {
        Err(MatcherError::Protocol("not used".into()))
    }

    fn task_status(&self, _: &str) -> Result<TaskState, MatcherError> {
        Ok(TaskState::Finished(Box::new(EnrichResult::default())))
    }
}

fn publication(pmid: &str, affiliations: &[&str]) -> Publication {
    let affs: Vec<Affiliation> = affiliations
        .iter()
        .map(|name| Affiliation {
            name: Some(name.to_string()),
            ..Default::default()
        })
        .collect();
    Publication {
        pmid: pmid.to_string(),
        url: format!("https://www.ncbi.nlm.nih.gov/pubmed/{pmid}"),
        publication_date: "2024-01-XX".into(),
        publication_year: "2024".into(),
        authors: vec![Author {
            author_position: 1,
            full_name: "A B".into(),
            affiliations: affs.clone(),
            ..Default::default()
        }],
        affiliations: affs,
        ..Default::default()
    }
}

fn french() -> Vec<String> {
    FRENCH_TERRITORIES.iter().map(|c| c.to_string()).collect()
}

#[test]
fn second_resolution_is_served_from_write_back() {
    let matcher = RecordingMatcher::default();
    let cache = MemoryCache::new();
    let resolver = Resolver::new(&matcher, &cache, ResolverConfig::default());

    let first = resolver.resolve(["Hopital Necker, Paris"]);
    assert_eq!(first.stats.resolved, 1);

    let second = resolver.resolve(["Hopital Necker, Paris"]);
    assert_eq!(second.stats.cache_hits, 1);
    assert_eq!(second.stats.resolved, 0);
    assert_eq!(matcher.queries(), vec!["Hopital Necker, Paris"]);
    assert_eq!(
        cache.lookup("Hopital Necker, Paris").unwrap(),
        Some(["fr".to_string()].into())
    );
}

#[test]
fn write_back_happens_between_batches() {
    let matcher = RecordingMatcher::default();
    let cache = MemoryCache::new();
    let resolver = Resolver::new(
        &matcher,
        &cache,
        ResolverConfig {
            workers: 2,
            batch_size: 2,
        },
    );
    let names = ["a Paris", "b Boston", "c Paris", "d Boston", "e Paris"];
    let res = resolver.resolve(names);
    assert_eq!(res.stats.resolved, 5);
    assert_eq!(cache.len(), 5);
    assert_eq!(matcher.queries().len(), 5);
}

#[test]
fn local_enrichment_filters_to_french_territories() {
    let matcher = RecordingMatcher::default();
    let cache = MemoryCache::new();
    let resolver = Resolver::new(&matcher, &cache, ResolverConfig::default());

    let pubs = vec![
        publication("1", &["Institut Pasteur, Paris"]),
        publication("2", &["Harvard, Boston"]),
        publication("3", &["CHU Guadeloupe", "Harvard, Boston"]),
    ];
    let out = enrich_local(&resolver, pubs, &french());

    assert_eq!(out.publications.len(), 3);
    let kept: Vec<&str> = out.filtered.iter().map(|p| p.pmid.as_str()).collect();
    assert_eq!(kept, vec!["1", "3"]);
    // "Harvard, Boston" appears twice but is matched once
    assert_eq!(matcher.queries().len(), 3);
    for p in &out.publications {
        assert!(p.validate().is_ok());
    }
}
