//! Publication Country Filter: annotate affiliations with countries and keep
//! publications linked to an allow-listed country.

use pubsift_core::Publication;
use pubsift_core::record::{Affiliation, CountrySet};
use rustc_hash::FxHashMap;

/// All publications, annotated, and the subset matching the allow-list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterOutput {
    pub publications: Vec<Publication>,
    pub filtered: Vec<Publication>,
}

/// Set `detected_countries` on every affiliation occurrence (publication-level
/// and per author) and on each publication as the union of its affiliations.
///
/// Affiliations without a resolved name are left untouched.
pub fn annotate(publications: &mut [Publication], resolved: &FxHashMap<String, CountrySet>) {
    for publication in publications {
        let mut union = CountrySet::new();
        let mut tag = |affiliation: &mut Affiliation| {
            let Some(countries) = affiliation.name.as_deref().and_then(|n| resolved.get(n)) else {
                return;
            };
            affiliation.detected_countries = countries.clone();
            union.extend(countries.iter().cloned());
        };
        publication.affiliations.iter_mut().for_each(&mut tag);
        for author in &mut publication.authors {
            author.affiliations.iter_mut().for_each(&mut tag);
        }
        publication.detected_countries = union;
    }
}

/// Annotate `publications` and split out those whose countries intersect
/// `countries_to_keep`. An empty allow-list keeps everything.
pub fn filter_by_country(
    mut publications: Vec<Publication>,
    resolved: &FxHashMap<String, CountrySet>,
    countries_to_keep: &[String],
) -> FilterOutput {
    annotate(&mut publications, resolved);
    let filtered: Vec<Publication> = if countries_to_keep.is_empty() {
        publications.clone()
    } else {
        publications
            .iter()
            .filter(|p| countries_to_keep.iter().any(|c| p.detected_countries.contains(c)))
            .cloned()
            .collect()
    };
    log::debug!(
        "{} / {} publications kept by country filter",
        filtered.len(),
        publications.len()
    );
    FilterOutput {
        publications,
        filtered,
    }
}
