//! Parse one harvested date partition into publications and its regional subset.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use pubsift_core::Publication;
use pubsift_geo::Enricher;
use pubsift_store::objects::paths;
use pubsift_store::{RawNotice, get_objects, put_objects};

use crate::config::RegionConfig;
use crate::harvest::Synchronizer;
use crate::parser::{ParsedBatch, parse_batch};

/// What one partition parse did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionReport {
    pub partition: Option<NaiveDate>,
    pub notices: usize,
    pub parsed: usize,
    pub skipped: usize,
    /// Parsed records failing validation (stored anyway)
    pub invalid: usize,
    /// Publications in the regional subset
    pub kept: usize,
    /// A malformed record forced a full resync
    pub resynced: bool,
}

/// Parse, validate, enrich and store one partition.
///
/// The first malformed notice triggers a single full resync of the
/// partition; parsing then restarts and keeps going past malformed notices.
pub fn parse_partition(
    sync: &Synchronizer<'_>,
    enricher: &Enricher<'_>,
    region: &RegionConfig,
    partition: NaiveDate,
) -> Result<PartitionReport> {
    let store = sync.store();
    let container = sync.container();
    let mut report = PartitionReport {
        partition: Some(partition),
        ..Default::default()
    };

    let batch: ParsedBatch = loop {
        let notices: Vec<RawNotice> = get_objects(store, container, &paths::notices(partition))
            .with_context(|| format!("Failed to load notices of {partition}"))?;
        report.notices = notices.len();

        match parse_batch(&notices, !report.resynced) {
            Ok(batch) => break batch,
            Err(outcome) => {
                log::warn!(
                    "{partition}: malformed notice {}, resyncing the partition",
                    outcome.skipped_pmid().unwrap_or("?")
                );
                sync.sync_partition(partition, true)
                    .with_context(|| format!("Resync of {partition} failed"))?;
                report.resynced = true;
            }
        }
    };
    report.parsed = batch.publications.len();
    report.skipped = batch.skipped.len();
    report.invalid = count_invalid(&batch.publications);

    let output = enricher.apply(batch.publications, &region.countries);
    report.kept = output.filtered.len();

    put_objects(store, container, &paths::parsed(partition, None), &output.publications)
        .with_context(|| format!("Failed to store parsed publications of {partition}"))?;
    put_objects(
        store,
        container,
        &paths::parsed(partition, Some(&region.name)),
        &output.filtered,
    )
    .with_context(|| format!("Failed to store {} subset of {partition}", region.name))?;

    log::info!(
        "{partition}: {} parsed, {} skipped, {} in {}",
        report.parsed,
        report.skipped,
        report.kept,
        region.name
    );
    Ok(report)
}

/// Log every record failing validation and return how many did.
pub(crate) fn count_invalid(publications: &[Publication]) -> usize {
    publications
        .iter()
        .filter(|p| match p.validate() {
            Ok(()) => false,
            Err(e) => {
                log::warn!("pmid {}: invalid record: {e}", p.pmid);
                true
            }
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pubsift_core::record::Author;

    #[test]
    fn invalid_records_are_counted() {
        let good = Publication {
            pmid: "1".into(),
            url: "https://www.ncbi.nlm.nih.gov/pubmed/1".into(),
            publication_date: "2020-01-XX".into(),
            publication_year: "2020".into(),
            ..Default::default()
        };
        let bad = Publication {
            authors: vec![Author {
                author_position: 2,
                full_name: "A".into(),
                ..Default::default()
            }],
            ..good.clone()
        };
        assert_eq!(count_invalid(&[good.clone(), bad, good]), 1);
    }
}
