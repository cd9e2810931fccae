//! Chunk fan-out of bulk files
//!
//! A bulk file is downloaded once and stored as fixed-size chunks
//! (`notices/{file}_{k}`) plus its deletion list (`removed/{file}`). Planning
//! walks the files newest first, probes the stored chunks and decides which
//! need (re)processing by comparing the processed output with the number of
//! eligible notices.

use anyhow::{Context, Result};
use pubsift_core::{Publication, is_shutdown_requested};
use pubsift_geo::Enricher;
use pubsift_store::objects::{RemovedId, decode_objects, paths};
use pubsift_store::{BlobStore, RawNotice, Tombstones, get_objects, put_objects};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::config::{BulkConfig, RegionConfig};
use crate::medline::{BulkFile, BulkSource};
use crate::parser::parse_batch;
use crate::partition::count_invalid;

/// State of one stored chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkDescriptor {
    pub file_key: String,
    pub index: usize,
    /// Eligible notices of the chunk
    pub raw_count: usize,
    /// Records in the processed output (publications and skipped ids)
    pub processed_count: usize,
    pub needs_processing: bool,
    /// Eligible identifiers, kept only for chunks needing processing
    pub eligible: Vec<String>,
}

impl ChunkDescriptor {
    pub fn is_complete(&self) -> bool {
        self.processed_count == self.raw_count
    }
}

/// Which identifiers a chunk may still contribute.
///
/// Chunks must be admitted newest first: an identifier belongs to the newest
/// chunk carrying it and never to a removed one.
#[derive(Debug, Clone, Default)]
pub struct Eligibility {
    removed: Tombstones,
    seen: FxHashSet<String>,
}

impl Eligibility {
    pub fn new(removed: Tombstones) -> Self {
        Self {
            removed,
            seen: FxHashSet::default(),
        }
    }

    pub fn remove(&mut self, ids: impl IntoIterator<Item = String>) {
        self.removed.extend(ids);
    }

    /// Eligible identifiers of `notices`, which are then seen.
    pub fn admit(&mut self, notices: &[RawNotice]) -> Vec<String> {
        notices
            .iter()
            .filter(|n| !n.pmid.is_empty() && !self.removed.contains(&n.pmid))
            .filter(|n| self.seen.insert(n.pmid.clone()))
            .map(|n| n.pmid.clone())
            .collect()
    }

    pub fn seen(&self) -> usize {
        self.seen.len()
    }
}

/// Planned chunks of one bulk file.
#[derive(Debug, Clone)]
pub struct SourcePlan {
    pub file: BulkFile,
    /// Downloaded and split during this planning
    pub materialized: bool,
    /// Download or split error; the file has no chunks this run
    pub failed: Option<String>,
    pub chunks: Vec<ChunkDescriptor>,
}

impl SourcePlan {
    pub fn pending(&self) -> impl Iterator<Item = &ChunkDescriptor> {
        self.chunks.iter().filter(|c| c.needs_processing)
    }
}

pub struct Scheduler<'a> {
    source: &'a dyn BulkSource,
    store: &'a dyn BlobStore,
    config: BulkConfig,
}

impl<'a> Scheduler<'a> {
    pub fn new(source: &'a dyn BulkSource, store: &'a dyn BlobStore, config: BulkConfig) -> Self {
        Self { source, store, config }
    }

    pub fn config(&self) -> &BulkConfig {
        &self.config
    }

    /// Union of every stored deletion list.
    pub fn tombstones(&self) -> Result<Tombstones> {
        Tombstones::load(self.store, &self.config.container).context("Failed to load deletion lists")
    }

    /// Download `file` and store its deletion list and chunks.
    ///
    /// Chunk 0 is written last: its presence marks the file as materialized.
    /// Returns the number of chunks and the deleted identifiers.
    pub fn materialize(&self, file: &BulkFile) -> Result<(usize, Vec<String>)> {
        let container = self.config.container.as_str();
        let dump = self.source.download(file)?;
        log::info!(
            "{}: {} articles, {} deletions",
            file.key,
            dump.notices.len(),
            dump.deleted.len()
        );

        if !dump.deleted.is_empty() {
            let removed: Vec<RemovedId> = dump.deleted.iter().map(|pmid| RemovedId { pmid: pmid.clone() }).collect();
            put_objects(self.store, container, &paths::removed(&file.key), &removed)
                .with_context(|| format!("Failed to store deletion list of {}", file.key))?;
        }

        let empty: &[RawNotice] = &[];
        let chunks: Vec<&[RawNotice]> = if dump.notices.is_empty() {
            vec![empty]
        } else {
            dump.notices.chunks(self.config.chunk_size.max(1)).collect()
        };
        for (index, chunk) in chunks.iter().enumerate().rev() {
            put_objects(self.store, container, &paths::chunk(&file.key, index), chunk)
                .with_context(|| format!("Failed to store chunk {index} of {}", file.key))?;
        }
        Ok((chunks.len(), dump.deleted))
    }

    /// Stored notices of every chunk of `file_key`, in index order.
    /// Probing stops at the first missing chunk.
    fn probe_chunks(&self, file_key: &str) -> Result<Vec<Vec<RawNotice>>> {
        let container = self.config.container.as_str();
        let mut chunks = Vec::new();
        for index in 0..self.config.max_chunks {
            let path = paths::chunk(file_key, index);
            let Some(bytes) = self.store.get(container, &path)? else {
                break;
            };
            let notices = decode_objects(&path, &bytes).unwrap_or_else(|e| {
                log::warn!("{container}: {e}, treating as empty");
                Vec::new()
            });
            chunks.push(notices);
        }
        Ok(chunks)
    }

    fn processed_count(&self, file_key: &str, index: usize) -> Result<usize> {
        let records: Vec<serde::de::IgnoredAny> =
            get_objects(self.store, &self.config.container, &paths::processed(file_key, index, None))?;
        Ok(records.len())
    }

    /// Materialize `file` if needed and decide which of its chunks to process.
    ///
    /// A failed download yields a plan with `failed` set and no chunks; the
    /// file is retried on the next run. Store errors are returned.
    pub fn plan_source(&self, file: &BulkFile, eligibility: &mut Eligibility) -> Result<SourcePlan> {
        let container = self.config.container.as_str();
        let missing = self.store.get(container, &paths::chunk(&file.key, 0))?.is_none();
        if missing {
            match self.materialize(file) {
                Ok((count, deleted)) => {
                    log::debug!("{}: split into {count} chunks", file.key);
                    eligibility.remove(deleted);
                }
                Err(e) => {
                    log::error!("{}: {e:#}, skipped", file.key);
                    return Ok(SourcePlan {
                        file: file.clone(),
                        materialized: false,
                        failed: Some(format!("{e:#}")),
                        chunks: Vec::new(),
                    });
                }
            }
        }

        let mut chunks = Vec::new();
        for (index, notices) in self.probe_chunks(&file.key)?.into_iter().enumerate() {
            let eligible = eligibility.admit(&notices);
            let processed_count = self.processed_count(&file.key, index)?;
            chunks.push(ChunkDescriptor {
                file_key: file.key.clone(),
                index,
                raw_count: eligible.len(),
                processed_count,
                needs_processing: false,
                eligible,
            });
        }

        let last_incomplete = chunks.last().is_some_and(|c| !c.is_complete());
        for chunk in &mut chunks {
            chunk.needs_processing = chunk.raw_count > 0 && (last_incomplete || !chunk.is_complete());
            if !chunk.needs_processing {
                chunk.eligible = Vec::new();
            }
        }

        let plan = SourcePlan {
            file: file.clone(),
            materialized: missing,
            failed: None,
            chunks,
        };
        log::debug!(
            "{}: {} chunks, {} to process",
            file.key,
            plan.chunks.len(),
            plan.pending().count()
        );
        Ok(plan)
    }

    /// Plan the newest `limit` files (all when `None`). A file that cannot be
    /// downloaded does not stop the others.
    pub fn plan_all(&self, limit: Option<usize>) -> Result<Vec<SourcePlan>> {
        let files = self.source.list_files().context("Failed to list bulk files")?;
        let mut eligibility = Eligibility::new(self.tombstones()?);
        let mut plans = Vec::new();
        for file in files.iter().take(limit.unwrap_or(usize::MAX)) {
            if is_shutdown_requested() {
                log::warn!("shutdown requested, planned {} files", plans.len());
                break;
            }
            plans.push(self.plan_source(file, &mut eligibility)?);
        }
        Ok(plans)
    }

    /// Eligible identifiers of one stored chunk, admitting every newer chunk
    /// first. Nothing is downloaded.
    pub fn eligible_ids(&self, file_key: &str, index: usize) -> Result<Vec<String>> {
        let files = self.source.list_files().context("Failed to list bulk files")?;
        if !files.iter().any(|f| f.key == file_key) {
            anyhow::bail!("unknown bulk file {file_key}");
        }
        let mut eligibility = Eligibility::new(self.tombstones()?);
        for file in &files {
            for (k, notices) in self.probe_chunks(&file.key)?.into_iter().enumerate() {
                let eligible = eligibility.admit(&notices);
                if file.key == file_key && k == index {
                    return Ok(eligible);
                }
            }
            if file.key == file_key {
                break;
            }
        }
        anyhow::bail!("chunk {index} of {file_key} is not stored")
    }
}

/// One entry of a processed chunk document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProcessedRecord {
    Skipped { pmid: String, skipped: bool },
    Publication(Box<Publication>),
}

impl ProcessedRecord {
    pub fn into_publication(self) -> Option<Publication> {
        match self {
            Self::Publication(p) => Some(*p),
            Self::Skipped { .. } => None,
        }
    }
}

/// What processing one chunk did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkReport {
    pub file_key: String,
    pub index: usize,
    pub eligible: usize,
    pub parsed: usize,
    pub skipped: usize,
    pub invalid: usize,
    pub kept: usize,
}

/// Parses, enriches and stores chunks.
pub struct ChunkProcessor<'a> {
    store: &'a dyn BlobStore,
    container: &'a str,
    enricher: &'a Enricher<'a>,
    region: &'a RegionConfig,
}

impl<'a> ChunkProcessor<'a> {
    pub fn new(
        store: &'a dyn BlobStore,
        container: &'a str,
        enricher: &'a Enricher<'a>,
        region: &'a RegionConfig,
    ) -> Self {
        Self {
            store,
            container,
            enricher,
            region,
        }
    }

    /// Process the `eligible` notices of chunk `index`, overwriting any
    /// previous output.
    pub fn process_chunk(&self, file_key: &str, index: usize, eligible: &[String]) -> Result<ChunkReport> {
        let notices: Vec<RawNotice> = get_objects(self.store, self.container, &paths::chunk(file_key, index))
            .with_context(|| format!("Failed to load chunk {index} of {file_key}"))?;
        let wanted: FxHashSet<&str> = eligible.iter().map(String::as_str).collect();
        let mut taken: FxHashSet<&str> = FxHashSet::default();
        let selected = notices
            .iter()
            .filter(|n| wanted.contains(n.pmid.as_str()) && taken.insert(n.pmid.as_str()));

        let batch = match parse_batch(selected, false) {
            Ok(batch) => batch,
            Err(outcome) => anyhow::bail!("unexpected parse outcome {outcome:?}"),
        };
        let mut report = ChunkReport {
            file_key: file_key.to_string(),
            index,
            eligible: eligible.len(),
            parsed: batch.publications.len(),
            skipped: batch.skipped.len(),
            invalid: count_invalid(&batch.publications),
            kept: 0,
        };

        let output = self.enricher.apply(batch.publications, &self.region.countries);
        report.kept = output.filtered.len();

        let records: Vec<ProcessedRecord> = output
            .publications
            .into_iter()
            .map(|p| ProcessedRecord::Publication(Box::new(p)))
            .chain(
                batch
                    .skipped
                    .into_iter()
                    .map(|pmid| ProcessedRecord::Skipped { pmid, skipped: true }),
            )
            .collect();
        put_objects(self.store, self.container, &paths::processed(file_key, index, None), &records)
            .with_context(|| format!("Failed to store processed chunk {index} of {file_key}"))?;
        put_objects(
            self.store,
            self.container,
            &paths::processed(file_key, index, Some(&self.region.name)),
            &output.filtered,
        )
        .with_context(|| format!("Failed to store {} subset of chunk {index} of {file_key}", self.region.name))?;

        log::info!(
            "{file_key}_{index}: {} parsed, {} skipped, {} in {}",
            report.parsed,
            report.skipped,
            report.kept,
            self.region.name
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eligibility_prefers_newest_and_skips_removed() {
        let removed: Tombstones = ["3".to_string()].into_iter().collect();
        let mut eligibility = Eligibility::new(removed);

        let newer = vec![RawNotice::new("1", "a"), RawNotice::new("3", "c")];
        let older = vec![RawNotice::new("1", "a0"), RawNotice::new("2", "b"), RawNotice::new("2", "b")];
        assert_eq!(eligibility.admit(&newer), vec!["1"]);
        assert_eq!(eligibility.admit(&older), vec!["2"]);
        assert_eq!(eligibility.seen(), 2);
    }

    #[test]
    fn processed_record_wire_format() {
        let skipped = ProcessedRecord::Skipped {
            pmid: "9".into(),
            skipped: true,
        };
        assert_eq!(
            serde_json::to_string(&skipped).unwrap(),
            r#"{"pmid":"9","skipped":true}"#
        );

        let publication = Publication {
            pmid: "1".into(),
            url: "u".into(),
            publication_date: "2020-XX-XX".into(),
            publication_year: "2020".into(),
            ..Default::default()
        };
        let json = serde_json::to_string(&ProcessedRecord::Publication(Box::new(publication.clone()))).unwrap();
        let back: ProcessedRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.into_publication(), Some(publication));

        let back: ProcessedRecord = serde_json::from_str(r#"{"pmid":"9","skipped":true}"#).unwrap();
        assert_eq!(back, skipped);
    }

    #[test]
    fn completeness() {
        let chunk = ChunkDescriptor {
            raw_count: 1000,
            processed_count: 400,
            ..Default::default()
        };
        assert!(!chunk.is_complete());
    }
}
