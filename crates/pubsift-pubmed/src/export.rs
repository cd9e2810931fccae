//! Export of every parsed publication of a container to Parquet shards.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use pubsift_core::{ParquetSink, cleanup_tmp_files, fmt_num, is_shutdown_requested};
use pubsift_store::{BlobStore, get_objects, list_all};

use crate::chunks::ProcessedRecord;
use crate::config::ExportConfig;
use crate::schema;
use crate::transform::PublicationAccumulator;

const PARSED_PREFIX: &str = "parsed/";

/// Which parsed documents to export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportScope<'a> {
    /// Every parsed document outside the regional subset
    All { region: &'a str },
    /// Only the regional subset
    Region(&'a str),
}

impl ExportScope<'_> {
    fn dataset(&self) -> String {
        match self {
            Self::All { .. } => "publications".to_string(),
            Self::Region(region) => format!("publications_{region}"),
        }
    }

    /// Names of the parsed documents in scope, sorted.
    fn select(&self, names: Vec<String>) -> Vec<String> {
        match self {
            Self::All { region } => {
                let subset = format!("{PARSED_PREFIX}{region}/");
                names.into_iter().filter(|n| !n.starts_with(&subset)).collect()
            }
            Self::Region(_) => names,
        }
    }

    fn prefix(&self) -> String {
        match self {
            Self::All { .. } => PARSED_PREFIX.to_string(),
            Self::Region(region) => format!("{PARSED_PREFIX}{region}/"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSummary {
    /// Parsed documents read
    pub documents: usize,
    pub publications: usize,
    /// Skipped-identifier entries of processed chunks
    pub skipped: usize,
    pub files: Vec<PathBuf>,
}

/// Concatenate the parsed documents of `container` into
/// `{dataset}_NNNN.parquet` files of at most `shard_rows` rows.
///
/// Shards of a previous export of the same dataset are replaced.
pub fn export(
    store: &dyn BlobStore,
    container: &str,
    scope: ExportScope<'_>,
    config: &ExportConfig,
) -> Result<ExportSummary> {
    let output_dir = config.output_dir.as_path();
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;
    cleanup_tmp_files(output_dir)?;
    let dataset = scope.dataset();
    remove_shards(output_dir, &dataset)?;

    let names = list_all(store, container, &scope.prefix())
        .with_context(|| format!("Failed to list parsed documents of {container}"))?;
    let names = scope.select(names);
    log::info!("{container}: exporting {} parsed documents", fmt_num(names.len()));

    let schema = schema::publications();
    let shard_rows = config.shard_rows.max(1);
    let mut summary = ExportSummary::default();
    let mut acc = PublicationAccumulator::new();
    let mut sink: Option<ParquetSink> = None;

    for name in &names {
        if is_shutdown_requested() {
            anyhow::bail!("export interrupted after {} documents", summary.documents);
        }
        let records: Vec<ProcessedRecord> = get_objects(store, container, name)
            .with_context(|| format!("Failed to load {name}"))?;
        summary.documents += 1;

        for record in records {
            let Some(publication) = record.into_publication() else {
                summary.skipped += 1;
                continue;
            };
            acc.push(publication);
            summary.publications += 1;

            let shard_full = sink.as_ref().map_or(0, ParquetSink::row_count) + acc.len() >= shard_rows;
            if acc.is_full() || shard_full {
                if sink.is_none() {
                    sink = Some(ParquetSink::new(
                        &dataset,
                        summary.files.len(),
                        output_dir,
                        schema,
                        config.zstd_level,
                    )?);
                }
                if let Some(active) = sink.as_mut() {
                    active.write_batch(&acc.take_batch()?)?;
                }
                if shard_full {
                    if let Some(done) = sink.take() {
                        summary.files.push(done.final_path().to_path_buf());
                        done.finalize()?;
                    }
                }
            }
        }
    }

    if !acc.is_empty() {
        let mut last = match sink.take() {
            Some(active) => active,
            None => ParquetSink::new(&dataset, summary.files.len(), output_dir, schema, config.zstd_level)?,
        };
        last.write_batch(&acc.take_batch()?)?;
        sink = Some(last);
    }
    if let Some(done) = sink.take() {
        summary.files.push(done.final_path().to_path_buf());
        done.finalize()?;
    }

    log::info!(
        "{container}: {} publications in {} files",
        fmt_num(summary.publications),
        summary.files.len()
    );
    Ok(summary)
}

/// Delete `{dataset}_NNNN.parquet` files.
fn remove_shards(output_dir: &Path, dataset: &str) -> Result<()> {
    let prefix = format!("{dataset}_");
    for entry in fs::read_dir(output_dir)? {
        let path = entry?.path();
        let is_shard = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(&prefix))
            .and_then(|rest| rest.strip_suffix(".parquet"))
            .is_some_and(|index| !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()));
        if is_shard {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}
