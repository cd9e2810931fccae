//! `pubsift chunk` - process one stored bulk chunk

use std::time::Duration;

use anyhow::Result;
use clap::Args;

use pubsift_core::fmt_num;
use pubsift_pubmed::{ChunkProcessor, MedlineFtp, Scheduler};

use super::{Services, dispatch, flights, print_summary};
use super::medline::chunk_key;
use crate::config::Config;

#[derive(Args, Debug)]
pub struct ChunkArgs {
    /// Bulk file key, e.g. pubmed24n1300
    pub file_key: String,

    /// Chunk index within the file
    pub index: usize,

    /// Concurrent affiliation lookups
    #[arg(short, long)]
    pub workers: Option<usize>,
}

pub fn run(args: ChunkArgs, config: &Config) -> Result<()> {
    let services = Services::open(config);
    let source = MedlineFtp::new(
        &config.medline.base_url,
        Duration::from_secs(config.medline.listing_timeout),
    );
    let scheduler = Scheduler::new(&source, &services.store, config.bulk());
    let eligible = scheduler.eligible_ids(&args.file_key, args.index)?;
    log::info!(
        "{}_{}: {} eligible notices",
        args.file_key,
        args.index,
        fmt_num(eligible.len())
    );

    let enricher = services.enricher(config, args.workers);
    let region = config.region();
    let processor = ChunkProcessor::new(
        &services.store,
        &config.storage.medline_container,
        &enricher,
        &region,
    );
    let key = chunk_key(&args.file_key, args.index);
    let Some(report) = dispatch(&flights(config, "medline"), &key, || {
        processor.process_chunk(&args.file_key, args.index, &eligible)
    }) else {
        anyhow::bail!("{key} is being processed by another run");
    };
    let report = report?;

    print_summary(
        "Chunk",
        &[
            ("File", report.file_key.clone()),
            ("Index", report.index.to_string()),
            ("Eligible", fmt_num(report.eligible)),
            (
                "Parsed",
                format!(
                    "{} ({} skipped, {} invalid)",
                    fmt_num(report.parsed),
                    fmt_num(report.skipped),
                    fmt_num(report.invalid)
                ),
            ),
            ("Kept", format!("{} in {}", fmt_num(report.kept), region.name)),
        ],
    );
    Ok(())
}
