//! `pubsift medline` - bulk file fan-out and chunk processing

use std::time::Duration;

use anyhow::Result;
use clap::Args;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use pubsift_core::{SharedProgress, fmt_num, is_shutdown_requested};
use pubsift_pubmed::{ChunkDescriptor, ChunkProcessor, MedlineFtp, Scheduler, SourcePlan};

use super::{Services, dispatch, flights, print_summary};
use crate::config::Config;

#[derive(Args, Debug)]
pub struct MedlineArgs {
    /// Only the newest N bulk files
    #[arg(short = 'l', long)]
    pub limit: Option<usize>,

    /// Concurrent affiliation lookups
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Plan only: show chunks that need processing
    #[arg(long)]
    pub dry_run: bool,
}

/// Single-flight key of one chunk.
pub fn chunk_key(file_key: &str, index: usize) -> String {
    format!("{file_key}_{index}")
}

pub fn run(args: MedlineArgs, config: &Config, progress: &SharedProgress) -> Result<()> {
    let services = Services::open(config);
    let source = MedlineFtp::new(
        &config.medline.base_url,
        Duration::from_secs(config.medline.listing_timeout),
    );
    let scheduler = Scheduler::new(&source, &services.store, config.bulk());

    let spinner = progress.stage_line("medline");
    spinner.set_message("planning bulk files");
    let plans = scheduler.plan_all(args.limit)?;
    spinner.finish_and_clear();

    let pending: Vec<&ChunkDescriptor> = plans.iter().flat_map(|p| p.pending()).collect();
    let broken_files = plans.iter().filter(|p| p.failed.is_some()).count();
    if args.dry_run {
        print_plan(&plans, progress);
        return Ok(());
    }

    let enricher = services.enricher(config, args.workers);
    let region = config.region();
    let processor = ChunkProcessor::new(
        &services.store,
        &config.storage.medline_container,
        &enricher,
        &region,
    );

    let flights = flights(config, "medline");
    let bar = progress.unit_bar("chunks", pending.len() as u64);
    let (mut done, mut failed, mut parsed, mut skipped, mut kept) = (0usize, 0usize, 0, 0, 0);

    for chunk in &pending {
        if is_shutdown_requested() {
            log::warn!("shutdown requested, {done} chunks processed");
            break;
        }
        let key = chunk_key(&chunk.file_key, chunk.index);
        bar.set_message(key.clone());
        let outcome = dispatch(&flights, &key, || {
            processor.process_chunk(&chunk.file_key, chunk.index, &chunk.eligible)
        });
        match outcome {
            Some(Ok(report)) => {
                done += 1;
                parsed += report.parsed;
                skipped += report.skipped;
                kept += report.kept;
            }
            Some(Err(e)) => {
                log::error!("{key}: {e:#}");
                failed += 1;
            }
            None => {}
        }
        bar.inc(1);
    }
    bar.finish_and_clear();

    print_summary(
        "MEDLINE",
        &[
            (
                "Files",
                format!("{} ({broken_files} failed)", plans.len()),
            ),
            (
                "Chunks",
                format!("{done}/{} ({failed} failed)", pending.len()),
            ),
            (
                "Parsed",
                format!("{} ({} skipped)", fmt_num(parsed), fmt_num(skipped)),
            ),
            ("Kept", format!("{} in {}", fmt_num(kept), region.name)),
        ],
    );

    if failed > 0 || broken_files > 0 {
        anyhow::bail!("{failed} chunk(s) and {broken_files} file(s) failed");
    }
    Ok(())
}

/// One row per planned file.
fn print_plan(plans: &[SourcePlan], progress: &SharedProgress) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(
            ["File", "Chunks", "Pending", "Eligible", "Processed", "Error"]
                .map(|h| Cell::new(h).fg(Color::Cyan)),
        );
    for plan in plans {
        let raw: usize = plan.chunks.iter().map(|c| c.raw_count).sum();
        let processed: usize = plan.chunks.iter().map(|c| c.processed_count).sum();
        table.add_row(vec![
            plan.file.key.clone(),
            plan.chunks.len().to_string(),
            plan.pending().count().to_string(),
            fmt_num(raw),
            fmt_num(processed),
            plan.failed.clone().unwrap_or_default(),
        ]);
    }
    progress.println(format!("\n{table}"));
}
