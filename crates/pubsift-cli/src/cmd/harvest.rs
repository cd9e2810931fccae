//! `pubsift harvest` - incremental E-utilities harvest and partition parse

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, ValueEnum};

use pubsift_core::{SharedProgress, fmt_num, is_shutdown_requested};
use pubsift_pubmed::{EutilsFeed, Synchronizer, parse_partition};
use pubsift_store::Tombstones;

use super::{Services, dispatch, flights, parse_date, print_summary};
use crate::config::Config;

/// First partition of an interval harvest without `--start`
const DEFAULT_START: (i32, u32, u32) = (2013, 1, 1);

#[derive(Args, Debug)]
pub struct HarvestArgs {
    /// Single Entrez date partition (YYYY-MM-DD)
    #[arg(short, long, value_parser = parse_date, conflicts_with_all = ["start", "end"])]
    pub date: Option<NaiveDate>,

    /// First partition of the interval (default 2013-01-01)
    #[arg(long, value_parser = parse_date)]
    pub start: Option<NaiveDate>,

    /// End of the interval, exclusive (default today)
    #[arg(long, value_parser = parse_date)]
    pub end: Option<NaiveDate>,

    /// What to run on each partition
    #[arg(short, long, value_enum, default_value = "all")]
    pub task: Task,

    /// Ignore previous sync dates and refetch everything
    #[arg(long)]
    pub full: bool,

    /// Concurrent affiliation lookups
    #[arg(short, long)]
    pub workers: Option<usize>,
}

#[derive(Clone, Copy, ValueEnum, Debug, PartialEq, Eq)]
pub enum Task {
    /// Sync notices with the feed
    Harvest,
    /// Parse and enrich stored notices
    Parse,
    /// Harvest then parse
    All,
}

impl Task {
    fn harvests(self) -> bool {
        matches!(self, Self::Harvest | Self::All)
    }

    fn parses(self) -> bool {
        matches!(self, Self::Parse | Self::All)
    }
}

impl HarvestArgs {
    /// Partitions to visit, oldest first.
    fn partitions(&self, today: NaiveDate) -> Result<Vec<NaiveDate>> {
        if let Some(date) = self.date {
            return Ok(vec![date]);
        }
        let (y, m, d) = DEFAULT_START;
        let start = match self.start {
            Some(start) => start,
            None => NaiveDate::from_ymd_opt(y, m, d).context("invalid default start")?,
        };
        let end = self.end.unwrap_or(today);
        if start >= end {
            anyhow::bail!("empty interval: {start} is not before {end}");
        }
        Ok(start.iter_days().take_while(|d| *d < end).collect())
    }
}

#[derive(Debug, Default)]
struct Totals {
    partitions: usize,
    fetched: usize,
    deleted: usize,
    failed_fetches: usize,
    parsed: usize,
    skipped: usize,
    kept: usize,
    resynced: usize,
    errors: usize,
}

pub fn run(args: HarvestArgs, config: &Config, progress: &SharedProgress) -> Result<()> {
    let today = chrono::Local::now().date_naive();
    let partitions = args.partitions(today)?;

    let services = Services::open(config);
    let feed = EutilsFeed::new(
        &config.eutils.base_url,
        config.eutils.api_key.clone(),
        Duration::from_secs(config.eutils.search_timeout),
    );
    let removed = Tombstones::load(&services.store, &config.storage.medline_container)
        .context("Failed to load bulk deletion lists")?;
    log::debug!("{} identifiers removed by bulk updates", fmt_num(removed.len()));
    let sync = Synchronizer::new(&feed, &services.store, config.harvest()).with_removed(removed);
    let enricher = args.task.parses().then(|| services.enricher(config, args.workers));
    let region = config.region();

    log::info!(
        "{:?} on {} partitions ({} to {})",
        args.task,
        partitions.len(),
        partitions[0],
        partitions[partitions.len() - 1]
    );

    let flights = flights(config, "harvest");
    let bar = progress.unit_bar("harvest", partitions.len() as u64);
    let mut totals = Totals::default();

    for partition in partitions {
        if is_shutdown_requested() {
            log::warn!("shutdown requested, stopping before {partition}");
            break;
        }
        bar.set_message(partition.to_string());

        let outcome = dispatch(&flights, &partition.to_string(), || {
            if args.task.harvests() {
                let report = sync.sync_partition(partition, args.full)?;
                totals.fetched += report.fetched;
                totals.deleted += report.deleted;
                totals.failed_fetches += report.failed;
            }
            if let Some(enricher) = &enricher {
                let report = parse_partition(&sync, enricher, &region, partition)?;
                totals.parsed += report.parsed;
                totals.skipped += report.skipped;
                totals.kept += report.kept;
                totals.resynced += usize::from(report.resynced);
            }
            Ok(())
        });
        match outcome {
            Some(Ok(())) => totals.partitions += 1,
            Some(Err(e)) => {
                log::error!("{partition}: {e:#}");
                totals.errors += 1;
            }
            None => {}
        }
        bar.inc(1);
    }
    bar.finish_and_clear();

    let mut rows = vec![("Partitions", format!("{} ({} failed)", totals.partitions, totals.errors))];
    if args.task.harvests() {
        rows.push((
            "Fetched",
            format!(
                "{} ({} deleted, {} not responding)",
                fmt_num(totals.fetched),
                fmt_num(totals.deleted),
                fmt_num(totals.failed_fetches)
            ),
        ));
    }
    if args.task.parses() {
        rows.push((
            "Parsed",
            format!("{} ({} skipped)", fmt_num(totals.parsed), fmt_num(totals.skipped)),
        ));
        rows.push(("Kept", format!("{} in {}", fmt_num(totals.kept), region.name)));
        rows.push(("Resynced", totals.resynced.to_string()));
    }
    print_summary("Harvest", &rows);

    if totals.errors > 0 {
        anyhow::bail!("{} partition(s) failed", totals.errors);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(date: Option<&str>, start: Option<&str>, end: Option<&str>) -> HarvestArgs {
        let parse = |s: &str| parse_date(s).unwrap();
        HarvestArgs {
            date: date.map(parse),
            start: start.map(parse),
            end: end.map(parse),
            task: Task::All,
            full: false,
            workers: None,
        }
    }

    #[test]
    fn single_date() {
        let today = parse_date("2024-01-01").unwrap();
        let dates = args(Some("2021-04-26"), None, None).partitions(today).unwrap();
        assert_eq!(dates, vec![parse_date("2021-04-26").unwrap()]);
    }

    #[test]
    fn interval_excludes_end() {
        let today = parse_date("2024-01-01").unwrap();
        let dates = args(None, Some("2021-02-27"), Some("2021-03-02"))
            .partitions(today)
            .unwrap();
        let expected: Vec<NaiveDate> = ["2021-02-27", "2021-02-28", "2021-03-01"]
            .iter()
            .map(|d| parse_date(d).unwrap())
            .collect();
        assert_eq!(dates, expected);
    }

    #[test]
    fn interval_defaults() {
        let today = parse_date("2013-01-04").unwrap();
        let dates = args(None, None, None).partitions(today).unwrap();
        assert_eq!(dates.len(), 3);
        assert_eq!(dates[0], parse_date("2013-01-01").unwrap());
    }

    #[test]
    fn empty_interval_is_rejected() {
        let today = parse_date("2024-01-01").unwrap();
        assert!(args(None, Some("2021-03-01"), Some("2021-03-01")).partitions(today).is_err());
    }

    #[test]
    fn task_selection() {
        assert!(Task::All.harvests() && Task::All.parses());
        assert!(!Task::Parse.harvests());
        assert!(!Task::Harvest.parses());
    }
}
