//! `pubsift export` - parsed publications to Parquet shards

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, ValueEnum};

use pubsift_core::{SharedProgress, fmt_num};
use pubsift_pubmed::{ExportScope, export};

use super::{Services, print_summary};
use crate::config::Config;

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Output directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Which pipeline's parsed documents to export
    #[arg(short, long, value_enum, default_value = "pubmed")]
    pub source: Source,

    /// Export only the regional subset
    #[arg(long)]
    pub region: bool,
}

#[derive(Clone, Copy, ValueEnum, Debug, PartialEq, Eq)]
pub enum Source {
    /// Incremental E-utilities harvest
    Pubmed,
    /// Bulk MEDLINE chunks
    Medline,
}

impl Source {
    fn container(self, config: &Config) -> &str {
        match self {
            Self::Pubmed => &config.storage.pubmed_container,
            Self::Medline => &config.storage.medline_container,
        }
    }
}

pub fn run(args: ExportArgs, config: &Config, progress: &SharedProgress) -> Result<()> {
    let services = Services::open(config);
    let container = args.source.container(config);
    let region = config.medline.region.as_str();
    let scope = if args.region {
        ExportScope::Region(region)
    } else {
        ExportScope::All { region }
    };
    let export_config = config.export(args.output);

    let spinner = progress.stage_line("export");
    spinner.set_message(format!("{container} -> {}", export_config.output_dir.display()));
    let summary = export(&services.store, container, scope, &export_config)?;
    spinner.finish_and_clear();

    print_summary(
        "Export",
        &[
            ("Documents", fmt_num(summary.documents)),
            (
                "Publications",
                format!("{} ({} skipped)", fmt_num(summary.publications), fmt_num(summary.skipped)),
            ),
            ("Files", summary.files.len().to_string()),
            ("Output", export_config.output_dir.display().to_string()),
        ],
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_selects_container() {
        let config = Config::default();
        assert_eq!(Source::Pubmed.container(&config), "pubmed");
        assert_eq!(Source::Medline.container(&config), "medline");
    }
}
