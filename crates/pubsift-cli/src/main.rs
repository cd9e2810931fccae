//! pubsift - PubMed harvester with geographic enrichment
//!
//! Harvests notices from E-utilities and the MEDLINE bulk files, resolves
//! affiliation countries and exports the parsed publications to Parquet.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod cmd;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "pubsift")]
#[command(about = "PubMed harvester with affiliation country enrichment")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Config file path (default: ./pubsift.toml or ~/.config/pubsift/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Read timeout in seconds for stall detection
    #[arg(long, global = true)]
    read_timeout: Option<u64>,

    /// Maximum retry attempts for transient failures
    #[arg(long, global = true)]
    max_retries: Option<u32>,

    /// Milliseconds between parallel worker starts
    #[arg(long, global = true)]
    stagger_ms: Option<u64>,
}

#[derive(Subcommand)]
enum Command {
    /// Sync and parse Entrez date partitions
    Harvest(cmd::harvest::HarvestArgs),
    /// Plan and process MEDLINE bulk files
    Medline(cmd::medline::MedlineArgs),
    /// Process one stored bulk chunk
    Chunk(cmd::chunk::ChunkArgs),
    /// Export parsed publications to Parquet
    Export(cmd::export::ExportArgs),
    /// Show current configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let progress = Arc::new(pubsift_core::ProgressContext::new());

    // Logging:
    //   TTY:     quiet (warn) unless --debug, progress bars show activity
    //   non-TTY: info unless --debug, logs are the only progress indicator
    let is_tty = progress.is_tty();
    let multi = if is_tty { Some(progress.multi()) } else { None };
    let quiet = if is_tty { !cli.debug } else { false };
    pubsift_core::init_logging(quiet, cli.debug, multi);

    if let Err(e) = pubsift_core::install_signal_handlers() {
        log::warn!("signal handlers not installed: {e}");
    }

    let config = if let Some(path) = cli.config {
        Config::from_file(&path)?
    } else {
        Config::load()?
    };

    // HTTP settings: config file defaults, CLI overrides
    let http_config = pubsift_core::HttpConfig {
        read_timeout: std::time::Duration::from_secs(
            cli.read_timeout.unwrap_or(config.http.read_timeout),
        ),
        max_retries: cli.max_retries.unwrap_or(config.http.max_retries),
        stagger_ms: cli.stagger_ms.unwrap_or(config.http.stagger_ms),
    };
    pubsift_core::set_http_config(http_config);

    match cli.command {
        Command::Harvest(args) => cmd::harvest::run(args, &config, &progress),
        Command::Medline(args) => cmd::medline::run(args, &config, &progress),
        Command::Chunk(args) => cmd::chunk::run(args, &config),
        Command::Export(args) => cmd::export::run(args, &config, &progress),
        Command::Config => {
            show_config(&config);
            Ok(())
        }
    }
}

fn show_config(config: &Config) {
    use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

    let configured = |set: bool| if set { "configured" } else { "not set" };

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Setting").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    table.add_row(vec!["Store root", &config.storage.root.display().to_string()]);
    table.add_row(vec![
        "Containers",
        &format!(
            "{} / {}",
            config.storage.pubmed_container, config.storage.medline_container
        ),
    ]);
    table.add_row(vec!["E-utilities URL", &config.eutils.base_url]);
    table.add_row(vec!["E-utilities key", configured(config.eutils.api_key.is_some())]);
    table.add_row(vec![
        "Request delay",
        &format!("{}ms", config.eutils.request_delay_ms),
    ]);
    table.add_row(vec![
        "Fetch timeouts",
        &format!(
            "{}s, then {}s after {}s",
            config.eutils.fast_timeout, config.eutils.slow_timeout, config.eutils.retry_wait
        ),
    ]);
    table.add_row(vec!["MEDLINE URL", &config.medline.base_url]);
    table.add_row(vec!["Chunk size", &config.medline.chunk_size.to_string()]);
    table.add_row(vec![
        "Matcher",
        config.matcher.url.as_deref().unwrap_or("not set"),
    ]);
    table.add_row(vec![
        "Enrichment",
        if config.matcher.url.is_none() {
            "disabled"
        } else if config.matcher.remote_enrich {
            "remote task"
        } else {
            "local resolver"
        },
    ]);
    table.add_row(vec![
        "Affiliation cache",
        match (&config.cache.url, config.cache.enabled) {
            (Some(url), true) => url.as_str(),
            _ => "in memory",
        },
    ]);
    table.add_row(vec![
        "Region",
        &format!("{}: {}", config.medline.region, config.filter.countries.join(",")),
    ]);
    table.add_row(vec![
        "Workers",
        &format!(
            "{} lookups (max: {})",
            config.matcher.workers, config.workers.max
        ),
    ]);
    table.add_row(vec![
        "Export directory",
        &config.output.default_dir.display().to_string(),
    ]);
    table.add_row(vec![
        "Compression level",
        &config.output.compression_level.to_string(),
    ]);
    table.add_row(vec![
        "Read timeout",
        &format!("{}s", config.http.read_timeout),
    ]);
    table.add_row(vec!["Max retries", &config.http.max_retries.to_string()]);
    table.add_row(vec!["Stagger", &format!("{}ms", config.http.stagger_ms)]);

    eprintln!("\n{table}");
}
