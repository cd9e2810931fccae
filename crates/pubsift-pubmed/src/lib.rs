//! pubsift PubMed - harvesting, parsing and export of PubMed records
//!
//! Two sources feed the same record store:
//!
//! - the incremental E-utilities feed, synchronized one Entrez-date
//!   partition at a time ([`harvest`], [`partition`])
//! - the MEDLINE bulk files, split into fixed-size chunks and fanned out
//!   newest first ([`medline`], [`chunks`])
//!
//! Both paths parse notices with [`parser`], enrich them with affiliation
//! countries and store the publications plus a regional subset, which
//! [`export`] turns into Parquet shards.
//!
//! # Example
//!
//! ```ignore
//! use pubsift_pubmed::{EutilsFeed, HarvestConfig, Synchronizer, EUTILS_URL};
//! use pubsift_store::FsBlobStore;
//!
//! let feed = EutilsFeed::new(EUTILS_URL, None, std::time::Duration::from_secs(60));
//! let store = FsBlobStore::new("data");
//! let sync = Synchronizer::new(&feed, &store, HarvestConfig::default());
//! let report = sync.sync_partition(date, false)?;
//! println!("{} notices fetched", report.fetched);
//! ```

pub mod chunks;
pub mod config;
pub mod export;
pub mod feed;
pub mod harvest;
pub mod medline;
pub mod parser;
pub mod partition;
pub mod schema;
pub mod transform;

// Re-exports
pub use chunks::{ChunkDescriptor, ChunkProcessor, ChunkReport, Eligibility, ProcessedRecord, Scheduler, SourcePlan};
pub use config::{BulkConfig, ExportConfig, HarvestConfig, RegionConfig};
pub use export::{ExportScope, ExportSummary, export};
pub use feed::{EUTILS_URL, EutilsFeed, FeedError, FetchOutcome, NoticeFeed, SearchPage, SearchWindow};
pub use harvest::{SyncReport, Synchronizer, dedup_latest};
pub use medline::{BulkDump, BulkFile, BulkSource, MEDLINE_URL, MedlineFtp};
pub use parser::{ParseOutcome, ParsedBatch, SkipReason, parse_batch, parse_notice};
pub use partition::{PartitionReport, parse_partition};
