//! PubMed pipeline settings

use std::path::PathBuf;
use std::time::Duration;

use pubsift_core::RetryPolicy;
use pubsift_geo::countries::french_territories;

/// Incremental harvest against E-utilities.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    /// Storage container of partitions, notices and inventories
    pub container: String,
    /// esearch page size
    pub page_size: usize,
    /// Pause after every efetch
    pub request_delay: Duration,
    /// First efetch attempt
    pub fast_timeout: Duration,
    /// Wait before the second attempt
    pub retry_wait: Duration,
    /// Second efetch attempt
    pub slow_timeout: Duration,
    /// Retries of the esearch paging calls
    pub search_retry: RetryPolicy,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            container: "pubmed".to_string(),
            page_size: 25_000,
            request_delay: Duration::from_millis(500),
            fast_timeout: Duration::from_secs(2),
            retry_wait: Duration::from_secs(60),
            slow_timeout: Duration::from_secs(10),
            search_retry: RetryPolicy::default(),
        }
    }
}

/// Bulk MEDLINE files split into chunks.
#[derive(Debug, Clone)]
pub struct BulkConfig {
    /// Storage container of chunks, deletion lists and processed output
    pub container: String,
    /// Notices per chunk
    pub chunk_size: usize,
    /// Highest chunk index probed for a single file
    pub max_chunks: usize,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            container: "medline".to_string(),
            chunk_size: 1000,
            max_chunks: 1000,
        }
    }
}

/// Regional subset written next to every parsed output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionConfig {
    /// Path segment of the subset, e.g. `parsed/fr/...`
    pub name: String,
    /// Publications linked to any of these countries are kept
    pub countries: Vec<String>,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            name: "fr".to_string(),
            countries: french_territories(),
        }
    }
}

/// Parquet export of parsed publications.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub output_dir: PathBuf,
    /// Zstd compression level for parquet output
    pub zstd_level: i32,
    /// Rows per parquet file
    pub shard_rows: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            zstd_level: 3,
            shard_rows: 100_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn harvest_defaults() {
        let config = HarvestConfig::default();
        assert_eq!(config.container, "pubmed");
        assert_eq!(config.page_size, 25_000);
        assert_eq!(config.request_delay, Duration::from_millis(500));
        assert!(config.fast_timeout < config.slow_timeout);
    }

    #[test]
    fn region_defaults_to_french_territories() {
        let region = RegionConfig::default();
        assert_eq!(region.name, "fr");
        assert!(region.countries.contains(&"fr".to_string()));
        assert!(region.countries.contains(&"gp".to_string()));
    }

    #[test]
    fn export_defaults() {
        let config = ExportConfig::default();
        assert_eq!(config.output_dir, PathBuf::from("output"));
        assert_eq!(config.zstd_level, 3);
    }
}
