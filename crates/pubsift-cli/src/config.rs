//! Configuration loading from TOML files

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use pubsift_core::HttpConfig;
use pubsift_geo::countries::french_territories;
use pubsift_geo::{EnrichSettings, ResolverConfig};
use pubsift_pubmed::{
    BulkConfig, EUTILS_URL, ExportConfig, HarvestConfig, MEDLINE_URL, RegionConfig,
};

/// Global configuration for pubsift
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub eutils: EutilsConfig,
    pub medline: MedlineConfig,
    pub matcher: MatcherConfig,
    pub cache: CacheConfig,
    pub filter: FilterConfig,
    pub workers: WorkersConfig,
    pub http: HttpSettings,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory of the filesystem blob store
    pub root: PathBuf,
    pub pubmed_container: String,
    pub medline_container: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./data/store"),
            pubmed_container: "pubmed".to_string(),
            medline_container: "medline".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EutilsConfig {
    pub base_url: String,
    #[serde(deserialize_with = "deserialize_env_var")]
    pub api_key: Option<String>,
    pub page_size: usize,
    pub request_delay_ms: u64,
    pub search_timeout: u64,
    pub fast_timeout: u64,
    pub retry_wait: u64,
    pub slow_timeout: u64,
}

impl Default for EutilsConfig {
    fn default() -> Self {
        Self {
            base_url: EUTILS_URL.to_string(),
            api_key: std::env::var("NCBI_API_KEY").ok(),
            page_size: 25_000,
            request_delay_ms: 500,
            search_timeout: 60,
            fast_timeout: 2,
            retry_wait: 60,
            slow_timeout: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MedlineConfig {
    pub base_url: String,
    /// Notices per stored chunk
    pub chunk_size: usize,
    pub max_chunks: usize,
    pub listing_timeout: u64,
    /// Path segment of the regional subset
    pub region: String,
}

impl Default for MedlineConfig {
    fn default() -> Self {
        Self {
            base_url: MEDLINE_URL.to_string(),
            chunk_size: 1000,
            max_chunks: 1000,
            listing_timeout: 60,
            region: "fr".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Matcher service; no enrichment when unset
    #[serde(deserialize_with = "deserialize_env_var")]
    pub url: Option<String>,
    pub timeout: u64,
    pub workers: usize,
    pub batch_size: usize,
    pub poll_interval: u64,
    pub task_deadline: u64,
    /// Delegate annotate-and-filter to the matcher instead of resolving locally
    pub remote_enrich: bool,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout: 60,
            workers: 1,
            batch_size: 1000,
            poll_interval: 2,
            task_deadline: 3600,
            remote_enrich: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    #[serde(deserialize_with = "deserialize_env_var")]
    pub url: Option<String>,
    pub index: String,
    pub timeout: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: None,
            index: "affiliations".to_string(),
            timeout: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Publications linked to any of these countries form the regional subset
    pub countries: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            countries: french_territories(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    /// Upper bound of any worker pool
    pub max: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self { max: (cpus * 2).min(16) }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    /// Seconds without data before a download is considered stalled
    pub read_timeout: u64,
    pub max_retries: u32,
    pub stagger_ms: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        let defaults = HttpConfig::default();
        Self {
            read_timeout: defaults.read_timeout.as_secs(),
            max_retries: defaults.max_retries,
            stagger_ms: defaults.stagger_ms,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub default_dir: PathBuf,
    pub compression_level: i32,
    pub shard_rows: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            default_dir: PathBuf::from("./data/export"),
            compression_level: 3,
            shard_rows: 100_000,
        }
    }
}

/// Deserialize a string that may contain environment variable reference like ${VAR}
fn deserialize_env_var<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| expand_env_var(&s)))
}

/// Expand ${VAR} to environment variable value
fn expand_env_var(s: &str) -> Option<String> {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).ok()
    } else {
        Some(s.to_string())
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./pubsift.toml (current directory)
    /// 2. ~/.config/pubsift/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("pubsift.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "pubsift") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn harvest(&self) -> HarvestConfig {
        HarvestConfig {
            container: self.storage.pubmed_container.clone(),
            page_size: self.eutils.page_size,
            request_delay: Duration::from_millis(self.eutils.request_delay_ms),
            fast_timeout: Duration::from_secs(self.eutils.fast_timeout),
            retry_wait: Duration::from_secs(self.eutils.retry_wait),
            slow_timeout: Duration::from_secs(self.eutils.slow_timeout),
            ..Default::default()
        }
    }

    pub fn bulk(&self) -> BulkConfig {
        BulkConfig {
            container: self.storage.medline_container.clone(),
            chunk_size: self.medline.chunk_size,
            max_chunks: self.medline.max_chunks,
        }
    }

    pub fn region(&self) -> RegionConfig {
        RegionConfig {
            name: self.medline.region.clone(),
            countries: self.filter.countries.clone(),
        }
    }

    /// Resolver settings; `workers` overrides the configured pool size.
    pub fn resolver(&self, workers: Option<usize>) -> ResolverConfig {
        ResolverConfig {
            workers: workers
                .unwrap_or(self.matcher.workers)
                .clamp(1, self.workers.max.max(1)),
            batch_size: self.matcher.batch_size,
        }
    }

    pub fn enrich_settings(&self) -> EnrichSettings {
        EnrichSettings {
            poll_interval: Duration::from_secs(self.matcher.poll_interval),
            deadline: Duration::from_secs(self.matcher.task_deadline),
        }
    }

    pub fn export(&self, output_dir: Option<PathBuf>) -> ExportConfig {
        ExportConfig {
            output_dir: output_dir.unwrap_or_else(|| self.output.default_dir.clone()),
            zstd_level: self.output.compression_level,
            shard_rows: self.output.shard_rows,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.storage.pubmed_container, "pubmed");
        assert_eq!(config.storage.medline_container, "medline");
        assert_eq!(config.eutils.page_size, 25_000);
        assert_eq!(config.output.compression_level, 3);
        assert!(config.workers.max >= 1);
        assert!(config.filter.countries.contains(&"fr".to_string()));
        assert!(config.matcher.url.is_none());
    }

    #[test]
    fn expand_env_var_simple() {
        std::env::set_var("PUBSIFT_TEST_VAR", "test_value");
        assert_eq!(
            expand_env_var("${PUBSIFT_TEST_VAR}"),
            Some("test_value".to_string())
        );
        std::env::remove_var("PUBSIFT_TEST_VAR");
    }

    #[test]
    fn expand_env_var_literal() {
        assert_eq!(expand_env_var("literal"), Some("literal".to_string()));
    }

    #[test]
    fn expand_env_var_missing() {
        assert_eq!(expand_env_var("${NONEXISTENT_VAR_12345}"), None);
    }

    #[test]
    fn parse_config_toml() {
        let toml = r#"
[storage]
root = "/srv/pubsift"

[eutils]
page_size = 500
request_delay_ms = 340

[medline]
chunk_size = 250
region = "fr"

[matcher]
url = "http://matcher:5000"
workers = 4
remote_enrich = true

[filter]
countries = ["fr", "re"]

[workers]
max = 8

[output]
default_dir = "/tmp/export"
compression_level = 5
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.storage.root, PathBuf::from("/srv/pubsift"));
        assert_eq!(config.storage.pubmed_container, "pubmed");

        let harvest = config.harvest();
        assert_eq!(harvest.page_size, 500);
        assert_eq!(harvest.request_delay, Duration::from_millis(340));
        assert_eq!(harvest.container, "pubmed");

        assert_eq!(config.bulk().chunk_size, 250);
        assert_eq!(config.region().countries, vec!["fr", "re"]);
        assert_eq!(config.matcher.url.as_deref(), Some("http://matcher:5000"));
        assert!(config.matcher.remote_enrich);
        assert_eq!(config.resolver(None).workers, 4);
        assert_eq!(config.resolver(Some(2)).workers, 2);

        let export = config.export(None);
        assert_eq!(export.output_dir, PathBuf::from("/tmp/export"));
        assert_eq!(export.zstd_level, 5);
        assert_eq!(config.export(Some("/x".into())).output_dir, PathBuf::from("/x"));
    }

    #[test]
    fn resolver_workers_are_bounded() {
        let config = Config::default();
        assert_eq!(config.resolver(Some(0)).workers, 1);
        assert_eq!(config.resolver(Some(1000)).workers, config.workers.max);
    }
}
