use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Crag-Harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub harvest: HarvestConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub output: OutputConfig,
    pub source: SourceConfig,
    #[serde(default)]
    pub classify: ClassifyConfig,
}

/// Run behavior: batching, staleness, retries and the shared rate limit
#[derive(Debug, Clone, Deserialize)]
pub struct HarvestConfig {
    /// Maximum calls per rolling window, shared by every worker
    #[serde(rename = "rate-limit")]
    pub rate_limit: RateLimitConfig,

    /// Number of items fetched and committed together
    #[serde(rename = "batch-size", default = "default_batch_size")]
    pub batch_size: usize,

    /// Age after which a harvested item is fetched again
    #[serde(
        rename = "staleness-threshold-days",
        default = "default_staleness_threshold_days"
    )]
    pub staleness_threshold_days: u32,

    /// Retries per item per run after a rate-limited or transient failure
    #[serde(
        rename = "max-retries-per-item",
        default = "default_max_retries_per_item"
    )]
    pub max_retries_per_item: u32,

    /// Pause before retrying an item the remote answered with HTTP 429
    #[serde(
        rename = "rate-limited-backoff-secs",
        default = "default_rate_limited_backoff_secs"
    )]
    pub rate_limited_backoff_secs: u64,

    /// Pause before retrying an item after a transient failure
    #[serde(
        rename = "transient-backoff-secs",
        default = "default_transient_backoff_secs"
    )]
    pub transient_backoff_secs: u64,

    /// Upper bound on in-flight workers (defaults to the batch size)
    #[serde(rename = "max-concurrency", default)]
    pub max_concurrency: Option<usize>,

    /// What to do with items the remote reports as missing
    #[serde(rename = "not-found-policy", default)]
    pub not_found_policy: NotFoundPolicy,
}

impl HarvestConfig {
    /// Staleness threshold as a chrono duration for watermark arithmetic
    pub fn staleness_threshold(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.staleness_threshold_days))
    }

    /// Effective worker pool size
    pub fn concurrency(&self) -> usize {
        self.max_concurrency.unwrap_or(self.batch_size).max(1)
    }

    pub fn rate_limited_backoff(&self) -> Duration {
        Duration::from_secs(self.rate_limited_backoff_secs)
    }

    pub fn transient_backoff(&self) -> Duration {
        Duration::from_secs(self.transient_backoff_secs)
    }
}

/// Shared call budget: `calls` per rolling `period-seconds`
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RateLimitConfig {
    pub calls: u32,

    #[serde(rename = "period-seconds")]
    pub period_seconds: u64,
}

impl RateLimitConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_seconds)
    }
}

/// Whether a missing item is written as a tombstone watermark
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotFoundPolicy {
    /// Leave it un-watermarked so the next run asks again
    #[default]
    Retry,

    /// Watermark it so it is skipped until stale or re-versioned
    Watermark,
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the harvester
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the harvester
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the harvester
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for harvester-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// Which records are harvested and where the frontier comes from
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub kind: SourceKind,

    /// Root sitemap index enumerated by discovery
    #[serde(rename = "sitemap-url")]
    pub sitemap_url: String,

    /// Leading sub-sitemaps of the index that are ignored
    #[serde(rename = "skip-groups", default)]
    pub skip_groups: usize,

    /// Only locators containing this substring enter the frontier
    #[serde(rename = "locator-filter", default)]
    pub locator_filter: Option<String>,

    /// Base of the per-route JSON API, required for `kind = "stats"`
    #[serde(rename = "api-base", default)]
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Routes,
    Stats,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Routes => "routes",
            Self::Stats => "stats",
        }
    }
}

/// Known section labels per output bucket
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClassifyConfig {
    #[serde(default)]
    pub description: Vec<String>,

    #[serde(default)]
    pub directions: Vec<String>,

    #[serde(default)]
    pub protection: Vec<String>,

    /// Optional CSV with `Title` and `Process As` columns
    #[serde(rename = "csv-path", default)]
    pub csv_path: Option<String>,
}

fn default_batch_size() -> usize {
    100
}

fn default_staleness_threshold_days() -> u32 {
    30
}

fn default_max_retries_per_item() -> u32 {
    1
}

fn default_rate_limited_backoff_secs() -> u64 {
    30
}

fn default_transient_backoff_secs() -> u64 {
    5
}
