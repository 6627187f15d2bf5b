//! Configuration management
//!
//! YAML-based configuration with:
//! - Multiple configuration file locations
//! - Environment variable overrides
//! - Default values for every setting

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub authority: AuthorityConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub suggester: SuggesterConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub tasks: TaskConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Runtime worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_workers() -> usize {
    num_cpus::get()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: default_workers(),
        }
    }
}

/// DDI authority (Infoblox WAPI) connection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthorityConfig {
    /// Base URL of the grid master, e.g. `https://gm.example.com`
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_wapi_version")]
    pub wapi_version: String,
    #[serde(default = "default_ssl_verify")]
    pub ssl_verify: bool,
    /// Page size for paged network listings
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_wapi_version() -> String {
    "2.13.1".to_string()
}

fn default_ssl_verify() -> bool {
    true
}

fn default_page_size() -> usize {
    1000
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: String::new(),
            password: String::new(),
            wapi_version: default_wapi_version(),
            ssl_verify: default_ssl_verify(),
            page_size: default_page_size(),
        }
    }
}

impl AuthorityConfig {
    /// Root of the versioned WAPI, always ending in `/`
    pub fn base_url(&self) -> String {
        format!(
            "{}/wapi/v{}/",
            self.url.trim_end_matches('/'),
            self.wapi_version
        )
    }
}

/// Outbound client limits, rate limiting and retry policy
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Global ceiling on in-flight requests
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Ceiling on in-flight requests per destination host
    #[serde(default = "default_max_per_host")]
    pub max_per_host: usize,
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
    #[serde(default = "default_burst")]
    pub burst: u32,
    /// Total attempts per request, first try included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_pool_idle_timeout")]
    pub pool_idle_timeout_secs: u64,
}

fn default_max_concurrent() -> usize {
    100
}

fn default_max_per_host() -> usize {
    30
}

fn default_requests_per_second() -> u32 {
    10
}

fn default_burst() -> u32 {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter_ms() -> u64 {
    250
}

fn default_request_timeout() -> u64 {
    30
}

fn default_pool_idle_timeout() -> u64 {
    90
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_per_host: default_max_per_host(),
            requests_per_second: default_requests_per_second(),
            burst: default_burst(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
            request_timeout_secs: default_request_timeout(),
            pool_idle_timeout_secs: default_pool_idle_timeout(),
        }
    }
}

/// Cache configuration for authority reads
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Enable/disable caching
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    /// TTL for network views and attribute definitions
    #[serde(default = "default_schema_ttl")]
    pub schema_ttl_secs: u64,
    /// TTL for network listings
    #[serde(default = "default_inventory_ttl")]
    pub inventory_ttl_secs: u64,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Cron expression for the background schema refresh (empty to disable)
    #[serde(default = "default_refresh_cron")]
    pub refresh_cron: String,
}

fn default_cache_enabled() -> bool {
    true
}

fn default_schema_ttl() -> u64 {
    600 // 10 minutes
}

fn default_inventory_ttl() -> u64 {
    300 // 5 minutes
}

fn default_max_entries() -> usize {
    1000
}

fn default_refresh_cron() -> String {
    "0 */15 * * * *".to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            schema_ttl_secs: default_schema_ttl(),
            inventory_ttl_secs: default_inventory_ttl(),
            max_entries: default_max_entries(),
            refresh_cron: default_refresh_cron(),
        }
    }
}

/// Similarity function used for fuzzy attribute matching
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    Levenshtein,
    JaroWinkler,
    TokenOverlap,
    #[default]
    Combined,
}

/// Attribute mapping suggester configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SuggesterConfig {
    /// Minimum similarity (0.0..=1.0) for a fuzzy match
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default)]
    pub metric: SimilarityMetric,
    /// Suggestions kept per tag (0 = unlimited)
    #[serde(default = "default_max_suggestions")]
    pub max_suggestions: usize,
    #[serde(default = "default_fuzzy_min")]
    pub fuzzy_min_confidence: u8,
    #[serde(default = "default_fuzzy_max")]
    pub fuzzy_max_confidence: u8,
    /// Groups of names treated as equivalent
    #[serde(default = "default_synonyms")]
    pub synonyms: Vec<Vec<String>>,
}

fn default_threshold() -> f64 {
    0.8
}

fn default_max_suggestions() -> usize {
    3
}

fn default_fuzzy_min() -> u8 {
    50
}

fn default_fuzzy_max() -> u8 {
    89
}

fn default_synonyms() -> Vec<Vec<String>> {
    [
        &["created_by", "createdby", "creator", "author"][..],
        &["environment", "env"],
        &["application", "app", "app_name"],
        &["owner", "owned_by", "responsible"],
        &["cost_center", "costcenter", "cc", "cost_centre"],
        &["project", "proj", "project_name"],
        &["department", "dept"],
    ]
    .iter()
    .map(|group| group.iter().map(|s| s.to_string()).collect())
    .collect()
}

impl Default for SuggesterConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            metric: SimilarityMetric::default(),
            max_suggestions: default_max_suggestions(),
            fuzzy_min_confidence: default_fuzzy_min(),
            fuzzy_max_confidence: default_fuzzy_max(),
            synonyms: default_synonyms(),
        }
    }
}

/// Reconciliation input limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReconcileConfig {
    #[serde(default = "default_max_records")]
    pub max_records: usize,
}

fn default_max_records() -> usize {
    10_000
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            max_records: default_max_records(),
        }
    }
}

/// Background task configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TaskConfig {
    /// Tasks executing at the same time; the rest wait as pending
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    /// How long finished tasks stay queryable
    #[serde(default = "default_retention")]
    pub retention_secs: u64,
    /// Overall deadline per task unless overridden at submission
    #[serde(default)]
    pub default_timeout_secs: Option<u64>,
    /// Consecutive unreachable-authority failures that abort a task
    #[serde(default = "default_unreachable_threshold")]
    pub unreachable_threshold: u32,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_max_concurrent_tasks() -> usize {
    4
}

fn default_retention() -> u64 {
    3600
}

fn default_unreachable_threshold() -> u32 {
    3
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_event_buffer() -> usize {
    256
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            retention_secs: default_retention(),
            default_timeout_secs: None,
            unreachable_threshold: default_unreachable_threshold(),
            sweep_interval_secs: default_sweep_interval(),
            event_buffer: default_event_buffer(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default)]
    pub target: LogTarget,
    /// Directory for log files (used when target is "file" or "both")
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default = "default_log_prefix")]
    pub log_prefix: String,
    #[serde(default = "default_log_rotation")]
    pub daily_rotation: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

/// Log output target
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    #[default]
    Console,
    File,
    Both,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/log/ddi-sync")
}

fn default_log_prefix() -> String {
    "ddi-sync".to_string()
}

fn default_log_rotation() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            target: LogTarget::default(),
            log_dir: default_log_dir(),
            log_prefix: default_log_prefix(),
            daily_rotation: default_log_rotation(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file and environment variables
    ///
    /// Later sources override earlier ones:
    /// 1. Default values
    /// 2. Configuration file (YAML)
    /// 3. Environment variables
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let config_path = std::env::var("DDISYNC_CONFIG")
            .map(PathBuf::from)
            .ok()
            .or_else(Self::find_config_file);

        let mut config = match config_path {
            Some(ref path) if path.exists() => {
                eprintln!("[CONFIG] Loading configuration from: {:?}", path);
                Self::from_file(path)?
            }
            Some(ref path) => {
                eprintln!("[CONFIG] Config file not found: {:?}, using defaults", path);
                AppConfig::default()
            }
            None => {
                eprintln!("[CONFIG] No config file found, using defaults");
                AppConfig::default()
            }
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Parse a YAML configuration file without env overrides
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        serde_norway::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    fn find_config_file() -> Option<PathBuf> {
        let paths = [
            PathBuf::from("config.yaml"),
            PathBuf::from("config/config.yaml"),
            PathBuf::from("/etc/ddi-sync/config.yaml"),
            dirs::config_dir()
                .map(|p| p.join("ddi-sync/config.yaml"))
                .unwrap_or_default(),
        ];

        paths.into_iter().find(|p| p.exists())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("DDISYNC_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("DDISYNC_PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }

        if let Ok(url) = std::env::var("DDI_AUTHORITY_URL") {
            self.authority.url = url;
        }
        if let Ok(username) = std::env::var("DDI_AUTHORITY_USERNAME") {
            self.authority.username = username;
        }
        if let Ok(password) = std::env::var("DDI_AUTHORITY_PASSWORD") {
            self.authority.password = password;
        }
        if let Ok(version) = std::env::var("DDI_AUTHORITY_WAPI_VERSION") {
            self.authority.wapi_version = version;
        }
        if let Ok(verify) = std::env::var("DDI_AUTHORITY_SSL_VERIFY") {
            self.authority.ssl_verify = !matches!(
                verify.to_lowercase().as_str(),
                "false" | "0" | "no" | "off"
            );
        }

        if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("DDISYNC_LOG_FORMAT") {
            self.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "compact" => LogFormat::Compact,
                _ => LogFormat::Pretty,
            };
        }
        if let Ok(target) = std::env::var("DDISYNC_LOG_TARGET") {
            self.logging.target = match target.to_lowercase().as_str() {
                "file" => LogTarget::File,
                "both" => LogTarget::Both,
                _ => LogTarget::Console,
            };
        }
        if let Ok(dir) = std::env::var("DDISYNC_LOG_DIR") {
            self.logging.log_dir = PathBuf::from(dir);
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }

        if self.authority.url.is_empty() {
            tracing::warn!("No DDI authority URL configured; authority calls will fail");
        } else if !self.authority.url.starts_with("http://")
            && !self.authority.url.starts_with("https://")
        {
            anyhow::bail!(
                "Authority URL must start with http:// or https://: {}",
                self.authority.url
            );
        }
        if self.authority.page_size == 0 {
            anyhow::bail!("authority.page_size must be greater than 0");
        }

        let client = &self.client;
        if client.max_concurrent == 0 || client.max_per_host == 0 {
            anyhow::bail!("Client concurrency limits must be greater than 0");
        }
        if client.requests_per_second == 0 {
            anyhow::bail!("client.requests_per_second must be greater than 0");
        }
        if client.max_attempts == 0 {
            anyhow::bail!("client.max_attempts must be at least 1");
        }
        if client.base_delay_ms > client.max_delay_ms {
            anyhow::bail!(
                "client.base_delay_ms ({}) exceeds client.max_delay_ms ({})",
                client.base_delay_ms,
                client.max_delay_ms
            );
        }

        let suggester = &self.suggester;
        if !(0.0..=1.0).contains(&suggester.threshold) {
            anyhow::bail!(
                "suggester.threshold must be within 0.0..=1.0, got {}",
                suggester.threshold
            );
        }
        if suggester.fuzzy_min_confidence > suggester.fuzzy_max_confidence
            || suggester.fuzzy_max_confidence >= 90
        {
            anyhow::bail!(
                "Fuzzy confidence band must satisfy min <= max < 90 (got {}..={})",
                suggester.fuzzy_min_confidence,
                suggester.fuzzy_max_confidence
            );
        }

        if self.tasks.max_concurrent_tasks == 0 {
            anyhow::bail!("tasks.max_concurrent_tasks must be greater than 0");
        }
        if self.tasks.unreachable_threshold == 0 {
            anyhow::bail!("tasks.unreachable_threshold must be at least 1");
        }

        if !self.cache.refresh_cron.trim().is_empty() {
            self.cache
                .refresh_cron
                .parse::<cron::Schedule>()
                .with_context(|| {
                    format!("Invalid cache.refresh_cron: {}", self.cache.refresh_cron)
                })?;
        }

        Ok(())
    }
}
