//! Application configuration for PaperScout.
//!
//! User config lives at `~/.paperscout/paperscout.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PaperScoutError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "paperscout.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".paperscout";

// ---------------------------------------------------------------------------
// Config structs (matching paperscout.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Request defaults applied when the caller leaves a field unset.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Outbound HTTP policy shared by every adapter.
    #[serde(default)]
    pub http: HttpConfig,

    /// Provider and enricher endpoints and credentials.
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Quality gate thresholds.
    #[serde(default)]
    pub quality: QualityConfig,

    /// Full-text acquisition and chunking.
    #[serde(default)]
    pub acquisition: AcquisitionConfig,

    /// Local chunk store.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default = "default_per_source_limit")]
    pub per_source_limit: usize,

    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Retry once with relaxed filters when the strict pass finds nothing.
    #[serde(default = "default_true")]
    pub auto_fallback: bool,

    /// Fetch full text when a request leaves `fullText` unset.
    #[serde(default = "default_true")]
    pub full_text: bool,

    /// Store chunks by default.
    #[serde(default)]
    pub store: bool,

    /// Research domain label attached to stored chunks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub research_domain: Option<String>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            per_source_limit: default_per_source_limit(),
            max_results: default_max_results(),
            auto_fallback: true,
            full_text: true,
            store: false,
            research_domain: None,
        }
    }
}

fn default_per_source_limit() -> usize {
    10
}
fn default_max_results() -> usize {
    25
}
fn default_true() -> bool {
    true
}

/// `[http]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Maximum in-flight requests across all adapters of a run.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Attempts per call, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Timeout for provider search calls.
    #[serde(default = "default_search_timeout")]
    pub search_timeout_secs: u64,

    /// Timeout for enrichment calls.
    #[serde(default = "default_enrich_timeout")]
    pub enrich_timeout_secs: u64,

    /// Timeout for PDF and landing-page downloads.
    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u64,

    /// Contact address sent to services offering a "polite pool" (OpenAlex, Unpaywall, Crossref).
    #[serde(default = "default_contact_email")]
    pub contact_email: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            search_timeout_secs: default_search_timeout(),
            enrich_timeout_secs: default_enrich_timeout(),
            download_timeout_secs: default_download_timeout(),
            contact_email: default_contact_email(),
        }
    }
}

fn default_concurrency() -> usize {
    8
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_backoff_max_ms() -> u64 {
    8_000
}
fn default_search_timeout() -> u64 {
    25
}
fn default_enrich_timeout() -> u64 {
    12
}
fn default_download_timeout() -> u64 {
    25
}
fn default_contact_email() -> String {
    "paperscout@example.org".into()
}

/// `[providers]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Name of the env var holding the CORE API key (never store the key itself).
    #[serde(default = "default_core_key_env")]
    pub core_api_key_env: String,

    /// Name of the env var holding an optional Semantic Scholar API key.
    #[serde(default = "default_s2_key_env")]
    pub semantic_scholar_api_key_env: String,

    /// Service base URLs.
    #[serde(default)]
    pub endpoints: ProviderEndpoints,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            core_api_key_env: default_core_key_env(),
            semantic_scholar_api_key_env: default_s2_key_env(),
            endpoints: ProviderEndpoints::default(),
        }
    }
}

fn default_core_key_env() -> String {
    "CORE_API_KEY".into()
}
fn default_s2_key_env() -> String {
    "SEMANTIC_SCHOLAR_API_KEY".into()
}

/// `[providers.endpoints]` — base URL for every external service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEndpoints {
    #[serde(default = "default_core_url")]
    pub core: String,
    #[serde(default = "default_openalex_url")]
    pub openalex: String,
    #[serde(default = "default_europepmc_url")]
    pub europepmc: String,
    #[serde(default = "default_arxiv_url")]
    pub arxiv: String,
    #[serde(default = "default_crossref_url")]
    pub crossref: String,
    #[serde(default = "default_unpaywall_url")]
    pub unpaywall: String,
    #[serde(default = "default_semantic_scholar_url")]
    pub semantic_scholar: String,
}

impl ProviderEndpoints {
    /// Point every service at one base URL (mock servers in tests).
    pub fn all_at(base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        Self {
            core: base.clone(),
            openalex: base.clone(),
            europepmc: base.clone(),
            arxiv: base.clone(),
            crossref: base.clone(),
            unpaywall: base.clone(),
            semantic_scholar: base,
        }
    }
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            core: default_core_url(),
            openalex: default_openalex_url(),
            europepmc: default_europepmc_url(),
            arxiv: default_arxiv_url(),
            crossref: default_crossref_url(),
            unpaywall: default_unpaywall_url(),
            semantic_scholar: default_semantic_scholar_url(),
        }
    }
}

fn default_core_url() -> String {
    "https://api.core.ac.uk/v3".into()
}
fn default_openalex_url() -> String {
    "https://api.openalex.org".into()
}
fn default_europepmc_url() -> String {
    "https://www.ebi.ac.uk/europepmc/webservices/rest".into()
}
fn default_arxiv_url() -> String {
    "https://export.arxiv.org/api".into()
}
fn default_crossref_url() -> String {
    "https://api.crossref.org".into()
}
fn default_unpaywall_url() -> String {
    "https://api.unpaywall.org/v2".into()
}
fn default_semantic_scholar_url() -> String {
    "https://api.semanticscholar.org/graph/v1".into()
}

/// `[quality]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    #[serde(default = "default_min_quantity_ratio")]
    pub min_quantity_ratio: f64,
    #[serde(default = "default_min_certainty")]
    pub min_certainty_threshold: f64,
    #[serde(default = "default_min_recent_ratio")]
    pub min_recent_ratio: f64,
    #[serde(default = "default_max_years_old")]
    pub max_years_old: i32,
    #[serde(default = "default_min_overall")]
    pub min_overall_score: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_quantity_ratio: default_min_quantity_ratio(),
            min_certainty_threshold: default_min_certainty(),
            min_recent_ratio: default_min_recent_ratio(),
            max_years_old: default_max_years_old(),
            min_overall_score: default_min_overall(),
        }
    }
}

fn default_min_quantity_ratio() -> f64 {
    0.3
}
fn default_min_certainty() -> f64 {
    0.7
}
fn default_min_recent_ratio() -> f64 {
    0.2
}
fn default_max_years_old() -> i32 {
    2
}
fn default_min_overall() -> f64 {
    0.6
}

/// `[acquisition]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Chunk window size in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Characters shared by consecutive chunks.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Try to resolve PDFs/abstracts from landing pages when no PDF link is known.
    #[serde(default)]
    pub browser_fallback: bool,

    /// Largest PDF we are willing to download.
    #[serde(default = "default_max_pdf_bytes")]
    pub max_pdf_bytes: u64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            browser_fallback: false,
            max_pdf_bytes: default_max_pdf_bytes(),
        }
    }
}

fn default_chunk_size() -> usize {
    2000
}
fn default_chunk_overlap() -> usize {
    200
}
fn default_max_pdf_bytes() -> u64 {
    25 * 1024 * 1024
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path of the local chunk database.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "~/.paperscout/chunks.db".into()
}

impl StorageConfig {
    /// Resolve `db_path`, expanding a leading `~/` to the home directory.
    pub fn resolved_db_path(&self) -> Result<PathBuf> {
        match self.db_path.strip_prefix("~/") {
            Some(rest) => {
                let home = dirs::home_dir().ok_or_else(|| {
                    PaperScoutError::config("could not determine home directory")
                })?;
                Ok(home.join(rest))
            }
            None => Ok(PathBuf::from(&self.db_path)),
        }
    }
}

// ---------------------------------------------------------------------------
// Runtime options (merged from config + request)
// ---------------------------------------------------------------------------

/// Runtime HTTP gateway options.
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub concurrency: usize,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub search_timeout: Duration,
    pub enrich_timeout: Duration,
    pub download_timeout: Duration,
    pub contact_email: String,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for GatewayOptions {
    fn from(config: &AppConfig) -> Self {
        let http = &config.http;
        Self {
            concurrency: http.concurrency.max(1),
            max_attempts: http.max_attempts.max(1),
            backoff_base: Duration::from_millis(http.backoff_base_ms),
            backoff_max: Duration::from_millis(http.backoff_max_ms),
            search_timeout: Duration::from_secs(http.search_timeout_secs),
            enrich_timeout: Duration::from_secs(http.enrich_timeout_secs),
            download_timeout: Duration::from_secs(http.download_timeout_secs),
            contact_email: http.contact_email.clone(),
        }
    }
}

/// Runtime quality gate thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityThresholds {
    pub min_quantity_ratio: f64,
    pub min_certainty_threshold: f64,
    pub min_recent_ratio: f64,
    pub max_years_old: i32,
    pub min_overall_score: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for QualityThresholds {
    fn from(config: &AppConfig) -> Self {
        let q = &config.quality;
        Self {
            min_quantity_ratio: q.min_quantity_ratio,
            min_certainty_threshold: q.min_certainty_threshold,
            min_recent_ratio: q.min_recent_ratio,
            max_years_old: q.max_years_old,
            min_overall_score: q.min_overall_score,
        }
    }
}

/// Runtime acquisition options.
#[derive(Debug, Clone)]
pub struct AcquisitionOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub browser_fallback: bool,
    pub max_pdf_bytes: u64,
    /// Fetch full text (otherwise abstracts only).
    pub full_text: bool,
    pub research_domain: Option<String>,
}

impl Default for AcquisitionOptions {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for AcquisitionOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            chunk_size: config.acquisition.chunk_size,
            chunk_overlap: config.acquisition.chunk_overlap,
            browser_fallback: config.acquisition.browser_fallback,
            max_pdf_bytes: config.acquisition.max_pdf_bytes,
            full_text: config.defaults.full_text,
            research_domain: config.defaults.research_domain.clone(),
        }
    }
}

/// Credentials read from the environment at run time.
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    pub core: Option<String>,
    pub semantic_scholar: Option<String>,
}

impl ApiKeys {
    /// Read the keys named by `[providers]` from the environment.
    pub fn from_env(config: &AppConfig) -> Self {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            core: read(&config.providers.core_api_key_env),
            semantic_scholar: read(&config.providers.semantic_scholar_api_key_env),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.paperscout/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| PaperScoutError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.paperscout/paperscout.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| PaperScoutError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        PaperScoutError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| PaperScoutError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| PaperScoutError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| PaperScoutError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Reject configurations that would make chunking or scoring ill-defined.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    let acq = &config.acquisition;
    if acq.chunk_size == 0 {
        return Err(PaperScoutError::config("acquisition.chunk_size must be > 0"));
    }
    if acq.chunk_overlap >= acq.chunk_size {
        return Err(PaperScoutError::config(format!(
            "acquisition.chunk_overlap ({}) must be smaller than chunk_size ({})",
            acq.chunk_overlap, acq.chunk_size
        )));
    }
    let q = &config.quality;
    for (name, value) in [
        ("min_quantity_ratio", q.min_quantity_ratio),
        ("min_certainty_threshold", q.min_certainty_threshold),
        ("min_recent_ratio", q.min_recent_ratio),
        ("min_overall_score", q.min_overall_score),
    ] {
        if !(0.0..=1.0).contains(&value) {
            return Err(PaperScoutError::config(format!(
                "quality.{name} must be within [0, 1], got {value}"
            )));
        }
    }
    Ok(())
}
