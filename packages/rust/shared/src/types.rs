//! Core domain types for PaperScout discovery runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::PaperScoutError;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for discovery run identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Provider / enricher identifiers
// ---------------------------------------------------------------------------

/// The external catalogs a discovery run can fan out to.
///
/// The declaration order of [`ProviderId::ALL`] is the default merge priority:
/// when two catalogs return the same work, the earlier one's record is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    /// CORE aggregator of open-access repositories.
    Core,
    /// OpenAlex scholarly graph.
    OpenAlex,
    /// Europe PMC life-science literature.
    EuropePmc,
    /// arXiv preprint server.
    Arxiv,
}

impl ProviderId {
    /// Every provider, in default priority order.
    pub const ALL: [ProviderId; 4] = [Self::Core, Self::OpenAlex, Self::EuropePmc, Self::Arxiv];

    /// Stable lowercase name used in stats, logs, and chunk metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::OpenAlex => "openalex",
            Self::EuropePmc => "europepmc",
            Self::Arxiv => "arxiv",
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderId {
    type Err = PaperScoutError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "core" => Ok(Self::Core),
            "openalex" => Ok(Self::OpenAlex),
            "europepmc" | "europe-pmc" | "epmc" => Ok(Self::EuropePmc),
            "arxiv" => Ok(Self::Arxiv),
            other => Err(PaperScoutError::validation(format!(
                "unknown provider '{other}' (expected core, openalex, europepmc, arxiv)"
            ))),
        }
    }
}

/// The enrichment services that can add facts to discovered items.
///
/// Each enricher owns a disjoint set of item fields:
/// - `Crossref` → `metadata.publisher`, `metadata.journal`, `metadata.issn`
/// - `Unpaywall` → `links.oa_pdf_url`, `metadata.oa_status`
/// - `SemanticScholar` → `signals.*`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnricherId {
    Crossref,
    Unpaywall,
    SemanticScholar,
}

impl EnricherId {
    /// Every enricher, in default order.
    pub const ALL: [EnricherId; 3] = [Self::Crossref, Self::Unpaywall, Self::SemanticScholar];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Crossref => "crossref",
            Self::Unpaywall => "unpaywall",
            Self::SemanticScholar => "semanticscholar",
        }
    }
}

impl std::fmt::Display for EnricherId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EnricherId {
    type Err = PaperScoutError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "crossref" => Ok(Self::Crossref),
            "unpaywall" => Ok(Self::Unpaywall),
            "semanticscholar" | "semantic-scholar" | "s2" => Ok(Self::SemanticScholar),
            other => Err(PaperScoutError::validation(format!(
                "unknown enricher '{other}' (expected crossref, unpaywall, semanticscholar)"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// Normalized search request handed to every provider adapter.
/// Immutable for the duration of one orchestration pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year_from: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year_to: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub per_source_limit: usize,
    pub total_limit: usize,
    #[serde(default)]
    pub open_access_only: bool,
}

impl Query {
    /// The same query with year bounds removed and the open-access filter disabled.
    pub fn relaxed(&self) -> Self {
        Self {
            year_from: None,
            year_to: None,
            open_access_only: false,
            ..self.clone()
        }
    }

    /// How many records a single provider may ask for: its own cap,
    /// never more than the run's total budget.
    pub fn request_size(&self) -> usize {
        self.per_source_limit.min(self.total_limit)
    }

    /// Whether `year` satisfies the query's year bounds. Unknown years pass.
    pub fn year_in_range(&self, year: Option<i32>) -> bool {
        let Some(year) = year else {
            return true;
        };
        self.year_from.is_none_or(|from| year >= from) && self.year_to.is_none_or(|to| year <= to)
    }
}

// ---------------------------------------------------------------------------
// DOI / dedup identity
// ---------------------------------------------------------------------------

/// Normalize a DOI into its bare, trimmed, lower-cased form.
///
/// Resolver prefixes (`https://doi.org/`, `doi:` …) are stripped. Anything that
/// does not look like a DOI (`10.` registrant prefix) normalizes to `""`.
pub fn normalize_doi(raw: &str) -> String {
    let mut doi = raw.trim().to_lowercase();

    for prefix in [
        "https://doi.org/",
        "http://doi.org/",
        "https://dx.doi.org/",
        "http://dx.doi.org/",
        "doi.org/",
        "doi:",
    ] {
        if let Some(rest) = doi.strip_prefix(prefix) {
            doi = rest.trim().to_string();
            break;
        }
    }

    if doi.starts_with("10.") && doi.contains('/') {
        doi
    } else {
        String::new()
    }
}

/// Normalize a title for identity comparison: lower-cased, whitespace collapsed.
pub fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Identity used to merge duplicate discoveries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    /// Normalized DOI.
    Doi(String),
    /// Normalized title plus publication year, for items without a DOI.
    TitleYear { title: String, year: Option<i32> },
    /// Neither DOI nor title. All such items share this single bucket.
    Anonymous,
}

impl DedupKey {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }

    /// Short stable hex digest of the key (first 16 hex chars of SHA-256).
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.to_string().as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        digest[..16].to_string()
    }
}

impl std::fmt::Display for DedupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Doi(doi) => write!(f, "doi:{doi}"),
            Self::TitleYear {
                title,
                year: Some(year),
            } => write!(f, "title:{title}|{year}"),
            Self::TitleYear { title, year: None } => write!(f, "title:{title}|"),
            Self::Anonymous => Ok(()),
        }
    }
}

/// Whether a URL looks like it serves a PDF directly
/// (`.pdf` suffix, a `/pdf` path segment, or a `pdf=render` switch).
pub fn looks_like_pdf_url(url: &str) -> bool {
    let lower = url.trim().to_ascii_lowercase();
    let path = lower.split(['?', '#']).next().unwrap_or("");
    path.ends_with(".pdf") || path.contains("/pdf") || lower.contains("pdf=render")
}

// ---------------------------------------------------------------------------
// DiscoveredItem
// ---------------------------------------------------------------------------

/// Download links known for an item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Links {
    /// Open-access PDF resolved by the open-access enricher.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oa_pdf_url: Option<String>,
    /// Direct PDF link reported by the discovering provider itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_pdf_url: Option<String>,
}

/// Bibliographic metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issn: Option<String>,
    /// Open-access status (`gold`, `green`, `hybrid`, `bronze`, `closed`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oa_status: Option<String>,
}

/// Citation-derived signals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signals {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub influential_citation_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields_of_study: Option<Vec<String>>,
}

/// A candidate work found by one provider.
///
/// `title`, `year`, and `doi` make up the item's identity and are fixed at
/// construction; enrichment may only fill in `links`, `metadata`, and `signals`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredItem {
    title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    year: Option<i32>,
    #[serde(default, deserialize_with = "deserialize_doi")]
    doi: String,
    pub authors_display: String,
    #[serde(rename = "abstract", default, skip_serializing_if = "Option::is_none")]
    pub abstract_text: Option<String>,
    pub source_provider: ProviderId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landing_url: Option<String>,
    #[serde(default)]
    pub links: Links,
    #[serde(default)]
    pub metadata: ItemMetadata,
    #[serde(default)]
    pub signals: Signals,
}

fn deserialize_doi<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let raw = String::deserialize(deserializer)?;
    Ok(normalize_doi(&raw))
}

impl DiscoveredItem {
    /// Create an item with its identity fields. The DOI is normalized here.
    pub fn new(
        source_provider: ProviderId,
        title: impl Into<String>,
        year: Option<i32>,
        doi: &str,
    ) -> Self {
        Self {
            title: title.into().trim().to_string(),
            year,
            doi: normalize_doi(doi),
            authors_display: String::new(),
            abstract_text: None,
            source_provider,
            landing_url: None,
            links: Links::default(),
            metadata: ItemMetadata::default(),
            signals: Signals::default(),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn year(&self) -> Option<i32> {
        self.year
    }

    /// Normalized DOI, or `""` when unknown.
    pub fn doi(&self) -> &str {
        &self.doi
    }

    /// The key this item is deduplicated under.
    pub fn dedup_key(&self) -> DedupKey {
        if !self.doi.is_empty() {
            return DedupKey::Doi(self.doi.clone());
        }
        let title = normalize_title(&self.title);
        if title.is_empty() {
            DedupKey::Anonymous
        } else {
            DedupKey::TitleYear {
                title,
                year: self.year,
            }
        }
    }

    /// Stable identifier for downstream storage: the DOI, else a key fingerprint.
    pub fn paper_id(&self) -> String {
        if self.doi.is_empty() {
            self.dedup_key().fingerprint()
        } else {
            self.doi.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// Adapter statistics
// ---------------------------------------------------------------------------

/// Outcome counters for one adapter invocation. Always produced, even when
/// every request the adapter made failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterStats {
    pub name: String,
    pub fetched_count: usize,
    pub error_count: usize,
    #[serde(default)]
    pub error_details: Vec<String>,
}

/// Per-provider discovery statistics.
pub type ProviderStats = AdapterStats;

/// Per-enricher statistics.
pub type EnricherStats = AdapterStats;

impl AdapterStats {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Record one failed call.
    pub fn record_error(&mut self, detail: impl Into<String>) {
        self.error_count += 1;
        self.error_details.push(detail.into());
    }

    /// Record `count` failed units sharing one cause (e.g. a failed batch call).
    pub fn record_errors(&mut self, count: usize, detail: impl Into<String>) {
        if count == 0 {
            return;
        }
        self.error_count += count;
        self.error_details.push(detail.into());
    }

    /// Fold another pass's counters into this one (used by the relaxed retry).
    pub fn absorb(&mut self, other: AdapterStats) {
        self.fetched_count += other.fetched_count;
        self.error_count += other.error_count;
        self.error_details.extend(other.error_details);
    }
}

// ---------------------------------------------------------------------------
// Inbound request / outbound result
// ---------------------------------------------------------------------------

fn default_max_results() -> usize {
    25
}
fn default_per_source_limit() -> usize {
    10
}
fn default_true() -> bool {
    true
}

/// A discovery request as received from a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub research_domain: Option<String>,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_per_source_limit")]
    pub per_source_limit: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year_from: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year_to: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Providers to query, in priority order. `None` means all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<ProviderId>>,
    /// Enrichers to run. `None` means all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrich_with: Option<Vec<EnricherId>>,
    #[serde(default)]
    pub open_access_only: bool,
    #[serde(default = "default_true")]
    pub auto_fallback: bool,
    #[serde(default)]
    pub store: bool,
    /// `Some(false)` stores abstracts only; `None` defers to configuration.
    #[serde(default)]
    pub full_text: Option<bool>,
}

impl DiscoveryRequest {
    /// A request with default limits and no filters.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            research_domain: None,
            max_results: default_max_results(),
            per_source_limit: default_per_source_limit(),
            year_from: None,
            year_to: None,
            language: None,
            sources: None,
            enrich_with: None,
            open_access_only: false,
            auto_fallback: true,
            store: false,
            full_text: None,
        }
    }

    /// Reject requests no provider could meaningfully answer.
    pub fn validate(&self) -> crate::Result<()> {
        if self.query.trim().is_empty() {
            return Err(PaperScoutError::validation("query must not be empty"));
        }
        if self.max_results == 0 {
            return Err(PaperScoutError::validation("maxResults must be at least 1"));
        }
        if self.per_source_limit == 0 {
            return Err(PaperScoutError::validation(
                "perSourceLimit must be at least 1",
            ));
        }
        if let (Some(from), Some(to)) = (self.year_from, self.year_to) {
            if from > to {
                return Err(PaperScoutError::validation(format!(
                    "yearFrom ({from}) is after yearTo ({to})"
                )));
            }
        }
        Ok(())
    }

    /// The normalized query this request describes.
    pub fn to_query(&self) -> Query {
        Query {
            text: self.query.trim().to_string(),
            year_from: self.year_from,
            year_to: self.year_to,
            language: self
                .language
                .as_ref()
                .map(|l| l.trim().to_lowercase())
                .filter(|l| !l.is_empty()),
            per_source_limit: self.per_source_limit,
            total_limit: self.max_results,
            open_access_only: self.open_access_only,
        }
    }

    /// Selected providers in priority order, defaulting to all.
    pub fn providers(&self) -> Vec<ProviderId> {
        dedup_preserving_order(self.sources.as_deref().unwrap_or(&ProviderId::ALL))
    }

    /// Selected enrichers, defaulting to all.
    pub fn enrichers(&self) -> Vec<EnricherId> {
        dedup_preserving_order(self.enrich_with.as_deref().unwrap_or(&EnricherId::ALL))
    }
}

fn dedup_preserving_order<T: Copy + PartialEq>(ids: &[T]) -> Vec<T> {
    let mut out: Vec<T> = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(id) {
            out.push(*id);
        }
    }
    out
}

/// What a discovery run hands back to its caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResponse {
    pub run_id: RunId,
    /// `false` only when an unrecoverable fault occurred (e.g. the store was
    /// required and unavailable). Adapter failures never flip this.
    pub success: bool,
    /// Merged, deduplicated, enriched items, truncated to `maxResults`.
    pub documents: Vec<DiscoveredItem>,
    /// Number of unique items found before truncation.
    pub total_found: usize,
    /// Number of chunks written to the store.
    pub stored: usize,
    pub source_stats: Vec<ProviderStats>,
    pub enrichment_stats: Vec<EnricherStats>,
    /// Whether the relaxed-filter retry pass ran.
    #[serde(default)]
    pub relaxed_retry: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}
