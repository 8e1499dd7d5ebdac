//! DOI-keyed enrichment: publisher metadata, open-access resolution, and
//! citation signals.
//!
//! Adapters never touch items. Each returns patches keyed by the DOI found in
//! the service's own response; [`enrich_items`] applies them once every
//! adapter has finished, matching DOIs case-insensitively. Patches that match
//! no item are dropped.

mod crossref;
mod semantic_scholar;
mod unpaywall;

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, info, instrument, warn};
use url::Url;

use paperscout_http::HttpGateway;
use paperscout_shared::{
    ApiKeys, DiscoveredItem, EnricherId, EnricherStats, PaperScoutError, ProviderEndpoints, Result,
    normalize_doi,
};

pub use crossref::CrossrefEnricher;
pub use semantic_scholar::SemanticScholarEnricher;
pub use unpaywall::UnpaywallEnricher;

// ---------------------------------------------------------------------------
// Patches
// ---------------------------------------------------------------------------

/// Facts one enricher learned about one DOI.
///
/// Each variant writes only the fields its enricher owns. A `Some` value
/// overwrites the item's field; `None` leaves it alone.
#[derive(Debug, Clone, PartialEq)]
pub enum EnrichmentPatch {
    Publisher {
        publisher: Option<String>,
        journal: Option<String>,
        issn: Option<String>,
    },
    OpenAccess {
        oa_status: Option<String>,
        oa_pdf_url: Option<String>,
    },
    Citations {
        citation_count: Option<u64>,
        influential_citation_count: Option<u64>,
        fields_of_study: Option<Vec<String>>,
    },
}

impl EnrichmentPatch {
    pub fn apply(&self, item: &mut DiscoveredItem) {
        fn set<T: Clone>(field: &mut Option<T>, value: &Option<T>) {
            if value.is_some() {
                field.clone_from(value);
            }
        }

        match self {
            Self::Publisher {
                publisher,
                journal,
                issn,
            } => {
                set(&mut item.metadata.publisher, publisher);
                set(&mut item.metadata.journal, journal);
                set(&mut item.metadata.issn, issn);
            }
            Self::OpenAccess {
                oa_status,
                oa_pdf_url,
            } => {
                set(&mut item.metadata.oa_status, oa_status);
                set(&mut item.links.oa_pdf_url, oa_pdf_url);
            }
            Self::Citations {
                citation_count,
                influential_citation_count,
                fields_of_study,
            } => {
                set(&mut item.signals.citation_count, citation_count);
                set(
                    &mut item.signals.influential_citation_count,
                    influential_citation_count,
                );
                set(&mut item.signals.fields_of_study, fields_of_study);
            }
        }
    }
}

/// A patch and the DOI the service reported it for.
pub type DoiPatch = (String, EnrichmentPatch);

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A service that adds facts to items it can look up by DOI.
#[async_trait]
pub trait EnricherAdapter: Send + Sync {
    fn id(&self) -> EnricherId;

    /// Look up every DOI. Always returns stats; failures are recorded there.
    async fn enrich(&self, dois: &[String]) -> (Vec<DoiPatch>, EnricherStats);
}

/// Everything an enricher needs to reach its service.
#[derive(Clone)]
pub struct EnricherContext {
    pub gateway: HttpGateway,
    pub endpoints: ProviderEndpoints,
    pub keys: ApiKeys,
}

/// Build enrichers for `ids`, in order.
pub fn build_enrichers(ids: &[EnricherId], ctx: &EnricherContext) -> Vec<Arc<dyn EnricherAdapter>> {
    ids.iter()
        .map(|id| -> Arc<dyn EnricherAdapter> {
            match id {
                EnricherId::Crossref => Arc::new(CrossrefEnricher::new(
                    ctx.gateway.clone(),
                    &ctx.endpoints.crossref,
                )),
                EnricherId::Unpaywall => Arc::new(UnpaywallEnricher::new(
                    ctx.gateway.clone(),
                    &ctx.endpoints.unpaywall,
                )),
                EnricherId::SemanticScholar => Arc::new(SemanticScholarEnricher::new(
                    ctx.gateway.clone(),
                    &ctx.endpoints.semantic_scholar,
                    ctx.keys.semantic_scholar.clone(),
                )),
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Run every enricher concurrently over the items' DOIs, then apply the
/// returned patches. Returns one stats entry per enricher, in order.
#[instrument(skip_all, fields(items = items.len(), enrichers = adapters.len()))]
pub async fn enrich_items(
    items: &mut [DiscoveredItem],
    adapters: &[Arc<dyn EnricherAdapter>],
) -> Vec<EnricherStats> {
    let dois = Arc::new(candidate_dois(items));
    if dois.is_empty() {
        debug!("no DOIs to enrich");
        return adapters
            .iter()
            .map(|a| EnricherStats::new(a.id().as_str()))
            .collect();
    }

    let mut handles = Vec::with_capacity(adapters.len());
    for adapter in adapters {
        let adapter = Arc::clone(adapter);
        let dois = Arc::clone(&dois);
        handles.push(tokio::spawn(async move { adapter.enrich(&dois).await }));
    }

    let mut stats = Vec::with_capacity(handles.len());
    let mut patches = Vec::new();
    for (adapter, handle) in adapters.iter().zip(handles) {
        match handle.await {
            Ok((found, enricher_stats)) => {
                info!(
                    enricher = %adapter.id(),
                    fetched = enricher_stats.fetched_count,
                    errors = enricher_stats.error_count,
                    "enricher finished"
                );
                patches.extend(found);
                stats.push(enricher_stats);
            }
            Err(e) => {
                warn!(enricher = %adapter.id(), error = %e, "enricher task failed");
                let mut enricher_stats = EnricherStats::new(adapter.id().as_str());
                enricher_stats.record_errors(dois.len(), format!("enricher task failed: {e}"));
                stats.push(enricher_stats);
            }
        }
    }

    let applied = apply_patches(items, patches);
    info!(applied, "enrichment complete");
    stats
}

/// Unique non-empty DOIs, in item order.
fn candidate_dois(items: &[DiscoveredItem]) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .iter()
        .map(|item| item.doi())
        .filter(|doi| !doi.is_empty() && seen.insert(*doi))
        .map(str::to_string)
        .collect()
}

/// Apply patches to every item with a matching DOI. Returns how many
/// patches matched at least one item.
pub fn apply_patches(items: &mut [DiscoveredItem], patches: Vec<DoiPatch>) -> usize {
    let mut by_doi: HashMap<String, Vec<usize>> = HashMap::new();
    for (idx, item) in items.iter().enumerate() {
        if !item.doi().is_empty() {
            by_doi.entry(item.doi().to_string()).or_default().push(idx);
        }
    }

    let mut applied = 0;
    for (doi, patch) in patches {
        let Some(indices) = by_doi.get(&normalize_doi(&doi)) else {
            debug!(doi = %doi, "enrichment result matched no item");
            continue;
        };
        for &idx in indices {
            patch.apply(&mut items[idx]);
        }
        applied += 1;
    }
    applied
}

/// Look up DOIs one call each, concurrently (the gateway does the limiting).
///
/// `lookup` yields `Ok(None)` when the call succeeded but carried nothing
/// usable; that still counts as fetched.
pub(crate) async fn per_doi<F, Fut>(
    id: EnricherId,
    dois: &[String],
    lookup: F,
) -> (Vec<DoiPatch>, EnricherStats)
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<Option<DoiPatch>>>,
{
    let results = join_all(dois.iter().map(|doi| {
        let fut = lookup(doi.clone());
        async move { (doi, fut.await) }
    }))
    .await;

    let mut stats = EnricherStats::new(id.as_str());
    let mut patches = Vec::new();
    for (doi, result) in results {
        match result {
            Ok(patch) => {
                stats.fetched_count += 1;
                patches.extend(patch);
            }
            Err(e) => {
                warn!(enricher = %id, doi = %doi, error = %e, "lookup failed");
                stats.record_error(format!("{doi}: {e}"));
            }
        }
    }
    (patches, stats)
}

/// Trim, drop empties.
/// `base` extended with `prefix` and the DOI's own `/`-separated parts.
///
/// Each part is percent-encoded, so `#`, `?` and `%` inside a DOI reach
/// the service instead of ending the path.
pub(crate) fn doi_url(base: &str, prefix: &[&str], doi: &str) -> Result<Url> {
    let mut url = Url::parse(base)
        .map_err(|e| PaperScoutError::config(format!("invalid endpoint {base}: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| PaperScoutError::config(format!("endpoint {base} cannot take a path")))?
        .pop_if_empty()
        .extend(prefix)
        .extend(doi.split('/'));
    Ok(url)
}

pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::time::Duration;

    use paperscout_http::HttpGateway;
    use paperscout_shared::GatewayOptions;

    pub fn fixture(name: &str) -> String {
        let path = format!(
            "{}/../../../fixtures/providers/{name}",
            env!("CARGO_MANIFEST_DIR")
        );
        std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("read {path}: {e}"))
    }

    pub fn gateway() -> HttpGateway {
        HttpGateway::new(GatewayOptions {
            concurrency: 4,
            max_attempts: 2,
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(5),
            search_timeout: Duration::from_secs(5),
            enrich_timeout: Duration::from_millis(300),
            download_timeout: Duration::from_secs(5),
            contact_email: "test@example.org".into(),
        })
        .expect("gateway")
    }
}
