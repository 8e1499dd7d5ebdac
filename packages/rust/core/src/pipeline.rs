//! End-to-end discovery run: discover → enrich → (optionally) acquire and store.

use std::time::Instant;

use chrono::Utc;
use tracing::{error, info, instrument};

use paperscout_acquisition::Acquirer;
use paperscout_discovery::{ProviderContext, build_providers};
use paperscout_enrichment::{EnricherContext, build_enrichers, enrich_items};
use paperscout_http::HttpGateway;
use paperscout_shared::{
    AcquisitionOptions, ApiKeys, AppConfig, DiscoveryRequest, DiscoveryResponse, GatewayOptions,
    ProviderEndpoints, Result, RunId,
};
use paperscout_storage::ChunkStore;

/// Shared collaborators for pipeline runs.
#[derive(Clone)]
pub struct PipelineContext {
    pub gateway: HttpGateway,
    pub endpoints: ProviderEndpoints,
    pub keys: ApiKeys,
    /// Acquisition defaults; a request's `fullText` and `researchDomain`
    /// override them per run.
    pub acquisition: AcquisitionOptions,
}

impl PipelineContext {
    /// Build from loaded configuration, reading API keys from the environment.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            gateway: HttpGateway::new(GatewayOptions::from(config))?,
            endpoints: config.providers.endpoints.clone(),
            keys: ApiKeys::from_env(config),
            acquisition: AcquisitionOptions::from(config),
        })
    }

    fn acquisition_for(&self, request: &DiscoveryRequest) -> AcquisitionOptions {
        let mut options = self.acquisition.clone();
        if let Some(full_text) = request.full_text {
            options.full_text = full_text;
        }
        if request.research_domain.is_some() {
            options.research_domain.clone_from(&request.research_domain);
        }
        options
    }
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when the run completes.
    fn done(&self, response: &DiscoveryResponse);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn done(&self, _response: &DiscoveryResponse) {}
}

/// Run one discovery request.
///
/// Provider and enricher failures only show up in the returned stats. The
/// response has `success: false` only when `store` was requested and the
/// store was missing or failed; the discovered documents are still returned.
/// Invalid requests are rejected with an error before anything runs.
#[instrument(skip_all, fields(query = %request.query))]
pub async fn run_discovery(
    request: &DiscoveryRequest,
    ctx: &PipelineContext,
    store: Option<&dyn ChunkStore>,
    progress: &dyn ProgressReporter,
) -> Result<DiscoveryResponse> {
    request.validate()?;

    let start = Instant::now();
    let run_id = RunId::new();
    let started_at = Utc::now();
    info!(%run_id, "starting discovery run");

    // --- Phase 1: Discovery ---
    progress.phase("Searching providers");
    let query = request.to_query();
    let providers = build_providers(
        &request.providers(),
        &ProviderContext {
            gateway: ctx.gateway.clone(),
            endpoints: ctx.endpoints.clone(),
            keys: ctx.keys.clone(),
        },
    );
    let outcome = paperscout_discovery::discover(&query, &providers, request.auto_fallback).await;
    let mut documents = outcome.items;

    // --- Phase 2: Enrichment ---
    progress.phase("Enriching metadata");
    let enrichers = build_enrichers(
        &request.enrichers(),
        &EnricherContext {
            gateway: ctx.gateway.clone(),
            endpoints: ctx.endpoints.clone(),
            keys: ctx.keys.clone(),
        },
    );
    let enrichment_stats = enrich_items(&mut documents, &enrichers).await;

    // --- Phase 3: Acquisition / storage ---
    let mut stored = 0;
    let mut failure = None;
    if request.store {
        progress.phase("Acquiring and storing text");
        match store {
            None => failure = Some("storage requested but no chunk store is available".to_string()),
            Some(store) => {
                let acquirer = Acquirer::new(ctx.gateway.clone(), ctx.acquisition_for(request));
                match acquirer.acquire_and_store(&documents, store).await {
                    Ok(count) => stored = count,
                    Err(e) => failure = Some(e.to_string()),
                }
            }
        }
        if let Some(message) = &failure {
            error!(%run_id, error = %message, "storage failed");
        }
    }

    let response = DiscoveryResponse {
        run_id,
        success: failure.is_none(),
        documents,
        total_found: outcome.total_found,
        stored,
        source_stats: outcome.stats,
        enrichment_stats,
        relaxed_retry: outcome.relaxed_retry,
        error: failure,
        started_at,
        completed_at: Utc::now(),
    };

    info!(
        run_id = %response.run_id,
        documents = response.documents.len(),
        total_found = response.total_found,
        stored = response.stored,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "discovery run complete"
    );
    progress.done(&response);
    Ok(response)
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use paperscout_shared::ProviderId;
    use paperscout_storage::Storage;

    #[tokio::test]
    async fn end_to_end_with_storage() {
        let server = mock_services().await;
        let ctx = context(&server.uri());
        let db = temp_db_path();
        let storage = Storage::open(&db).await.expect("open");

        let request = DiscoveryRequest {
            store: true,
            research_domain: Some("governance".into()),
            ..DiscoveryRequest::new("blockchain governance")
        };
        let response = run_discovery(&request, &ctx, Some(&storage), &SilentProgress)
            .await
            .expect("run");

        assert!(response.success);
        // CORE has no key: recorded, not fatal.
        assert_eq!(response.source_stats[0].name, "core");
        assert_eq!(response.source_stats[0].error_count, 1);
        // 2 OpenAlex + 2 Europe PMC + 2 arXiv, one arXiv DOI already seen.
        assert_eq!(response.documents.len(), 5);
        assert_eq!(response.total_found, 5);

        let chain = response
            .documents
            .iter()
            .find(|d| d.doi() == "10.1234/chain.2022.001")
            .expect("chain item");
        assert_eq!(chain.source_provider, ProviderId::OpenAlex);
        assert_eq!(chain.metadata.publisher.as_deref(), Some("Ledger Press"));
        assert_eq!(chain.signals.citation_count, Some(57));
        assert!(chain.links.oa_pdf_url.is_some());

        assert!(response.stored > 0);
        assert_eq!(storage.count_chunks().await.expect("count"), response.stored as u64);
        let chunks = storage
            .chunks_for_paper("10.1234/chain.2022.001")
            .await
            .expect("chunks");
        assert_eq!(chunks[0].metadata["publisher"], "Ledger Press");
        assert_eq!(chunks[0].metadata["researchDomain"], "governance");

        cleanup(&db);
    }

    #[tokio::test]
    async fn missing_store_fails_run_but_keeps_documents() {
        let server = mock_services().await;
        let ctx = context(&server.uri());
        let request = DiscoveryRequest {
            store: true,
            sources: Some(vec![ProviderId::OpenAlex]),
            ..DiscoveryRequest::new("blockchain governance")
        };
        let response = run_discovery(&request, &ctx, None, &SilentProgress)
            .await
            .expect("run");
        assert!(!response.success);
        assert!(response.error.is_some());
        assert_eq!(response.documents.len(), 2);
        assert_eq!(response.stored, 0);
    }

    #[tokio::test]
    async fn max_results_truncates() {
        let server = mock_services().await;
        let ctx = context(&server.uri());
        let request = DiscoveryRequest {
            max_results: 3,
            ..DiscoveryRequest::new("blockchain governance")
        };
        let response = run_discovery(&request, &ctx, None, &SilentProgress)
            .await
            .expect("run");
        assert!(response.success);
        assert_eq!(response.documents.len(), 3);
        assert_eq!(response.total_found, 5);
    }

    #[tokio::test]
    async fn invalid_request_is_rejected() {
        let ctx = context("http://127.0.0.1:9");
        let request = DiscoveryRequest::new("   ");
        assert!(run_discovery(&request, &ctx, None, &SilentProgress).await.is_err());
    }
}
