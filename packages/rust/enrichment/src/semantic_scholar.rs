//! Semantic Scholar `POST /paper/batch`: citation counts and fields of study.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{instrument, warn};

use paperscout_http::{CallSpec, HttpGateway};
use paperscout_shared::{EnricherId, EnricherStats, Result};

use crate::{DoiPatch, EnricherAdapter, EnrichmentPatch, non_empty};

/// Largest batch the service accepts.
pub const MAX_BATCH: usize = 500;

const FIELDS: &str = "externalIds,citationCount,influentialCitationCount,fieldsOfStudy";

pub struct SemanticScholarEnricher {
    gateway: HttpGateway,
    base_url: String,
    api_key: Option<String>,
}

impl SemanticScholarEnricher {
    /// `base_url` already includes the `/graph/v1` segment.
    pub fn new(gateway: HttpGateway, base_url: &str, api_key: Option<String>) -> Self {
        Self {
            gateway,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    async fn lookup_batch(&self, dois: &[String]) -> Result<Vec<DoiPatch>> {
        let body = serde_json::json!({
            "ids": dois.iter().map(|d| format!("DOI:{d}")).collect::<Vec<_>>(),
        });
        let call = CallSpec::new("semanticscholar batch", self.gateway.options().enrich_timeout);
        let url = format!("{}/paper/batch", self.base_url);
        let response = self
            .gateway
            .execute(&call, |client| {
                let request = client.post(&url).query(&[("fields", FIELDS)]).json(&body);
                match &self.api_key {
                    Some(key) => request.header("x-api-key", key),
                    None => request,
                }
            })
            .await?;
        let papers: Vec<Option<Paper>> = response.json(&call.label)?;
        Ok(papers.into_iter().flatten().filter_map(to_patch).collect())
    }
}

#[async_trait]
impl EnricherAdapter for SemanticScholarEnricher {
    fn id(&self) -> EnricherId {
        EnricherId::SemanticScholar
    }

    #[instrument(skip_all, fields(enricher = "semanticscholar", dois = dois.len()))]
    async fn enrich(&self, dois: &[String]) -> (Vec<DoiPatch>, EnricherStats) {
        let mut stats = EnricherStats::new(self.id().as_str());
        let mut patches = Vec::new();

        for batch in dois.chunks(MAX_BATCH) {
            match self.lookup_batch(batch).await {
                Ok(found) => {
                    stats.fetched_count += batch.len();
                    patches.extend(found);
                }
                Err(e) => {
                    warn!(batch = batch.len(), error = %e, "batch lookup failed");
                    stats.record_errors(batch.len(), format!("batch of {}: {e}", batch.len()));
                }
            }
        }
        (patches, stats)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Paper {
    external_ids: Option<ExternalIds>,
    citation_count: Option<u64>,
    influential_citation_count: Option<u64>,
    fields_of_study: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ExternalIds {
    #[serde(rename = "DOI")]
    doi: Option<String>,
}

fn to_patch(paper: Paper) -> Option<DoiPatch> {
    let doi = non_empty(paper.external_ids.and_then(|ids| ids.doi))?;
    let patch = EnrichmentPatch::Citations {
        citation_count: paper.citation_count,
        influential_citation_count: paper.influential_citation_count,
        fields_of_study: paper.fields_of_study.filter(|f| !f.is_empty()),
    };
    Some((doi, patch))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fixture, gateway};
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn batch_skips_nulls_and_keys_by_reported_doi() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/paper/batch"))
            .and(query_param("fields", FIELDS))
            .and(header("x-api-key", "s2-key"))
            .and(body_partial_json(serde_json::json!({
                "ids": ["DOI:10.1234/chain.2022.001", "DOI:10.5555/dao.2023.7"]
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(fixture("semantic_scholar_batch.json")),
            )
            .expect(1)
            .mount(&server)
            .await;

        let enricher =
            SemanticScholarEnricher::new(gateway(), &server.uri(), Some("s2-key".into()));
        let dois = vec![
            "10.1234/chain.2022.001".to_string(),
            "10.5555/dao.2023.7".to_string(),
        ];
        let (patches, stats) = enricher.enrich(&dois).await;
        assert_eq!(stats.fetched_count, 2);
        assert_eq!(patches.len(), 2);
        assert_eq!(patches[0].0, "10.1234/Chain.2022.001");
        assert_eq!(
            patches[0].1,
            EnrichmentPatch::Citations {
                citation_count: Some(57),
                influential_citation_count: Some(6),
                fields_of_study: Some(vec!["Computer Science".into(), "Economics".into()]),
            }
        );
    }

    #[tokio::test]
    async fn failed_batch_counts_every_doi() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400))
            .expect(2)
            .mount(&server)
            .await;

        let enricher = SemanticScholarEnricher::new(gateway(), &server.uri(), None);
        let dois: Vec<String> = (0..MAX_BATCH + 3).map(|i| format!("10.1/{i}")).collect();
        let (patches, stats) = enricher.enrich(&dois).await;
        assert!(patches.is_empty());
        assert_eq!(stats.error_count, MAX_BATCH + 3);
        assert_eq!(stats.error_details.len(), 2);
    }
}
