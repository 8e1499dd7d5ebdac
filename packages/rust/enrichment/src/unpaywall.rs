//! Unpaywall `/v2/{doi}`: open-access status and best OA PDF.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::instrument;

use paperscout_http::{CallSpec, HttpGateway};
use paperscout_shared::{EnricherId, EnricherStats, Result};

use crate::{DoiPatch, EnricherAdapter, EnrichmentPatch, doi_url, non_empty, per_doi};

pub struct UnpaywallEnricher {
    gateway: HttpGateway,
    base_url: String,
}

impl UnpaywallEnricher {
    /// `base_url` already includes the `/v2` version segment.
    pub fn new(gateway: HttpGateway, base_url: &str) -> Self {
        Self {
            gateway,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn lookup(&self, doi: String) -> Result<Option<DoiPatch>> {
        let call = CallSpec::new("unpaywall lookup", self.gateway.options().enrich_timeout);
        let url = doi_url(&self.base_url, &[], &doi)?;
        let params = [("email", self.gateway.contact_email().to_string())];
        let record: Record = self.gateway.get_json(&call, url.as_str(), &params).await?;
        Ok(to_patch(record))
    }
}

#[async_trait]
impl EnricherAdapter for UnpaywallEnricher {
    fn id(&self) -> EnricherId {
        EnricherId::Unpaywall
    }

    #[instrument(skip_all, fields(enricher = "unpaywall", dois = dois.len()))]
    async fn enrich(&self, dois: &[String]) -> (Vec<DoiPatch>, EnricherStats) {
        per_doi(self.id(), dois, |doi| self.lookup(doi)).await
    }
}

#[derive(Debug, Deserialize)]
struct Record {
    doi: Option<String>,
    oa_status: Option<String>,
    best_oa_location: Option<Location>,
}

#[derive(Debug, Deserialize)]
struct Location {
    url_for_pdf: Option<String>,
}

fn to_patch(record: Record) -> Option<DoiPatch> {
    let doi = non_empty(record.doi)?;
    let patch = EnrichmentPatch::OpenAccess {
        oa_status: non_empty(record.oa_status).map(|s| s.to_lowercase()),
        oa_pdf_url: record.best_oa_location.and_then(|l| non_empty(l.url_for_pdf)),
    };
    Some((doi, patch))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fixture, gateway};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn closed_record_has_no_pdf() {
        let record: Record = serde_json::from_str(
            r#"{"doi": "10.1/closed", "is_oa": false, "oa_status": "closed", "best_oa_location": null}"#,
        )
        .expect("parse");
        let (_, patch) = to_patch(record).expect("patch");
        assert_eq!(
            patch,
            EnrichmentPatch::OpenAccess {
                oa_status: Some("closed".into()),
                oa_pdf_url: None,
            }
        );
    }

    #[tokio::test]
    async fn looks_up_with_email() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/10.1234/chain.2022.001"))
            .and(query_param("email", "test@example.org"))
            .respond_with(ResponseTemplate::new(200).set_body_string(fixture("unpaywall.json")))
            .expect(1)
            .mount(&server)
            .await;

        let enricher = UnpaywallEnricher::new(gateway(), &server.uri());
        let (patches, stats) = enricher.enrich(&["10.1234/chain.2022.001".to_string()]).await;
        assert_eq!(stats.fetched_count, 1);
        let (doi, patch) = &patches[0];
        assert_eq!(doi, "10.1234/chain.2022.001");
        assert_eq!(
            patch,
            &EnrichmentPatch::OpenAccess {
                oa_status: Some("gold".into()),
                oa_pdf_url: Some("https://repository.example.org/oa/chain-2022-001.pdf".into()),
            }
        );
    }

    #[tokio::test]
    async fn rate_limit_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(fixture("unpaywall.json")))
            .mount(&server)
            .await;

        let enricher = UnpaywallEnricher::new(gateway(), &server.uri());
        let (patches, stats) = enricher.enrich(&["10.1234/chain.2022.001".to_string()]).await;
        assert_eq!(patches.len(), 1);
        assert_eq!(stats.error_count, 0);
    }
}
