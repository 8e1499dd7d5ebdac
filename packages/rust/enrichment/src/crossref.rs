//! Crossref `/works/{doi}`: publisher, journal, ISSN.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::instrument;

use paperscout_http::{CallSpec, HttpGateway};
use paperscout_shared::{EnricherId, EnricherStats, Result};

use crate::{DoiPatch, EnricherAdapter, EnrichmentPatch, doi_url, non_empty, per_doi};

pub struct CrossrefEnricher {
    gateway: HttpGateway,
    base_url: String,
}

impl CrossrefEnricher {
    pub fn new(gateway: HttpGateway, base_url: &str) -> Self {
        Self {
            gateway,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn lookup(&self, doi: String) -> Result<Option<DoiPatch>> {
        let call = CallSpec::new("crossref work", self.gateway.options().enrich_timeout);
        let url = doi_url(&self.base_url, &["works"], &doi)?;
        let params = [("mailto", self.gateway.contact_email().to_string())];
        let envelope: Envelope = self.gateway.get_json(&call, url.as_str(), &params).await?;
        Ok(to_patch(envelope.message))
    }
}

#[async_trait]
impl EnricherAdapter for CrossrefEnricher {
    fn id(&self) -> EnricherId {
        EnricherId::Crossref
    }

    #[instrument(skip_all, fields(enricher = "crossref", dois = dois.len()))]
    async fn enrich(&self, dois: &[String]) -> (Vec<DoiPatch>, EnricherStats) {
        per_doi(self.id(), dois, |doi| self.lookup(doi)).await
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    message: Work,
}

#[derive(Debug, Deserialize)]
struct Work {
    #[serde(rename = "DOI")]
    doi: Option<String>,
    publisher: Option<String>,
    #[serde(rename = "container-title", default)]
    container_title: Vec<String>,
    #[serde(rename = "ISSN", default)]
    issn: Vec<String>,
}

/// Keyed by the DOI Crossref reports, not the one asked for.
fn to_patch(work: Work) -> Option<DoiPatch> {
    let doi = non_empty(work.doi)?;
    let patch = EnrichmentPatch::Publisher {
        publisher: non_empty(work.publisher),
        journal: non_empty(work.container_title.into_iter().next()),
        issn: non_empty(work.issn.into_iter().next()),
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
    fn fixture_becomes_publisher_patch() {
        let envelope: Envelope = serde_json::from_str(&fixture("crossref.json")).expect("parse");
        let (doi, patch) = to_patch(envelope.message).expect("patch");
        assert_eq!(doi, "10.1234/CHAIN.2022.001");
        assert_eq!(
            patch,
            EnrichmentPatch::Publisher {
                publisher: Some("Ledger Press".into()),
                journal: Some("Journal of Distributed Ledgers".into()),
                issn: Some("1234-5678".into()),
            }
        );
    }

    #[test]
    fn missing_doi_yields_nothing() {
        let work = Work {
            doi: None,
            publisher: Some("P".into()),
            container_title: Vec::new(),
            issn: Vec::new(),
        };
        assert!(to_patch(work).is_none());
    }

    #[tokio::test]
    async fn sends_contact_address() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/works/10.1234/chain.2022.001"))
            .and(query_param("mailto", "test@example.org"))
            .respond_with(ResponseTemplate::new(200).set_body_string(fixture("crossref.json")))
            .expect(1)
            .mount(&server)
            .await;

        let enricher = CrossrefEnricher::new(gateway(), &server.uri());
        let (patches, stats) = enricher.enrich(&["10.1234/chain.2022.001".to_string()]).await;
        assert_eq!(patches.len(), 1);
        assert_eq!(stats.fetched_count, 1);
        assert_eq!(stats.error_count, 0);
    }

    #[tokio::test]
    async fn reserved_characters_stay_in_the_path() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/works/10.1002/1097(1998)49:8%3C693%3E3.0.co;2-o%23x%3Fy"))
            .respond_with(ResponseTemplate::new(200).set_body_string(fixture("crossref.json")))
            .expect(1)
            .mount(&server)
            .await;

        let enricher = CrossrefEnricher::new(gateway(), &server.uri());
        let (_, stats) = enricher
            .enrich(&["10.1002/1097(1998)49:8<693>3.0.co;2-o#x?y".to_string()])
            .await;
        assert_eq!(stats.fetched_count, 1);
        assert_eq!(stats.error_count, 0);
    }

    #[tokio::test]
    async fn not_found_is_recorded_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let enricher = CrossrefEnricher::new(gateway(), &server.uri());
        let (patches, stats) = enricher.enrich(&["10.1/missing".to_string()]).await;
        assert!(patches.is_empty());
        assert_eq!(stats.error_count, 1);
        assert!(stats.error_details[0].starts_with("10.1/missing"));
    }
}
