//! arXiv Atom API `/query`.

use async_trait::async_trait;
use tracing::instrument;

use paperscout_http::{CallSpec, HttpGateway};
use paperscout_shared::{DiscoveredItem, ProviderId, ProviderStats, Query, Result};

use super::{ProviderAdapter, join_authors, settle};
use crate::parser::{AtomEntry, parse_atom_feed};

/// arXiv serves at most 2000 entries per call.
const MAX_RESULTS: usize = 2000;

pub struct ArxivAdapter {
    gateway: HttpGateway,
    base_url: String,
}

impl ArxivAdapter {
    pub fn new(gateway: HttpGateway, base_url: &str) -> Self {
        Self {
            gateway,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn search(&self, query: &Query) -> Result<Vec<DiscoveredItem>> {
        let params = [
            ("search_query", build_search_query(query)),
            ("start", "0".to_string()),
            ("max_results", query.request_size().min(MAX_RESULTS).to_string()),
            ("sortBy", "relevance".to_string()),
        ];
        let call = CallSpec::new("arxiv search", self.gateway.options().search_timeout);
        let url = format!("{}/query", self.base_url);
        let response = self
            .gateway
            .execute(&call, |client| client.get(&url).query(&params))
            .await?;

        let entries = parse_atom_feed(&response.text())?;
        Ok(entries.into_iter().map(normalize).collect())
    }
}

#[async_trait]
impl ProviderAdapter for ArxivAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Arxiv
    }

    #[instrument(skip_all, fields(provider = "arxiv"))]
    async fn discover(&self, query: &Query) -> (Vec<DiscoveredItem>, ProviderStats) {
        settle(self.id(), query, self.search(query).await)
    }
}

/// Every word must match somewhere; year bounds become a submission-date range.
fn build_search_query(query: &Query) -> String {
    let mut clauses: Vec<String> = query
        .text
        .split(|c: char| !c.is_alphanumeric() && c != '-')
        .filter(|w| !w.is_empty())
        .map(|w| format!("all:{w}"))
        .collect();

    if query.year_from.is_some() || query.year_to.is_some() {
        let from = query.year_from.unwrap_or(1991);
        let to = query.year_to.unwrap_or(9999);
        clauses.push(format!("submittedDate:[{from}01010000 TO {to}12312359]"));
    }

    clauses.join(" AND ")
}

fn normalize(entry: AtomEntry) -> DiscoveredItem {
    let year = entry.year();
    let title = collapse(&entry.title);
    let mut item = DiscoveredItem::new(
        ProviderId::Arxiv,
        title,
        year,
        entry.doi.as_deref().unwrap_or(""),
    );

    item.authors_display = join_authors(&entry.authors);
    let summary = collapse(&entry.summary);
    item.abstract_text = (!summary.is_empty()).then_some(summary);
    item.landing_url = entry
        .abs_url
        .or_else(|| (!entry.id.is_empty()).then(|| entry.id.clone()));
    item.links.provider_pdf_url = entry.pdf_url;
    item.metadata.oa_status = Some("green".to_string());

    item
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::test_support::{fixture, gateway, query};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn search_query_joins_terms_and_dates() {
        let q = Query {
            year_from: Some(2020),
            year_to: Some(2024),
            ..query("blockchain governance")
        };
        assert_eq!(
            build_search_query(&q),
            "all:blockchain AND all:governance AND submittedDate:[202001010000 TO 202412312359]"
        );
        assert_eq!(build_search_query(&query("on-chain")), "all:on-chain");
    }

    #[tokio::test]
    async fn feed_is_normalized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/query"))
            .and(query_param("search_query", "all:blockchain AND all:governance"))
            .and(query_param("max_results", "10"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/atom+xml")
                    .set_body_string(fixture("arxiv.xml")),
            )
            .expect(1)
            .mount(&server)
            .await;

        let adapter = ArxivAdapter::new(gateway(), &server.uri());
        let (items, stats) = adapter.discover(&query("blockchain governance")).await;
        assert_eq!(stats.fetched_count, 2);

        let first = &items[0];
        assert_eq!(first.title(), "Formal Models of Blockchain Governance");
        assert_eq!(first.doi(), "10.1234/chain.2022.001");
        assert_eq!(first.year(), Some(2023));
        assert_eq!(first.authors_display, "Barbara Liskov, Leslie Lamport");
        assert_eq!(
            first.abstract_text.as_deref(),
            Some("We formalize governance processes & analyse their safety.")
        );
        assert_eq!(
            first.links.provider_pdf_url.as_deref(),
            Some("http://arxiv.org/pdf/2301.00001v2")
        );
        assert_eq!(first.metadata.oa_status.as_deref(), Some("green"));
        assert_eq!(items[1].doi(), "");
    }

    #[tokio::test]
    async fn server_errors_are_retried_then_recorded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/query"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let adapter = ArxivAdapter::new(gateway(), &server.uri());
        let (items, stats) = adapter.discover(&query("q")).await;
        assert!(items.is_empty());
        assert_eq!(stats.error_count, 1);
        assert!(stats.error_details[0].contains("503"));
    }
}
