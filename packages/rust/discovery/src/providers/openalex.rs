//! OpenAlex `/works` search.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::instrument;

use paperscout_http::{CallSpec, HttpGateway};
use paperscout_shared::{DiscoveredItem, PaperScoutError, ProviderId, ProviderStats, Query, Result};

use super::{ProviderAdapter, join_authors, non_empty, settle};
use crate::parser::reconstruct_abstract;

/// OpenAlex caps `per-page` at 200.
const MAX_PER_PAGE: usize = 200;

pub struct OpenAlexAdapter {
    gateway: HttpGateway,
    base_url: String,
}

impl OpenAlexAdapter {
    pub fn new(gateway: HttpGateway, base_url: &str) -> Self {
        Self {
            gateway,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn search(&self, query: &Query) -> Result<Vec<DiscoveredItem>> {
        let mut params = vec![
            ("search", query.text.clone()),
            ("per-page", query.request_size().min(MAX_PER_PAGE).to_string()),
            ("mailto", self.gateway.contact_email().to_string()),
        ];
        let filter = build_filter(query);
        if !filter.is_empty() {
            params.push(("filter", filter));
        }

        let call = CallSpec::new("openalex search", self.gateway.options().search_timeout);
        let url = format!("{}/works", self.base_url);
        let response = self
            .gateway
            .execute(&call, |client| client.get(&url).query(&params))
            .await?;
        parse_works(&response.body)
    }
}

#[async_trait]
impl ProviderAdapter for OpenAlexAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::OpenAlex
    }

    #[instrument(skip_all, fields(provider = "openalex"))]
    async fn discover(&self, query: &Query) -> (Vec<DiscoveredItem>, ProviderStats) {
        settle(self.id(), query, self.search(query).await)
    }
}

/// `filter=` value: publication-date bounds, language, open-access flag.
fn build_filter(query: &Query) -> String {
    let mut parts = Vec::new();
    if let Some(from) = query.year_from {
        parts.push(format!("from_publication_date:{from}-01-01"));
    }
    if let Some(to) = query.year_to {
        parts.push(format!("to_publication_date:{to}-12-31"));
    }
    if let Some(lang) = &query.language {
        parts.push(format!("language:{lang}"));
    }
    if query.open_access_only {
        parts.push("is_oa:true".to_string());
    }
    parts.join(",")
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WorksResponse {
    #[serde(default)]
    results: Option<Vec<Work>>,
}

#[derive(Debug, Deserialize)]
struct Work {
    id: Option<String>,
    doi: Option<String>,
    title: Option<String>,
    display_name: Option<String>,
    publication_year: Option<i32>,
    authorships: Option<Vec<Authorship>>,
    abstract_inverted_index: Option<HashMap<String, Vec<usize>>>,
    primary_location: Option<Location>,
    open_access: Option<OpenAccess>,
    cited_by_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Authorship {
    author: Option<Author>,
}

#[derive(Debug, Deserialize)]
struct Author {
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Location {
    landing_page_url: Option<String>,
    pdf_url: Option<String>,
    source: Option<Source>,
}

#[derive(Debug, Deserialize)]
struct Source {
    display_name: Option<String>,
    issn_l: Option<String>,
    host_organization_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAccess {
    oa_status: Option<String>,
}

fn parse_works(body: &[u8]) -> Result<Vec<DiscoveredItem>> {
    let response: WorksResponse = serde_json::from_slice(body)
        .map_err(|e| PaperScoutError::parse(format!("openalex payload: {e}")))?;
    Ok(response
        .results
        .unwrap_or_default()
        .into_iter()
        .map(normalize)
        .collect())
}

fn normalize(work: Work) -> DiscoveredItem {
    let title = non_empty(work.title)
        .or_else(|| non_empty(work.display_name))
        .unwrap_or_default();
    let mut item = DiscoveredItem::new(
        ProviderId::OpenAlex,
        title,
        work.publication_year,
        work.doi.as_deref().unwrap_or(""),
    );

    item.authors_display = join_authors(
        work.authorships
            .unwrap_or_default()
            .into_iter()
            .filter_map(|a| a.author.and_then(|a| a.display_name)),
    );
    item.abstract_text = work
        .abstract_inverted_index
        .as_ref()
        .and_then(reconstruct_abstract);

    let location = work.primary_location;
    item.landing_url = location
        .as_ref()
        .and_then(|l| non_empty(l.landing_page_url.clone()))
        .or_else(|| non_empty(work.id));
    item.links.provider_pdf_url = location.as_ref().and_then(|l| non_empty(l.pdf_url.clone()));

    if let Some(source) = location.and_then(|l| l.source) {
        item.metadata.journal = non_empty(source.display_name);
        item.metadata.issn = non_empty(source.issn_l);
        item.metadata.publisher = non_empty(source.host_organization_name);
    }
    item.metadata.oa_status = work.open_access.and_then(|oa| non_empty(oa.oa_status));
    item.signals.citation_count = work.cited_by_count;

    item
}
