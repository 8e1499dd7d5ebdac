//! CORE v3 `/search/works`.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::instrument;

use paperscout_http::{CallSpec, HttpGateway};
use paperscout_shared::{DiscoveredItem, PaperScoutError, ProviderId, ProviderStats, Query, Result};

use super::{ProviderAdapter, join_authors, non_empty, settle};

pub struct CoreAdapter {
    gateway: HttpGateway,
    base_url: String,
    api_key: Option<String>,
}

impl CoreAdapter {
    pub fn new(gateway: HttpGateway, base_url: &str, api_key: Option<String>) -> Self {
        Self {
            gateway,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    async fn search(&self, query: &Query) -> Result<Vec<DiscoveredItem>> {
        let Some(key) = self.api_key.as_deref() else {
            return Err(PaperScoutError::config(
                "CORE API key not configured; provider skipped",
            ));
        };

        let params = [
            ("q", build_query_string(query)),
            ("limit", query.request_size().to_string()),
        ];
        let call = CallSpec::new("core search", self.gateway.options().search_timeout);
        let url = format!("{}/search/works", self.base_url);
        let response = self
            .gateway
            .execute(&call, |client| {
                client.get(&url).bearer_auth(key).query(&params)
            })
            .await?;
        parse_results(&response.body)
    }
}

#[async_trait]
impl ProviderAdapter for CoreAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Core
    }

    #[instrument(skip_all, fields(provider = "core"))]
    async fn discover(&self, query: &Query) -> (Vec<DiscoveredItem>, ProviderStats) {
        settle(self.id(), query, self.search(query).await)
    }
}

/// CORE takes filters inside its query language rather than as parameters.
fn build_query_string(query: &Query) -> String {
    let mut q = format!("({})", query.text);
    if let Some(from) = query.year_from {
        q.push_str(&format!(" AND yearPublished>={from}"));
    }
    if let Some(to) = query.year_to {
        q.push_str(&format!(" AND yearPublished<={to}"));
    }
    if let Some(lang) = &query.language {
        q.push_str(&format!(" AND language.code:{lang}"));
    }
    if query.open_access_only {
        q.push_str(" AND _exists_:downloadUrl");
    }
    q
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SearchResponse {
    results: Option<Vec<Work>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Work {
    id: Option<serde_json::Value>,
    title: Option<String>,
    authors: Option<Vec<Author>>,
    year_published: Option<i32>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    doi: Option<String>,
    download_url: Option<String>,
    publisher: Option<String>,
    links: Option<Vec<Link>>,
}

#[derive(Debug, Deserialize)]
struct Author {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Link {
    #[serde(rename = "type")]
    kind: Option<String>,
    url: Option<String>,
}

fn parse_results(body: &[u8]) -> Result<Vec<DiscoveredItem>> {
    let response: SearchResponse = serde_json::from_slice(body)
        .map_err(|e| PaperScoutError::parse(format!("core payload: {e}")))?;
    Ok(response
        .results
        .unwrap_or_default()
        .into_iter()
        .map(normalize)
        .collect())
}

fn normalize(work: Work) -> DiscoveredItem {
    let mut item = DiscoveredItem::new(
        ProviderId::Core,
        work.title.unwrap_or_default(),
        work.year_published,
        work.doi.as_deref().unwrap_or(""),
    );

    item.authors_display = join_authors(
        work.authors
            .unwrap_or_default()
            .into_iter()
            .filter_map(|a| a.name),
    );
    item.abstract_text = non_empty(work.abstract_text)
        .map(|a| paperscout_text::markup_to_text(&a))
        .filter(|a| !a.is_empty());
    item.metadata.publisher = non_empty(work.publisher);

    let links = work.links.unwrap_or_default();
    let link_of = |kind: &str| {
        links
            .iter()
            .find(|l| l.kind.as_deref() == Some(kind))
            .and_then(|l| non_empty(l.url.clone()))
    };

    item.links.provider_pdf_url = non_empty(work.download_url).or_else(|| link_of("download"));
    item.landing_url = link_of("display").or_else(|| {
        work.id.as_ref().and_then(|id| match id {
            serde_json::Value::Number(n) => Some(format!("https://core.ac.uk/works/{n}")),
            serde_json::Value::String(s) if !s.is_empty() => {
                Some(format!("https://core.ac.uk/works/{s}"))
            }
            _ => None,
        })
    });

    item
}
