//! Europe PMC REST `/search` with `resultType=core`.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::instrument;

use paperscout_http::{CallSpec, HttpGateway};
use paperscout_shared::{DiscoveredItem, PaperScoutError, ProviderId, ProviderStats, Query, Result};

use super::{ProviderAdapter, non_empty, settle};

/// Europe PMC caps `pageSize` at 1000.
const MAX_PAGE_SIZE: usize = 1000;

pub struct EuropePmcAdapter {
    gateway: HttpGateway,
    base_url: String,
}

impl EuropePmcAdapter {
    pub fn new(gateway: HttpGateway, base_url: &str) -> Self {
        Self {
            gateway,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn search(&self, query: &Query) -> Result<Vec<DiscoveredItem>> {
        let params = [
            ("query", build_query_string(query)),
            ("format", "json".to_string()),
            ("resultType", "core".to_string()),
            ("pageSize", query.request_size().min(MAX_PAGE_SIZE).to_string()),
            ("email", self.gateway.contact_email().to_string()),
        ];
        let call = CallSpec::new("europepmc search", self.gateway.options().search_timeout);
        let url = format!("{}/search", self.base_url);
        let response = self
            .gateway
            .execute(&call, |client| client.get(&url).query(&params))
            .await?;
        parse_results(&response.body)
    }
}

#[async_trait]
impl ProviderAdapter for EuropePmcAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::EuropePmc
    }

    #[instrument(skip_all, fields(provider = "europepmc"))]
    async fn discover(&self, query: &Query) -> (Vec<DiscoveredItem>, ProviderStats) {
        settle(self.id(), query, self.search(query).await)
    }
}

fn build_query_string(query: &Query) -> String {
    let mut q = format!("({})", query.text);
    match (query.year_from, query.year_to) {
        (None, None) => {}
        (from, to) => q.push_str(&format!(
            " AND PUB_YEAR:[{} TO {}]",
            from.unwrap_or(1000),
            to.unwrap_or(9999)
        )),
    }
    if query.open_access_only {
        q.push_str(" AND OPEN_ACCESS:y");
    }
    if let Some(lang) = &query.language {
        q.push_str(&format!(" AND LANG:{}", to_iso639_2(lang)));
    }
    q
}

/// Europe PMC indexes languages by three-letter bibliographic code.
fn to_iso639_2(lang: &str) -> String {
    match lang {
        "en" => "eng",
        "de" => "ger",
        "fr" => "fre",
        "es" => "spa",
        "it" => "ita",
        "pt" => "por",
        "nl" => "dut",
        "ru" => "rus",
        "zh" => "chi",
        "ja" => "jpn",
        other => other,
    }
    .to_string()
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    result_list: Option<ResultList>,
}

#[derive(Debug, Deserialize)]
struct ResultList {
    result: Option<Vec<Article>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Article {
    id: Option<String>,
    source: Option<String>,
    doi: Option<String>,
    title: Option<String>,
    author_string: Option<String>,
    pub_year: Option<String>,
    abstract_text: Option<String>,
    cited_by_count: Option<u64>,
    journal_info: Option<JournalInfo>,
    full_text_url_list: Option<FullTextUrlList>,
}

#[derive(Debug, Deserialize)]
struct JournalInfo {
    journal: Option<Journal>,
}

#[derive(Debug, Deserialize)]
struct Journal {
    title: Option<String>,
    issn: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FullTextUrlList {
    full_text_url: Option<Vec<FullTextUrl>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FullTextUrl {
    availability: Option<String>,
    document_style: Option<String>,
    url: Option<String>,
}

fn parse_results(body: &[u8]) -> Result<Vec<DiscoveredItem>> {
    let response: SearchResponse = serde_json::from_slice(body)
        .map_err(|e| PaperScoutError::parse(format!("europepmc payload: {e}")))?;
    Ok(response
        .result_list
        .and_then(|l| l.result)
        .unwrap_or_default()
        .into_iter()
        .map(normalize)
        .collect())
}

fn normalize(article: Article) -> DiscoveredItem {
    let title = article
        .title
        .as_deref()
        .map(|t| t.trim().trim_end_matches('.').to_string())
        .unwrap_or_default();
    let year = article.pub_year.as_deref().and_then(|y| y.trim().parse().ok());

    let mut item = DiscoveredItem::new(
        ProviderId::EuropePmc,
        title,
        year,
        article.doi.as_deref().unwrap_or(""),
    );

    item.authors_display = article
        .author_string
        .as_deref()
        .map(|a| a.trim().trim_end_matches('.').to_string())
        .unwrap_or_default();
    item.abstract_text = non_empty(article.abstract_text)
        .map(|a| paperscout_text::markup_to_text(&a))
        .filter(|a| !a.is_empty());
    item.signals.citation_count = article.cited_by_count;

    if let Some(journal) = article.journal_info.and_then(|j| j.journal) {
        item.metadata.journal = non_empty(journal.title);
        item.metadata.issn = non_empty(journal.issn);
    }

    let urls = article
        .full_text_url_list
        .and_then(|l| l.full_text_url)
        .unwrap_or_default();
    item.links.provider_pdf_url = urls
        .iter()
        .filter(|u| u.document_style.as_deref() == Some("pdf"))
        .find(|u| {
            u.availability
                .as_deref()
                .is_none_or(|a| !a.eq_ignore_ascii_case("subscription required"))
        })
        .and_then(|u| non_empty(u.url.clone()));

    item.landing_url = match (article.source.as_deref(), article.id.as_deref()) {
        (Some(source), Some(id)) if !id.is_empty() => {
            Some(format!("https://europepmc.org/article/{source}/{id}"))
        }
        _ => None,
    };

    item
}
