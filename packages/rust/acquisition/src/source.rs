//! Choosing where an item's full text comes from.

use std::sync::LazyLock;

use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use paperscout_http::{CallSpec, HttpGateway};
use paperscout_shared::{DiscoveredItem, looks_like_pdf_url};

/// Landing pages larger than this are not worth parsing.
const MAX_LANDING_BYTES: u64 = 5 * 1024 * 1024;

/// Direct PDF link for `item`, if one is already known.
///
/// Order: the open-access PDF from enrichment, then a provider link that
/// looks like a PDF, then a landing URL that does.
pub fn resolve_source(item: &DiscoveredItem) -> Option<String> {
    if let Some(url) = item.links.oa_pdf_url.as_deref().filter(|u| !u.trim().is_empty()) {
        return Some(url.trim().to_string());
    }
    [item.links.provider_pdf_url.as_deref(), item.landing_url.as_deref()]
        .into_iter()
        .flatten()
        .find(|url| looks_like_pdf_url(url))
        .map(|url| url.trim().to_string())
}

// ---------------------------------------------------------------------------
// Landing-page resolution
// ---------------------------------------------------------------------------

/// What a landing page revealed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedPage {
    pub pdf_url: Option<String>,
    pub abstract_text: Option<String>,
}

/// Best-effort lookup of a PDF link or abstract from an item's landing page.
/// Failures yield `None`; they never fail the run.
#[async_trait]
pub trait PageResolver: Send + Sync {
    async fn resolve(&self, item: &DiscoveredItem) -> Option<ResolvedPage>;
}

/// Resolver used when page resolution is disabled.
pub struct NoopPageResolver;

#[async_trait]
impl PageResolver for NoopPageResolver {
    async fn resolve(&self, _item: &DiscoveredItem) -> Option<ResolvedPage> {
        None
    }
}

/// Fetches the landing page and reads scholarly meta tags and PDF anchors.
pub struct HtmlPageResolver {
    gateway: HttpGateway,
}

impl HtmlPageResolver {
    pub fn new(gateway: HttpGateway) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl PageResolver for HtmlPageResolver {
    async fn resolve(&self, item: &DiscoveredItem) -> Option<ResolvedPage> {
        let landing = item.landing_url.as_deref()?;
        let call = CallSpec::new("landing page", self.gateway.options().download_timeout)
            .max_bytes(MAX_LANDING_BYTES);

        let response = match self.gateway.execute(&call, |client| client.get(landing)).await {
            Ok(response) => response,
            Err(e) => {
                debug!(url = %landing, error = %e, "landing page unavailable");
                return None;
            }
        };

        let base = Url::parse(&response.final_url)
            .or_else(|_| Url::parse(landing))
            .ok()?;
        let page = parse_landing_page(&response.text(), &base);
        (page != ResolvedPage::default()).then_some(page)
    }
}

static PDF_META: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"meta[name="citation_pdf_url"]"#).expect("valid selector")
});
static ABSTRACT_META: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(
        r#"meta[name="citation_abstract"], meta[name="dc.description"], meta[name="DC.Description"]"#,
    )
    .expect("valid selector")
});
static DESCRIPTION_META: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"meta[name="description"], meta[property="og:description"]"#)
        .expect("valid selector")
});
static ANCHOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid selector"));

/// Pull a PDF link and abstract out of a landing page.
///
/// `citation_pdf_url` beats any anchor; `citation_abstract` beats a generic
/// description. Relative links are resolved against `base`.
pub fn parse_landing_page(html: &str, base: &Url) -> ResolvedPage {
    let doc = Html::parse_document(html);

    let meta_content = |selector: &Selector| {
        doc.select(selector)
            .filter_map(|el| el.value().attr("content"))
            .map(str::trim)
            .find(|c| !c.is_empty())
            .map(str::to_string)
    };

    let pdf_href = meta_content(&PDF_META).or_else(|| {
        doc.select(&ANCHOR)
            .filter_map(|el| el.value().attr("href"))
            .map(str::trim)
            .find(|href| looks_like_pdf_url(href))
            .map(str::to_string)
    });
    let pdf_url = pdf_href.and_then(|href| base.join(&href).ok().map(|u| u.to_string()));

    let abstract_text = meta_content(&ABSTRACT_META)
        .or_else(|| meta_content(&DESCRIPTION_META))
        .map(|a| paperscout_text::markup_to_text(&a))
        .filter(|a| !a.is_empty());

    ResolvedPage {
        pdf_url,
        abstract_text,
    }
}
