//! Acquisition/storage bridge: find text for each discovered item, chunk it,
//! and hand the chunks to a [`ChunkStore`].
//!
//! Per-item problems (no source, failed download, empty extraction) only
//! cost that item its full text; it falls back to its abstract, or is
//! skipped. A store failure aborts the whole call.

mod extract;
mod source;

use std::sync::Arc;

use futures::future::join_all;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use paperscout_http::{CallSpec, HttpGateway};
use paperscout_shared::{AcquisitionOptions, DiscoveredItem, PaperScoutError, Result};
use paperscout_storage::{ChunkMetadata, ChunkStore};

pub use extract::{PdfTextExtractor, TextExtractor};
pub use source::{
    HtmlPageResolver, NoopPageResolver, PageResolver, ResolvedPage, parse_landing_page,
    resolve_source,
};

/// Where a stored text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextSource {
    FullText,
    Abstract,
}

impl TextSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullText => "fullText",
            Self::Abstract => "abstract",
        }
    }
}

/// Text acquired for one item.
#[derive(Debug, Clone)]
pub struct AcquiredText {
    pub text: String,
    pub source: TextSource,
}

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

pub struct Acquirer {
    gateway: HttpGateway,
    resolver: Arc<dyn PageResolver>,
    extractor: Arc<dyn TextExtractor>,
    options: AcquisitionOptions,
}

impl Acquirer {
    /// PDF extraction, with landing-page resolution when
    /// `options.browser_fallback` is set.
    pub fn new(gateway: HttpGateway, options: AcquisitionOptions) -> Self {
        let resolver: Arc<dyn PageResolver> = if options.browser_fallback {
            Arc::new(HtmlPageResolver::new(gateway.clone()))
        } else {
            Arc::new(NoopPageResolver)
        };
        Self {
            gateway,
            resolver,
            extractor: Arc::new(PdfTextExtractor),
            options,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn PageResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn options(&self) -> &AcquisitionOptions {
        &self.options
    }

    /// Acquire, chunk, and store every item. Returns the number of chunks
    /// written.
    #[instrument(skip_all, fields(items = items.len(), full_text = self.options.full_text))]
    pub async fn acquire_and_store(
        &self,
        items: &[DiscoveredItem],
        store: &dyn ChunkStore,
    ) -> Result<usize> {
        let texts = join_all(items.iter().map(|item| self.acquire_text(item))).await;

        let mut stored = 0;
        let mut skipped = 0;
        for (item, text) in items.iter().zip(texts) {
            let Some(text) = text else {
                skipped += 1;
                continue;
            };
            let chunks = paperscout_text::chunk_text(
                &text.text,
                self.options.chunk_size,
                self.options.chunk_overlap,
            );
            if chunks.is_empty() {
                skipped += 1;
                continue;
            }
            let metadata = chunk_metadata(
                item,
                chunks.len(),
                text.source,
                self.options.research_domain.as_deref(),
            );

            let accepted = store.add_chunks(&chunks, &metadata).await?;
            if !accepted {
                return Err(PaperScoutError::Storage(format!(
                    "store rejected chunks for {}",
                    item.paper_id()
                )));
            }
            debug!(paper_id = %item.paper_id(), chunks = chunks.len(), source = text.source.as_str(), "stored");
            stored += chunks.len();
        }

        info!(stored, skipped, "acquisition complete");
        Ok(stored)
    }

    /// Full text when allowed and obtainable, else the abstract.
    pub async fn acquire_text(&self, item: &DiscoveredItem) -> Option<AcquiredText> {
        let mut page_abstract = None;

        if self.options.full_text {
            let mut source = resolve_source(item);
            if source.is_none() {
                if let Some(page) = self.resolver.resolve(item).await {
                    source = page.pdf_url;
                    page_abstract = page.abstract_text;
                }
            }

            if let Some(url) = source {
                match self.fetch_pdf_text(&url).await {
                    Ok(text) if !text.trim().is_empty() => {
                        return Some(AcquiredText {
                            text,
                            source: TextSource::FullText,
                        });
                    }
                    Ok(_) => warn!(url = %url, "extraction produced no text"),
                    Err(e) => warn!(url = %url, error = %e, "full text unavailable"),
                }
            }
        }

        item.abstract_text
            .clone()
            .filter(|a| !a.trim().is_empty())
            .or(page_abstract)
            .map(|text| AcquiredText {
                text,
                source: TextSource::Abstract,
            })
    }

    async fn fetch_pdf_text(&self, url: &str) -> Result<String> {
        let limit = self.gateway.options().download_timeout;
        let call = CallSpec::new("pdf download", limit).max_bytes(self.options.max_pdf_bytes);
        let response = self.gateway.execute(&call, |client| client.get(url)).await?;

        if !response.body.starts_with(b"%PDF") {
            return Err(PaperScoutError::Extraction(format!(
                "{url} did not return a PDF ({})",
                response.content_type.as_deref().unwrap_or("unknown type")
            )));
        }
        tokio::time::timeout(limit, self.extractor.extract_text(response.body))
            .await
            .map_err(|_| PaperScoutError::Extraction(format!("extraction of {url} timed out")))?
    }
}

/// Metadata snapshot for each of an item's `total` chunks.
fn chunk_metadata(
    item: &DiscoveredItem,
    total: usize,
    source: TextSource,
    research_domain: Option<&str>,
) -> Vec<ChunkMetadata> {
    let mut base = ChunkMetadata::new();
    base.insert("title".into(), json!(item.title()));
    base.insert("authors".into(), json!(item.authors_display));
    base.insert("year".into(), json!(item.year()));
    base.insert("doi".into(), json!(item.doi()));
    base.insert("source".into(), json!(item.source_provider.as_str()));
    base.insert("paperId".into(), json!(item.paper_id()));
    base.insert("totalChunks".into(), json!(total));
    base.insert("textSource".into(), json!(source.as_str()));

    let optional = [
        ("publisher", item.metadata.publisher.as_deref()),
        ("journal", item.metadata.journal.as_deref()),
        ("oaStatus", item.metadata.oa_status.as_deref()),
        ("landingUrl", item.landing_url.as_deref()),
        ("researchDomain", research_domain),
    ];
    for (key, value) in optional {
        if let Some(value) = value {
            base.insert(key.into(), Value::String(value.to_string()));
        }
    }
    if let Some(count) = item.signals.citation_count {
        base.insert("citationCount".into(), json!(count));
    }

    (0..total)
        .map(|index| {
            let mut meta = base.clone();
            meta.insert("chunkIndex".into(), json!(index));
            meta
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use paperscout_shared::{GatewayOptions, ProviderId};
    use paperscout_storage::{REQUIRED_METADATA_KEYS, StoredChunk};
    use std::sync::Mutex;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct MemoryStore {
        chunks: Mutex<Vec<(String, ChunkMetadata)>>,
        fail: bool,
    }

    #[async_trait]
    impl ChunkStore for MemoryStore {
        async fn add_chunks(&self, chunks: &[String], metadata: &[ChunkMetadata]) -> Result<bool> {
            if self.fail {
                return Err(PaperScoutError::Storage("disk full".into()));
            }
            assert_eq!(chunks.len(), metadata.len());
            let mut stored = self.chunks.lock().unwrap();
            stored.extend(chunks.iter().cloned().zip(metadata.iter().cloned()));
            Ok(true)
        }

        async fn similarity_search(&self, _query: &str, _limit: usize) -> Result<Vec<StoredChunk>> {
            Ok(Vec::new())
        }

        async fn get_by_id(&self, _id: &str) -> Result<Option<StoredChunk>> {
            Ok(None)
        }
    }

    /// Treats the bytes after the `%PDF` marker as the document text.
    struct PlainExtractor;

    #[async_trait]
    impl TextExtractor for PlainExtractor {
        async fn extract_text(&self, bytes: Vec<u8>) -> Result<String> {
            Ok(String::from_utf8_lossy(&bytes[4..]).trim().to_string())
        }
    }

    /// Never finishes within a test's download timeout.
    struct StalledExtractor;

    #[async_trait]
    impl TextExtractor for StalledExtractor {
        async fn extract_text(&self, _bytes: Vec<u8>) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("too late".into())
        }
    }

    fn gateway() -> HttpGateway {
        gateway_with_download_timeout(Duration::from_secs(5))
    }

    fn gateway_with_download_timeout(download_timeout: Duration) -> HttpGateway {
        HttpGateway::new(GatewayOptions {
            concurrency: 4,
            max_attempts: 2,
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(5),
            search_timeout: Duration::from_secs(5),
            enrich_timeout: Duration::from_secs(5),
            download_timeout,
            contact_email: "test@example.org".into(),
        })
        .expect("gateway")
    }

    fn options(full_text: bool) -> AcquisitionOptions {
        AcquisitionOptions {
            chunk_size: 40,
            chunk_overlap: 10,
            browser_fallback: false,
            max_pdf_bytes: 1024 * 1024,
            full_text,
            research_domain: Some("governance".into()),
        }
    }

    fn item(doi: &str) -> DiscoveredItem {
        let mut item = DiscoveredItem::new(ProviderId::OpenAlex, "Chain Governance", Some(2022), doi);
        item.authors_display = "Ada Lovelace".into();
        item.abstract_text = Some("A short abstract about chains.".into());
        item.metadata.publisher = Some("Ledger Press".into());
        item.signals.citation_count = Some(42);
        item
    }

    #[tokio::test]
    async fn full_text_is_chunked_with_metadata() {
        let server = MockServer::start().await;
        let body = format!("%PDF{}", "governance text ".repeat(10));
        Mock::given(method("GET"))
            .and(path("/oa/paper.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.into_bytes()))
            .expect(1)
            .mount(&server)
            .await;

        let mut it = item("10.1/x");
        it.links.oa_pdf_url = Some(format!("{}/oa/paper.pdf", server.uri()));

        let store = MemoryStore::default();
        let acquirer =
            Acquirer::new(gateway(), options(true)).with_extractor(Arc::new(PlainExtractor));
        let stored = acquirer.acquire_and_store(&[it], &store).await.expect("store");

        let chunks = store.chunks.lock().unwrap();
        assert_eq!(stored, chunks.len());
        assert!(stored > 1);
        for (index, (_, meta)) in chunks.iter().enumerate() {
            for key in REQUIRED_METADATA_KEYS {
                assert!(meta.contains_key(key), "missing {key}");
            }
            assert_eq!(meta["chunkIndex"], json!(index));
            assert_eq!(meta["paperId"], json!("10.1/x"));
            assert_eq!(meta["textSource"], json!("fullText"));
            assert_eq!(meta["totalChunks"], json!(stored));
            assert_eq!(meta["publisher"], json!("Ledger Press"));
            assert_eq!(meta["citationCount"], json!(42));
            assert_eq!(meta["researchDomain"], json!("governance"));
        }
    }

    #[tokio::test]
    async fn abstract_only_makes_no_requests() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let mut it = item("10.1/x");
        it.links.oa_pdf_url = Some(format!("{}/a.pdf", server.uri()));

        let store = MemoryStore::default();
        let acquirer = Acquirer::new(gateway(), options(false));
        let stored = acquirer.acquire_and_store(&[it], &store).await.expect("store");
        assert_eq!(stored, 1);
        assert_eq!(store.chunks.lock().unwrap()[0].1["textSource"], json!("abstract"));
    }

    #[tokio::test]
    async fn non_pdf_body_falls_back_to_abstract() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string("<html>paywall</html>"),
            )
            .mount(&server)
            .await;

        let mut it = item("10.1/x");
        it.links.oa_pdf_url = Some(format!("{}/a.pdf", server.uri()));

        let acquirer = Acquirer::new(gateway(), options(true));
        let text = acquirer.acquire_text(&it).await.expect("abstract");
        assert_eq!(text.source, TextSource::Abstract);
        assert_eq!(text.text, "A short abstract about chains.");
    }

    #[tokio::test]
    async fn stalled_extraction_falls_back_to_abstract() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.7 body".to_vec()))
            .mount(&server)
            .await;

        let mut it = item("10.1/x");
        it.links.oa_pdf_url = Some(format!("{}/slow.pdf", server.uri()));

        let acquirer = Acquirer::new(
            gateway_with_download_timeout(Duration::from_millis(300)),
            options(true),
        )
        .with_extractor(Arc::new(StalledExtractor));
        let text = tokio::time::timeout(Duration::from_secs(5), acquirer.acquire_text(&it))
            .await
            .expect("bounded by the download timeout")
            .expect("abstract");
        assert_eq!(text.source, TextSource::Abstract);
        assert_eq!(text.text, "A short abstract about chains.");
    }

    #[tokio::test]
    async fn items_without_text_are_skipped() {
        let mut bare = DiscoveredItem::new(ProviderId::Arxiv, "Bare", None, "");
        bare.abstract_text = None;

        let store = MemoryStore::default();
        let acquirer = Acquirer::new(gateway(), options(true));
        let stored = acquirer
            .acquire_and_store(&[bare, item("10.1/y")], &store)
            .await
            .expect("store");
        assert_eq!(stored, 1);
        assert_eq!(store.chunks.lock().unwrap()[0].1["doi"], json!("10.1/y"));
    }

    #[tokio::test]
    async fn landing_page_supplies_pdf_when_enabled() {
        let server = MockServer::start().await;
        let landing = std::fs::read_to_string(format!(
            "{}/../../../fixtures/providers/landing.html",
            env!("CARGO_MANIFEST_DIR")
        ))
        .expect("fixture");
        Mock::given(method("GET"))
            .and(path("/article/1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(landing))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/article/1/download.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF resolved body".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let mut it = item("10.1/x");
        it.landing_url = Some(format!("{}/article/1", server.uri()));

        let opts = AcquisitionOptions {
            browser_fallback: true,
            ..options(true)
        };
        let acquirer = Acquirer::new(gateway(), opts).with_extractor(Arc::new(PlainExtractor));
        let text = acquirer.acquire_text(&it).await.expect("text");
        assert_eq!(text.source, TextSource::FullText);
        assert_eq!(text.text, "resolved body");
    }

    #[tokio::test]
    async fn store_failure_propagates() {
        let store = MemoryStore {
            fail: true,
            ..MemoryStore::default()
        };
        let acquirer = Acquirer::new(gateway(), options(false));
        let err = acquirer
            .acquire_and_store(&[item("10.1/x")], &store)
            .await
            .unwrap_err();
        assert!(matches!(err, PaperScoutError::Storage(_)));
    }

    #[test]
    fn anonymous_items_get_fingerprint_ids() {
        let it = DiscoveredItem::new(ProviderId::Core, "No DOI here", Some(2020), "");
        let meta = chunk_metadata(&it, 2, TextSource::Abstract, None);
        assert_eq!(meta.len(), 2);
        assert_eq!(meta[1]["paperId"], json!(it.paper_id()));
        assert_eq!(meta[1]["doi"], json!(""));
        assert!(!meta[0].contains_key("researchDomain"));
    }
}
