//! Plain-text normalization and chunking for acquired documents.
//!
//! Provider abstracts and landing-page descriptions arrive as JATS/HTML
//! fragments, PDFs as raw extracted text. Both are reduced to linear plain
//! text here, then cut into overlapping windows for storage.

mod chunk;
mod cleanup;

use scraper::Html;
use tracing::debug;

pub use chunk::chunk_text;

/// Tags whose content never belongs in document text.
const SKIPPED_TAGS: [&str; 7] = [
    "script", "style", "nav", "iframe", "noscript", "svg", "math",
];

// ---------------------------------------------------------------------------
// Markup → text
// ---------------------------------------------------------------------------

/// Convert an HTML/XML fragment (e.g. a JATS abstract) to plain text.
///
/// Input without any markup is only whitespace-normalized.
pub fn markup_to_text(input: &str) -> String {
    if !looks_like_markup(input) {
        return cleanup::collapse_inline_whitespace(&cleanup::decode_basic_entities(input));
    }

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(SKIPPED_TAGS.to_vec())
        .build();

    let markdown = match converter.convert(&cleanup::rewrite_jats(input)) {
        Ok(md) => md,
        Err(e) => {
            debug!(error = %e, "htmd conversion failed, falling back to DOM text");
            return dom_text(input);
        }
    };

    cleanup::run_pipeline(&markdown)
}

/// Tidy raw text pulled out of a PDF: re-join hyphenated line breaks,
/// collapse runs of spaces, and limit blank lines.
pub fn normalize_extracted(text: &str) -> String {
    cleanup::normalize_pdf_text(text)
}

fn looks_like_markup(input: &str) -> bool {
    input.contains('<') && input.contains('>')
}

/// Fallback: concatenate all text nodes.
fn dom_text(input: &str) -> String {
    let doc = Html::parse_fragment(input);
    let joined = doc.root_element().text().collect::<Vec<_>>().join(" ");
    cleanup::collapse_inline_whitespace(&joined)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
