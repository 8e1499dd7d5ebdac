//! Text extraction from downloaded documents.

use async_trait::async_trait;

use paperscout_shared::{PaperScoutError, Result};

/// Turns document bytes into linear text.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_text(&self, bytes: Vec<u8>) -> Result<String>;
}

/// PDF extraction via `pdf-extract`, run on the blocking pool.
pub struct PdfTextExtractor;

#[async_trait]
impl TextExtractor for PdfTextExtractor {
    async fn extract_text(&self, bytes: Vec<u8>) -> Result<String> {
        let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
            .await
            .map_err(|e| PaperScoutError::Extraction(format!("extraction task failed: {e}")))?
            .map_err(|e| PaperScoutError::Extraction(format!("PDF extraction failed: {e}")))?;
        Ok(paperscout_text::normalize_extracted(&text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn garbage_is_an_extraction_error() {
        let err = PdfTextExtractor
            .extract_text(b"%PDF-1.4 not really".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, PaperScoutError::Extraction(_)));
    }
}
