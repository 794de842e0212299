//! Document text extraction: turns an uploaded resume into flat text.
//!
//! `TextractExtractor` is the production OCR backend. `LocalPdfExtractor` reads
//! text-layer PDFs in-process for development without AWS credentials.

use async_trait::async_trait;
use aws_sdk_textract::error::DisplayErrorContext;
use aws_sdk_textract::primitives::Blob;
use aws_sdk_textract::types::{Block, BlockType, Document};
use tracing::{debug, info};

use crate::errors::AnalysisError;
use crate::models::document::ResumeDocument;
use crate::storage::BlobLocation;

#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Returns the document's text lines joined by single spaces, in document order.
    /// An empty string is a valid result; the pipeline decides what it means.
    async fn extract_lines(
        &self,
        document: &ResumeDocument,
        location: &BlobLocation,
    ) -> Result<String, AnalysisError>;

    fn name(&self) -> &'static str;
}

/// Joins the text of LINE blocks with single spaces; every other block type is ignored.
pub fn join_line_blocks(blocks: &[Block]) -> String {
    blocks
        .iter()
        .filter(|b| b.block_type() == Some(&BlockType::Line))
        .filter_map(|b| b.text())
        .collect::<Vec<_>>()
        .join(" ")
}

/// AWS Textract `DetectDocumentText`. Documents are sent inline as bytes.
pub struct TextractExtractor {
    client: aws_sdk_textract::Client,
}

impl TextractExtractor {
    pub fn new(client: aws_sdk_textract::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TextExtractor for TextractExtractor {
    async fn extract_lines(
        &self,
        document: &ResumeDocument,
        location: &BlobLocation,
    ) -> Result<String, AnalysisError> {
        let response = self
            .client
            .detect_document_text()
            .document(
                Document::builder()
                    .bytes(Blob::new(document.bytes.to_vec()))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| {
                AnalysisError::Extraction(format!("Textract error: {}", DisplayErrorContext(&e)))
            })?;

        let blocks = response.blocks();
        let text = join_line_blocks(blocks);
        info!(
            %location,
            blocks = blocks.len(),
            chars = text.len(),
            "Textract analyzed document"
        );
        Ok(text)
    }

    fn name(&self) -> &'static str {
        "textract"
    }
}

/// In-process extractor for PDFs with a text layer. Images need OCR and are rejected.
pub struct LocalPdfExtractor;

#[async_trait]
impl TextExtractor for LocalPdfExtractor {
    async fn extract_lines(
        &self,
        document: &ResumeDocument,
        location: &BlobLocation,
    ) -> Result<String, AnalysisError> {
        if !document.is_pdf() {
            return Err(AnalysisError::Extraction(format!(
                "local extractor cannot read '.{}' images; configure EXTRACTOR=textract",
                document.extension
            )));
        }

        let bytes = document.bytes.clone();
        // pdf-extract is CPU-bound; keep it off the async workers.
        let raw = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
            .await
            .map_err(|e| AnalysisError::Extraction(format!("PDF extraction task failed: {e}")))?
            .map_err(|e| AnalysisError::Extraction(format!("PDF extraction failed: {e:?}")))?;

        let text = join_text_lines(&raw);
        debug!(%location, chars = text.len(), "Extracted PDF text locally");
        Ok(text)
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

/// Collapses raw extracted text into the same shape Textract output takes:
/// non-empty trimmed lines separated by single spaces.
fn join_text_lines(raw: &str) -> String {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
