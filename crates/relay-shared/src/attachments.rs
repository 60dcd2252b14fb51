use std::path::PathBuf;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use pdfium_render::prelude::{Pdfium, PdfiumError};
use thiserror::Error;
use tracing::warn;

use crate::models::AttachmentPayload;

pub const PDF_MEDIA_TYPE: &str = "application/pdf";
const IMAGE_MEDIA_PREFIX: &str = "image/";
const EMPTY_DOCUMENT_NOTE: &str = "[No extractable text found in this document]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub media_type: String,
    pub payload: String,
}

impl From<AttachmentPayload> for Attachment {
    fn from(payload: AttachmentPayload) -> Self {
        Self {
            name: payload.name,
            media_type: payload.media_type,
            payload: payload.url,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreparedAttachments {
    pub augmented_text: String,
    pub image_refs: Vec<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AttachmentError {
    #[error("attachment \"{name}\" is not a base64 data URI")]
    MalformedPayload { name: String },
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("document payload is not valid base64")]
    InvalidBase64,
    #[error("pdf engine unavailable: {0}")]
    EngineUnavailable(String),
    #[error("unreadable document: {0}")]
    Document(String),
}

impl From<PdfiumError> for ExtractionError {
    fn from(err: PdfiumError) -> Self {
        Self::Document(format!("{err:?}"))
    }
}

pub trait DocumentTextExtractor: Send + Sync {
    fn extract_text(&self, document: &[u8]) -> Result<String, ExtractionError>;
}

#[derive(Debug, Clone, Default)]
pub struct PdfiumTextExtractor {
    library_dir: Option<PathBuf>,
}

impl PdfiumTextExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_library_dir(library_dir: impl Into<PathBuf>) -> Self {
        Self {
            library_dir: Some(library_dir.into()),
        }
    }

    fn bind(&self) -> Result<Pdfium, ExtractionError> {
        let bindings = match &self.library_dir {
            Some(dir) => {
                Pdfium::bind_to_library(dir.join(Pdfium::pdfium_platform_library_name()))
                    .or_else(|_| Pdfium::bind_to_system_library())
            }
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|err| ExtractionError::EngineUnavailable(format!("{err:?}")))?;

        Ok(Pdfium::new(bindings))
    }
}

impl DocumentTextExtractor for PdfiumTextExtractor {
    fn extract_text(&self, document: &[u8]) -> Result<String, ExtractionError> {
        let pdfium = self.bind()?;
        let document = pdfium.load_pdf_from_byte_slice(document, None)?;

        let mut pages = Vec::new();
        for page in document.pages().iter() {
            pages.push(page.text()?.all());
        }

        Ok(pages.join("\n"))
    }
}

/// Classifies attachments in arrival order: images become inline references,
/// PDFs become delimited text blocks, anything else is dropped.
///
/// Extraction failures are folded into the text as a visible note; only a
/// payload that is not a data URI at all fails the request.
pub fn prepare_attachments(
    attachments: &[Attachment],
    extractor: &dyn DocumentTextExtractor,
) -> Result<PreparedAttachments, AttachmentError> {
    let mut prepared = PreparedAttachments::default();

    for attachment in attachments {
        let media_type = attachment.media_type.trim().to_ascii_lowercase();

        if media_type.starts_with(IMAGE_MEDIA_PREFIX) {
            data_uri_body(&attachment.payload).ok_or_else(|| malformed(attachment))?;
            prepared.image_refs.push(attachment.payload.clone());
        } else if media_type == PDF_MEDIA_TYPE {
            let body = data_uri_body(&attachment.payload).ok_or_else(|| malformed(attachment))?;
            let text = match extract_document(body, extractor) {
                Ok(text) if text.trim().is_empty() => EMPTY_DOCUMENT_NOTE.to_string(),
                Ok(text) => text.trim().to_string(),
                Err(err) => {
                    warn!(
                        attachment = %attachment.name,
                        "document text extraction failed: {err}"
                    );
                    extraction_failed_note(&attachment.name, &err)
                }
            };
            prepared
                .augmented_text
                .push_str(&document_block(&attachment.name, &text));
        } else {
            warn!(
                attachment = %attachment.name,
                media_type = %attachment.media_type,
                "dropping attachment with unsupported media type"
            );
        }
    }

    Ok(prepared)
}

pub fn document_block(name: &str, text: &str) -> String {
    format!(
        "\n\n--- Content from attached document \"{name}\" ---\n{text}\n--- End of document \"{name}\" ---"
    )
}

pub fn extraction_failed_note(name: &str, err: &ExtractionError) -> String {
    format!("[Error extracting text from \"{name}\": {err}]")
}

fn extract_document(
    base64_body: &str,
    extractor: &dyn DocumentTextExtractor,
) -> Result<String, ExtractionError> {
    let compact: String = base64_body
        .chars()
        .filter(|ch| !ch.is_ascii_whitespace())
        .collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|_| ExtractionError::InvalidBase64)?;
    extractor.extract_text(&bytes)
}

fn data_uri_body(payload: &str) -> Option<&str> {
    let rest = payload.trim().strip_prefix("data:")?;
    let (header, body) = rest.split_once(',')?;
    header
        .split(';')
        .any(|param| param.eq_ignore_ascii_case("base64"))
        .then_some(body)
}

fn malformed(attachment: &Attachment) -> AttachmentError {
    AttachmentError::MalformedPayload {
        name: attachment.name.clone(),
    }
}
