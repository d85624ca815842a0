//! # Document Codec
//!
//! Boundary between transport payloads and [`Document`]s. The bridge only
//! needs to recognize a document payload and move it across the boundary;
//! the document schema itself belongs to the codec.

use std::fmt;
use std::str;

use bytes::Bytes;
use thiserror::Error;

use super::Document;
use crate::constants::{XMI_INDICATOR, XMI_ROOT_CLOSE};

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Payload is not a {codec} document")]
    NotADocument { codec: &'static str },

    #[error("Payload is not valid UTF-8: {source}")]
    InvalidEncoding {
        #[source]
        source: str::Utf8Error,
    },

    #[error("Malformed {codec} document: {reason}")]
    Malformed { codec: &'static str, reason: String },

    #[error("Failed to encode document {document_id}: {reason}")]
    Encode { document_id: String, reason: String },
}

impl CodecError {
    pub fn malformed(codec: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            codec,
            reason: reason.into(),
        }
    }
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Encode/decode between payloads and documents
pub trait DocumentCodec: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Cheap structural check run before any full decode
    fn is_document(&self, payload: &[u8]) -> bool;

    fn decode(&self, payload: &[u8]) -> CodecResult<Document>;

    fn encode(&self, document: &Document) -> CodecResult<Bytes>;
}

/// XMI text codec.
///
/// Documents are carried as their XMI serialization; decoding validates the
/// envelope and keeps the text as document content.
#[derive(Debug, Clone, Copy, Default)]
pub struct XmiCodec;

impl XmiCodec {
    pub const NAME: &'static str = "xmi";

    fn contains(haystack: &[u8], needle: &str) -> bool {
        let needle = needle.as_bytes();
        haystack.windows(needle.len()).any(|window| window == needle)
    }
}

impl DocumentCodec for XmiCodec {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn is_document(&self, payload: &[u8]) -> bool {
        Self::contains(payload, XMI_INDICATOR)
    }

    fn decode(&self, payload: &[u8]) -> CodecResult<Document> {
        if !self.is_document(payload) {
            return Err(CodecError::NotADocument { codec: Self::NAME });
        }
        let text = str::from_utf8(payload).map_err(|source| CodecError::InvalidEncoding { source })?;
        if !text.trim_end().ends_with(XMI_ROOT_CLOSE) {
            return Err(CodecError::malformed(
                Self::NAME,
                format!("missing closing {XMI_ROOT_CLOSE}"),
            ));
        }
        Ok(Document::new(text))
    }

    fn encode(&self, document: &Document) -> CodecResult<Bytes> {
        if document.content.is_empty() {
            return Err(CodecError::Encode {
                document_id: document.id.to_string(),
                reason: "document has no content".to_string(),
            });
        }
        Ok(Bytes::copy_from_slice(document.content.as_bytes()))
    }
}
