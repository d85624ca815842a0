//! Classification of raw inbound payloads.

use bytes::Bytes;

use super::codec::DocumentCodec;
use crate::constants::STOP_MESSAGE;

/// What an inbound payload means to the Source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    DocumentPayload(Bytes),
    /// End of collection; no further documents will arrive
    StopSentinel,
    Malformed(Bytes),
}

impl ControlMessage {
    /// Exact Stop match first, then the codec's structural indicator.
    pub fn classify(payload: Bytes, codec: &dyn DocumentCodec) -> Self {
        if payload.as_ref() == STOP_MESSAGE.as_bytes() {
            Self::StopSentinel
        } else if !payload.is_empty() && codec.is_document(&payload) {
            Self::DocumentPayload(payload)
        } else {
            Self::Malformed(payload)
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::DocumentPayload(_) => "document",
            Self::StopSentinel => "stop",
            Self::Malformed(_) => "malformed",
        }
    }
}
