//! # Documents
//!
//! The unit of work flowing through the pipeline, the codec boundary that
//! turns transport payloads into documents and back, and the classification
//! of raw payloads into control messages.

pub mod codec;
pub mod control;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub use codec::{CodecError, CodecResult, DocumentCodec, XmiCodec};
pub use control::ControlMessage;

/// One decoded document.
///
/// The bridge never interprets `content`; stages may rewrite it and attach
/// annotations, but must not keep the document past their own `process` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub content: String,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub annotations: Map<String, Value>,
}

impl Document {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            received_at: Utc::now(),
            annotations: Map::new(),
        }
    }

    pub fn annotate(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.annotations.insert(key.into(), value.into());
    }

    pub fn annotation(&self, key: &str) -> Option<&Value> {
        self.annotations.get(key)
    }

    /// Short id for log lines
    pub fn short_id(&self) -> String {
        self.id.simple().to_string()[..8].to_string()
    }
}
