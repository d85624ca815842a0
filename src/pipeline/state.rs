//! Pipeline lifecycle states and outcomes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// `Built → Initialized → Running → Completed`, never backwards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Built,
    Initialized,
    Running,
    /// Terminal; no further documents are dispatched
    Completed,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Built => write!(f, "built"),
            Self::Initialized => write!(f, "initialized"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// Result of pushing one document through the stage chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Every stage processed the document
    Processed,
    /// A stage failed; the rest of the chain was skipped for this document
    /// and the pipeline keeps running
    Skipped { thrower: String },
    /// A stage failed and the pipeline shut down
    Aborted { thrower: String },
    /// The pipeline was not accepting documents
    Ignored,
}

/// Why a pipeline reached `Completed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Stop sentinel received and every stage notified
    CollectionComplete,
    /// A dispatched failure forced shutdown
    Aborted {
        thrower: String,
        kind: String,
        message: String,
    },
    /// Shutdown was requested from outside the pipeline
    Interrupted,
}

impl RunOutcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::CollectionComplete | Self::Interrupted => 0,
            Self::Aborted { .. } => 1,
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code() == 0
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CollectionComplete => write!(f, "collection complete"),
            Self::Aborted { thrower, kind, .. } => write!(f, "aborted by {thrower} ({kind})"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}
