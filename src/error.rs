//! # Error Types
//!
//! Failures raised by pipeline participants ([`StageError`]) and by the
//! orchestrator itself ([`PipelineError`]). Transport and codec failures keep
//! their own types and convert into `StageError` at the participant boundary.

use std::error::Error as StdError;

use thiserror::Error;

use crate::document::CodecError;
use crate::messaging::MessagingError;
use crate::pipeline::PipelineState;

/// Failure raised by a Source or Stage
#[derive(Error, Debug)]
pub enum StageError {
    #[error("Missing required parameter: {name}")]
    MissingParameter { name: String },

    #[error("Invalid value '{value}' for parameter {name}: {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Stage {stage} used before initialize")]
    NotInitialized { stage: String },

    #[error("Processing failed: {message}")]
    Processing {
        message: String,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },

    #[error(transparent)]
    Messaging(#[from] MessagingError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StageError {
    pub fn missing_parameter(name: impl Into<String>) -> Self {
        Self::MissingParameter { name: name.into() }
    }

    pub fn invalid_parameter(
        name: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn processing(message: impl Into<String>) -> Self {
        Self::Processing {
            message: message.into(),
            source: None,
        }
    }

    pub fn processing_with_source(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Processing {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Stable name for log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingParameter { .. } => "missing_parameter",
            Self::InvalidParameter { .. } => "invalid_parameter",
            Self::NotInitialized { .. } => "not_initialized",
            Self::Processing { .. } => "processing",
            Self::Messaging(_) => "messaging",
            Self::Codec(_) => "codec",
            Self::Io(_) => "io",
        }
    }

    /// Parameter problems end the process before any broker interaction
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::MissingParameter { .. } | Self::InvalidParameter { .. }
        )
    }
}

pub type StageResult<T> = Result<T, StageError>;

/// Orchestrator failures; each one ends the process with exit code 1
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Pipeline has no reader; add a Source before running")]
    MissingReader,

    #[error("Pipeline already has reader {existing}")]
    ReaderAlreadySet { existing: String },

    #[error("Configuration of {participant} failed: {source}")]
    Configuration {
        participant: String,
        #[source]
        source: StageError,
    },

    #[error("Initialization of {participant} failed: {source}")]
    Initialization {
        participant: String,
        #[source]
        source: StageError,
    },

    #[error("Cannot {operation} while pipeline is {state}")]
    InvalidState {
        operation: String,
        state: PipelineState,
    },
}

impl PipelineError {
    pub fn configuration(participant: impl Into<String>, source: StageError) -> Self {
        Self::Configuration {
            participant: participant.into(),
            source,
        }
    }

    pub fn initialization(participant: impl Into<String>, source: StageError) -> Self {
        Self::Initialization {
            participant: participant.into(),
            source,
        }
    }

    pub fn exit_code(&self) -> i32 {
        1
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
