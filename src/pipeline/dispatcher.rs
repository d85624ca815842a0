//! # Exception Dispatcher
//!
//! Single place where a participant failure is logged, broadcast to every
//! participant, and turned into a shutdown decision.

use std::error::Error as StdError;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use super::orchestrator::PipelineOrchestrator;
use super::state::RunOutcome;
use crate::constants::MAX_TRACE_DEPTH;
use crate::error::StageError;

/// What happens after a steady-state failure has been broadcast.
///
/// Initialization failures and reader failures always shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionPolicy {
    /// Complete the pipeline after any dispatched failure
    #[default]
    Shutdown,
    /// Drop the failing document and keep running
    SkipDocument,
}

impl fmt::Display for ExceptionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shutdown => write!(f, "shutdown"),
            Self::SkipDocument => write!(f, "skip_document"),
        }
    }
}

impl FromStr for ExceptionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shutdown" => Ok(Self::Shutdown),
            "skip_document" | "skip-document" => Ok(Self::SkipDocument),
            other => Err(format!("unknown exception policy '{other}'")),
        }
    }
}

/// Who raised a dispatched failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Thrower<'a> {
    Reader(&'a str),
    Stage(&'a str),
}

impl<'a> Thrower<'a> {
    pub(crate) fn name(&self) -> &'a str {
        match self {
            Self::Reader(name) | Self::Stage(name) => name,
        }
    }
}

impl PipelineOrchestrator {
    /// Log, notify the reader, notify every stage, then apply the policy.
    ///
    /// Returns `true` when the failure completed the pipeline.
    pub(crate) async fn dispatch_exception(
        &mut self,
        thrower: Thrower<'_>,
        failure: &StageError,
        during_init: bool,
    ) -> bool {
        let trace = error_trace(failure);
        error!(
            thrower = thrower.name(),
            kind = failure.kind(),
            during_init,
            error = %failure,
            trace = ?trace,
            "Pipeline participant failed"
        );

        if let Some(reader) = self.reader.clone() {
            if let Err(secondary) = reader
                .handle_exception(thrower.name(), failure, during_init)
                .await
            {
                warn!(
                    participant = reader.name(),
                    error = %secondary,
                    "Exception handler failed"
                );
            }
        }

        for slot in &mut self.stages {
            if let Err(secondary) = slot
                .stage
                .handle_exception(thrower.name(), failure, during_init)
                .await
            {
                warn!(
                    participant = slot.stage.name(),
                    error = %secondary,
                    "Exception handler failed"
                );
            }
        }

        let fatal = during_init
            || matches!(thrower, Thrower::Reader(_))
            || self.policy == ExceptionPolicy::Shutdown;
        if fatal {
            self.complete(RunOutcome::Aborted {
                thrower: thrower.name().to_string(),
                kind: failure.kind().to_string(),
                message: failure.to_string(),
            });
        } else {
            warn!(
                thrower = thrower.name(),
                policy = %self.policy,
                "Skipping remaining stages for this document"
            );
        }
        fatal
    }
}

/// Chain of causes below `failure`, at most `MAX_TRACE_DEPTH` long
pub(crate) fn error_trace(failure: &(dyn StdError + 'static)) -> Vec<String> {
    let mut trace = Vec::new();
    let mut cause = failure.source();
    while let Some(current) = cause {
        if trace.len() >= MAX_TRACE_DEPTH {
            trace.push("...".to_string());
            break;
        }
        trace.push(current.to_string());
        cause = current.source();
    }
    trace
}
