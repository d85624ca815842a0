//! # Pipeline Participants
//!
//! [`Stage`] is the capability every processing unit implements; only
//! `process` is mandatory. [`Reader`] is the single inbound participant that
//! drives the orchestrator with documents.

use std::fmt;

use async_trait::async_trait;

use super::orchestrator::PipelineOrchestrator;
use super::params::{ParamSchema, PipelineArgs};
use crate::document::Document;
use crate::error::{StageError, StageResult};

/// A unit of document processing.
///
/// Lifecycle: `declare_params` → `init_params` → `initialize` (once) →
/// `process` (per document) → `collection_process_complete` (at most once).
/// `handle_exception` may be called at any point when any participant fails.
#[async_trait]
pub trait Stage: Send + fmt::Debug {
    fn name(&self) -> &str;

    fn declare_params(&self, _schema: &mut ParamSchema) {}

    fn init_params(&mut self, _args: &PipelineArgs) -> StageResult<()> {
        Ok(())
    }

    async fn initialize(&mut self) -> StageResult<()> {
        Ok(())
    }

    /// Must not keep `document` beyond this call
    async fn process(&mut self, document: &mut Document) -> StageResult<()>;

    async fn collection_process_complete(&mut self) -> StageResult<()> {
        Ok(())
    }

    async fn handle_exception(
        &mut self,
        _thrower: &str,
        _error: &StageError,
        _during_init: bool,
    ) -> StageResult<()> {
        Ok(())
    }
}

/// The inbound participant. Exactly one per pipeline.
///
/// Methods take `&self`: the orchestrator keeps the reader behind an `Arc`
/// so it can notify it of failures while the reader is driving `process`.
#[async_trait]
pub trait Reader: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn declare_params(&self, _schema: &mut ParamSchema) {}

    fn init_params(&self, _args: &PipelineArgs) -> StageResult<()> {
        Ok(())
    }

    /// Deliver documents until the collection ends or the pipeline shuts down
    async fn start(&self, pipeline: &mut PipelineOrchestrator) -> StageResult<()>;

    /// Idempotent
    async fn stop(&self, pipeline: &mut PipelineOrchestrator) -> StageResult<()>;

    async fn handle_exception(
        &self,
        _thrower: &str,
        _error: &StageError,
        _during_init: bool,
    ) -> StageResult<()> {
        Ok(())
    }
}
