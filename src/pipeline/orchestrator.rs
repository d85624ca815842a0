//! # Pipeline Orchestrator
//!
//! Owns the ordered stage chain and the reader, runs their lifecycle, and is
//! the only place cross-stage failures are coordinated.
//!
//! The orchestrator is driven from a single flow: the reader's delivery loop
//! calls [`PipelineOrchestrator::process`] for one document at a time, so
//! stages never see two documents concurrently.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use super::dispatcher::{ExceptionPolicy, Thrower};
use super::params::{ParamSchema, PipelineArgs};
use super::shutdown::ShutdownToken;
use super::stage::{Reader, Stage};
use super::state::{PipelineState, ProcessOutcome, RunOutcome};
use crate::document::Document;
use crate::error::{PipelineError, PipelineResult, StageError};

#[derive(Debug)]
pub(super) struct StageSlot {
    pub(super) stage: Box<dyn Stage>,
    initialized: bool,
    completed: bool,
}

#[derive(Debug)]
pub struct PipelineOrchestrator {
    pub(super) stages: Vec<StageSlot>,
    pub(super) reader: Option<Arc<dyn Reader>>,
    pub(super) policy: ExceptionPolicy,
    state: PipelineState,
    outcome: Option<RunOutcome>,
    params_bound: bool,
    collection_notified: bool,
    raw_params: BTreeMap<String, String>,
    documents_processed: u64,
    shutdown: ShutdownToken,
}

impl PipelineOrchestrator {
    pub fn new(shutdown: ShutdownToken) -> Self {
        Self {
            stages: Vec::new(),
            reader: None,
            policy: ExceptionPolicy::default(),
            state: PipelineState::Built,
            outcome: None,
            params_bound: false,
            collection_notified: false,
            raw_params: BTreeMap::new(),
            documents_processed: 0,
            shutdown,
        }
    }

    pub fn with_policy(mut self, policy: ExceptionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Raw parameter values, resolved against the participants' declarations
    /// at `initialize`
    pub fn with_params(mut self, params: BTreeMap<String, String>) -> Self {
        self.raw_params.extend(params);
        self
    }

    pub fn set_param(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.raw_params.insert(name.into(), value.into());
    }

    pub fn add_reader(&mut self, reader: Arc<dyn Reader>) -> PipelineResult<()> {
        if let Some(existing) = &self.reader {
            return Err(PipelineError::ReaderAlreadySet {
                existing: existing.name().to_string(),
            });
        }
        debug!(reader = reader.name(), "Reader added");
        self.reader = Some(reader);
        Ok(())
    }

    pub fn add_stage<S>(&mut self, stage: S) -> PipelineResult<()>
    where
        S: Stage + 'static,
    {
        if self.state != PipelineState::Built {
            return Err(PipelineError::InvalidState {
                operation: "add a stage".to_string(),
                state: self.state,
            });
        }
        debug!(stage = stage.name(), position = self.stages.len(), "Stage added");
        self.stages.push(StageSlot {
            stage: Box::new(stage),
            initialized: false,
            completed: false,
        });
        Ok(())
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn outcome(&self) -> Option<&RunOutcome> {
        self.outcome.as_ref()
    }

    pub fn is_completed(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn policy(&self) -> ExceptionPolicy {
        self.policy
    }

    pub fn shutdown_token(&self) -> &ShutdownToken {
        &self.shutdown
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|slot| slot.stage.name()).collect()
    }

    pub fn documents_processed(&self) -> u64 {
        self.documents_processed
    }

    /// Every parameter the current participants declare
    pub fn param_schema(&self) -> ParamSchema {
        let mut schema = ParamSchema::new();
        if let Some(reader) = &self.reader {
            schema.set_owner(reader.name());
            reader.declare_params(&mut schema);
        }
        for slot in &self.stages {
            schema.set_owner(slot.stage.name());
            slot.stage.declare_params(&mut schema);
        }
        schema
    }

    /// Bind parameters (reader first, then stages in order) and initialize
    /// every stage in order. Idempotent: stages already initialized are not
    /// initialized again.
    #[instrument(skip(self), fields(stages = self.stages.len()))]
    pub async fn initialize(&mut self) -> PipelineResult<()> {
        match self.state {
            PipelineState::Built => {}
            PipelineState::Initialized | PipelineState::Running => return Ok(()),
            PipelineState::Completed => {
                return Err(PipelineError::InvalidState {
                    operation: "initialize".to_string(),
                    state: self.state,
                })
            }
        }
        let reader = self.reader.clone().ok_or(PipelineError::MissingReader)?;

        if !self.params_bound {
            let schema = self.param_schema();
            let args = match PipelineArgs::resolve(&schema, &self.raw_params) {
                Ok(args) => args,
                Err(PipelineError::Configuration {
                    participant,
                    source,
                }) => {
                    return Err(self
                        .fail_initialization(Thrower::Stage(&participant), source)
                        .await)
                }
                Err(other) => return Err(other),
            };

            if let Err(failure) = reader.init_params(&args) {
                return Err(self.fail_initialization(Thrower::Reader(reader.name()), failure).await);
            }
            for index in 0..self.stages.len() {
                if let Err(failure) = self.stages[index].stage.init_params(&args) {
                    let name = self.stages[index].stage.name().to_string();
                    return Err(self.fail_initialization(Thrower::Stage(&name), failure).await);
                }
            }
            self.params_bound = true;
            debug!(params = args.len(), "Parameters bound");
        }

        for index in 0..self.stages.len() {
            if self.stages[index].initialized {
                continue;
            }
            match self.stages[index].stage.initialize().await {
                Ok(()) => {
                    self.stages[index].initialized = true;
                    debug!(stage = self.stages[index].stage.name(), "Stage initialized");
                }
                Err(failure) => {
                    let name = self.stages[index].stage.name().to_string();
                    return Err(self.fail_initialization(Thrower::Stage(&name), failure).await);
                }
            }
        }

        self.state = PipelineState::Initialized;
        info!(
            reader = reader.name(),
            stages = ?self.stage_names(),
            policy = %self.policy,
            "Pipeline initialized"
        );
        Ok(())
    }

    async fn fail_initialization(&mut self, thrower: Thrower<'_>, failure: StageError) -> PipelineError {
        let participant = thrower.name().to_string();
        if failure.is_configuration() {
            // Bad parameters end the run before anything is dispatched
            warn!(participant = %participant, error = %failure, "Pipeline configuration rejected");
            self.complete(RunOutcome::Aborted {
                thrower: participant.clone(),
                kind: failure.kind().to_string(),
                message: failure.to_string(),
            });
            return PipelineError::configuration(participant, failure);
        }
        self.dispatch_exception(thrower, &failure, true).await;
        PipelineError::initialization(participant, failure)
    }

    /// Run one document through every stage in registration order.
    pub async fn process(&mut self, document: &mut Document) -> ProcessOutcome {
        if self.is_completed() || self.shutdown.is_triggered() {
            debug!(document = %document.short_id(), "Pipeline not accepting documents; dropped");
            return ProcessOutcome::Ignored;
        }
        if self.state == PipelineState::Built {
            warn!(document = %document.short_id(), "Document delivered before initialize; dropped");
            return ProcessOutcome::Ignored;
        }

        for index in 0..self.stages.len() {
            if let Err(failure) = self.stages[index].stage.process(document).await {
                let thrower = self.stages[index].stage.name().to_string();
                let fatal = self
                    .dispatch_exception(Thrower::Stage(&thrower), &failure, false)
                    .await;
                return if fatal {
                    ProcessOutcome::Aborted { thrower }
                } else {
                    ProcessOutcome::Skipped { thrower }
                };
            }
        }

        self.documents_processed += 1;
        debug!(
            document = %document.short_id(),
            processed = self.documents_processed,
            "Document processed"
        );
        ProcessOutcome::Processed
    }

    /// Tell every stage, in order, that no further documents will arrive.
    ///
    /// Runs at most once. A failing stage is dispatched and the remaining
    /// stages are still notified. The pipeline is `Completed` afterwards.
    #[instrument(skip(self))]
    pub async fn collection_process_complete(&mut self) {
        if self.collection_notified {
            debug!("Collection completion already delivered");
            return;
        }
        if self.is_completed() {
            debug!(outcome = ?self.outcome, "Pipeline already completed; not notifying stages");
            return;
        }
        self.collection_notified = true;
        info!(documents = self.documents_processed, "Collection complete; notifying stages");

        for index in 0..self.stages.len() {
            if self.stages[index].completed {
                continue;
            }
            self.stages[index].completed = true;
            if let Err(failure) = self.stages[index].stage.collection_process_complete().await {
                let thrower = self.stages[index].stage.name().to_string();
                self.dispatch_exception(Thrower::Stage(&thrower), &failure, false)
                    .await;
            }
        }

        self.complete(RunOutcome::CollectionComplete);
    }

    /// Initialize if needed, then hand control to the reader until the
    /// pipeline completes.
    #[instrument(skip(self))]
    pub async fn run(&mut self) -> PipelineResult<RunOutcome> {
        if let Some(outcome) = &self.outcome {
            return Ok(outcome.clone());
        }
        self.initialize().await?;
        let reader = self.reader.clone().ok_or(PipelineError::MissingReader)?;

        self.state = PipelineState::Running;
        info!(reader = reader.name(), "Pipeline running");

        if let Err(failure) = reader.start(self).await {
            if !self.is_completed() {
                self.dispatch_exception(Thrower::Reader(reader.name()), &failure, false)
                    .await;
            }
        }
        if !self.is_completed() {
            self.complete(RunOutcome::Interrupted);
        }

        let outcome = self.outcome.clone().unwrap_or(RunOutcome::Interrupted);
        info!(outcome = %outcome, documents = self.documents_processed, "Pipeline finished");
        Ok(outcome)
    }

    /// Transition to `Completed` and fire the shutdown token. First call wins.
    pub(super) fn complete(&mut self, outcome: RunOutcome) {
        if self.is_completed() {
            return;
        }
        info!(outcome = %outcome, "Pipeline completed");
        self.state = PipelineState::Completed;
        self.outcome = Some(outcome);
        self.shutdown.trigger();
    }
}
