//! Shared helpers for pipeline integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use pbj_bridge::document::{Document, DocumentCodec, XmiCodec};
use pbj_bridge::error::{StageError, StageResult};
use pbj_bridge::messaging::{InMemoryBroker, InMemoryChannel};
use pbj_bridge::pipeline::{
    ParamSchema, PipelineArgs, PipelineOrchestrator, QueueSink, QueueSource, ReconnectPolicy,
    ShutdownToken, Stage,
};

pub const IN_QUEUE: &str = "to_java";
pub const OUT_QUEUE: &str = "from_java";

/// Ordered record of lifecycle calls across all recording stages
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.lock().iter().filter(|e| e.as_str() == entry).count()
    }

    /// Entries recorded by stage `name`
    pub fn for_stage(&self, name: &str) -> Vec<String> {
        let prefix = format!("{name}:");
        self.entries()
            .into_iter()
            .filter(|entry| entry.starts_with(&prefix))
            .collect()
    }
}

/// Stage that records every lifecycle call and can be told to fail
#[derive(Debug)]
pub struct RecordingStage {
    name: String,
    log: EventLog,
    fail_process_on: Option<usize>,
    fail_initialize: bool,
    fail_complete: bool,
    processed: usize,
}

impl RecordingStage {
    pub fn new(name: &str, log: &EventLog) -> Self {
        Self {
            name: name.to_string(),
            log: log.clone(),
            fail_process_on: None,
            fail_initialize: false,
            fail_complete: false,
            processed: 0,
        }
    }

    /// Fail on the n-th document (1-based)
    pub fn failing_process_on(mut self, document: usize) -> Self {
        self.fail_process_on = Some(document);
        self
    }

    pub fn failing_initialize(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    pub fn failing_complete(mut self) -> Self {
        self.fail_complete = true;
        self
    }
}

#[async_trait]
impl Stage for RecordingStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn declare_params(&self, schema: &mut ParamSchema) {
        schema.optional("recording_tag", "Tag written into documents", "seen");
    }

    fn init_params(&mut self, args: &PipelineArgs) -> StageResult<()> {
        self.log.push(format!("{}:init_params", self.name));
        args.required("recording_tag")?;
        Ok(())
    }

    async fn initialize(&mut self) -> StageResult<()> {
        self.log.push(format!("{}:initialize", self.name));
        if self.fail_initialize {
            return Err(StageError::processing(format!("{} cannot start", self.name)));
        }
        Ok(())
    }

    async fn process(&mut self, document: &mut Document) -> StageResult<()> {
        self.processed += 1;
        self.log.push(format!("{}:process", self.name));
        if self.fail_process_on == Some(self.processed) {
            return Err(StageError::processing(format!(
                "{} failed on document {}",
                self.name, self.processed
            )));
        }
        document.annotate(self.name.as_str(), self.processed as u64);
        Ok(())
    }

    async fn collection_process_complete(&mut self) -> StageResult<()> {
        self.log.push(format!("{}:complete", self.name));
        if self.fail_complete {
            return Err(StageError::processing(format!("{} cannot finish", self.name)));
        }
        Ok(())
    }

    async fn handle_exception(
        &mut self,
        thrower: &str,
        _error: &StageError,
        during_init: bool,
    ) -> StageResult<()> {
        self.log
            .push(format!("{}:exception:{thrower}:{during_init}", self.name));
        Ok(())
    }
}

/// Minimal valid XMI document carrying `text`
pub fn xmi_payload(text: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><xmi:XMI xmlns:xmi="http://www.omg.org/XMI" xmlns:cas="http:///uima/cas.ecore" xmi:version="2.0"><cas:Sofa xmi:id="1" sofaNum="1" sofaID="_InitialView" mimeType="text" sofaString="{text}"/></xmi:XMI>"#
    )
}

pub fn codec() -> Arc<dyn DocumentCodec> {
    Arc::new(XmiCodec)
}

pub fn fast_reconnect() -> ReconnectPolicy {
    ReconnectPolicy {
        initial_delay_ms: 5,
        max_delay_ms: 20,
        multiplier: 2.0,
        max_attempts: None,
    }
}

/// A pipeline wired to an in-memory broker, without stages yet
pub struct Harness {
    pub broker: InMemoryBroker,
    pub shutdown: ShutdownToken,
    pub source: Arc<QueueSource<InMemoryChannel>>,
    pub pipeline: PipelineOrchestrator,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_reconnect(fast_reconnect())
    }

    pub fn with_reconnect(reconnect: ReconnectPolicy) -> Self {
        let broker = InMemoryBroker::new();
        let shutdown = ShutdownToken::new();
        let source = Arc::new(
            QueueSource::new(broker.channel(), codec(), shutdown.clone())
                .with_reconnect_policy(reconnect),
        );
        let mut pipeline = PipelineOrchestrator::new(shutdown.clone());
        pipeline.set_param("receive_queue", IN_QUEUE);
        pipeline.set_param("send_queue", OUT_QUEUE);
        pipeline
            .add_reader(source.clone())
            .expect("fresh pipeline accepts a reader");
        Self {
            broker,
            shutdown,
            source,
            pipeline,
        }
    }

    pub fn add_stage<S: Stage + 'static>(&mut self, stage: S) {
        self.pipeline.add_stage(stage).expect("stage accepted");
    }

    pub fn add_sink(&mut self) {
        let sink = QueueSink::new(self.broker.channel(), codec(), self.shutdown.clone());
        self.add_stage(sink);
    }

    /// Queue payloads on the inbound destination ahead of the run
    pub fn publish(&self, payload: impl Into<String>) {
        let payload: String = payload.into();
        self.broker.publish(IN_QUEUE, payload);
    }

    pub fn published_out(&self) -> Vec<String> {
        self.broker
            .published(OUT_QUEUE)
            .iter()
            .map(|payload| String::from_utf8_lossy(payload).into_owned())
            .collect()
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
