//! # Queue Source
//!
//! The pipeline's reader: subscribes to the inbound queue, classifies each
//! delivered payload, drives the orchestrator with decoded documents and
//! watches for the Stop sentinel.
//!
//! Reconnection is an explicit state machine run by the delivery loop:
//! `Subscribed → Disconnected → Connecting → Subscribed`, retried with capped
//! exponential backoff and never entered once the source has been stopped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::orchestrator::PipelineOrchestrator;
use super::params::{ParamSchema, PipelineArgs};
use super::shutdown::ShutdownToken;
use super::stage::Reader;
use super::state::ProcessOutcome;
use crate::constants::{defaults, params};
use crate::document::{ControlMessage, DocumentCodec};
use crate::error::{StageError, StageResult};
use crate::messaging::{
    AckMode, BrokerCredentials, ChannelEvent, ConnectionState, MessagingResult, TransportChannel,
};

/// Backoff between reconnect attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Attempts before giving up; `None` retries until shutdown
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: defaults::RECONNECT_INITIAL_DELAY_MS,
            max_delay_ms: defaults::RECONNECT_MAX_DELAY_MS,
            multiplier: defaults::RECONNECT_MULTIPLIER,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Delay after the `attempt`-th consecutive failure (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let delay = self.initial_delay_ms as f64 * self.multiplier.max(1.0).powi(exponent);
        Duration::from_millis(delay.min(self.max_delay_ms as f64) as u64)
    }
}

#[derive(Debug, Clone)]
struct SourceParams {
    queue: String,
    credentials: BrokerCredentials,
    accept_stop: bool,
}

enum Flow {
    Continue,
    Stop,
}

/// Reader fed by a broker queue
#[derive(Debug)]
pub struct QueueSource<C: TransportChannel> {
    name: String,
    channel: tokio::sync::Mutex<C>,
    codec: Arc<dyn DocumentCodec>,
    params: Mutex<Option<SourceParams>>,
    connection_state: Mutex<ConnectionState>,
    reconnect: ReconnectPolicy,
    shutdown: ShutdownToken,
    stopped: AtomicBool,
    collection_complete: AtomicBool,
    received: AtomicU64,
    malformed: AtomicU64,
    reconnects: AtomicU64,
    exceptions_observed: AtomicU64,
}

impl<C: TransportChannel> QueueSource<C> {
    pub fn new(channel: C, codec: Arc<dyn DocumentCodec>, shutdown: ShutdownToken) -> Self {
        Self {
            name: "QueueSource".to_string(),
            channel: tokio::sync::Mutex::new(channel),
            codec,
            params: Mutex::new(None),
            connection_state: Mutex::new(ConnectionState::Disconnected),
            reconnect: ReconnectPolicy::default(),
            shutdown,
            stopped: AtomicBool::new(false),
            collection_complete: AtomicBool::new(false),
            received: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            exceptions_observed: AtomicU64::new(0),
        }
    }

    pub fn with_reconnect_policy(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection_state.lock()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Whether the Stop sentinel has been observed
    pub fn collection_completed(&self) -> bool {
        self.collection_complete.load(Ordering::Acquire)
    }

    /// Documents decoded and handed to the pipeline
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Payloads dropped as malformed or undecodable
    pub fn malformed(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }

    /// Successful re-subscriptions after a lost connection
    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    pub fn exceptions_observed(&self) -> u64 {
        self.exceptions_observed.load(Ordering::Relaxed)
    }

    fn bound_params(&self) -> StageResult<SourceParams> {
        self.params
            .lock()
            .clone()
            .ok_or_else(|| StageError::NotInitialized {
                stage: self.name.clone(),
            })
    }

    fn set_state(&self, state: ConnectionState) {
        *self.connection_state.lock() = state;
    }

    async fn connect_and_subscribe(&self, params: &SourceParams) -> MessagingResult<()> {
        let mut channel = self.channel.lock().await;
        channel.connect(&params.credentials).await?;
        channel.subscribe(&params.queue, AckMode::Auto).await
    }

    /// Drive `Disconnected → Connecting → Subscribed`, backing off between
    /// failures. Returns early without error when stopped or shut down.
    async fn establish(&self, params: &SourceParams) -> StageResult<()> {
        let mut attempt: u32 = 0;
        loop {
            if self.is_stopped() || self.shutdown.is_triggered() {
                return Ok(());
            }
            self.set_state(ConnectionState::Connecting);
            match self.connect_and_subscribe(params).await {
                Ok(()) => {
                    self.set_state(ConnectionState::Subscribed);
                    info!(
                        queue = %params.queue,
                        address = %params.credentials.address(),
                        retries = attempt,
                        "Subscribed"
                    );
                    return Ok(());
                }
                Err(failure) => {
                    self.set_state(ConnectionState::Disconnected);
                    attempt += 1;
                    if self
                        .reconnect
                        .max_attempts
                        .is_some_and(|max_attempts| attempt >= max_attempts)
                    {
                        warn!(queue = %params.queue, attempts = attempt, "Giving up on broker");
                        return Err(failure.into());
                    }
                    let delay = self.reconnect.delay_for(attempt);
                    warn!(
                        queue = %params.queue,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %failure,
                        "Could not subscribe; retrying"
                    );
                    tokio::select! {
                        () = self.shutdown.cancelled() => return Ok(()),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn on_disconnected(&self, params: &SourceParams, reason: &str) -> StageResult<()> {
        if self.is_stopped() {
            debug!(reason, "Disconnect after stop ignored");
            return Ok(());
        }
        self.set_state(ConnectionState::Disconnected);
        warn!(queue = %params.queue, reason, "Broker connection lost; resubscribing");
        self.establish(params).await?;
        if self.connection_state() == ConnectionState::Subscribed {
            self.reconnects.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn on_message(
        &self,
        pipeline: &mut PipelineOrchestrator,
        params: &SourceParams,
        destination: &str,
        payload: Bytes,
    ) -> Flow {
        match ControlMessage::classify(payload, self.codec.as_ref()) {
            ControlMessage::StopSentinel => {
                if params.accept_stop {
                    info!(queue = destination, "Received Stop message");
                    self.collection_complete.store(true, Ordering::Release);
                    return Flow::Stop;
                }
                info!(queue = destination, "Received Stop message; ignored because accept_stop is off");
            }
            ControlMessage::DocumentPayload(payload) => match self.codec.decode(&payload) {
                Ok(mut document) => {
                    let count = self.received.fetch_add(1, Ordering::Relaxed) + 1;
                    debug!(queue = destination, document = %document.short_id(), count, "Document received");
                    match pipeline.process(&mut document).await {
                        ProcessOutcome::Aborted { thrower } => {
                            info!(thrower = %thrower, "Pipeline aborted; leaving delivery loop");
                            return Flow::Stop;
                        }
                        ProcessOutcome::Ignored if pipeline.is_completed() => return Flow::Stop,
                        _ => {}
                    }
                }
                Err(failure) => {
                    self.malformed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        queue = destination,
                        codec = self.codec.name(),
                        error = %failure,
                        "Dropping undecodable document"
                    );
                }
            },
            ControlMessage::Malformed(payload) => {
                self.malformed.fetch_add(1, Ordering::Relaxed);
                let preview: String = String::from_utf8_lossy(&payload).chars().take(64).collect();
                warn!(
                    queue = destination,
                    bytes = payload.len(),
                    preview = %preview,
                    "Dropping malformed message"
                );
            }
        }
        Flow::Continue
    }
}

#[async_trait]
impl<C: TransportChannel + 'static> Reader for QueueSource<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn declare_params(&self, schema: &mut ParamSchema) {
        schema
            .required(params::RECEIVE_QUEUE, "Queue to receive documents from")
            .optional(params::HOST, "Broker host", defaults::HOST)
            .optional(params::PORT, "Broker port", defaults::PORT.to_string())
            .optional(params::USERNAME, "Broker user", defaults::USERNAME)
            .optional(params::PASSWORD, "Broker password", defaults::PASSWORD)
            .optional(
                params::ACCEPT_STOP,
                "Finish the collection when a Stop message arrives (yes/no)",
                defaults::ACCEPT_STOP,
            );
    }

    fn init_params(&self, args: &PipelineArgs) -> StageResult<()> {
        let queue = args.required(params::RECEIVE_QUEUE)?.to_string();
        let port = args.parse::<u16>(params::PORT)?.unwrap_or(defaults::PORT);
        let credentials = BrokerCredentials::new(
            args.get_or(params::HOST, defaults::HOST),
            port,
            args.get_or(params::USERNAME, defaults::USERNAME),
            args.get_or(params::PASSWORD, defaults::PASSWORD),
        );
        let accept_stop = args.flag(params::ACCEPT_STOP, true)?;
        debug!(queue = %queue, credentials = ?credentials, accept_stop, "Source parameters bound");
        *self.params.lock() = Some(SourceParams {
            queue,
            credentials,
            accept_stop,
        });
        Ok(())
    }

    #[instrument(skip_all, fields(source = %self.name))]
    async fn start(&self, pipeline: &mut PipelineOrchestrator) -> StageResult<()> {
        let params = self.bound_params()?;
        if self.is_stopped() {
            debug!("Source already stopped");
            return Ok(());
        }

        if let Err(failure) = self.establish(&params).await {
            self.stop(pipeline).await?;
            return Err(failure);
        }
        info!(queue = %params.queue, "Waiting for documents");

        let mut result = Ok(());
        loop {
            if pipeline.is_completed() || self.is_stopped() {
                break;
            }
            let next = {
                let mut channel = self.channel.lock().await;
                tokio::select! {
                    () = self.shutdown.cancelled() => None,
                    event = channel.next_event() => Some(event),
                }
            };
            let Some(event) = next else {
                info!(queue = %params.queue, "Shutdown requested; leaving delivery loop");
                break;
            };

            match event {
                Some(ChannelEvent::Message {
                    destination,
                    payload,
                }) => {
                    if let Flow::Stop = self.on_message(pipeline, &params, &destination, payload).await {
                        break;
                    }
                }
                Some(ChannelEvent::Disconnected { reason }) => {
                    if let Err(failure) = self.on_disconnected(&params, &reason).await {
                        result = Err(failure);
                        break;
                    }
                }
                None => {
                    warn!(queue = %params.queue, "Channel event stream closed");
                    break;
                }
            }
        }

        self.stop(pipeline).await?;
        result
    }

    async fn stop(&self, pipeline: &mut PipelineOrchestrator) -> StageResult<()> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let params = self.params.lock().clone();
        info!(
            received = self.received(),
            malformed = self.malformed(),
            "Stopping source"
        );

        {
            let mut channel = self.channel.lock().await;
            if let Some(params) = &params {
                if let Err(failure) = channel.unsubscribe(&params.queue).await {
                    debug!(queue = %params.queue, error = %failure, "Unsubscribe failed");
                }
            }
            if let Err(failure) = channel.disconnect().await {
                warn!(error = %failure, "Disconnect failed");
            }
        }
        self.set_state(ConnectionState::Disconnected);

        if self.collection_completed() {
            pipeline.collection_process_complete().await;
        }
        Ok(())
    }

    async fn handle_exception(
        &self,
        thrower: &str,
        error: &StageError,
        during_init: bool,
    ) -> StageResult<()> {
        let observed = self.exceptions_observed.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(thrower, kind = error.kind(), during_init, observed, "Source notified of failure");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::XmiCodec;
    use crate::messaging::InMemoryBroker;

    #[test]
    fn test_backoff_is_capped() {
        let policy = ReconnectPolicy {
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            multiplier: 2.0,
            max_attempts: None,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
        assert_eq!(policy.delay_for(5), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(500), Duration::from_millis(1_000));
    }

    #[test]
    fn test_init_params_requires_queue() {
        let broker = InMemoryBroker::new();
        let source = QueueSource::new(broker.channel(), Arc::new(XmiCodec), ShutdownToken::new());
        let err = source.init_params(&PipelineArgs::default()).unwrap_err();
        assert!(err.is_configuration());

        let args = PipelineArgs::from_pairs([("receive_queue", "in"), ("port_name", "61613")]);
        source.init_params(&args).unwrap();
        let bound = source.bound_params().unwrap();
        assert_eq!(bound.credentials.port, 61613);
        assert_eq!(bound.credentials.host, "localhost");
        assert!(bound.accept_stop);
    }

    #[tokio::test]
    async fn test_establish_gives_up_after_max_attempts() {
        let broker = InMemoryBroker::new();
        broker.set_refuse_connections(true);
        let source = QueueSource::new(broker.channel(), Arc::new(XmiCodec), ShutdownToken::new())
            .with_reconnect_policy(ReconnectPolicy {
                initial_delay_ms: 1,
                max_delay_ms: 2,
                multiplier: 2.0,
                max_attempts: Some(3),
            });
        source
            .init_params(&PipelineArgs::from_pairs([("receive_queue", "in")]))
            .unwrap();
        let params = source.bound_params().unwrap();
        let err = source.establish(&params).await.unwrap_err();
        assert!(matches!(err, StageError::Messaging(_)));
        assert_eq!(source.connection_state(), ConnectionState::Disconnected);
    }
}
