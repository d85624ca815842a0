//! # Queue Sink
//!
//! Terminal stage that republishes each processed document to the outbound
//! queue and, once the collection is complete, forwards the Stop sentinel.
//!
//! The Sink never reconnects on its own when the broker drops it; it only
//! notices at its next publish, reconnects once, and carries on.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::params::{ParamSchema, PipelineArgs};
use super::shutdown::ShutdownToken;
use super::stage::Stage;
use crate::constants::{defaults, params, STOP_MESSAGE};
use crate::document::{Document, DocumentCodec};
use crate::error::{StageError, StageResult};
use crate::messaging::{BrokerCredentials, MessagingError, MessagingResult, TransportChannel};

#[derive(Debug, Clone)]
struct SinkParams {
    queue: String,
    credentials: BrokerCredentials,
    send_stop: bool,
}

/// Stage publishing documents to a broker queue
#[derive(Debug)]
pub struct QueueSink<C: TransportChannel> {
    name: String,
    channel: C,
    codec: Arc<dyn DocumentCodec>,
    params: Option<SinkParams>,
    shutdown: ShutdownToken,
    published: u64,
}

impl<C: TransportChannel> QueueSink<C> {
    pub fn new(channel: C, codec: Arc<dyn DocumentCodec>, shutdown: ShutdownToken) -> Self {
        Self {
            name: "QueueSink".to_string(),
            channel,
            codec,
            params: None,
            shutdown,
            published: 0,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Documents published so far
    pub fn published(&self) -> u64 {
        self.published
    }

    fn bound(&self) -> StageResult<&SinkParams> {
        self.params.as_ref().ok_or_else(|| StageError::NotInitialized {
            stage: self.name.clone(),
        })
    }

    /// Reconnect once if the broker dropped us since the last use
    async fn ensure_connected(&mut self) -> MessagingResult<()> {
        if self.channel.is_connected() {
            return Ok(());
        }
        let Some(params) = &self.params else {
            return Err(MessagingError::not_connected("publish"));
        };
        if self.shutdown.is_triggered() {
            return Err(MessagingError::not_connected("publish during shutdown"));
        }
        warn!(
            queue = %params.queue,
            address = %params.credentials.address(),
            "Outbound connection lost; reconnecting"
        );
        self.channel.connect(&params.credentials).await
    }
}

#[async_trait]
impl<C: TransportChannel + 'static> Stage for QueueSink<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn declare_params(&self, schema: &mut ParamSchema) {
        schema
            .required(params::SEND_QUEUE, "Queue to send documents to")
            .optional(params::HOST, "Broker host", defaults::HOST)
            .optional(params::PORT, "Broker port", defaults::PORT.to_string())
            .optional(params::USERNAME, "Broker user", defaults::USERNAME)
            .optional(params::PASSWORD, "Broker password", defaults::PASSWORD)
            .optional(
                params::SEND_STOP,
                "Forward a Stop message when the collection completes (yes/no)",
                defaults::SEND_STOP,
            );
    }

    fn init_params(&mut self, args: &PipelineArgs) -> StageResult<()> {
        let queue = args.required(params::SEND_QUEUE)?.to_string();
        let port = args.parse::<u16>(params::PORT)?.unwrap_or(defaults::PORT);
        let credentials = BrokerCredentials::new(
            args.get_or(params::HOST, defaults::HOST),
            port,
            args.get_or(params::USERNAME, defaults::USERNAME),
            args.get_or(params::PASSWORD, defaults::PASSWORD),
        );
        let send_stop = args.flag(params::SEND_STOP, true)?;
        debug!(queue = %queue, credentials = ?credentials, send_stop, "Sink parameters bound");
        self.params = Some(SinkParams {
            queue,
            credentials,
            send_stop,
        });
        Ok(())
    }

    async fn initialize(&mut self) -> StageResult<()> {
        let params = self.bound()?.clone();
        self.channel.connect(&params.credentials).await?;
        info!(
            queue = %params.queue,
            address = %params.credentials.address(),
            "Sink connected"
        );
        Ok(())
    }

    async fn process(&mut self, document: &mut Document) -> StageResult<()> {
        let queue = self.bound()?.queue.clone();
        let payload = self.codec.encode(document)?;
        self.ensure_connected().await?;
        self.channel.publish(&queue, &payload).await?;
        self.published += 1;
        debug!(queue = %queue, document = %document.short_id(), bytes = payload.len(), "Document sent");
        Ok(())
    }

    async fn collection_process_complete(&mut self) -> StageResult<()> {
        let params = self.bound()?.clone();
        if params.send_stop {
            let sent = match self.ensure_connected().await {
                Ok(()) => {
                    self.channel
                        .publish(&params.queue, STOP_MESSAGE.as_bytes())
                        .await
                }
                Err(failure) => Err(failure),
            };
            match sent {
                Ok(()) => info!(queue = %params.queue, published = self.published, "Stop message sent"),
                Err(failure) => error!(queue = %params.queue, error = %failure, "Could not send Stop message"),
            }
        } else {
            debug!(queue = %params.queue, "send_stop is off; not forwarding Stop");
        }

        if let Err(failure) = self.channel.disconnect().await {
            warn!(queue = %params.queue, error = %failure, "Sink disconnect failed");
        }
        info!(queue = %params.queue, "Sink disconnected");
        Ok(())
    }
}
