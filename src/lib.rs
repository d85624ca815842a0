#![allow(clippy::doc_markdown)] // Allow technical terms like STOMP, XMI in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # PBJ Bridge
//!
//! Message-driven pipeline bridge. Documents arrive on a broker queue, pass
//! through an ordered chain of stages, and are republished to another queue;
//! a Stop message ends the collection and is forwarded downstream.
//!
//! ## Architecture
//!
//! - A [`pipeline::QueueSource`] subscribes to the inbound queue and is the
//!   only caller of [`pipeline::PipelineOrchestrator::process`], so stages
//!   never run concurrently.
//! - Stages implement [`pipeline::Stage`]; only `process` is mandatory.
//! - A [`pipeline::QueueSink`] ends the chain, publishing each document and
//!   forwarding the Stop message when the collection completes.
//! - Any participant failure is broadcast to every participant by the
//!   orchestrator, then the configured [`pipeline::ExceptionPolicy`] decides
//!   whether the pipeline shuts down.
//! - Broker connections go through [`messaging::TransportChannel`]:
//!   [`messaging::StompChannel`] for a real broker,
//!   [`messaging::InMemoryBroker`] for tests.
//!
//! ## Module Organization
//!
//! - [`config`] - Layered configuration loading
//! - [`constants`] - Stop message, parameter names and defaults
//! - [`document`] - Documents, codecs and payload classification
//! - [`error`] - Participant and orchestrator errors
//! - [`logging`] - Structured logging setup
//! - [`messaging`] - Broker transport
//! - [`pipeline`] - Orchestrator, dispatcher, Source and Sink
//! - [`stages`] - Bundled stages
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pbj_bridge::document::XmiCodec;
//! use pbj_bridge::messaging::InMemoryBroker;
//! use pbj_bridge::pipeline::{PipelineOrchestrator, QueueSink, QueueSource, ShutdownToken};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = InMemoryBroker::new();
//! let shutdown = ShutdownToken::new();
//! let codec = Arc::new(XmiCodec);
//!
//! let mut pipeline = PipelineOrchestrator::new(shutdown.clone());
//! pipeline.set_param("receive_queue", "to_java");
//! pipeline.set_param("send_queue", "from_java");
//! pipeline.add_reader(Arc::new(QueueSource::new(broker.channel(), codec.clone(), shutdown.clone())))?;
//! pipeline.add_stage(QueueSink::new(broker.channel(), codec, shutdown))?;
//!
//! let outcome = pipeline.run().await?;
//! println!("Pipeline finished: {outcome}");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod document;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod pipeline;
pub mod stages;

pub use config::{BridgeConfig, ConfigLoader};
pub use document::{Document, DocumentCodec, XmiCodec};
pub use error::{PipelineError, PipelineResult, StageError, StageResult};
pub use pipeline::{
    ExceptionPolicy, PipelineOrchestrator, PipelineState, ProcessOutcome, QueueSink, QueueSource,
    Reader, RunOutcome, ShutdownToken, Stage,
};
