//! # Pipeline
//!
//! Ordered stage execution driven by a single reader.
//!
//! ```text
//! QueueSource ──process(doc)──▶ PipelineOrchestrator ──▶ stage 1 ──▶ … ──▶ QueueSink
//!      │                              │
//!      └─ Stop ──▶ collection_process_complete ──▶ every stage ──▶ Completed
//! ```
//!
//! Failures from any participant go through the orchestrator's exception
//! dispatcher, which notifies every participant and applies the configured
//! [`ExceptionPolicy`].

pub mod dispatcher;
pub mod orchestrator;
pub mod params;
pub mod shutdown;
pub mod sink;
pub mod source;
pub mod stage;
pub mod state;

pub use dispatcher::ExceptionPolicy;
pub use orchestrator::PipelineOrchestrator;
pub use params::{ParamSchema, ParamSpec, PipelineArgs};
pub use shutdown::ShutdownToken;
pub use sink::QueueSink;
pub use source::{QueueSource, ReconnectPolicy};
pub use stage::{Reader, Stage};
pub use state::{PipelineState, ProcessOutcome, RunOutcome};
