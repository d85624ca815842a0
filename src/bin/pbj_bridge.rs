//! # PBJ Bridge
//!
//! Runs the bridge pipeline against a STOMP broker:
//! `QueueSource → [XmiFileWriter] → QueueSink`.
//!
//! Configuration comes from `PBJ_CONFIG_PATH` (or `config/pbj.toml`) and
//! `PBJ_*` environment variables. Exit code 0 after the collection completes
//! or on Ctrl-C; 1 on a configuration error or an aborted pipeline.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};

use pbj_bridge::config::{BridgeConfig, ConfigLoader};
use pbj_bridge::document::{DocumentCodec, XmiCodec};
use pbj_bridge::logging::{init_structured_logging, log_error, log_pipeline_operation};
use pbj_bridge::messaging::StompChannel;
use pbj_bridge::pipeline::{PipelineOrchestrator, QueueSink, QueueSource, RunOutcome, ShutdownToken};
use pbj_bridge::stages::XmiFileWriter;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match ConfigLoader::new().load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("pbj-bridge: {e}");
            return ExitCode::FAILURE;
        }
    };
    let log_guard = init_structured_logging(&config.logging);

    let code = match run(config).await {
        Ok(outcome) => {
            log_pipeline_operation("run", "pbj-bridge", "finished", Some(&outcome.to_string()));
            outcome.exit_code()
        }
        Err(e) => {
            log_error("pbj-bridge", "run", &format!("{e:#}"), None);
            1
        }
    };
    // Flush the log file before the process ends
    drop(log_guard);
    ExitCode::from(code)
}

async fn run(config: BridgeConfig) -> anyhow::Result<RunOutcome> {
    let shutdown = ShutdownToken::new();
    let codec: Arc<dyn DocumentCodec> = Arc::new(XmiCodec);

    let mut pipeline = PipelineOrchestrator::new(shutdown.clone())
        .with_policy(config.exception_policy)
        .with_params(config.to_params());

    let source = QueueSource::new(
        StompChannel::new(config.source.clone()),
        codec.clone(),
        shutdown.clone(),
    )
    .with_reconnect_policy(config.reconnect.clone());
    pipeline.add_reader(Arc::new(source))?;

    if config.write_xmi {
        pipeline.add_stage(XmiFileWriter::new(codec.clone()))?;
    }
    pipeline.add_stage(QueueSink::new(
        StompChannel::new(config.sink.clone()),
        codec,
        shutdown.clone(),
    ))?;

    info!(
        broker = %config.credentials().address(),
        stages = ?pipeline.stage_names(),
        "Starting pipeline"
    );
    tokio::spawn(watch_ctrl_c(shutdown));

    let outcome = pipeline.run().await.context("pipeline failed to start")?;
    if let RunOutcome::Aborted { thrower, kind, message } = &outcome {
        error!(thrower = %thrower, kind = %kind, message = %message, "Pipeline aborted");
    }
    Ok(outcome)
}

async fn watch_ctrl_c(shutdown: ShutdownToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => {
                info!("Ctrl-C received; shutting down");
                shutdown.trigger();
            }
            Err(e) => warn!(error = %e, "Cannot listen for Ctrl-C"),
        },
        () = shutdown.cancelled() => {}
    }
}
