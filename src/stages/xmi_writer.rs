//! Stage writing each document's XMI to a file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::constants::{defaults, params};
use crate::document::{Document, DocumentCodec};
use crate::error::{StageError, StageResult};
use crate::pipeline::{ParamSchema, PipelineArgs, Stage};

/// Annotation holding the written file's path
pub const XMI_PATH_ANNOTATION: &str = "xmi_path";

/// Writes `<output_dir>/<document id>.xmi` for every document
#[derive(Debug)]
pub struct XmiFileWriter {
    codec: Arc<dyn DocumentCodec>,
    output_dir: PathBuf,
    initialized: bool,
    written: u64,
}

impl XmiFileWriter {
    pub fn new(codec: Arc<dyn DocumentCodec>) -> Self {
        Self {
            codec,
            output_dir: PathBuf::from(defaults::OUTPUT_DIR),
            initialized: false,
            written: 0,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

#[async_trait]
impl Stage for XmiFileWriter {
    fn name(&self) -> &str {
        "XmiFileWriter"
    }

    fn declare_params(&self, schema: &mut ParamSchema) {
        schema.optional(
            params::OUTPUT_DIR,
            "Directory for written XMI files",
            defaults::OUTPUT_DIR,
        );
    }

    fn init_params(&mut self, args: &PipelineArgs) -> StageResult<()> {
        self.output_dir = PathBuf::from(args.get_or(params::OUTPUT_DIR, defaults::OUTPUT_DIR));
        Ok(())
    }

    async fn initialize(&mut self) -> StageResult<()> {
        tokio::fs::create_dir_all(&self.output_dir).await?;
        self.initialized = true;
        info!(output_dir = %self.output_dir.display(), "XMI writer ready");
        Ok(())
    }

    async fn process(&mut self, document: &mut Document) -> StageResult<()> {
        if !self.initialized {
            return Err(StageError::NotInitialized {
                stage: self.name().to_string(),
            });
        }
        let payload = self.codec.encode(document)?;
        let path = self.output_dir.join(format!("{}.xmi", document.id));
        tokio::fs::write(&path, &payload).await.map_err(|e| {
            StageError::processing_with_source(format!("writing {}", path.display()), e)
        })?;
        self.written += 1;
        debug!(path = %path.display(), bytes = payload.len(), "XMI written");
        document.annotate(XMI_PATH_ANNOTATION, path.display().to_string());
        Ok(())
    }

    async fn collection_process_complete(&mut self) -> StageResult<()> {
        info!(output_dir = %self.output_dir.display(), written = self.written, "XMI writer finished");
        Ok(())
    }
}
