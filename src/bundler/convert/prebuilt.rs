//! Backend for models whose sources already are in the target format.

use super::{BackendResult, ConvertContext, OutputFileDescriptor};
use crate::bundler::{
    error::{Context, Result},
    settings::PrebuiltSpec,
    utils::fs::copy_file,
};
use serde_json::{Map, Value};
use std::path::Path;

/// Copies declared files out of the resolved sources.
///
/// The copies live in the backend's own directory, so the stager never
/// touches the download cache.
#[derive(Debug, Clone)]
pub struct PrebuiltBackend {
    spec: PrebuiltSpec,
}

impl PrebuiltBackend {
    /// Creates the backend.
    pub fn new(spec: PrebuiltSpec) -> Self {
        Self { spec }
    }

    /// Backend id.
    pub fn id(&self) -> &str {
        &self.spec.backend
    }

    pub(super) async fn convert(
        &self,
        ctx: &ConvertContext<'_>,
        out_dir: &Path,
    ) -> Result<BackendResult> {
        let mut files = Vec::with_capacity(self.spec.outputs.len());

        for output in &self.spec.outputs {
            let source_id = output
                .source
                .as_deref()
                .context("prebuilt output without source")?;
            let source = ctx.source(source_id)?;
            let from = match output.file.as_deref() {
                Some(file) => source.join(file),
                None => source.to_path_buf(),
            };
            let to = out_dir.join(&output.relative);

            copy_file(&from, &to)
                .await
                .with_context(|| format!("taking prebuilt output {} from source '{source_id}'", output.relative))?;
            log::debug!("Prebuilt {} ← {}", output.relative, from.display());

            files.push(OutputFileDescriptor::from_spec(to, output));
        }

        let mut metadata = Map::new();
        metadata.insert("prebuilt".into(), Value::Bool(true));

        Ok(BackendResult {
            backend: self.spec.backend.clone(),
            files,
            metadata,
        })
    }
}
