//! Converter backends.
//!
//! A converter turns a model's resolved sources into an ordered list of
//! [`OutputFileDescriptor`]s plus backend metadata. The numeric work happens in
//! external tools; this module only runs them, checks that what they produced
//! is plausible and hands the files over to the stager.
//!
//! - [`ConverterBackend`] - one backend (prebuilt files or an external command)
//! - [`FallbackChain`] - preferred backend first, alternates on failure
//! - [`Toolchain`] - tool discovery done once before any model runs

mod command;
mod fallback;
mod prebuilt;
mod toolchain;

pub use command::{CommandBackend, expand_arg};
pub use fallback::{ConversionAttempt, ConversionOutcome, FallbackChain};
pub use prebuilt::PrebuiltBackend;
pub use toolchain::Toolchain;

use crate::bundler::{
    builder::checksum::mib_to_bytes,
    error::{Error, Result},
    settings::{ConverterSpec, ModelDescriptor, OutputSpec},
};
use serde_json::{Map, Value};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

/// Smallest size an output may have when it declares no guard of its own.
pub const DEFAULT_MIN_OUTPUT_BYTES: u64 = 1024;

/// A file produced by a converter.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputFileDescriptor {
    /// Absolute location of the produced file
    pub path: PathBuf,
    /// Path inside the bundle
    pub relative: String,
    /// `false` keeps the file for diagnostics only
    pub include: bool,
    /// Optional label recorded in the build lock
    pub label: Option<String>,
    /// Minimum-size override in bytes
    pub min_bytes: Option<u64>,
    /// Minimum-size override in MiB
    pub min_mb: Option<f64>,
}

impl OutputFileDescriptor {
    /// Descriptor for `path` carrying the declared attributes of `spec`.
    pub fn from_spec(path: PathBuf, spec: &OutputSpec) -> Self {
        Self {
            path,
            relative: spec.relative.clone(),
            include: spec.include,
            label: spec.label.clone(),
            min_bytes: spec.min_bytes,
            min_mb: spec.min_mb,
        }
    }

    /// The declared minimum size, `min_bytes` winning over `min_mb`.
    pub fn min_size_guard(&self) -> Option<u64> {
        self.min_bytes
            .filter(|b| *b > 0)
            .or_else(|| self.min_mb.and_then(mib_to_bytes))
    }
}

/// What a converter produced.
#[derive(Debug, Clone)]
pub struct BackendResult {
    /// Backend id of the produced files
    pub backend: String,
    /// Outputs in declaration order
    pub files: Vec<OutputFileDescriptor>,
    /// Backend-specific metadata
    pub metadata: Map<String, Value>,
}

/// Inputs shared by every backend of one model.
pub struct ConvertContext<'a> {
    /// Model being converted
    pub model: &'a ModelDescriptor,
    /// Resolved local path per source id
    pub sources: &'a BTreeMap<String, PathBuf>,
    /// Per-model conversion directory; each backend works in a subdirectory
    pub work_dir: &'a Path,
    /// Tools discovered at startup
    pub toolchain: &'a Toolchain,
    /// Default time budget per tool invocation
    pub timeout: Duration,
}

impl ConvertContext<'_> {
    /// Resolved path of a source.
    pub fn source(&self, id: &str) -> Result<&Path> {
        self.sources.get(id).map(PathBuf::as_path).ok_or_else(|| {
            Error::Config(format!("model '{}': source '{id}' was not resolved", self.model.id))
        })
    }
}

/// One converter backend of a model.
#[derive(Debug, Clone)]
pub enum ConverterBackend {
    /// Ships files already present in the sources
    Prebuilt(PrebuiltBackend),
    /// Runs an external conversion tool
    Command(CommandBackend),
}

impl ConverterBackend {
    /// Builds the backend for a declared converter.
    pub fn from_spec(spec: &ConverterSpec) -> Self {
        match spec {
            ConverterSpec::Prebuilt(spec) => Self::Prebuilt(PrebuiltBackend::new(spec.clone())),
            ConverterSpec::Command(spec) => Self::Command(CommandBackend::new(spec.clone())),
        }
    }

    /// Backend id reported on success.
    pub fn id(&self) -> &str {
        match self {
            Self::Prebuilt(backend) => backend.id(),
            Self::Command(backend) => backend.id(),
        }
    }

    /// Runs the backend and checks its outputs are plausible.
    ///
    /// The backend's working directory is `ctx.work_dir/<backend id>`, reset
    /// before the attempt.
    pub async fn convert(&self, ctx: &ConvertContext<'_>) -> Result<BackendResult> {
        let out_dir = ctx.work_dir.join(self.id());
        crate::bundler::utils::fs::create_dir_all(&out_dir, true).await?;

        let result = match self {
            Self::Prebuilt(backend) => backend.convert(ctx, &out_dir).await?,
            Self::Command(backend) => backend.convert(ctx, &out_dir).await?,
        };

        check_plausible(&result.files).await?;
        Ok(result)
    }
}

/// Rejects missing outputs and outputs smaller than their guard (or
/// [`DEFAULT_MIN_OUTPUT_BYTES`]).
pub async fn check_plausible(files: &[OutputFileDescriptor]) -> Result<()> {
    for file in files {
        let min_bytes = file.min_size_guard().unwrap_or(DEFAULT_MIN_OUTPUT_BYTES);
        let size = match tokio::fs::metadata(&file.path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => 0,
        };
        if size < min_bytes {
            return Err(Error::Plausibility {
                path: file.path.clone(),
                size,
                min_bytes,
            });
        }
        log::debug!("  ✓ {} ({} bytes)", file.relative, size);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(path: PathBuf) -> OutputFileDescriptor {
        OutputFileDescriptor {
            path,
            relative: "models/a.bin".into(),
            include: true,
            label: None,
            min_bytes: None,
            min_mb: None,
        }
    }

    #[test]
    fn guard_prefers_bytes_over_mib() {
        let mut d = descriptor(PathBuf::from("/x"));
        assert_eq!(d.min_size_guard(), None);
        d.min_mb = Some(1.0);
        assert_eq!(d.min_size_guard(), Some(1024 * 1024));
        d.min_bytes = Some(10);
        assert_eq!(d.min_size_guard(), Some(10));
        d.min_bytes = Some(0);
        assert_eq!(d.min_size_guard(), Some(1024 * 1024));
    }

    #[tokio::test]
    async fn tiny_output_is_a_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("a.bin");
        std::fs::write(&path, [0u8; 100]).unwrap();

        let err = check_plausible(&[descriptor(path.clone())]).await.unwrap_err();
        assert!(matches!(err, Error::Plausibility { size: 100, min_bytes: 1024, .. }));

        let mut small_ok = descriptor(path);
        small_ok.min_bytes = Some(50);
        check_plausible(&[small_ok]).await.unwrap();

        let missing = descriptor(tmp.path().join("missing"));
        assert!(matches!(
            check_plausible(&[missing]).await.unwrap_err(),
            Error::Plausibility { size: 0, .. }
        ));
    }
}
