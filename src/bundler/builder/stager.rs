//! Staging, bundling and publishing of converted outputs.
//!
//! For one model the stager:
//! 1. resets `<staging>/<artifact>_<version>`
//! 2. copies every included output to its relative path and hashes the copy
//! 3. hashes excluded outputs where they are, for the record only
//! 4. infers the common root of the included files
//! 5. zips the included files into `<dist>/<artifact>_<version>.zip`
//! 6. unpacks the bundle into `<dist>` and checks the unpacked hashes
//!
//! The unpacked tree under `<dist>` is what runtime lock projection verifies.
//! It is shared by every model, so a relative path may be published by one
//! model per run.

use super::{
    checksum::{FileDigest, calculate_sha256, format_mib},
    root::{common_root, relative_to_root},
};
use crate::{
    bail,
    bundler::{
        convert::OutputFileDescriptor,
        error::{Error, Result},
        settings::ModelDescriptor,
        utils::{
            archive,
            fs::{check_relative_path, copy_file, create_dir_all, remove_file},
        },
    },
};
use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
    sync::Mutex,
};

/// One converted output after staging.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedFileEntry {
    /// Path inside the bundle, as declared by the converter
    pub relative: String,
    /// Path relative to the model's common root; unchanged when outside it
    pub visible: String,
    /// Hex SHA-256 of the staged copy (or of the original when excluded)
    pub sha256: String,
    /// Size in bytes
    pub size_bytes: u64,
    /// Size in MiB, four decimals
    pub size_mb: f64,
    /// Whether the file ships in the bundle
    pub included: bool,
    /// Optional label
    pub label: Option<String>,
    /// Declared minimum size in bytes
    pub min_bytes: Option<u64>,
    /// Declared minimum size in MiB
    pub min_mb: Option<f64>,
}

/// A staged and bundled model.
#[derive(Debug, Clone)]
pub struct StagedModel {
    /// Model id
    pub model_id: String,
    /// Backend that produced the files
    pub backend: String,
    /// Every output, included and excluded, in declaration order
    pub files: Vec<StagedFileEntry>,
    /// Deepest directory shared by the included files, `"."` if none
    pub common_root: String,
    /// Staging directory holding the included copies
    pub staging_dir: PathBuf,
    /// Bundle file name
    pub bundle_name: String,
    /// Bundle location under the dist directory
    pub bundle_path: PathBuf,
    /// Hex SHA-256 of the bundle
    pub bundle_sha256: String,
    /// Bundle size in bytes
    pub bundle_size: u64,
}

impl StagedModel {
    /// Files that ship in the bundle.
    pub fn included(&self) -> impl Iterator<Item = &StagedFileEntry> {
        self.files.iter().filter(|f| f.included)
    }
}

/// Copies converter outputs into a staging tree and publishes bundles.
#[derive(Debug)]
pub struct ArtifactStager {
    staging_root: PathBuf,
    dist_dir: PathBuf,
    /// Published relative path -> owning model id, for the current run
    published: Mutex<BTreeMap<String, String>>,
}

impl ArtifactStager {
    /// Creates a stager.
    ///
    /// # Arguments
    ///
    /// * `staging_root` - Parent of the per-model staging directories
    /// * `dist_dir` - Where bundles are written and unpacked
    pub fn new(staging_root: impl Into<PathBuf>, dist_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_root: staging_root.into(),
            dist_dir: dist_dir.into(),
            published: Mutex::new(BTreeMap::new()),
        }
    }

    /// Forgets the paths published so far. Call at the start of a run.
    pub fn start_run(&self) -> Result<()> {
        self.published
            .lock()
            .map_err(|_| Error::GenericError("published path registry poisoned".into()))?
            .clear();
        Ok(())
    }

    /// Claims the included paths of `model` in the shared dist tree.
    ///
    /// Fails when another model of the run already published one of them.
    fn claim(&self, model: &ModelDescriptor, outputs: &[OutputFileDescriptor]) -> Result<()> {
        let mut published = self
            .published
            .lock()
            .map_err(|_| Error::GenericError("published path registry poisoned".into()))?;
        for output in outputs.iter().filter(|o| o.include) {
            if let Some(owner) = published.get(&output.relative)
                && owner != &model.id
            {
                return Err(Error::Config(format!(
                    "model '{}': output '{}' is already published by model '{owner}'",
                    model.id, output.relative
                )));
            }
        }
        for output in outputs.iter().filter(|o| o.include) {
            published.insert(output.relative.clone(), model.id.clone());
        }
        Ok(())
    }

    /// Stages, bundles and publishes one model's outputs.
    ///
    /// # Returns
    ///
    /// * `Ok(StagedModel)` - Staged entries in declaration order plus the bundle
    /// * `Err` - On an unsafe or duplicate relative path, a path another model
    ///   of the run already published, a missing output, or I/O failure
    pub async fn stage(
        &self,
        model: &ModelDescriptor,
        backend: &str,
        outputs: &[OutputFileDescriptor],
    ) -> Result<StagedModel> {
        let mut seen = BTreeSet::new();
        for output in outputs {
            check_relative_path(&output.relative).map_err(|reason| Error::UnsafePath {
                model: model.id.clone(),
                path: output.relative.clone(),
                reason,
            })?;
            if !seen.insert(output.relative.as_str()) {
                bail!("model '{}': output '{}' staged twice", model.id, output.relative);
            }
        }
        self.claim(model, outputs)?;

        let staging_dir = self.staging_root.join(model.bundle_stem());
        create_dir_all(&staging_dir, true).await?;
        log::debug!("Staging {} into {}", model.id, staging_dir.display());

        let root = common_root(
            outputs
                .iter()
                .filter(|o| o.include)
                .map(|o| o.relative.as_str()),
        );

        let mut files = Vec::with_capacity(outputs.len());
        for output in outputs {
            let digest = if output.include {
                let staged = staging_dir.join(&output.relative);
                copy_file(&output.path, &staged).await?;
                calculate_sha256(&staged).await?
            } else {
                calculate_sha256(&output.path).await?
            };
            files.push(staged_entry(output, &root, digest));
        }

        if !files.iter().any(|f| f.included) {
            bail!("model '{}': backend {} produced no included files", model.id, backend);
        }

        let bundle_name = model.bundle_name();
        let bundle_path = self.dist_dir.join(&bundle_name);
        create_dir_all(&self.dist_dir, false).await?;
        remove_file(&bundle_path).await?;

        let mut entries: Vec<String> = files
            .iter()
            .filter(|f| f.included)
            .map(|f| f.relative.clone())
            .collect();
        entries.sort();
        write_bundle(&bundle_path, &staging_dir, entries).await?;

        let bundle = calculate_sha256(&bundle_path).await?;
        log::info!(
            "Bundled {} ({:.2} MiB, sha256 {})",
            bundle_name,
            format_mib(bundle.size),
            bundle.sha256
        );

        let staged = StagedModel {
            model_id: model.id.clone(),
            backend: backend.to_string(),
            files,
            common_root: root,
            staging_dir,
            bundle_name,
            bundle_path,
            bundle_sha256: bundle.sha256,
            bundle_size: bundle.size,
        };
        self.publish(&staged).await?;
        Ok(staged)
    }

    /// Unpacks a bundle into the dist directory and checks every file
    /// against its staged hash.
    async fn publish(&self, staged: &StagedModel) -> Result<()> {
        let bundle = staged.bundle_path.clone();
        let dest = self.dist_dir.clone();
        tokio::task::spawn_blocking(move || archive::extract_zip(&bundle, &dest))
            .await
            .map_err(|e| Error::GenericError(format!("Bundle extraction task panicked: {}", e)))??;

        for file in staged.included() {
            let unpacked = self.dist_dir.join(&file.relative);
            let digest = calculate_sha256(&unpacked).await?;
            if digest.sha256 != file.sha256 {
                return Err(Error::HashMismatch {
                    path: unpacked,
                    recorded: file.sha256.clone(),
                    actual: digest.sha256,
                });
            }
        }
        log::debug!(
            "Published {} file(s) of {} under {}",
            staged.included().count(),
            staged.model_id,
            self.dist_dir.display()
        );
        Ok(())
    }
}

fn staged_entry(output: &OutputFileDescriptor, root: &str, digest: FileDigest) -> StagedFileEntry {
    StagedFileEntry {
        relative: output.relative.clone(),
        visible: relative_to_root(&output.relative, root),
        sha256: digest.sha256,
        size_bytes: digest.size,
        size_mb: format_mib(digest.size),
        included: output.include,
        label: output.label.clone(),
        min_bytes: output.min_bytes,
        min_mb: output.min_mb,
    }
}

async fn write_bundle(bundle_path: &Path, staging_dir: &Path, entries: Vec<String>) -> Result<()> {
    let bundle_path = bundle_path.to_path_buf();
    let staging_dir = staging_dir.to_path_buf();
    tokio::task::spawn_blocking(move || archive::write_zip(&bundle_path, &staging_dir, &entries))
        .await
        .map_err(|e| Error::GenericError(format!("Bundle creation task panicked: {}", e)))?
}
