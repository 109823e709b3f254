//! Core Settings struct and implementations.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

/// Checksum listing file name inside the distribution root.
pub const CHECKSUM_LISTING_NAME: &str = "SHA256SUMS.txt";

/// Process-wide settings for a pipeline run.
///
/// Built once by [`SettingsBuilder`](super::SettingsBuilder) before any model
/// is processed and only borrowed afterwards. All paths are absolute.
///
/// # Layout
///
/// ```text
/// <work_dir>/downloads/<model>/<source>   resolved sources
/// <work_dir>/converted/<model>/           converter outputs
/// <work_dir>/staging/<artifact>_<version> staging tree
/// <work_dir>/tmp/                         archive scratch space
/// <dist_dir>/<artifact>_<version>.zip     bundles
/// <dist_dir>/<relative paths>             unpacked bundle contents
/// <dist_dir>/SHA256SUMS.txt               checksum listing
/// ```
#[derive(Clone, Debug)]
pub struct Settings {
    /// Project root that relative paths were resolved against.
    root_dir: PathBuf,

    /// Model source list.
    sources_file: PathBuf,

    /// Scratch directory for downloads, conversion and staging.
    work_dir: PathBuf,

    /// Distribution output root (bundles, unpacked files, listing).
    dist_dir: PathBuf,

    /// Build lock path.
    build_lock_path: PathBuf,

    /// Runtime lock path.
    runtime_lock_path: PathBuf,

    /// Markdown status summary path.
    summary_path: PathBuf,

    /// Release tag recorded for every model.
    release_tag: String,

    /// Runtime manifest format version.
    contract_version: String,

    /// Repository recorded in the build lock, when known up front.
    repository: Option<String>,

    /// Restrict the run to these model ids; empty means all.
    only: Vec<String>,

    /// Time budget for each external tool invocation.
    tool_timeout: Duration,
}

impl Settings {
    /// Returns the project root.
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Returns the model source list path.
    pub fn sources_file(&self) -> &Path {
        &self.sources_file
    }

    /// Returns the work directory.
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Directory holding one subdirectory of resolved sources per model.
    pub fn downloads_dir(&self) -> PathBuf {
        self.work_dir.join("downloads")
    }

    /// Directory holding one subdirectory of converter outputs per model.
    pub fn converted_dir(&self) -> PathBuf {
        self.work_dir.join("converted")
    }

    /// Root of the per-model staging trees.
    pub fn staging_dir(&self) -> PathBuf {
        self.work_dir.join("staging")
    }

    /// Scratch space for archive downloads and extraction.
    pub fn tmp_dir(&self) -> PathBuf {
        self.work_dir.join("tmp")
    }

    /// Returns the distribution root.
    pub fn dist_dir(&self) -> &Path {
        &self.dist_dir
    }

    /// Path of the flat checksum listing.
    pub fn checksum_listing_path(&self) -> PathBuf {
        self.dist_dir.join(CHECKSUM_LISTING_NAME)
    }

    /// Returns the build lock path.
    pub fn build_lock_path(&self) -> &Path {
        &self.build_lock_path
    }

    /// Returns the runtime lock path.
    pub fn runtime_lock_path(&self) -> &Path {
        &self.runtime_lock_path
    }

    /// Returns the summary path.
    pub fn summary_path(&self) -> &Path {
        &self.summary_path
    }

    /// Returns the release tag.
    pub fn release_tag(&self) -> &str {
        &self.release_tag
    }

    /// Returns the runtime manifest contract version.
    pub fn contract_version(&self) -> &str {
        &self.contract_version
    }

    /// Returns the repository supplied by the environment, if any.
    pub fn repository(&self) -> Option<&str> {
        self.repository.as_deref()
    }

    /// Model ids the run is restricted to; empty means all.
    pub fn only(&self) -> &[String] {
        &self.only
    }

    /// Whether a model takes part in this run.
    pub fn selects(&self, model_id: &str) -> bool {
        self.only.is_empty() || self.only.iter().any(|id| id == model_id)
    }

    /// Returns the external tool timeout.
    pub fn tool_timeout(&self) -> Duration {
        self.tool_timeout
    }

    /// Creates a new Settings instance (used by SettingsBuilder).
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        root_dir: PathBuf,
        sources_file: PathBuf,
        work_dir: PathBuf,
        dist_dir: PathBuf,
        build_lock_path: PathBuf,
        runtime_lock_path: PathBuf,
        summary_path: PathBuf,
        release_tag: String,
        contract_version: String,
        repository: Option<String>,
        only: Vec<String>,
        tool_timeout: Duration,
    ) -> Self {
        Self {
            root_dir,
            sources_file,
            work_dir,
            dist_dir,
            build_lock_path,
            runtime_lock_path,
            summary_path,
            release_tag,
            contract_version,
            repository,
            only,
            tool_timeout,
        }
    }
}
