//! Builder for constructing Settings.

use super::Settings;
use crate::bundler::error::{ErrorExt, Result};
use path_absolutize::Absolutize;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

/// Default model source list, relative to the root.
pub const DEFAULT_SOURCES_FILE: &str = "scripts/model_sources.lock.json";
/// Default work directory, relative to the root.
pub const DEFAULT_WORK_DIR: &str = ".work/models";
/// Default distribution root, relative to the root.
pub const DEFAULT_DIST_DIR: &str = "dist";
/// Default build lock, relative to the root.
pub const DEFAULT_BUILD_LOCK: &str = "models.lock.json";
/// Default runtime lock name inside the distribution root.
pub const DEFAULT_RUNTIME_LOCK_NAME: &str = "models.lock.json";
/// Default release tag.
pub const DEFAULT_RELEASE_TAG: &str = "models-v1";
/// Default runtime manifest contract version.
pub const DEFAULT_CONTRACT_VERSION: &str = "v1.4.1";
/// Default external tool timeout (30 minutes).
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(1800);

/// Builder for constructing [`Settings`].
///
/// Every path setter accepts relative paths; [`build`](Self::build) resolves
/// them against the root directory.
///
/// # Examples
///
/// ```no_run
/// use kodegen_bundler_models::bundler::SettingsBuilder;
///
/// # fn example() -> kodegen_bundler_models::bundler::Result<()> {
/// let settings = SettingsBuilder::new()
///     .root_dir("/srv/app")
///     .dist_dir("dist")
///     .release_tag("models-v2")
///     .build()?;
/// assert_eq!(settings.dist_dir(), std::path::Path::new("/srv/app/dist"));
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct SettingsBuilder {
    root_dir: Option<PathBuf>,
    sources_file: Option<PathBuf>,
    work_dir: Option<PathBuf>,
    dist_dir: Option<PathBuf>,
    build_lock_path: Option<PathBuf>,
    runtime_lock_path: Option<PathBuf>,
    summary_path: Option<PathBuf>,
    release_tag: Option<String>,
    contract_version: Option<String>,
    repository: Option<String>,
    only: Vec<String>,
    tool_timeout: Option<Duration>,
}

impl SettingsBuilder {
    /// Creates a new settings builder.
    pub fn new() -> Self {
        Default::default()
    }

    /// Sets the project root.
    ///
    /// Default: current directory
    pub fn root_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.root_dir = Some(path.as_ref().to_path_buf());
        self
    }

    /// Sets the model source list.
    ///
    /// Default: `scripts/model_sources.lock.json`
    pub fn sources_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.sources_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Sets the work directory.
    ///
    /// Default: `.work/models`
    pub fn work_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.work_dir = Some(path.as_ref().to_path_buf());
        self
    }

    /// Sets the distribution root.
    ///
    /// Default: `dist`
    pub fn dist_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.dist_dir = Some(path.as_ref().to_path_buf());
        self
    }

    /// Sets the build lock path.
    ///
    /// Default: `models.lock.json`
    pub fn build_lock_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.build_lock_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Sets the runtime lock path.
    ///
    /// Default: `<dist>/models.lock.json`
    pub fn runtime_lock_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.runtime_lock_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Sets the markdown summary path.
    ///
    /// Default: `<work_dir>/SUMMARY.md`
    pub fn summary_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.summary_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Sets the release tag.
    ///
    /// Default: `models-v1`
    pub fn release_tag(mut self, tag: impl Into<String>) -> Self {
        self.release_tag = Some(tag.into());
        self
    }

    /// Sets the runtime manifest contract version.
    ///
    /// Default: `v1.4.1`
    pub fn contract_version(mut self, version: impl Into<String>) -> Self {
        self.contract_version = Some(version.into());
        self
    }

    /// Sets the repository recorded in the build lock.
    ///
    /// Default: recovered from the previous build lock
    pub fn repository(mut self, repository: impl Into<String>) -> Self {
        let repository = repository.into();
        self.repository = (!repository.trim().is_empty()).then_some(repository);
        self
    }

    /// Restricts the run to the given model ids.
    ///
    /// Default: all models
    pub fn only(mut self, ids: Vec<String>) -> Self {
        self.only = ids;
        self
    }

    /// Sets the external tool timeout.
    ///
    /// Default: 30 minutes
    pub fn tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = Some(timeout);
        self
    }

    /// Builds the settings, resolving relative paths against the root.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn build(self) -> crate::bundler::Result<Settings> {
        let root_dir = match self.root_dir {
            Some(root) => absolute(&root, &std::env::current_dir().fs_context("reading current directory", ".")?)?,
            None => std::env::current_dir().fs_context("reading current directory", ".")?,
        };

        let resolve = |path: Option<PathBuf>, default: &str| -> Result<PathBuf> {
            let path = path.unwrap_or_else(|| PathBuf::from(default));
            absolute(&path, &root_dir)
        };

        let sources_file = resolve(self.sources_file, DEFAULT_SOURCES_FILE)?;
        let work_dir = resolve(self.work_dir, DEFAULT_WORK_DIR)?;
        let dist_dir = resolve(self.dist_dir, DEFAULT_DIST_DIR)?;
        let build_lock_path = resolve(self.build_lock_path, DEFAULT_BUILD_LOCK)?;
        let runtime_lock_path = match self.runtime_lock_path {
            Some(path) => absolute(&path, &root_dir)?,
            None => dist_dir.join(DEFAULT_RUNTIME_LOCK_NAME),
        };
        let summary_path = match self.summary_path {
            Some(path) => absolute(&path, &root_dir)?,
            None => work_dir.join("SUMMARY.md"),
        };

        Ok(Settings::new(
            root_dir,
            sources_file,
            work_dir,
            dist_dir,
            build_lock_path,
            runtime_lock_path,
            summary_path,
            self.release_tag.unwrap_or_else(|| DEFAULT_RELEASE_TAG.to_string()),
            self.contract_version
                .unwrap_or_else(|| DEFAULT_CONTRACT_VERSION.to_string()),
            self.repository,
            self.only,
            self.tool_timeout.unwrap_or(DEFAULT_TOOL_TIMEOUT),
        ))
    }
}

fn absolute(path: &Path, base: &Path) -> Result<PathBuf> {
    Ok(path
        .absolutize_from(base)
        .fs_context("resolving path", path)?
        .into_owned())
}
