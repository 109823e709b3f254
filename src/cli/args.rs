//! Command line argument parsing and validation.
//!
//! Every option can also come from the environment so CI jobs configure the
//! pipeline without flags. Options left unset fall back to the
//! `SettingsBuilder` defaults.

use crate::bundler::{Result, Settings, SettingsBuilder};
use clap::{Parser, Subcommand};
use std::{path::PathBuf, time::Duration};

/// Model artifact bundler
#[derive(Parser, Debug)]
#[command(
    name = "kodegen_bundler_models",
    version,
    about = "Stages, hashes and bundles converted models and writes lock manifests",
    long_about = "Prepares model artifacts for release.

`prepare` resolves every model's sources, converts them (falling back to
alternate backends), stages and zips the outputs into the dist directory, and
writes SHA256SUMS.txt, the build lock and a markdown summary.

`runtime-lock` projects the build lock onto the backends the runtime can load,
re-verifying every file on disk, and writes the runtime lock.

`all` runs both.

Usage:
  kodegen_bundler_models prepare --sources scripts/model_sources.lock.json
  kodegen_bundler_models runtime-lock --dist dist
  kodegen_bundler_models all --only restormer_fp16

Exit codes: 0 success, 1 pipeline failure, 2 configuration error or
runtime lock safety violation."
)]
pub struct Args {
    /// Step to run
    #[command(subcommand)]
    pub command: Command,

    /// Project root that relative paths resolve against
    #[arg(long, env = "MODELS_ROOT_DIR", value_name = "DIR", global = true)]
    pub root: Option<PathBuf>,

    /// Model source list (JSON, or TOML by extension)
    #[arg(long, env = "MODEL_SOURCES_FILE", value_name = "PATH", global = true)]
    pub sources: Option<PathBuf>,

    /// Scratch directory for downloads, conversion and staging
    #[arg(long, env = "WORK_DIR", value_name = "DIR", global = true)]
    pub work_dir: Option<PathBuf>,

    /// Distribution directory for bundles, unpacked files and SHA256SUMS.txt
    #[arg(long, env = "MODELS_DIST", value_name = "DIR", global = true)]
    pub dist: Option<PathBuf>,

    /// Build lock path
    #[arg(long, env = "MODELS_LOCK_PATH", value_name = "PATH", global = true)]
    pub build_lock: Option<PathBuf>,

    /// Runtime lock path (default: <dist>/models.lock.json)
    #[arg(long, env = "MODELS_RUNTIME_LOCK_PATH", value_name = "PATH", global = true)]
    pub runtime_lock: Option<PathBuf>,

    /// Markdown summary path (default: <work-dir>/SUMMARY.md)
    #[arg(long, env = "GITHUB_STEP_SUMMARY", value_name = "PATH", global = true)]
    pub summary: Option<PathBuf>,

    /// Release tag recorded for every model
    #[arg(long, env = "MODELS_RELEASE_TAG", value_name = "TAG", global = true)]
    pub release_tag: Option<String>,

    /// Runtime lock contract version
    #[arg(long, env = "MODELS_CONTRACT_VERSION", value_name = "VERSION", global = true)]
    pub contract_version: Option<String>,

    /// Repository (owner/name) recorded in the build lock
    #[arg(long, env = "GITHUB_REPOSITORY", value_name = "REPO", global = true)]
    pub repository: Option<String>,

    /// Only prepare these model ids (comma separated)
    #[arg(long, value_delimiter = ',', value_name = "IDS", global = true)]
    pub only: Vec<String>,

    /// Time limit for each external converter invocation, in seconds
    #[arg(long, env = "MODELS_TOOL_TIMEOUT", value_name = "SECS", global = true)]
    pub tool_timeout: Option<u64>,
}

/// Pipeline step.
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Resolve, convert, stage and bundle models; write the build lock
    Prepare,
    /// Write the runtime lock from the build lock
    RuntimeLock,
    /// Prepare, then write the runtime lock
    All,
}

impl Command {
    /// Whether the step prepares models.
    pub fn prepares(self) -> bool {
        matches!(self, Command::Prepare | Command::All)
    }

    /// Whether the step writes the runtime lock.
    pub fn projects(self) -> bool {
        matches!(self, Command::RuntimeLock | Command::All)
    }
}

impl Args {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate arguments for consistency
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Some(id) = self.only.iter().find(|id| id.trim().is_empty()) {
            return Err(format!("Invalid model id in --only: '{id}'"));
        }
        if self.tool_timeout == Some(0) {
            return Err("--tool-timeout must be at least 1 second".to_string());
        }
        if !self.only.is_empty() && !self.command.prepares() {
            return Err("--only applies to prepare and all".to_string());
        }
        Ok(())
    }

    /// Builds the run settings.
    pub fn settings(&self) -> Result<Settings> {
        let mut builder = SettingsBuilder::new();
        if let Some(root) = &self.root {
            builder = builder.root_dir(root);
        }
        if let Some(sources) = &self.sources {
            builder = builder.sources_file(sources);
        }
        if let Some(work_dir) = &self.work_dir {
            builder = builder.work_dir(work_dir);
        }
        if let Some(dist) = &self.dist {
            builder = builder.dist_dir(dist);
        }
        if let Some(path) = &self.build_lock {
            builder = builder.build_lock_path(path);
        }
        if let Some(path) = &self.runtime_lock {
            builder = builder.runtime_lock_path(path);
        }
        if let Some(path) = &self.summary {
            builder = builder.summary_path(path);
        }
        if let Some(tag) = &self.release_tag {
            builder = builder.release_tag(tag);
        }
        if let Some(version) = &self.contract_version {
            builder = builder.contract_version(version);
        }
        if let Some(repository) = &self.repository {
            builder = builder.repository(repository);
        }
        if let Some(secs) = self.tool_timeout {
            builder = builder.tool_timeout(Duration::from_secs(secs));
        }
        builder.only(self.only.clone()).build()
    }
}
