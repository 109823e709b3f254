//! Main pipeline orchestration.
//!
//! This module provides the [`Pipeline`] that takes every selected model
//! through source resolution, conversion with fallback, staging and
//! bundling, then writes the checksum listing, the run summary and the build
//! lock. [`project_runtime_lock`] derives the runtime lock from a build lock
//! on disk.

use super::{ChecksumLedger, StagedModel, stager::ArtifactStager};
use crate::{
    bundler::{
        Result,
        convert::{ConversionAttempt, ConversionOutcome, ConvertContext, FallbackChain, Toolchain},
        error::{Context, Error},
        lock::{BuildLock, BuildLockEntry, RuntimeLock, RuntimeLockProjector},
        settings::{CHECKSUM_LISTING_NAME, ModelDescriptor, Settings},
        utils::fs::create_dir_all,
    },
    source::SourceResolver,
};
use serde_json::{Map, Value};

/// What one model produced.
#[derive(Debug, Clone)]
pub struct ModelReport {
    /// Model id
    pub model_id: String,
    /// Display name
    pub display_name: String,
    /// Staged files and bundle
    pub staged: StagedModel,
    /// Static metadata merged with what the winning backend reported, keyed by backend
    pub metadata: Map<String, Value>,
    /// Backends that failed before the winning one
    pub failed: Vec<ConversionAttempt>,
}

impl ModelReport {
    /// The preferred backend, when an alternate produced the files.
    pub fn fallback_from(&self) -> Option<&str> {
        self.failed.first().map(|a| a.backend.as_str())
    }
}

/// Result of a full preparation run.
#[derive(Debug, Clone)]
pub struct PrepareReport {
    /// Per-model results in processing order
    pub models: Vec<ModelReport>,
    /// The build lock that was written
    pub build_lock: BuildLock,
}

/// Model preparation pipeline.
///
/// Models are processed one at a time in id order. Each works in its own
/// download, conversion and staging directories, all reset before use, so
/// re-running with the same inputs yields the same outputs.
///
/// # Examples
///
/// ```no_run
/// use kodegen_bundler_models::bundler::{Pipeline, SettingsBuilder, settings::load_model_sources};
///
/// # async fn example() -> kodegen_bundler_models::bundler::Result<()> {
/// let settings = SettingsBuilder::new().root_dir(".").build()?;
/// let models = load_model_sources(settings.sources_file())?;
///
/// let pipeline = Pipeline::new(settings, &models)?;
/// let report = pipeline.prepare(&models).await?;
/// println!("Prepared {} model(s)", report.models.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Pipeline {
    settings: Settings,
    toolchain: Toolchain,
    resolver: SourceResolver,
    stager: ArtifactStager,
}

impl Pipeline {
    /// Creates a pipeline, probing `PATH` for every tool the selected models use.
    ///
    /// # Arguments
    ///
    /// * `settings` - Run configuration from `SettingsBuilder`
    /// * `models` - The loaded model source list
    pub fn new(settings: Settings, models: &[ModelDescriptor]) -> Result<Self> {
        let toolchain = Toolchain::discover(models.iter().filter(|m| settings.selects(&m.id)));
        log::debug!("{} external tool(s) available", toolchain.available());
        Self::with_toolchain(settings, toolchain)
    }

    /// Creates a pipeline with an explicit toolchain.
    pub fn with_toolchain(settings: Settings, toolchain: Toolchain) -> Result<Self> {
        let resolver = SourceResolver::new(settings.root_dir(), settings.tmp_dir())?;
        let stager = ArtifactStager::new(settings.staging_dir(), settings.dist_dir());
        Ok(Self {
            settings,
            toolchain,
            resolver,
            stager,
        })
    }

    /// Returns a reference to the pipeline settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Prepares every selected model, then writes the checksum listing, the
    /// build lock and the summary.
    ///
    /// The first failing model aborts the run before any of those files is
    /// written.
    ///
    /// # Returns
    ///
    /// Per-model reports and the written build lock.
    pub async fn prepare(&self, models: &[ModelDescriptor]) -> Result<PrepareReport> {
        for id in self.settings.only() {
            if !models.iter().any(|m| &m.id == id) {
                return Err(Error::Config(format!("unknown model id '{id}'")));
            }
        }
        let selected: Vec<&ModelDescriptor> = models
            .iter()
            .filter(|m| self.settings.selects(&m.id))
            .collect();
        if selected.is_empty() {
            return Err(Error::Config(format!(
                "no models to prepare in {}",
                self.settings.sources_file().display()
            )));
        }

        self.stager.start_run()?;
        for dir in [
            self.settings.downloads_dir(),
            self.settings.converted_dir(),
            self.settings.staging_dir(),
            self.settings.tmp_dir(),
        ] {
            create_dir_all(&dir, false).await?;
        }
        create_dir_all(self.settings.dist_dir(), false).await?;

        let mut ledger = ChecksumLedger::new();
        let mut reports = Vec::with_capacity(selected.len());
        let mut build_lock = BuildLock {
            repository: self.repository(),
            ..Default::default()
        };

        for model in selected {
            log::info!("Preparing {} ({})", model.id, model.name);
            let report = self
                .process_model(model)
                .await
                .with_context(|| format!("preparing model '{}'", model.id))?;

            ledger.record(&report);
            build_lock.models.insert(
                model.id.clone(),
                BuildLockEntry::from_report(model, &report, self.settings.release_tag()),
            );
            reports.push(report);
        }

        ledger
            .write_listing(&self.settings.checksum_listing_path())
            .await?;
        build_lock.write(self.settings.build_lock_path()).await?;
        ledger
            .write_summary(
                self.settings.summary_path(),
                self.settings.release_tag(),
                CHECKSUM_LISTING_NAME,
            )
            .await?;

        log::info!("Prepared {} model(s)", reports.len());
        Ok(PrepareReport {
            models: reports,
            build_lock,
        })
    }

    /// Resolves, converts and stages one model.
    pub async fn process_model(&self, model: &ModelDescriptor) -> Result<ModelReport> {
        let downloads = self.settings.downloads_dir().join(&model.id);
        let sources = self.resolver.resolve_all(model, &downloads).await?;

        let work_dir = self.settings.converted_dir().join(&model.id);
        create_dir_all(&work_dir, true).await?;
        let ctx = ConvertContext {
            model,
            sources: &sources,
            work_dir: &work_dir,
            toolchain: &self.toolchain,
            timeout: self.settings.tool_timeout(),
        };
        let outcome = FallbackChain::for_model(model).run(&ctx).await?;

        let staged = self
            .stager
            .stage(model, &outcome.result.backend, &outcome.result.files)
            .await?;

        Ok(ModelReport {
            model_id: model.id.clone(),
            display_name: model.name.clone(),
            metadata: merge_metadata(model, &outcome),
            staged,
            failed: outcome.failed,
        })
    }

    /// Repository from the environment, else the one recorded in the previous
    /// build lock.
    fn repository(&self) -> String {
        self.settings
            .repository()
            .map(str::to_string)
            .or_else(|| {
                BuildLock::load_existing(self.settings.build_lock_path())
                    .map(|lock| lock.repository)
                    .filter(|r| !r.is_empty())
            })
            .unwrap_or_default()
    }
}

/// The model's static metadata with the winning backend's object extended by
/// the produced metadata and, after a fallback, `fallback_from`.
fn merge_metadata(model: &ModelDescriptor, outcome: &ConversionOutcome) -> Map<String, Value> {
    let mut metadata: Map<String, Value> = model
        .metadata
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let backend = &outcome.result.backend;
    let key = metadata
        .keys()
        .find(|k| k.eq_ignore_ascii_case(backend))
        .cloned()
        .unwrap_or_else(|| backend.clone());
    let slot = metadata
        .entry(key)
        .or_insert_with(|| Value::Object(Map::new()));
    if !slot.is_object() {
        log::warn!("{}: metadata for {} is not an object, replacing it", model.id, backend);
        *slot = Value::Object(Map::new());
    }

    if let Value::Object(fields) = slot {
        for (k, v) in &outcome.result.metadata {
            fields.insert(k.clone(), v.clone());
        }
        if let Some(from) = outcome.failed.first() {
            fields.insert("fallback_from".into(), Value::String(from.backend.clone()));
        }
    }
    metadata
}

/// Projects the build lock at the configured path into the runtime lock.
///
/// Nothing is written when any file fails verification.
pub async fn project_runtime_lock(settings: &Settings) -> Result<RuntimeLock> {
    let path = settings.build_lock_path();
    if !path.is_file() {
        return Err(Error::Config(format!("build lock not found: {}", path.display())));
    }
    let lock = BuildLock::load(path)?;

    RuntimeLockProjector::new(
        settings.dist_dir(),
        settings.checksum_listing_path(),
        settings.contract_version(),
    )
    .write(&lock, settings.runtime_lock_path())
    .await
}
