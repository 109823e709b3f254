//! Build lock: the full record of one preparation run.

use crate::bundler::{
    builder::ModelReport,
    error::{Context, ErrorExt, Result},
    settings::ModelDescriptor,
    utils::fs::write_atomic,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{collections::BTreeMap, path::Path};

fn default_unzipped() -> String {
    "models".to_string()
}

fn default_true() -> bool {
    true
}

/// An included file as recorded in the build lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockedFile {
    /// Path relative to the entry's `unzipped` root
    pub path: String,
    /// Hex SHA-256
    #[serde(default)]
    pub sha256: String,
    /// Size in bytes
    #[serde(default)]
    pub size_bytes: u64,
    /// Minimum-size guard in MiB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_mb: Option<f64>,
    /// Minimum-size guard in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_bytes: Option<u64>,
    /// Optional label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Hash of a staged file, included or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedHash {
    /// Path inside the bundle
    pub path: String,
    /// Hex SHA-256
    pub sha256: String,
    /// Whether the file ships in the bundle
    pub included: bool,
}

/// Per-entry override of whether the runtime ships a model.
///
/// Either a plain flag or an `{ "include": .., "exclude": .. }` object, where
/// `exclude: true` wins over `include`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuntimeOverride {
    /// `true` ships the model, `false` keeps it out
    Flag(bool),
    /// Explicit include/exclude switches
    Rules {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        include: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exclude: Option<bool>,
    },
}

impl RuntimeOverride {
    /// The decision this override makes, if any.
    pub fn decision(&self) -> Option<bool> {
        match *self {
            RuntimeOverride::Flag(ship) => Some(ship),
            RuntimeOverride::Rules { exclude: Some(true), .. } => Some(false),
            RuntimeOverride::Rules { include, .. } => include,
        }
    }
}

/// One model in the build lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildLockEntry {
    /// Release tag the bundle is published under
    pub release: String,
    /// Bundle file name
    pub asset: String,
    /// Hex SHA-256 of the bundle
    #[serde(default)]
    pub sha256: String,
    /// Bundle size in MiB
    #[serde(default)]
    pub asset_mb: f64,
    /// Root the bundle unpacks to, relative to the artifact directory
    #[serde(default = "default_unzipped")]
    pub unzipped: String,
    /// Backend that produced the files
    pub backend: String,
    /// Display name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Whether the runtime should ship this model
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Hand-edited override of `enabled` for runtime projection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeOverride>,
    /// Model-wide minimum-size guard in MiB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_mb: Option<f64>,
    /// Declared precision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<String>,
    /// Declared tile size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tile_size: Option<u32>,
    /// Included files, relative to `unzipped`
    #[serde(default)]
    pub files: Vec<LockedFile>,
    /// Every staged file
    #[serde(default)]
    pub hashes: Vec<LockedHash>,
    /// Static and produced metadata keyed by backend
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl BuildLockEntry {
    /// Builds the entry for a processed model.
    pub fn from_report(model: &ModelDescriptor, report: &ModelReport, release: &str) -> Self {
        let staged = &report.staged;
        Self {
            release: release.to_string(),
            asset: staged.bundle_name.clone(),
            sha256: staged.bundle_sha256.clone(),
            asset_mb: crate::bundler::builder::format_mib(staged.bundle_size),
            unzipped: staged.common_root.clone(),
            backend: staged.backend.clone(),
            name: model.name.clone(),
            enabled: model.enabled,
            runtime: None,
            min_mb: model.min_mb,
            precision: model.precision.map(|p| p.as_str().to_string()),
            tile_size: model.tile_size,
            files: staged
                .included()
                .map(|f| LockedFile {
                    path: f.visible.clone(),
                    sha256: f.sha256.clone(),
                    size_bytes: f.size_bytes,
                    min_mb: f.min_mb,
                    min_bytes: f.min_bytes,
                    label: f.label.clone(),
                })
                .collect(),
            hashes: staged
                .files
                .iter()
                .map(|f| LockedHash {
                    path: f.relative.clone(),
                    sha256: f.sha256.clone(),
                    included: f.included,
                })
                .collect(),
            metadata: report.metadata.clone(),
        }
    }

    /// Whether runtime projection should consider this entry: the `runtime`
    /// override when it decides, else `enabled`.
    pub fn ships_at_runtime(&self) -> bool {
        self.runtime
            .and_then(|o| o.decision())
            .unwrap_or(self.enabled)
    }

    /// Metadata object of a backend, matched case-insensitively.
    pub fn backend_metadata(&self, backend: &str) -> Option<&Map<String, Value>> {
        self.metadata
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(backend))
            .and_then(|(_, value)| value.as_object())
    }
}

/// The build lock file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildLock {
    /// `owner/name` of the repository releases are published to
    #[serde(default)]
    pub repository: String,
    /// Entries keyed by model id
    #[serde(default)]
    pub models: BTreeMap<String, BuildLockEntry>,
}

impl BuildLock {
    /// Reads a build lock.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).fs_context("reading build lock", path)?;
        serde_json::from_str(&content).with_context(|| format!("parsing build lock {}", path.display()))
    }

    /// Reads a build lock if one exists and parses; anything else yields `None`.
    pub fn load_existing(path: &Path) -> Option<Self> {
        if !path.is_file() {
            return None;
        }
        match Self::load(path) {
            Ok(lock) => Some(lock),
            Err(e) => {
                log::warn!("Ignoring unreadable build lock {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Serializes as pretty JSON with a trailing newline.
    pub fn to_json(&self) -> Result<String> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Writes the lock atomically.
    pub async fn write(&self, path: &Path) -> Result<()> {
        write_atomic(path, self.to_json()?).await?;
        log::info!("Wrote build lock {} ({} model(s))", path.display(), self.models.len());
        Ok(())
    }
}
