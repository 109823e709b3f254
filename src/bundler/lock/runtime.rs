//! Runtime lock projection.
//!
//! The runtime lock is the subset of the build lock a shipped application
//! may load: enabled models on an allowlisted backend, with every file
//! re-verified on disk. Any unsafe path, missing file, missing or mismatched
//! hash, or undersized file fails the whole projection, and no runtime lock
//! is left behind.

use super::build::{BuildLock, BuildLockEntry, LockedFile};
use crate::bundler::{
    builder::{ZERO_SHA256, calculate_sha256, mib_to_bytes},
    error::{Error, Result},
    utils::fs::{check_relative_path, join_relative, remove_file, write_atomic},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Backends the runtime can execute.
pub const RUNTIME_BACKENDS: &[&str] = &["ncnn"];

/// Id of the trailing metadata entry.
pub const METADATA_ENTRY_ID: &str = "metadata";

/// Backend tag of the trailing metadata entry.
pub const METADATA_ENTRY_BACKEND: &str = "METADATA";

/// A verified file in the runtime lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeFile {
    /// Path relative to the artifact root
    pub path: String,
    /// Hex SHA-256 computed from the file on disk
    pub sha256: String,
    /// Minimum-size guard in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_bytes: Option<u64>,
}

/// A model the runtime may load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeLockEntry {
    /// Model id
    pub id: String,
    /// Lower-cased backend
    pub backend: String,
    /// Verified files
    pub files: Vec<RuntimeFile>,
    /// Normalized precision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<String>,
    /// Positive tile size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tile_size: Option<u32>,
}

/// Trailing entry pointing at the checksum listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataEntry {
    /// Always [`METADATA_ENTRY_ID`]
    pub id: String,
    /// Always [`METADATA_ENTRY_BACKEND`]
    pub backend: String,
    /// Hex SHA-256 of the checksum listing, zeros when it is absent
    pub jq_sha256sum: String,
}

/// Entry of the runtime lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuntimeLockRecord {
    /// A model
    Model(RuntimeLockEntry),
    /// The trailing metadata entry
    Metadata(MetadataEntry),
}

/// The runtime lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeLock {
    /// Contract version the runtime checks before loading
    pub api_contract_version: String,
    /// Models sorted by id, then the metadata entry
    pub entries: Vec<RuntimeLockRecord>,
}

impl RuntimeLock {
    /// Model entries, without the metadata entry.
    pub fn models(&self) -> impl Iterator<Item = &RuntimeLockEntry> {
        self.entries.iter().filter_map(|record| match record {
            RuntimeLockRecord::Model(entry) => Some(entry),
            RuntimeLockRecord::Metadata(_) => None,
        })
    }

    /// Serializes as pretty JSON with a trailing newline.
    pub fn to_json(&self) -> Result<String> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }
}

/// Projects a build lock onto the runtime allowlist.
#[derive(Debug, Clone)]
pub struct RuntimeLockProjector {
    artifact_root: PathBuf,
    checksum_listing: PathBuf,
    contract_version: String,
}

impl RuntimeLockProjector {
    /// Creates a projector.
    ///
    /// # Arguments
    ///
    /// * `artifact_root` - Directory the `unzipped` roots are relative to
    /// * `checksum_listing` - Listing whose hash goes in the metadata entry
    /// * `contract_version` - Value of `api_contract_version`
    pub fn new(
        artifact_root: impl Into<PathBuf>,
        checksum_listing: impl Into<PathBuf>,
        contract_version: impl Into<String>,
    ) -> Self {
        Self {
            artifact_root: artifact_root.into(),
            checksum_listing: checksum_listing.into(),
            contract_version: contract_version.into(),
        }
    }

    /// Builds the runtime lock, verifying every file it lists.
    pub async fn project(&self, lock: &BuildLock) -> Result<RuntimeLock> {
        if !self.artifact_root.is_dir() {
            return Err(Error::Config(format!(
                "artifact directory {} does not exist",
                self.artifact_root.display()
            )));
        }

        let mut entries = Vec::new();
        for (id, entry) in &lock.models {
            if !entry.ships_at_runtime() {
                log::debug!("{id}: disabled, not shipped");
                continue;
            }
            let backend = entry.backend.to_lowercase();
            if !RUNTIME_BACKENDS.contains(&backend.as_str()) {
                log::info!("{id}: backend {backend} is not supported at runtime, skipping");
                continue;
            }

            let files = self.verify_files(id, entry).await?;
            if files.is_empty() {
                log::warn!("{id}: no files to ship, skipping");
                continue;
            }

            entries.push(RuntimeLockRecord::Model(RuntimeLockEntry {
                id: id.clone(),
                precision: resolve_precision(entry, &backend),
                tile_size: resolve_tile_size(entry, &backend),
                backend,
                files,
            }));
        }

        entries.push(RuntimeLockRecord::Metadata(MetadataEntry {
            id: METADATA_ENTRY_ID.to_string(),
            backend: METADATA_ENTRY_BACKEND.to_string(),
            jq_sha256sum: self.listing_sha256().await?,
        }));

        Ok(RuntimeLock {
            api_contract_version: self.contract_version.clone(),
            entries,
        })
    }

    /// Projects and writes the runtime lock.
    ///
    /// A lock left at `path` by an earlier run is removed first, so a failed
    /// projection leaves no manifest behind.
    pub async fn write(&self, lock: &BuildLock, path: &Path) -> Result<RuntimeLock> {
        remove_file(path).await?;
        let runtime = self.project(lock).await?;
        write_atomic(path, runtime.to_json()?).await?;
        log::info!(
            "Wrote runtime lock {} ({} model(s))",
            path.display(),
            runtime.models().count()
        );
        Ok(runtime)
    }

    async fn verify_files(&self, id: &str, entry: &BuildLockEntry) -> Result<Vec<RuntimeFile>> {
        let unsafe_path = |path: &str, reason| Error::UnsafePath {
            model: id.to_string(),
            path: path.to_string(),
            reason,
        };
        if entry.unzipped.trim() != "." {
            check_relative_path(&entry.unzipped).map_err(|r| unsafe_path(&entry.unzipped, r))?;
        }

        let mut files = Vec::with_capacity(entry.files.len());
        for file in &entry.files {
            if file.path.trim().is_empty() {
                log::warn!("{id}: ignoring file entry with an empty path");
                continue;
            }
            check_relative_path(&file.path).map_err(|r| unsafe_path(&file.path, r))?;
            let relative = join_relative(&entry.unzipped, &file.path);
            check_relative_path(&relative).map_err(|r| unsafe_path(&relative, r))?;

            let on_disk = self.artifact_root.join(&relative);
            if !on_disk.is_file() {
                return Err(Error::MissingFile {
                    model: id.to_string(),
                    path: on_disk,
                });
            }

            let recorded = file.sha256.trim().to_lowercase();
            if recorded.is_empty() {
                return Err(Error::MissingHash {
                    model: id.to_string(),
                    path: file.path.clone(),
                });
            }
            let digest = calculate_sha256(&on_disk).await?;
            if recorded != digest.sha256 {
                return Err(Error::HashMismatch {
                    path: on_disk,
                    recorded,
                    actual: digest.sha256,
                });
            }

            let min_bytes = resolve_min_bytes(file, entry.min_mb);
            if let Some(min_bytes) = min_bytes
                && digest.size < min_bytes
            {
                return Err(Error::BelowMinimumSize {
                    path: on_disk,
                    size: digest.size,
                    min_bytes,
                });
            }

            files.push(RuntimeFile {
                path: relative,
                sha256: digest.sha256,
                min_bytes,
            });
        }
        Ok(files)
    }

    async fn listing_sha256(&self) -> Result<String> {
        if !self.checksum_listing.is_file() {
            log::warn!(
                "{} not found, metadata entry carries a zero hash",
                self.checksum_listing.display()
            );
            return Ok(ZERO_SHA256.to_string());
        }
        Ok(calculate_sha256(&self.checksum_listing).await?.sha256)
    }
}

/// Per-file `min_bytes`, else per-file `min_mb`, else the model's `min_mb`.
fn resolve_min_bytes(file: &LockedFile, model_min_mb: Option<f64>) -> Option<u64> {
    file.min_bytes
        .filter(|b| *b > 0)
        .or_else(|| file.min_mb.and_then(mib_to_bytes))
        .or_else(|| model_min_mb.and_then(mib_to_bytes))
}

/// Entry precision, else the backend metadata's.
fn resolve_precision(entry: &BuildLockEntry, backend: &str) -> Option<String> {
    let normalize = |raw: &str| {
        let raw = raw.trim().to_lowercase();
        (!raw.is_empty()).then_some(raw)
    };
    entry.precision.as_deref().and_then(normalize).or_else(|| {
        entry
            .backend_metadata(backend)
            .and_then(|m| m.get("precision"))
            .and_then(Value::as_str)
            .and_then(normalize)
    })
}

/// Backend metadata tile size, else the entry's. Non-positive values are ignored.
fn resolve_tile_size(entry: &BuildLockEntry, backend: &str) -> Option<u32> {
    entry
        .backend_metadata(backend)
        .and_then(|m| m.get("tile_size"))
        .and_then(Value::as_u64)
        .and_then(|t| u32::try_from(t).ok())
        .filter(|t| *t > 0)
        .or(entry.tile_size.filter(|t| *t > 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::builder::sha256_hex;

    struct Fixture {
        _tmp: tempfile::TempDir,
        dist: PathBuf,
        projector: RuntimeLockProjector,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let dist = tmp.path().join("dist");
        std::fs::create_dir_all(dist.join("models")).unwrap();
        std::fs::write(dist.join("models/a.bin"), vec![3u8; 4096]).unwrap();
        std::fs::write(dist.join("SHA256SUMS.txt"), "# A\n").unwrap();
        let projector = RuntimeLockProjector::new(&dist, dist.join("SHA256SUMS.txt"), "v1.4.1");
        Fixture {
            _tmp: tmp,
            dist,
            projector,
        }
    }

    fn lock(backend: &str, path: &str, sha256: &str) -> BuildLock {
        serde_json::from_value(serde_json::json!({
            "models": {
                "a": {
                    "release": "models-v1",
                    "asset": "a_v1.zip",
                    "backend": backend,
                    "unzipped": "models",
                    "precision": " FP16 ",
                    "tile_size": 128,
                    "files": [{ "path": path, "sha256": sha256, "min_bytes": 1024 }],
                    "metadata": { "ncnn": { "tile_size": 256 } }
                }
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn projects_verified_entries() {
        let f = fixture();
        let sha = sha256_hex(&[3u8; 4096]);
        let runtime = f.projector.project(&lock("NCNN", "a.bin", &sha)).await.unwrap();

        assert_eq!(runtime.api_contract_version, "v1.4.1");
        let models: Vec<_> = runtime.models().collect();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].backend, "ncnn");
        assert_eq!(models[0].files[0].path, "models/a.bin");
        assert_eq!(models[0].files[0].sha256, sha);
        assert_eq!(models[0].files[0].min_bytes, Some(1024));
        assert_eq!(models[0].precision.as_deref(), Some("fp16"));
        assert_eq!(models[0].tile_size, Some(256));

        match runtime.entries.last().unwrap() {
            RuntimeLockRecord::Metadata(meta) => {
                assert_eq!(meta.backend, "METADATA");
                assert_eq!(meta.jq_sha256sum, sha256_hex(b"# A\n"));
            }
            other => panic!("unexpected trailing entry: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unsupported_backends_are_dropped() {
        let f = fixture();
        let sha = sha256_hex(&[3u8; 4096]);
        let runtime = f.projector.project(&lock("tflite", "a.bin", &sha)).await.unwrap();
        assert_eq!(runtime.models().count(), 0);
        assert_eq!(runtime.entries.len(), 1);
    }

    #[tokio::test]
    async fn violations_fail_without_writing() {
        let f = fixture();
        let out = f.dist.join("runtime.lock.json");

        let sha = sha256_hex(&[3u8; 4096]);
        for bad in ["../secret", "/etc/passwd", "missing.bin"] {
            let err = f.projector.write(&lock("ncnn", bad, &sha), &out).await.unwrap_err();
            assert!(err.is_security_violation(), "{bad}: {err}");
            assert!(!out.exists());
        }

        let err = f
            .projector
            .write(&lock("ncnn", "a.bin", &"0".repeat(64)), &out)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::HashMismatch { .. }));
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn undersized_files_fail() {
        let f = fixture();
        std::fs::write(f.dist.join("models/a.bin"), b"tiny").unwrap();
        let err = f
            .projector
            .project(&lock("ncnn", "a.bin", &sha256_hex(b"tiny")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BelowMinimumSize { size: 4, .. }));
    }

    #[tokio::test]
    async fn files_without_a_recorded_hash_are_rejected() {
        let f = fixture();
        let out = f.dist.join("runtime.lock.json");
        std::fs::write(f.dist.join("models/a.bin"), vec![9u8; 4096]).unwrap();

        for blank in ["", "   "] {
            let err = f.projector.write(&lock("ncnn", "a.bin", blank), &out).await.unwrap_err();
            assert!(matches!(err, Error::MissingHash { .. }), "{err}");
            assert!(err.is_security_violation());
            assert!(!out.exists());
        }
    }

    #[tokio::test]
    async fn failed_projection_removes_previous_lock() {
        let f = fixture();
        let out = f.dist.join("runtime.lock.json");
        let sha = sha256_hex(&[3u8; 4096]);
        f.projector.write(&lock("ncnn", "a.bin", &sha), &out).await.unwrap();
        assert!(out.is_file());

        std::fs::write(f.dist.join("models/a.bin"), vec![4u8; 4096]).unwrap();
        let err = f.projector.write(&lock("ncnn", "a.bin", &sha), &out).await.unwrap_err();
        assert!(matches!(err, Error::HashMismatch { .. }));
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn runtime_override_controls_shipping() {
        let f = fixture();
        let sha = sha256_hex(&[3u8; 4096]);
        let with = |runtime: Value, enabled: bool| {
            let mut built = lock("ncnn", "a.bin", &sha);
            let mut raw = serde_json::to_value(&built.models["a"]).unwrap();
            raw["runtime"] = runtime;
            raw["enabled"] = Value::Bool(enabled);
            built.models.insert("a".into(), serde_json::from_value(raw).unwrap());
            built
        };
        let shipped = |lock: BuildLock| {
            let projector = f.projector.clone();
            async move { projector.project(&lock).await.unwrap().models().count() }
        };

        assert_eq!(shipped(with(Value::Bool(false), true)).await, 0);
        assert_eq!(shipped(with(Value::Bool(true), false)).await, 1);
        assert_eq!(shipped(with(serde_json::json!({ "exclude": true }), true)).await, 0);
        assert_eq!(
            shipped(with(serde_json::json!({ "include": true, "exclude": true }), false)).await,
            0
        );
        assert_eq!(shipped(with(serde_json::json!({ "include": false }), true)).await, 0);
        assert_eq!(shipped(with(serde_json::json!({ "include": true }), false)).await, 1);
        assert_eq!(shipped(with(serde_json::json!({}), false)).await, 0);
        assert_eq!(shipped(with(Value::Null, true)).await, 1);
    }

    #[tokio::test]
    async fn missing_listing_gives_zero_hash() {
        let f = fixture();
        std::fs::remove_file(f.dist.join("SHA256SUMS.txt")).unwrap();
        let runtime = f.projector.project(&BuildLock::default()).await.unwrap();
        assert_eq!(
            runtime.entries,
            [RuntimeLockRecord::Metadata(MetadataEntry {
                id: "metadata".into(),
                backend: "METADATA".into(),
                jq_sha256sum: ZERO_SHA256.into(),
            })]
        );
    }

    #[test]
    fn min_bytes_resolution_order() {
        let file = |min_bytes, min_mb| LockedFile {
            path: "a".into(),
            sha256: String::new(),
            size_bytes: 0,
            min_mb,
            min_bytes,
            label: None,
        };
        assert_eq!(resolve_min_bytes(&file(Some(10), Some(1.0)), Some(2.0)), Some(10));
        assert_eq!(resolve_min_bytes(&file(None, Some(1.0)), Some(2.0)), Some(1024 * 1024));
        assert_eq!(resolve_min_bytes(&file(Some(0), None), Some(2.0)), Some(2 * 1024 * 1024));
        assert_eq!(resolve_min_bytes(&file(None, None), None), None);
    }
}
