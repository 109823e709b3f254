//! Model source resolution.
//!
//! Turns the `sources` of a model into local paths under the model's
//! download directory:
//!
//! - `file` sources are downloaded (or copied) to `<dest>/<id>/<file name>`
//! - `archive` sources are extracted and their single top-level directory is
//!   merged into `<dest>/<id>`
//!
//! Relative local paths resolve against the project root.

use crate::bundler::{
    error::{Error, Result},
    settings::{ModelDescriptor, SourceEntry, SourceKind, SourceLocation},
    utils::{
        archive,
        fs::{copy_dir, copy_file, create_dir_all, move_path, remove_dir_all},
        http,
    },
};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

/// Fetches and unpacks model sources.
#[derive(Debug, Clone)]
pub struct SourceResolver {
    client: reqwest::Client,
    root_dir: PathBuf,
    scratch_dir: PathBuf,
}

impl SourceResolver {
    /// Creates a resolver.
    ///
    /// # Arguments
    ///
    /// * `root_dir` - Base for relative local paths
    /// * `scratch_dir` - Holds downloaded archives while they are extracted
    pub fn new(root_dir: impl Into<PathBuf>, scratch_dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            client: http::client()?,
            root_dir: root_dir.into(),
            scratch_dir: scratch_dir.into(),
        })
    }

    /// Resolves every source of a model into a fresh `dest_root`.
    ///
    /// # Returns
    ///
    /// Local path per source id.
    pub async fn resolve_all(
        &self,
        model: &ModelDescriptor,
        dest_root: &Path,
    ) -> Result<BTreeMap<String, PathBuf>> {
        create_dir_all(dest_root, true).await?;

        let mut resolved = BTreeMap::new();
        for entry in &model.sources {
            let path = self.resolve(entry, dest_root).await?;
            log::debug!("{}: source {} → {}", model.id, entry.id, path.display());
            resolved.insert(entry.id.clone(), path);
        }
        Ok(resolved)
    }

    /// Resolves one source below `dest_root`, replacing earlier results.
    pub async fn resolve(&self, entry: &SourceEntry, dest_root: &Path) -> Result<PathBuf> {
        let target = dest_root.join(&entry.id);
        create_dir_all(&target, true).await?;

        match (entry.kind, entry.location()?) {
            (SourceKind::File, SourceLocation::Remote(url)) => {
                let dest = target.join(safe_file_name(entry));
                http::download_to_file(&self.client, url.as_str(), &dest).await?;
                Ok(dest)
            }
            (SourceKind::File, SourceLocation::Local(path)) => {
                let local = self.local_path(&path)?;
                let dest = target.join(safe_file_name(entry));
                if local.is_dir() {
                    copy_dir(&local, &dest).await?;
                } else {
                    copy_file(&local, &dest).await?;
                }
                Ok(dest)
            }
            (SourceKind::Archive, SourceLocation::Remote(url)) => {
                let scratch = self.scratch_for(dest_root, entry);
                create_dir_all(&scratch, true).await?;
                let download = scratch.join("archive");
                http::download_to_file(&self.client, url.as_str(), &download).await?;
                let result = self
                    .unpack_single_root(&download, url.as_str(), &scratch, &target)
                    .await;
                remove_dir_all(&scratch).await?;
                result.map(|_| target)
            }
            (SourceKind::Archive, SourceLocation::Local(path)) => {
                let local = self.local_path(&path)?;
                if local.is_dir() {
                    copy_dir(&local, &target).await?;
                    return Ok(target);
                }
                let scratch = self.scratch_for(dest_root, entry);
                create_dir_all(&scratch, true).await?;
                let origin = local.display().to_string();
                let result = self
                    .unpack_single_root(&local, &origin, &scratch, &target)
                    .await;
                remove_dir_all(&scratch).await?;
                result.map(|_| target)
            }
        }
    }

    fn local_path(&self, path: &Path) -> Result<PathBuf> {
        let local = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root_dir.join(path)
        };
        if !local.exists() {
            return Err(Error::Config(format!(
                "local source {} does not exist",
                local.display()
            )));
        }
        Ok(local)
    }

    fn scratch_for(&self, dest_root: &Path, entry: &SourceEntry) -> PathBuf {
        let owner = dest_root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.scratch_dir.join(format!("{owner}-{}", entry.id))
    }

    /// Extracts `archive_path` under `scratch` and merges the contents of its
    /// single top-level directory into `target`.
    async fn unpack_single_root(
        &self,
        archive_path: &Path,
        origin: &str,
        scratch: &Path,
        target: &Path,
    ) -> Result<()> {
        let extracted = scratch.join("extracted");
        create_dir_all(&extracted, true).await?;

        let from = archive_path.to_path_buf();
        let into = extracted.clone();
        tokio::task::spawn_blocking(move || archive::extract(&from, &into))
            .await
            .map_err(|e| Error::GenericError(format!("Archive extraction task panicked: {}", e)))??;

        let root = single_root(&extracted, origin).await?;
        let mut children = tokio::fs::read_dir(&root).await?;
        while let Some(child) = children.next_entry().await? {
            move_path(&child.path(), &target.join(child.file_name())).await?;
        }
        Ok(())
    }
}

/// File name for a `file` source, reduced to its last component.
fn safe_file_name(entry: &SourceEntry) -> String {
    let name = entry.file_name();
    Path::new(&name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| n != "..")
        .unwrap_or_else(|| entry.id.clone())
}

/// The one directory at the top of an extracted archive. Stray top-level
/// files are ignored.
async fn single_root(extracted: &Path, origin: &str) -> Result<PathBuf> {
    let mut dirs = Vec::new();
    let mut entries = tokio::fs::read_dir(extracted).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            dirs.push(entry.path());
        } else {
            log::debug!("{origin}: ignoring top-level file {}", entry.path().display());
        }
    }

    match dirs.len() {
        1 => Ok(dirs.remove(0)),
        found => Err(Error::ArchiveNoSingleRoot {
            url: origin.to_string(),
            found,
        }),
    }
}
