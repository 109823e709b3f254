//! File system utilities for staging and publishing.
//!
//! Provides idempotent directory resets, copies with automatic parent
//! creation, atomic writes and the path-safety check shared by model
//! configuration, staging and runtime projection.

use crate::bundler::error::{Error, ErrorExt, Result};
use std::{
    io,
    path::{Component, Path, PathBuf},
};
use tokio::fs;

/// Creates all of the directories of the specified path, erasing it first if specified.
///
/// With `erase = true` this is the delete-then-recreate reset every scratch
/// directory of the pipeline goes through.
pub async fn create_dir_all(path: &Path, erase: bool) -> Result<()> {
    if erase {
        remove_dir_all(path).await?;
    }

    // create_dir_all is already idempotent - succeeds even if dir exists
    fs::create_dir_all(path)
        .await
        .fs_context("creating directory", path)
}

/// Removes the directory and its contents if it exists.
pub async fn remove_dir_all(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()), // Idempotent
        Err(e) => Err(Error::Fs {
            context: "removing directory",
            path: path.to_path_buf(),
            error: e,
        }),
    }
}

/// Removes a file if it exists.
pub async fn remove_file(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Fs {
            context: "removing file",
            path: path.to_path_buf(),
            error: e,
        }),
    }
}

/// Copies a regular file from one path to another, creating any parent
/// directories of the destination path as necessary.
///
/// Fails if the source path is a directory or doesn't exist.
pub async fn copy_file(from: &Path, to: &Path) -> Result<()> {
    if !from.exists() {
        return Err(Error::GenericError(format!("{from:?} does not exist")));
    }
    if !from.is_file() {
        return Err(Error::GenericError(format!("{from:?} is not a file")));
    }
    if let Some(dest_dir) = to.parent() {
        fs::create_dir_all(dest_dir)
            .await
            .fs_context("creating parent directory", dest_dir)?;
    }
    fs::copy(from, to).await.fs_context("copying file", to)?;
    Ok(())
}

/// Recursively copies a directory from one path to another, creating any
/// parent directories of the destination path as necessary.
///
/// Symlinks are followed; the copy contains regular files only.
pub async fn copy_dir(from: &Path, to: &Path) -> Result<()> {
    if !from.is_dir() {
        return Err(Error::GenericError(format!("{from:?} is not a directory")));
    }

    let from = from.to_path_buf();
    let to = to.to_path_buf();

    tokio::task::spawn_blocking(move || -> Result<()> {
        std::fs::create_dir_all(&to).fs_context("creating directory", &to)?;

        for entry in walkdir::WalkDir::new(&from).follow_links(true) {
            let entry = entry?;
            let rel_path = entry.path().strip_prefix(&from)?;
            let dest_path = to.join(rel_path);

            if entry.file_type().is_dir() {
                std::fs::create_dir_all(&dest_path).fs_context("creating directory", &dest_path)?;
            } else {
                std::fs::copy(entry.path(), &dest_path).fs_context("copying file", &dest_path)?;
            }
        }

        Ok(())
    })
    .await
    .map_err(|e| Error::GenericError(format!("Directory copy task panicked: {}", e)))?
}

/// Moves a file or directory, falling back to copy + delete across devices.
pub async fn move_path(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)
            .await
            .fs_context("creating parent directory", parent)?;
    }
    if fs::rename(from, to).await.is_ok() {
        return Ok(());
    }

    log::debug!("rename {} -> {} failed, copying instead", from.display(), to.display());
    if from.is_dir() {
        copy_dir(from, to).await?;
        remove_dir_all(from).await
    } else {
        copy_file(from, to).await?;
        remove_file(from).await
    }
}

/// Writes `contents` to `path` through a sibling temporary file and a rename,
/// so readers never observe a partially written file.
pub async fn write_atomic(path: &Path, contents: impl AsRef<[u8]>) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::GenericError(format!("{path:?} has no parent directory")))?;
    fs::create_dir_all(parent)
        .await
        .fs_context("creating parent directory", parent)?;

    let file_name = path
        .file_name()
        .ok_or_else(|| Error::GenericError(format!("{path:?} has no file name")))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp_path: PathBuf = parent.join(tmp_name);

    fs::write(&tmp_path, contents)
        .await
        .fs_context("writing temporary file", &tmp_path)?;
    fs::rename(&tmp_path, path)
        .await
        .fs_context("replacing file", path)?;
    Ok(())
}

/// Checks that a slash-separated path is a non-empty relative path that stays
/// inside its root.
///
/// Backslashes count as separators too, so `..\\x` is rejected on every
/// platform. Returns the reason on failure.
pub fn check_relative_path(raw: &str) -> std::result::Result<(), &'static str> {
    if raw.trim().is_empty() {
        return Err("is empty");
    }
    if raw.starts_with(['/', '\\']) {
        return Err("is absolute");
    }
    if raw.split(['/', '\\']).any(|segment| segment == "..") {
        return Err("contains a parent-directory segment");
    }
    for component in Path::new(raw).components() {
        match component {
            Component::Prefix(_) | Component::RootDir => return Err("is absolute"),
            Component::ParentDir => return Err("contains a parent-directory segment"),
            Component::CurDir | Component::Normal(_) => {}
        }
    }
    Ok(())
}

/// Joins slash-separated relative segments, dropping empty and `.` segments.
///
/// `join_relative(".", "a/b")` is `a/b`; `join_relative("models", "./x")` is
/// `models/x`.
pub fn join_relative(root: &str, path: &str) -> String {
    root.split(['/', '\\'])
        .chain(path.split(['/', '\\']))
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_path_checks() {
        assert!(check_relative_path("models/a.bin").is_ok());
        assert!(check_relative_path("./a.bin").is_ok());
        assert_eq!(check_relative_path(""), Err("is empty"));
        assert_eq!(check_relative_path("/etc/passwd"), Err("is absolute"));
        assert_eq!(check_relative_path("\\share\\x"), Err("is absolute"));
        assert_eq!(
            check_relative_path("../secret"),
            Err("contains a parent-directory segment")
        );
        assert_eq!(
            check_relative_path("models/..\\..\\x"),
            Err("contains a parent-directory segment")
        );
    }

    #[test]
    fn join_relative_skips_current_dir() {
        assert_eq!(join_relative(".", "a/b.bin"), "a/b.bin");
        assert_eq!(join_relative("models", "./x.param"), "models/x.param");
        assert_eq!(join_relative("", "x"), "x");
    }

    #[tokio::test]
    async fn reset_removes_stale_files() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("stage");
        create_dir_all(&dir, true).await.unwrap();
        std::fs::write(dir.join("stale"), b"old").unwrap();

        create_dir_all(&dir, true).await.unwrap();
        assert!(dir.exists());
        assert!(!dir.join("stale").exists());
    }

    #[tokio::test]
    async fn atomic_write_replaces_contents() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("out/lock.json");
        write_atomic(&path, "one").await.unwrap();
        write_atomic(&path, "two").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "two");
        assert!(!tmp.path().join("out/lock.json.tmp").exists());
    }
}
