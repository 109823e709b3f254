//! HTTP utilities for downloading model sources.

use crate::bundler::error::{ErrorExt, Result};
use std::path::Path;
use tokio::io::AsyncWriteExt;

/// User agent sent with every download.
pub const USER_AGENT: &str = concat!("kodegen-model-prep/", env!("CARGO_PKG_VERSION"));

/// Builds the HTTP client shared by all downloads of a run.
pub fn client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().user_agent(USER_AGENT).build()?)
}

/// Downloads a URL to `dest`, streaming the body so large weights never sit
/// in memory.
///
/// Parent directories are created. Non-2xx responses are errors.
pub async fn download_to_file(client: &reqwest::Client, url: &str, dest: &Path) -> Result<u64> {
    log::info!("Downloading {} → {}", url, dest.display());

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .fs_context("creating download directory", parent)?;
    }

    let mut response = client.get(url).send().await?.error_for_status()?;

    let mut file = tokio::fs::File::create(dest)
        .await
        .fs_context("creating download file", dest)?;
    let mut written = 0u64;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk)
            .await
            .fs_context("writing download", dest)?;
        written += chunk.len() as u64;
    }
    file.flush().await.fs_context("flushing download", dest)?;

    log::debug!("Downloaded {} bytes to {}", written, dest.display());
    Ok(written)
}
