use std::path::Path;

use futures_util::StreamExt;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use super::error::DownloadError;
use super::paths::part_path;
use crate::catalog::{CatalogClient, Variant};

/// Download a variant into `download_path` via a `.part` temp file.
///
/// Each attempt starts from scratch. The final path only appears through
/// the rename after the write is verified, and a failed attempt never
/// leaves its `.part` file behind. Returns the number of bytes written.
pub async fn download_variant(
    client: &CatalogClient,
    variant: &Variant,
    download_path: &Path,
) -> Result<u64, DownloadError> {
    if let Some(parent) = download_path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let part = part_path(download_path);
    let _ = fs::remove_file(&part).await;

    let result = attempt_download(client, variant, download_path, &part).await;
    if result.is_err() {
        if let Err(e) = fs::remove_file(&part).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Could not remove {}: {}", part.display(), e);
            }
        }
    }
    result
}

async fn attempt_download(
    client: &CatalogClient,
    variant: &Variant,
    download_path: &Path,
    part: &Path,
) -> Result<u64, DownloadError> {
    let content = client.open_content(variant).await?;
    let expected = content.content_length;

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(part)
        .await?;

    let mut written: u64 = 0;
    let mut body = content.body;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| {
            tracing::debug!(
                path = %download_path.display(),
                bytes_so_far = written,
                ?expected,
                "Body interrupted: {}",
                e
            );
            e
        })?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    if written == 0 || expected.is_some_and(|n| n != written) {
        return Err(DownloadError::Integrity {
            path: download_path.display().to_string(),
            expected,
            written,
        });
    }

    fs::rename(part, download_path).await?;
    Ok(written)
}
