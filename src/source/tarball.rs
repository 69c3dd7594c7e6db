//! Tarball sources.
//!
//! The archive is streamed to disk while being hashed, verified against the digest
//! embedded in the locator, then extracted with the first path segment stripped
//! (`package/index.js` lands as `index.js`). Gzip is detected by its magic bytes so
//! plain tar archives work too.

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use futures::StreamExt;
use std::fs;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use super::integrity::{HashAlgorithm, Integrity};
use crate::core::TrellisError;
use crate::fetch::{FetchClient, FetchOptions};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Download `url` into `out_dir`, verifying `integrity` when given.
///
/// On an integrity mismatch nothing is extracted and the partial archive is deleted.
pub async fn download(
    fetch: &FetchClient,
    url: &str,
    integrity: Option<&Integrity>,
    out_dir: &Path,
    timeout: Duration,
) -> Result<()> {
    let archive_path = out_dir.with_extension("archive");
    let result = tokio::time::timeout(timeout, fetch_archive(fetch, url, integrity, &archive_path))
        .await
        .map_err(|_| TrellisError::NetworkError {
            operation: format!("download {url}"),
            reason: format!("timed out after {} seconds", timeout.as_secs()),
        });

    let outcome = match result {
        Ok(Ok(())) => {
            let archive = archive_path.clone();
            let dest = out_dir.to_path_buf();
            let source_url = url.to_string();
            tokio::task::spawn_blocking(move || extract(&archive, &dest, &source_url))
                .await
                .context("Extraction task panicked")
                .and_then(|r| r)
        }
        Ok(Err(e)) => Err(e),
        Err(e) => Err(e.into()),
    };

    let _ = tokio::fs::remove_file(&archive_path).await;
    if outcome.is_err() {
        let _ = tokio::fs::remove_dir_all(out_dir).await;
    }
    outcome
}

async fn fetch_archive(
    fetch: &FetchClient,
    url: &str,
    integrity: Option<&Integrity>,
    archive_path: &Path,
) -> Result<()> {
    let response = fetch.fetch(url, &FetchOptions::default()).await?;
    if !response.status().is_success() {
        return Err(TrellisError::NetworkError {
            operation: format!("download {url}"),
            reason: format!("server responded with {}", response.status()),
        }
        .into());
    }

    let algorithm = integrity.map_or(HashAlgorithm::Sha512, |i| i.algorithm);
    let mut hasher = algorithm.hasher();
    let mut file = tokio::fs::File::create(archive_path)
        .await
        .with_context(|| format!("Failed to create {}", archive_path.display()))?;

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| TrellisError::NetworkError {
            operation: format!("download {url}"),
            reason: e.to_string(),
        })?;
        hasher.update(&chunk);
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    let actual = hasher.finish();
    match integrity {
        Some(expected) => expected.verify(&actual, url)?,
        None => tracing::debug!(target: "source", "{} has no integrity, computed {}", url, actual),
    }
    Ok(())
}

/// Strip the leading path segment. Entries that would escape the output directory
/// are rejected.
fn strip_first_segment(path: &Path, source_url: &str) -> Result<Option<PathBuf>, TrellisError> {
    let mut components = path.components().filter(|c| !matches!(c, Component::CurDir));
    components.next();
    let mut stripped = PathBuf::new();
    for component in components {
        match component {
            Component::Normal(part) => stripped.push(part),
            _ => {
                return Err(TrellisError::InvalidLocator {
                    locator: source_url.to_string(),
                    reason: format!("archive entry '{}' escapes the package directory", path.display()),
                });
            }
        }
    }
    Ok((!stripped.as_os_str().is_empty()).then_some(stripped))
}

fn extract(archive_path: &Path, out_dir: &Path, source_url: &str) -> Result<()> {
    let mut file = fs::File::open(archive_path)
        .with_context(|| format!("Failed to open {}", archive_path.display()))?;
    let mut magic = [0u8; 2];
    let read = file.read(&mut magic)?;
    file.seek(SeekFrom::Start(0))?;

    let reader: Box<dyn Read> = if read == 2 && magic == GZIP_MAGIC {
        Box::new(GzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    fs::create_dir_all(out_dir)?;
    let mut archive = tar::Archive::new(reader);
    for entry in archive.entries().with_context(|| format!("Invalid archive from {source_url}"))? {
        let mut entry = entry.with_context(|| format!("Corrupt archive entry from {source_url}"))?;
        let entry_path = entry.path()?.into_owned();
        let Some(relative) = strip_first_segment(&entry_path, source_url)? else {
            continue;
        };
        let dest = out_dir.join(&relative);
        let entry_type = entry.header().entry_type();

        if entry_type.is_dir() {
            fs::create_dir_all(&dest)?;
        } else if entry_type.is_file() {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            entry
                .unpack(&dest)
                .with_context(|| format!("Failed to extract {}", relative.display()))?;
        } else {
            tracing::debug!(
                target: "source",
                "Skipping non-regular archive entry {} ({:?})",
                entry_path.display(),
                entry_type
            );
        }
    }
    Ok(())
}
