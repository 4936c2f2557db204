//! HTTP artifact registry
//!
//! Artifacts live at `<registry>/<name>/<version>/<name>-<version>.tar.gz`
//! with an optional `.sha256` sidecar next to them. The manifest checksum
//! wins over the sidecar; with neither, the download is not verified.

use async_trait::async_trait;
use flate2::read::GzDecoder;
use std::path::{Path, PathBuf};

use crate::core::fetch::{FetchCause, FetchedSource, RegistryProvider, RegistryRequest};
use crate::error::DownloadError;
use crate::infra::download::DownloadManager;
use crate::infra::filesystem::{self, AbandonFlag};

/// Registry provider over HTTP
#[derive(Debug, Clone)]
pub struct HttpRegistry {
    downloads: DownloadManager,
    default_registry: String,
}

impl HttpRegistry {
    /// Create a provider; `default_registry` serves dependencies without a registry URL
    pub fn new(downloads: DownloadManager, default_registry: &str) -> Self {
        Self {
            downloads,
            default_registry: default_registry.trim_end_matches('/').to_string(),
        }
    }

    /// Artifact URL for a request
    pub fn artifact_url(&self, request: &RegistryRequest<'_>) -> String {
        let registry = request
            .registry
            .map_or(self.default_registry.as_str(), |r| r.trim_end_matches('/'));
        format!(
            "{registry}/{name}/{version}/{name}-{version}.tar.gz",
            name = request.name,
            version = request.version
        )
    }

    async fn expected_checksum(
        &self,
        request: &RegistryRequest<'_>,
        url: &str,
    ) -> Result<Option<String>, FetchCause> {
        if let Some(sha256) = request.sha256 {
            return Ok(Some(sha256.to_lowercase()));
        }

        let sidecar = self
            .downloads
            .fetch_optional_text(&format!("{url}.sha256"))
            .await
            .map_err(download_cause)?;

        // `sha256sum` format: "<hex>  <file>"
        Ok(sidecar
            .as_deref()
            .and_then(|text| text.split_whitespace().next())
            .map(str::to_lowercase))
    }
}

fn download_cause(error: DownloadError) -> FetchCause {
    match error {
        DownloadError::Unauthorized { .. } => FetchCause::Authentication(error.to_string()),
        DownloadError::ChecksumFailed {
            expected, actual, ..
        } => FetchCause::ChecksumMismatch { expected, actual },
        DownloadError::IoError { .. } => FetchCause::Io(error.to_string()),
        DownloadError::NetworkError { .. } | DownloadError::MaxRetriesExceeded { .. } => {
            FetchCause::Network(error.to_string())
        }
    }
}

fn archive_path(dest: &Path) -> PathBuf {
    filesystem::scratch_path(dest, "tar.gz")
}

fn extract(archive: &Path, dest: &Path) -> std::io::Result<()> {
    let file = std::fs::File::open(archive)?;
    std::fs::create_dir_all(dest)?;
    tar::Archive::new(GzDecoder::new(file)).unpack(dest)
}

/// Unpack a `.tar.gz` into `dest` on a blocking thread
async fn unpack(archive: &Path, dest: &Path) -> Result<(), FetchCause> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();
    let scratch = filesystem::scratch_path(&dest, "unpack");

    let flag = AbandonFlag::new();
    let _guard = flag.guard();
    let published = tokio::task::spawn_blocking(move || {
        if let Err(e) = extract(&archive, &scratch) {
            if let Err(rm) = filesystem::remove_dir_all(&scratch) {
                tracing::warn!(path = %scratch.display(), error = %rm, "Failed to remove partial unpack");
            }
            return Err(FetchCause::Io(format!(
                "failed to unpack '{}': {e}",
                archive.display()
            )));
        }
        flag.publish(&scratch, &dest).map_err(|e| FetchCause::Io(e.to_string()))
    })
    .await
    .map_err(|e| FetchCause::Io(format!("unpack task failed: {e}")))??;

    if published {
        Ok(())
    } else {
        Err(FetchCause::Cancelled)
    }
}

#[async_trait]
impl RegistryProvider for HttpRegistry {
    async fn fetch(
        &self,
        request: &RegistryRequest<'_>,
        dest: &Path,
    ) -> Result<FetchedSource, FetchCause> {
        let url = self.artifact_url(request);
        let archive = archive_path(dest);

        tracing::info!(dependency = request.name, %url, "Downloading artifact");

        let expected = self.expected_checksum(request, &url).await?;
        let downloaded = match &expected {
            Some(checksum) => self.downloads.download_verified(&url, &archive, checksum).await,
            None => {
                tracing::warn!(dependency = request.name, "No checksum available, artifact is unverified");
                self.downloads.download(&url, &archive).await
            }
        };
        downloaded.map_err(download_cause)?;

        let result = unpack(&archive, dest).await;
        if let Err(e) = tokio::fs::remove_file(&archive).await {
            tracing::warn!(path = %archive.display(), error = %e, "Failed to remove downloaded archive");
        }
        result?;

        Ok(FetchedSource {
            resolved_version: request.version.to_string(),
        })
    }
}
