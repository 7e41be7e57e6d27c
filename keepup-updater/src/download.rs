use reqwest::header::{ETAG, IF_NONE_MATCH};
use reqwest::{StatusCode, Url};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::error::DownloadError;

pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Expected SHA-256 of the file, hex encoded.
    pub digest: String,
    pub require_digest: bool,
    /// Send the ETag of a previous download and reuse the cached file on 304.
    pub use_etag: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            digest: String::new(),
            require_digest: true,
            use_etag: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    Downloaded,
    Cached,
}

pub struct Downloader {
    client: reqwest::Client,
}

impl Downloader {
    pub fn new(timeout: Duration) -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Fetches `url` into `dest`. `file://` URLs are copied.
    ///
    /// HTTP bodies are written to `<dest>.download` and only moved to `dest`
    /// once the digest matched, so `dest` never holds a partial file.
    pub async fn download(
        &self,
        url: &str,
        dest: &Path,
        options: &DownloadOptions,
    ) -> Result<DownloadOutcome, DownloadError> {
        let parsed = Url::parse(url).map_err(|e| DownloadError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        if parsed.scheme() == "file" {
            let source = parsed.to_file_path().map_err(|_| DownloadError::InvalidUrl {
                url: url.to_string(),
                reason: "not a local path".to_string(),
            })?;
            return self.copy_local(&source, dest, options).await;
        }

        let etag_path = sidecar(dest, "etag");
        let mut request = self.client.get(parsed.clone());
        if options.use_etag && fs::try_exists(dest).await.unwrap_or(false) {
            match fs::read_to_string(&etag_path).await {
                Ok(etag) if !etag.trim().is_empty() => {
                    info!("Using etag: {}", etag.trim());
                    request = request.header(IF_NONE_MATCH, etag.trim());
                }
                _ => debug!("No etag for {}", dest.display()),
            }
        }

        info!("Request {}", parsed);
        let mut response = request.send().await?;
        if response.status() == StatusCode::NOT_MODIFIED {
            info!("Using cached file: {}", dest.display());
            check_digest(dest, options).await?;
            return Ok(DownloadOutcome::Cached);
        }
        if !response.status().is_success() {
            return Err(DownloadError::Status {
                url: parsed.to_string(),
                status: response.status(),
            });
        }
        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let partial = sidecar(dest, "download");
        if fs::try_exists(&partial).await.unwrap_or(false) {
            info!("Removing existing partial download: {}", partial.display());
            fs::remove_file(&partial).await?;
        }

        info!("Downloading to {}", partial.display());
        let mut file = fs::File::create(&partial).await?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        drop(file);
        info!("Downloaded {} bytes", written);

        if let Err(e) = check_digest(&partial, options).await {
            let _ = fs::remove_file(&partial).await;
            return Err(e);
        }
        fs::rename(&partial, dest).await?;

        match etag {
            Some(etag) if options.use_etag => {
                if let Err(e) = fs::write(&etag_path, etag).await {
                    warn!("Unable to save etag for {}: {}", dest.display(), e);
                }
            }
            _ => {
                let _ = fs::remove_file(&etag_path).await;
            }
        }
        Ok(DownloadOutcome::Downloaded)
    }

    async fn copy_local(
        &self,
        source: &Path,
        dest: &Path,
        options: &DownloadOptions,
    ) -> Result<DownloadOutcome, DownloadError> {
        info!("Copying {} to {}", source.display(), dest.display());
        if source == dest {
            check_digest(dest, options).await?;
            return Ok(DownloadOutcome::Downloaded);
        }
        fs::copy(source, dest).await?;
        if let Err(e) = check_digest(dest, options).await {
            let _ = fs::remove_file(dest).await;
            return Err(e);
        }
        Ok(DownloadOutcome::Downloaded)
    }
}

fn sidecar(dest: &Path, extension: &str) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

async fn check_digest(path: &Path, options: &DownloadOptions) -> Result<(), DownloadError> {
    if !options.require_digest {
        return Ok(());
    }
    if options.digest.is_empty() {
        return Err(DownloadError::MissingDigest);
    }
    let actual = file_digest(path).await?;
    if !actual.eq_ignore_ascii_case(options.digest.trim()) {
        return Err(DownloadError::Digest {
            expected: options.digest.clone(),
            actual,
        });
    }
    debug!("Verified digest {} for {}", actual, path.display());
    Ok(())
}

/// Where an asset from `url` is stored under `dir`. Each URL gets its own
/// directory so cached files and ETags of different releases never mix.
pub fn download_path(dir: &Path, url: &str, file_name: &Path) -> PathBuf {
    let key = hex::encode(Sha256::digest(url.as_bytes()));
    dir.join(&key[..16]).join(file_name)
}

/// Hex-encoded SHA-256 of the file at `path`.
pub async fn file_digest(path: &Path) -> std::io::Result<String> {
    let mut file = fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TEST_DATA_DIGEST: &str =
        "0c15e883dee85bb2f3540a47ec58f617a2547117f9096417ba5422268029f501";

    #[test]
    fn test_download_path_keyed_by_url() {
        let dir = Path::new("/cache");
        let name = Path::new("App.zip");
        let a = download_path(dir, "https://a.example.com/App.zip", name);
        let b = download_path(dir, "https://b.example.com/App.zip", name);
        assert_ne!(a, b);
        assert_eq!(a, download_path(dir, "https://a.example.com/App.zip", name));
        assert_eq!(a.file_name().unwrap(), "App.zip");
        assert!(a.starts_with(dir));
    }

    #[tokio::test]
    async fn test_file_digest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, b"test data\n").unwrap();

        assert_eq!(file_digest(&path).await.unwrap(), TEST_DATA_DIGEST);
        assert!(file_digest(&dir.path().join("missing")).await.is_err());
    }

    #[tokio::test]
    async fn test_local_copy_checks_digest() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source.zip");
        std::fs::write(&source, b"test data\n").unwrap();
        let url = Url::from_file_path(&source).unwrap().to_string();
        let downloader = Downloader::new(Duration::from_secs(5)).unwrap();

        let dest = dir.path().join("cache").join("asset.zip");
        let options = DownloadOptions {
            digest: TEST_DATA_DIGEST.to_uppercase(),
            ..Default::default()
        };
        let outcome = downloader.download(&url, &dest, &options).await.unwrap();
        assert_eq!(outcome, DownloadOutcome::Downloaded);
        assert_eq!(std::fs::read(&dest).unwrap(), b"test data\n");

        let bad = DownloadOptions {
            digest: "bad".to_string(),
            ..Default::default()
        };
        let err = downloader.download(&url, &dest, &bad).await.unwrap_err();
        assert!(matches!(err, DownloadError::Digest { .. }));
        assert_eq!(err.kind(), keepup_core::ErrorKind::Digest);
    }

    #[tokio::test]
    async fn test_missing_digest() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source.zip");
        std::fs::write(&source, b"x").unwrap();
        let url = Url::from_file_path(&source).unwrap().to_string();
        let downloader = Downloader::new(Duration::from_secs(5)).unwrap();

        let err = downloader
            .download(&url, &dir.path().join("dest"), &DownloadOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::MissingDigest));
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let downloader = Downloader::new(Duration::from_secs(5)).unwrap();
        let err = downloader
            .download("not a url", Path::new("/tmp/x"), &DownloadOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::InvalidUrl { .. }));
        assert_eq!(err.kind(), keepup_core::ErrorKind::Download);
    }

    #[test]
    fn test_sidecar() {
        assert_eq!(
            sidecar(Path::new("/cache/app.zip"), "etag"),
            PathBuf::from("/cache/app.zip.etag")
        );
    }
}
