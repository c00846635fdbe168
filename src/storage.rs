//! Object storage capability.
//!
//! The orchestration layer only needs two primitives: put bytes under a key
//! and get a public URL back, and fetch the bytes behind a URL. Anything that
//! implements [`ObjectStorage`] can back the result transfer cache.
//! [`LocalStorage`] is the bundled implementation used when no object store
//! is configured: files land on disk and are addressed under a URL path
//! prefix (`/uploads/...` by default).

use crate::config::StorageConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use rand::Rng;
use std::path::{Component, Path, PathBuf};

/// Upload/download capability consumed by the transfer cache
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store `bytes` under `key` and return the public URL
    async fn upload(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String>;

    /// Fetch the bytes behind `url`
    async fn download(&self, url: &str) -> Result<Vec<u8>>;
}

/// Generate a collision-resistant storage key
///
/// Format: `{prefix}/{16 hex chars}{ext}`, the hex part being 8 random bytes.
pub fn generate_key(prefix: &str, ext: &str) -> String {
    let bytes: [u8; 8] = rand::thread_rng().r#gen();
    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        format!("{}{}", hex, ext)
    } else {
        format!("{}/{}{}", prefix, hex, ext)
    }
}

/// Filesystem-backed storage
///
/// Remote `http(s)` URLs are downloaded with a shared HTTP client; URLs under
/// the public prefix are read back from disk.
#[derive(Clone, Debug)]
pub struct LocalStorage {
    root: PathBuf,
    public_prefix: String,
    http: reqwest::Client,
}

impl LocalStorage {
    /// Create the storage, making sure the root directory exists
    pub fn new(config: &StorageConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.local_dir)?;

        let http = reqwest::Client::builder()
            .timeout(config.download_timeout)
            .build()?;

        Ok(Self {
            root: config.local_dir.clone(),
            public_prefix: config.public_prefix.trim_end_matches('/').to_string(),
            http,
        })
    }

    /// Root directory on disk
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Public URL for a stored key
    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_prefix, key.trim_start_matches('/'))
    }

    /// Filesystem path for a key, refusing anything that escapes the root
    pub fn local_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key.trim_start_matches('/'));
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if key.trim_start_matches('/').is_empty() || escapes {
            return Err(Error::Storage(format!("invalid storage key '{}'", key)));
        }
        Ok(self.root.join(relative))
    }

    fn key_for_public_url<'a>(&self, url: &'a str) -> Option<&'a str> {
        url.strip_prefix(self.public_prefix.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
    }

    async fn fetch_remote(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                body: format!("download of {} failed", url),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl ObjectStorage for LocalStorage {
    async fn upload(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        let path = self.local_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let size = bytes.len();
        tokio::fs::write(&path, bytes).await?;

        tracing::debug!(key = %key, size = size, content_type = %content_type, "stored object locally");
        Ok(self.public_url(key))
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        if let Some(key) = self.key_for_public_url(url) {
            let path = self.local_path(key)?;
            return Ok(tokio::fs::read(&path).await?);
        }

        match url::Url::parse(url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {
                self.fetch_remote(url).await
            }
            _ => Err(Error::Storage(format!("unsupported URL '{}'", url))),
        }
    }
}
