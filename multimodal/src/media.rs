//! Media resolution: turn an image reference from a chat request into a
//! decoded image or a materialized temp file.
//!
//! References are either `http(s)://` URLs fetched over the network or
//! `data:` URIs decoded in place. Resolution is awaited by callers in
//! strict encounter order; this module never parallelizes fetches.

use std::{io::Write, path::PathBuf, time::Duration};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use image::DynamicImage;
use tracing::debug;

use crate::error::{MediaConnectorError, MediaResult};

/// How a media reference is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// Remote `http(s)://` URL.
    Url(String),
    /// Inline `data:` URI.
    DataUrl(String),
}

impl MediaSource {
    /// Classify a raw URL string. Anything that is not a `data:` URI is
    /// treated as a remote URL; unsupported schemes fail at fetch time.
    pub fn from_url(url: &str) -> Self {
        match url::Url::parse(url) {
            Ok(parsed) if parsed.scheme() == "data" => MediaSource::DataUrl(url.to_string()),
            _ => MediaSource::Url(url.to_string()),
        }
    }
}

// ============================================================================
// Data URIs
// ============================================================================

/// A parsed `data:[<mime>][;charset=...][;base64],<payload>` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUri {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl DataUri {
    pub fn parse(uri: &str) -> MediaResult<Self> {
        let rest = uri
            .strip_prefix("data:")
            .ok_or(MediaConnectorError::MalformedDataUri("missing data: prefix"))?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or(MediaConnectorError::MalformedDataUri("missing ',' separator"))?;

        let mut mime_type = "text/plain";
        let mut is_base64 = false;
        for (i, segment) in header.split(';').enumerate() {
            if i == 0 {
                if !segment.is_empty() {
                    mime_type = segment;
                }
            } else if segment == "base64" {
                is_base64 = true;
            }
            // charset and other parameters are irrelevant for binary media
        }

        let data = if is_base64 {
            BASE64_STANDARD.decode(payload)?
        } else {
            payload.as_bytes().to_vec()
        };

        Ok(Self {
            mime_type: mime_type.to_string(),
            data,
        })
    }
}

/// File extension for a MIME type, used when media must be materialized
/// to a path for backends that only take filenames.
fn mime_extension(mime_type: &str) -> &'static str {
    match mime_type {
        "image/png" | "image/x-png" => ".png",
        "image/jpg" => ".jpg",
        "image/jpeg" => ".jpeg",
        "image/gif" => ".gif",
        "image/webp" => ".webp",
        "video/avi" => ".avi",
        "video/mp4" => ".mp4",
        "video/mpeg" => ".mpeg",
        "video/mov" => ".mov",
        "video/mkv" => ".mkv",
        "video/wmv" => ".wmv",
        "video/webm" => ".webm",
        other if other.starts_with("video/") => ".mp4",
        _ => ".png",
    }
}

// ============================================================================
// Connector
// ============================================================================

/// Configuration for [`MediaConnector`].
#[derive(Debug, Clone)]
pub struct MediaConnectorConfig {
    /// Timeout for a single remote fetch.
    pub fetch_timeout: Duration,
}

impl Default for MediaConnectorConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

/// The external image-resolution capability: fetches and decodes media
/// references. Format compilation depends on this trait, not on the
/// concrete connector, so tests can substitute a fake.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Resolve a reference to a decoded RGB image.
    async fn url_to_image(&self, url: &str) -> MediaResult<DynamicImage>;

    /// Materialize a reference to a temp file whose extension follows
    /// the media MIME type. The caller owns the file's lifetime.
    async fn url_to_file(&self, url: &str) -> MediaResult<PathBuf>;
}

/// Default [`MediaFetcher`] backed by a shared HTTP client.
pub struct MediaConnector {
    client: reqwest::Client,
    config: MediaConnectorConfig,
}

impl MediaConnector {
    pub fn new(client: reqwest::Client, config: MediaConnectorConfig) -> Self {
        Self { client, config }
    }

    /// Connector with a freshly built client honoring the config timeout.
    pub fn with_defaults() -> MediaResult<Self> {
        let config = MediaConnectorConfig::default();
        let client = reqwest::Client::builder()
            .timeout(config.fetch_timeout)
            .build()?;
        Ok(Self::new(client, config))
    }

    /// Raw bytes plus MIME type for a reference.
    async fn fetch_bytes(&self, url: &str) -> MediaResult<(Vec<u8>, String)> {
        match MediaSource::from_url(url) {
            MediaSource::DataUrl(uri) => {
                let parsed = DataUri::parse(&uri)?;
                Ok((parsed.data, parsed.mime_type))
            }
            MediaSource::Url(remote) => {
                if !remote.starts_with("http://") && !remote.starts_with("https://") {
                    return Err(MediaConnectorError::UnsupportedScheme(remote));
                }
                let response = self
                    .client
                    .get(&remote)
                    .timeout(self.config.fetch_timeout)
                    .send()
                    .await?
                    .error_for_status()?;
                let mime_type = response
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
                    .unwrap_or_else(|| "image/png".to_string());
                let bytes = response.bytes().await?;
                Ok((bytes.to_vec(), mime_type))
            }
        }
    }
}

#[async_trait]
impl MediaFetcher for MediaConnector {
    async fn url_to_image(&self, url: &str) -> MediaResult<DynamicImage> {
        let (bytes, mime_type) = self.fetch_bytes(url).await?;
        debug!(bytes = bytes.len(), mime_type, "decoding image");
        let decoded = image::load_from_memory(&bytes)?;
        // Models expect plain RGB; strip alpha and palette formats.
        Ok(DynamicImage::ImageRgb8(decoded.to_rgb8()))
    }

    async fn url_to_file(&self, url: &str) -> MediaResult<PathBuf> {
        let (bytes, mime_type) = self.fetch_bytes(url).await?;
        let ext = mime_extension(&mime_type);
        let mut file = tempfile::Builder::new().suffix(ext).tempfile()?;
        file.write_all(&bytes)?;
        let path = file
            .into_temp_path()
            .keep()
            .map_err(|e| MediaConnectorError::Io(e.error))?;
        debug!(path = %path.display(), mime_type, "materialized media file");
        Ok(path)
    }
}
