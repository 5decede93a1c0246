use thiserror::Error;

/// Failures while resolving an image or media reference. None of these
/// are retried here; the caller owns retry policy.
#[derive(Debug, Error)]
pub enum MediaConnectorError {
    #[error("unsupported media url scheme: {0}")]
    UnsupportedScheme(String),
    #[error("malformed data uri: {0}")]
    MalformedDataUri(&'static str),
    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("media fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),
    #[error("image decode failed: {0}")]
    ImageDecode(#[from] image::ImageError),
    #[error("media io failed: {0}")]
    Io(#[from] std::io::Error),
}

pub type MediaResult<T> = Result<T, MediaConnectorError>;
