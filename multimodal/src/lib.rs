//! Media resolution for vision-language requests: remote URL fetch and
//! data-URI decode into images or temp files.

pub mod error;
pub mod media;

pub use error::{MediaConnectorError, MediaResult};
pub use media::{DataUri, MediaConnector, MediaConnectorConfig, MediaFetcher, MediaSource};
