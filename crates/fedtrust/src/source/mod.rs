//! Metadata sources
//!
//! A [`MetadataSource`] turns an address into the raw text of a metadata
//! document. It knows nothing about the document format; parsing happens in
//! [`crate::metadata`].

mod file;
mod http;
mod memory;

pub use file::FileMetadataSource;
pub use http::{HttpMetadataSource, HttpSourceConfig};
pub use memory::StaticMetadataSource;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::error::{ConfigError, ConfigResult};

/// Raw metadata document as returned by a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    /// Address the document was fetched from
    pub address: String,
    /// Document text
    pub body: String,
}

impl RawDocument {
    /// Create a document
    pub fn new(address: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            body: body.into(),
        }
    }

    /// Deserialize the body as JSON
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> ConfigResult<T> {
        serde_json::from_str(&self.body)
            .map_err(|e| ConfigError::parse(format!("{}: {e}", self.address)))
    }
}

/// Retrieves raw metadata documents
#[async_trait]
pub trait MetadataSource: Send + Sync + std::fmt::Debug {
    /// Fetch the document at `address`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Fetch`] when the document cannot be retrieved.
    async fn fetch(&self, address: &str) -> ConfigResult<RawDocument>;
}
