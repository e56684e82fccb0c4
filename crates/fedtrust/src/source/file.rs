//! Local file metadata source

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use super::{MetadataSource, RawDocument};
use crate::error::{ConfigError, ConfigResult};

/// Reads metadata documents from the local file system
///
/// Addresses are file paths. A `file://` prefix is accepted, and relative
/// paths resolve against the optional base directory.
#[derive(Debug, Clone, Default)]
pub struct FileMetadataSource {
    base_dir: Option<PathBuf>,
}

impl FileMetadataSource {
    /// Resolve addresses as given
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative addresses against `base_dir`
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
        }
    }

    fn resolve(&self, address: &str) -> PathBuf {
        let path = PathBuf::from(address.strip_prefix("file://").unwrap_or(address));
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path,
        }
    }
}

#[async_trait]
impl MetadataSource for FileMetadataSource {
    async fn fetch(&self, address: &str) -> ConfigResult<RawDocument> {
        let path = self.resolve(address);
        debug!(path = %path.display(), "reading metadata document");

        let body = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ConfigError::fetch(address, e.to_string()))?;

        Ok(RawDocument::new(address, body))
    }
}
