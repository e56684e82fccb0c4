//! In-memory metadata source

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{MetadataSource, RawDocument};
use crate::error::{ConfigError, ConfigResult};

#[derive(Debug, Clone)]
enum Entry {
    Document(String),
    Failure(ConfigError),
}

/// Serves documents from memory
///
/// Documents and failures can be swapped at any time, which makes this the
/// source of choice for exercising cache refresh behaviour.
#[derive(Debug, Default)]
pub struct StaticMetadataSource {
    entries: RwLock<HashMap<String, Entry>>,
    delay: RwLock<Option<Duration>>,
    fetches: AtomicUsize,
}

impl StaticMetadataSource {
    /// Create an empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a source serving one document
    pub fn with_document(address: impl Into<String>, body: impl Into<String>) -> Self {
        let source = Self::new();
        source.set_document(address, body);
        source
    }

    /// Serve `body` for `address`
    pub fn set_document(&self, address: impl Into<String>, body: impl Into<String>) {
        self.entries
            .write()
            .insert(address.into(), Entry::Document(body.into()));
    }

    /// Fail every fetch of `address` with `error`
    pub fn set_failure(&self, address: impl Into<String>, error: ConfigError) {
        self.entries
            .write()
            .insert(address.into(), Entry::Failure(error));
    }

    /// Delay every fetch by `delay` (uses the tokio clock)
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.write() = delay;
    }

    /// Number of fetches performed so far
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataSource for StaticMetadataSource {
    async fn fetch(&self, address: &str) -> ConfigResult<RawDocument> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let entry = self.entries.read().get(address).cloned();
        match entry {
            Some(Entry::Document(body)) => Ok(RawDocument::new(address, body)),
            Some(Entry::Failure(error)) => Err(error),
            None => Err(ConfigError::status(address, 404)),
        }
    }
}
