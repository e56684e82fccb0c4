//! HTTP metadata source

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{MetadataSource, RawDocument};
use crate::error::{ConfigError, ConfigResult};

/// Configuration for [`HttpMetadataSource`]
#[derive(Debug, Clone)]
pub struct HttpSourceConfig {
    /// Request timeout (default: 10 seconds)
    pub request_timeout: Duration,

    /// User agent for HTTP requests
    pub user_agent: String,

    /// Maximum response size in bytes (default: 1 MiB)
    pub max_response_size: usize,

    /// Reject plain `http` addresses except loopback hosts (default: true)
    pub require_https: bool,
}

impl Default for HttpSourceConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            user_agent: format!("fedtrust/{}", env!("CARGO_PKG_VERSION")),
            max_response_size: 1024 * 1024,
            require_https: true,
        }
    }
}

/// Fetches metadata documents over HTTP(S)
#[derive(Debug, Clone)]
pub struct HttpMetadataSource {
    client: reqwest::Client,
    config: HttpSourceConfig,
}

impl HttpMetadataSource {
    /// Create a source with default configuration
    ///
    /// # Errors
    ///
    /// Returns error if HTTP client creation fails
    pub fn new() -> ConfigResult<Self> {
        Self::with_config(HttpSourceConfig::default())
    }

    /// Create a source with custom configuration
    ///
    /// # Errors
    ///
    /// Returns error if HTTP client creation fails
    pub fn with_config(config: HttpSourceConfig) -> ConfigResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| ConfigError::fetch("<client>", format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    /// Reuse an existing client
    pub fn with_client(client: reqwest::Client, config: HttpSourceConfig) -> Self {
        Self { client, config }
    }

    fn check_address(&self, address: &str) -> ConfigResult<url::Url> {
        let url = url::Url::parse(address)
            .map_err(|e| ConfigError::fetch(address, format!("invalid URL: {e}")))?;

        match url.scheme() {
            "https" => Ok(url),
            "http" if !self.config.require_https || is_loopback(&url) => Ok(url),
            "http" => Err(ConfigError::fetch(address, "HTTPS is required")),
            other => Err(ConfigError::fetch(
                address,
                format!("unsupported scheme '{other}'"),
            )),
        }
    }
}

fn is_loopback(url: &url::Url) -> bool {
    match url.host() {
        Some(url::Host::Domain(host)) => host == "localhost",
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

#[async_trait]
impl MetadataSource for HttpMetadataSource {
    async fn fetch(&self, address: &str) -> ConfigResult<RawDocument> {
        let url = self.check_address(address)?;
        debug!(address = %address, "fetching metadata document");

        let mut response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| ConfigError::fetch(address, e.to_string()))?;

        if !response.status().is_success() {
            return Err(ConfigError::status(address, response.status().as_u16()));
        }

        if let Some(content_length) = response.content_length()
            && content_length > self.config.max_response_size as u64
        {
            return Err(ConfigError::fetch(address, "response size limit exceeded"));
        }

        // Content-Length may be absent (chunked), so the cap also applies while reading.
        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ConfigError::fetch(address, format!("failed to read response: {e}")))?
        {
            if body.len() + chunk.len() > self.config.max_response_size {
                return Err(ConfigError::fetch(address, "response size limit exceeded"));
            }
            body.extend_from_slice(&chunk);
        }

        let body = String::from_utf8(body)
            .map_err(|_| ConfigError::parse(format!("{address}: body is not valid UTF-8")))?;

        Ok(RawDocument::new(address, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_http_rejected_for_remote_hosts() {
        let source = HttpMetadataSource::new().unwrap();
        let err = source
            .check_address("http://idp.example.com/jwks")
            .unwrap_err();
        assert_eq!(err.error_type(), "fetch_error");
    }

    #[test]
    fn test_plain_http_allowed_for_loopback() {
        let source = HttpMetadataSource::new().unwrap();
        assert!(source.check_address("http://localhost:8080/jwks").is_ok());
        assert!(source.check_address("http://127.0.0.1:8080/jwks").is_ok());
        assert!(source.check_address("http://[::1]:8080/jwks").is_ok());
    }

    #[test]
    fn test_scheme_must_be_http() {
        let source = HttpMetadataSource::with_config(HttpSourceConfig {
            require_https: false,
            ..Default::default()
        })
        .unwrap();
        assert!(source.check_address("http://idp.example.com").is_ok());
        assert!(source.check_address("ftp://idp.example.com").is_err());
        assert!(source.check_address("not a url").is_err());
    }
}
