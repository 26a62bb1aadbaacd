//! HTTP transport for the media API.
//!
//! - One shared reqwest client (rustls, compression, bounded redirects)
//! - Optional `If-None-Match` on each request
//! - 304 is returned as a response, every other non-2xx status is an error
//! - Max body bytes enforced from `Content-Length` and again after reading

pub mod url;

use bytes::Bytes;
use reqwest::{Client, Method, StatusCode, Url, header};
use std::time::{Duration, Instant};

use gallery_core::{AppConfig, Error};

pub use self::url::{UrlError, endpoint_url, media_url, parse_base};

/// Configuration for the fetch client.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string (default: "gallery-cache/0.1")
    pub user_agent: String,

    /// Maximum response body size in bytes (default: 20MB)
    pub max_bytes: usize,

    /// Request timeout (default: 20s)
    pub timeout: Duration,

    /// Maximum number of redirects to follow (default: 5)
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "gallery-cache/0.1".to_string(),
            max_bytes: 20 * 1024 * 1024,
            timeout: Duration::from_millis(20000),
            max_redirects: 5,
        }
    }
}

impl From<&AppConfig> for FetchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            max_bytes: config.max_blob_bytes,
            timeout: config.timeout(),
            ..Self::default()
        }
    }
}

/// Response from a fetch operation.
///
/// A 304 comes back with an empty body.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub url: Url,
    pub status: StatusCode,
    /// `ETag` response header
    pub etag: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Bytes,
    /// Time taken to fetch in milliseconds
    pub fetch_ms: u64,
}

impl FetchResponse {
    pub fn is_not_modified(&self) -> bool {
        self.status == StatusCode::NOT_MODIFIED
    }
}

fn transport_error(url: &Url, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::FetchTimeout(format!("{}: {}", url, e))
    } else {
        Error::HttpError(format!("network error for {}: {}", url, e))
    }
}

fn header_string(headers: &header::HeaderMap, name: header::HeaderName) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(|s| s.to_string())
}

/// HTTP fetch client.
#[derive(Debug, Clone)]
pub struct FetchClient {
    http: Client,
    config: FetchConfig,
}

impl FetchClient {
    /// Create a new fetch client with the given configuration.
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::HttpError(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    /// Send a request, attaching `If-None-Match` when `validator` is given.
    pub async fn send(&self, method: Method, url: Url, validator: Option<&str>) -> Result<FetchResponse, Error> {
        let start = Instant::now();

        let mut request = self.http.request(method.clone(), url.clone());
        if let Some(validator) = validator {
            request = request.header(header::IF_NONE_MATCH, validator);
        }

        let response = request.send().await.map_err(|e| transport_error(&url, e))?;
        let status = response.status();
        let headers = response.headers().clone();
        let etag = header_string(&headers, header::ETAG);

        if status == StatusCode::NOT_MODIFIED {
            tracing::debug!("{} {} not modified", method, url);
            return Ok(FetchResponse {
                url,
                status,
                etag,
                content_type: None,
                bytes: Bytes::new(),
                fetch_ms: start.elapsed().as_millis() as u64,
            });
        }

        if !status.is_success() {
            return Err(Error::HttpStatus(status.as_u16()));
        }

        if let Some(len) = response.content_length()
            && len as usize > self.config.max_bytes
        {
            return Err(Error::FetchTooLarge(format!("{} bytes exceeds {}", len, self.config.max_bytes)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::HttpError(format!("failed to read response: {}", e)))?;

        if bytes.len() > self.config.max_bytes {
            return Err(Error::FetchTooLarge(format!(
                "{} bytes exceeds {}",
                bytes.len(),
                self.config.max_bytes
            )));
        }

        let content_type = header_string(&headers, header::CONTENT_TYPE);
        let fetch_ms = start.elapsed().as_millis() as u64;

        tracing::debug!("{} {} -> {} in {}ms ({} bytes)", method, url, status.as_u16(), fetch_ms, bytes.len());

        Ok(FetchResponse { url, status, etag, content_type, bytes, fetch_ms })
    }

    /// Unconditional GET.
    pub async fn get(&self, url: Url) -> Result<FetchResponse, Error> {
        self.send(Method::GET, url, None).await
    }

    /// Get reference to the configuration.
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_config_default() {
        let config = FetchConfig::default();
        assert_eq!(config.user_agent, "gallery-cache/0.1");
        assert_eq!(config.max_bytes, 20 * 1024 * 1024);
        assert_eq!(config.timeout, Duration::from_millis(20000));
        assert_eq!(config.max_redirects, 5);
    }

    #[test]
    fn test_fetch_config_from_app_config() {
        let app = AppConfig { user_agent: "test-agent".into(), timeout_ms: 1500, max_blob_bytes: 1024, ..AppConfig::default() };
        let config = FetchConfig::from(&app);
        assert_eq!(config.user_agent, "test-agent");
        assert_eq!(config.timeout, Duration::from_millis(1500));
        assert_eq!(config.max_bytes, 1024);
    }

    #[test]
    fn test_not_modified_response() {
        let response = FetchResponse {
            url: Url::parse("https://example.com/api/gallery").unwrap(),
            status: StatusCode::NOT_MODIFIED,
            etag: Some("\"v1\"".to_string()),
            content_type: None,
            bytes: Bytes::new(),
            fetch_ms: 3,
        };
        assert!(response.is_not_modified());
    }

    #[tokio::test]
    async fn test_fetch_client_new() {
        let client = FetchClient::new(FetchConfig::default());
        assert!(client.is_ok());
    }
}
