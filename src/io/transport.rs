use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, REFERER};
use tracing::debug;
use url::Url;

use crate::error::IoError;

/// User-Agent sent with every request. Some tile servers refuse unknown clients.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 6.2; WOW64; rv:24.0) Gecko/20100101 Firefox/24.0";

/// Referer sent with every request.
pub const DEFAULT_REFERER: &str = "http://google.com";

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Trait for fetching whole remote resources by URL.
///
/// The resolver and the tile fetcher only talk to the network through this
/// trait, so tests can substitute scripted responses. Implementations must be
/// thread-safe.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch the body of `url`.
    ///
    /// Non-success status codes are returned as [`IoError::Status`].
    async fn get(&self, url: &str) -> Result<Bytes, IoError>;
}

/// HTTP(S) implementation of [`Transport`] backed by reqwest.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with the given per-request timeout.
    pub fn new(timeout: Duration) -> Result<Self, IoError> {
        let mut headers = HeaderMap::new();
        headers.insert(REFERER, HeaderValue::from_static(DEFAULT_REFERER));

        let client = reqwest::Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| IoError::Connection {
                url: String::new(),
                message: e.to_string(),
            })?;

        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Result<Bytes, IoError> {
        let target = escape_url(url)?;
        debug!(url = %target, "GET");

        let response = self
            .client
            .get(target.clone())
            .send()
            .await
            .map_err(|e| classify_request_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IoError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                IoError::Timeout {
                    url: url.to_string(),
                }
            } else {
                IoError::Body {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            }
        })
    }
}

fn classify_request_error(url: &str, e: reqwest::Error) -> IoError {
    if e.is_timeout() {
        IoError::Timeout {
            url: url.to_string(),
        }
    } else if e.is_builder() {
        IoError::InvalidUrl(url.to_string())
    } else {
        IoError::Connection {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}

/// Parse a URL, percent-escaping characters that are not valid in its path
/// or query (spaces in tile paths are common).
///
/// Existing `%XX` escapes are kept as they are.
pub fn escape_url(url: &str) -> Result<Url, IoError> {
    Url::parse(url.trim()).map_err(|e| IoError::InvalidUrl(format!("{}: {}", url, e)))
}
