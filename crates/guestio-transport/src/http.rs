//! HTTP transport.
//!
//! Issues a plain `GET` for each fetch.  Relative guest paths are resolved
//! against an optional base URL, the same way a browser resolves a relative
//! request URL against the page it was issued from.
//!
//! With [`HttpTransport::with_max_body_bytes`] set, an oversized body is
//! rejected from its `Content-Length`, or while streaming once the limit is
//! crossed, so it is never buffered in full.
//!
//! Every request carries [`no_cache_headers`] so that neither the client nor
//! any intermediary answers from a cache.  No conditional headers
//! (`If-None-Match`, `If-Modified-Since`) are ever sent.

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{CACHE_CONTROL, EXPIRES, HeaderMap, HeaderValue, PRAGMA};
use tracing::debug;
use url::Url;

use crate::error::{Result, TransportError};
use crate::traits::Transport;

/// `Cache-Control` value sent with every request.
pub const CACHE_CONTROL_NO_CACHE: &str = "no-cache, no-store, max-age=0";

/// `Expires` value sent with every request (a date far in the past).
pub const EXPIRES_IN_THE_PAST: &str = "Tue, 01 Jan 1980 1:00:00 GMT";

/// `Pragma` value sent with every request, for HTTP/1.0 caches.
pub const PRAGMA_NO_CACHE: &str = "no-cache";

/// Build the header set that disables response caching.
pub fn no_cache_headers() -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(3);
    headers.insert(CACHE_CONTROL, HeaderValue::from_static(CACHE_CONTROL_NO_CACHE));
    headers.insert(EXPIRES, HeaderValue::from_static(EXPIRES_IN_THE_PAST));
    headers.insert(PRAGMA, HeaderValue::from_static(PRAGMA_NO_CACHE));
    headers
}

/// Fetches resources over HTTP(S).
pub struct HttpTransport {
    /// Base URL relative paths are joined onto.  Without one, only absolute
    /// URLs can be fetched.
    base_url: Option<Url>,
    client: reqwest::Client,
    max_body_bytes: Option<usize>,
}

impl HttpTransport {
    /// Create a transport that only accepts absolute URLs.
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("guestio/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();

        Self {
            base_url: None,
            client,
            max_body_bytes: None,
        }
    }

    /// Create a transport that resolves relative paths against `base_url`.
    pub fn with_base_url(base_url: Url) -> Self {
        Self {
            base_url: Some(base_url),
            ..Self::new()
        }
    }

    /// Use a preconfigured client (proxies, TLS roots, timeouts).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Reject response bodies larger than `bytes`.
    ///
    /// Usually set to the bridge's `max_resource_bytes`.
    pub fn with_max_body_bytes(mut self, bytes: usize) -> Self {
        self.max_body_bytes = Some(bytes);
        self
    }

    /// The body size limit, if any.
    pub fn max_body_bytes(&self) -> Option<usize> {
        self.max_body_bytes
    }

    /// The configured base URL, if any.
    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    /// Turn a guest path into an absolute URL.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        let resolved = match &self.base_url {
            Some(base) => base.join(path),
            None => Url::parse(path),
        };
        resolved.map_err(|e| TransportError::InvalidPath {
            path: path.to_owned(),
            reason: e.to_string(),
        })
    }

    /// Build the `GET` request for `url`, with caching disabled.
    pub fn build_request(&self, url: Url) -> Result<reqwest::Request> {
        let url_str = url.to_string();
        self.client
            .get(url)
            .headers(no_cache_headers())
            .build()
            .map_err(|e| TransportError::Request {
                url: url_str,
                reason: e.to_string(),
            })
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch(&self, path: &str) -> Result<Vec<u8>> {
        let url = self.resolve(path)?;
        let url_str = url.to_string();
        let request = self.build_request(url)?;

        debug!(url = %url_str, "issuing GET");

        let response =
            self.client
                .execute(request)
                .await
                .map_err(|e| TransportError::Request {
                    url: url_str.clone(),
                    reason: e.to_string(),
                })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(TransportError::NotFound { path: url_str });
        }
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url_str,
                status: status.as_u16(),
            });
        }

        let body = self.read_body(response, &url_str).await?;

        debug!(url = %url_str, status = status.as_u16(), len = body.len(), "GET completed");
        Ok(body)
    }
}

impl HttpTransport {
    async fn read_body(&self, mut response: reqwest::Response, url: &str) -> Result<Vec<u8>> {
        let too_large = |limit| TransportError::TooLarge {
            url: url.to_owned(),
            limit,
        };

        if let (Some(limit), Some(declared)) = (self.max_body_bytes, response.content_length()) {
            if declared > limit as u64 {
                return Err(too_large(limit));
            }
        }

        let capacity = response
            .content_length()
            .map_or(0, |len| len as usize)
            .min(self.max_body_bytes.unwrap_or(usize::MAX));
        let mut body = Vec::with_capacity(capacity);
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| TransportError::Request {
                url: url.to_owned(),
                reason: format!("failed to read response body: {e}"),
            })?
        {
            body.extend_from_slice(&chunk);
            if let Some(limit) = self.max_body_bytes {
                if body.len() > limit {
                    return Err(too_large(limit));
                }
            }
        }
        Ok(body)
    }
}
