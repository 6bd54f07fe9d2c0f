//! Scheme-based routing between transports.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::traits::Transport;

/// Sends `http://` and `https://` paths to one transport and everything
/// else to a fallback.
///
/// Lets a single bridge serve both bundled assets (relative paths, read from
/// disk) and remote resources (absolute URLs).
pub struct SchemeTransport {
    http: Arc<dyn Transport>,
    fallback: Arc<dyn Transport>,
}

impl SchemeTransport {
    /// Create a router from an HTTP transport and a fallback.
    pub fn new(http: Arc<dyn Transport>, fallback: Arc<dyn Transport>) -> Self {
        Self { http, fallback }
    }

    /// Pick the transport that will serve `path`.
    pub fn route(&self, path: &str) -> &dyn Transport {
        if is_http_url(path) {
            self.http.as_ref()
        } else {
            self.fallback.as_ref()
        }
    }
}

fn is_http_url(path: &str) -> bool {
    let lower = path.get(..8).unwrap_or(path).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

#[async_trait]
impl Transport for SchemeTransport {
    fn name(&self) -> &str {
        "scheme"
    }

    async fn fetch(&self, path: &str) -> Result<Vec<u8>> {
        let transport = self.route(path);
        tracing::trace!(path, transport = transport.name(), "routing fetch");
        transport.fetch(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    #[async_trait]
    impl Transport for Fixed {
        fn name(&self) -> &str {
            self.0
        }

        async fn fetch(&self, _path: &str) -> Result<Vec<u8>> {
            Ok(self.0.as_bytes().to_vec())
        }
    }

    fn router() -> SchemeTransport {
        SchemeTransport::new(Arc::new(Fixed("http")), Arc::new(Fixed("file")))
    }

    #[test]
    fn detects_http_urls() {
        assert!(is_http_url("http://a/b"));
        assert!(is_http_url("HTTPS://a/b"));
        assert!(!is_http_url("assets/http://not-a-url"));
        assert!(!is_http_url("ht"));
    }

    #[tokio::test]
    async fn routes_by_scheme() {
        let transport = router();
        assert_eq!(transport.fetch("https://x/y").await.unwrap(), b"http");
        assert_eq!(transport.fetch("levels/1.json").await.unwrap(), b"file");
    }
}
