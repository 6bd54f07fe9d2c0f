//! The loader: one fetch per request, with a time and size limit.

use std::sync::Arc;
use std::time::Duration;

use guestio_transport::Transport;
use tracing::debug;

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};

/// Fetches resources through a [`Transport`].
///
/// Cheap to clone; clones share the transport.  No caching or coalescing:
/// every call to [`Loader::load`] is an independent fetch.
#[derive(Clone)]
pub struct Loader {
    transport: Arc<dyn Transport>,
    timeout: Option<Duration>,
    max_resource_bytes: usize,
}

impl Loader {
    /// Create a loader with the default limits.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::from_config(transport, &BridgeConfig::default())
    }

    /// Create a loader with the limits from `config`.
    pub fn from_config(transport: Arc<dyn Transport>, config: &BridgeConfig) -> Self {
        Self {
            transport,
            timeout: config.fetch_timeout(),
            max_resource_bytes: config.max_resource_bytes,
        }
    }

    /// Set or clear the fetch timeout.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the largest resource accepted.
    pub fn with_max_resource_bytes(mut self, bytes: usize) -> Self {
        self.max_resource_bytes = bytes;
        self
    }

    /// The underlying transport.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Fetch `path`, enforcing the timeout and size limit.
    pub async fn load(&self, path: &str) -> Result<Vec<u8>> {
        debug!(path, transport = self.transport.name(), "fetch issued");

        let fetch = self.transport.fetch(path);
        let bytes = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, fetch)
                .await
                .map_err(|_| BridgeError::Timeout {
                    limit_ms: limit.as_millis() as u64,
                })??,
            None => fetch.await?,
        };

        // Lengths cross the guest boundary as u32.
        let limit = self.max_resource_bytes.min(u32::MAX as usize);
        if bytes.len() > limit {
            return Err(BridgeError::ResourceTooLarge {
                len: bytes.len(),
                limit,
            });
        }

        debug!(path, len = bytes.len(), "fetch completed");
        Ok(bytes)
    }
}
