//! The transport trait.
//!
//! A [`Transport`] is any byte source the host can read a resource from.  The
//! bridge only ever asks for a whole resource by path and expects a fresh
//! copy on every call: implementations must not serve cached responses.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

/// An asynchronous byte source.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name used in log fields (e.g. `"file"`, `"http"`).
    fn name(&self) -> &str;

    /// Fetch the full contents of the resource at `path`.
    ///
    /// Every call performs a new read against the underlying source.
    async fn fetch(&self, path: &str) -> Result<Vec<u8>>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn fetch(&self, path: &str) -> Result<Vec<u8>> {
        (**self).fetch(path).await
    }
}
