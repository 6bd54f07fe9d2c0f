//! Filesystem transport.
//!
//! Reads resources from a root directory.  Guest paths are always treated as
//! relative to that root; a leading `/` is ignored.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::Transport;

/// Reads resources from files below a root directory.
pub struct FileTransport {
    root: PathBuf,
}

impl FileTransport {
    /// Create a transport rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory guest paths are resolved against.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a guest path onto the filesystem.
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = path.trim_start_matches('/');
        if relative.is_empty() {
            return Err(TransportError::InvalidPath {
                path: path.to_owned(),
                reason: "path is empty".into(),
            });
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl Transport for FileTransport {
    fn name(&self) -> &str {
        "file"
    }

    async fn fetch(&self, path: &str) -> Result<Vec<u8>> {
        let resolved = self.resolve(path)?;
        debug!(path, resolved = %resolved.display(), "reading file");

        tokio::fs::read(&resolved).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TransportError::NotFound {
                    path: path.to_owned(),
                }
            } else {
                TransportError::Io {
                    path: resolved.display().to_string(),
                    source: e,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_strips_leading_slash() {
        let transport = FileTransport::new("/srv/assets");
        let resolved = transport.resolve("/levels/one.json").unwrap();
        assert_eq!(resolved, PathBuf::from("/srv/assets/levels/one.json"));
    }

    #[test]
    fn resolve_rejects_empty_path() {
        let transport = FileTransport::new("/srv/assets");
        assert!(matches!(
            transport.resolve("/"),
            Err(TransportError::InvalidPath { .. })
        ));
    }

    #[tokio::test]
    async fn fetch_reads_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.json"), b"{}").unwrap();

        let transport = FileTransport::new(dir.path());
        let bytes = transport.fetch("data.json").await.unwrap();
        assert_eq!(bytes, b"{}");
    }

    #[tokio::test]
    async fn fetch_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FileTransport::new(dir.path());

        let err = transport.fetch("nope.bin").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn fetch_sees_latest_contents() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("state.txt");
        std::fs::write(&file, b"first").unwrap();

        let transport = FileTransport::new(dir.path());
        assert_eq!(transport.fetch("state.txt").await.unwrap(), b"first");

        std::fs::write(&file, b"second").unwrap();
        assert_eq!(transport.fetch("state.txt").await.unwrap(), b"second");
    }
}
