//! Transport error types.
//!
//! Every transport surfaces failures through [`TransportError`].  Variants
//! carry the path or URL that was being fetched so the bridge can log and
//! classify the failure without parsing strings.

/// Unified error type for byte-source transports.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The resource does not exist (missing file, HTTP 404).
    #[error("resource not found: {path}")]
    NotFound { path: String },

    /// The server answered with a non-success status code.
    #[error("request to `{url}` failed with status {status}")]
    Status { url: String, status: u16 },

    /// The request could not be sent or its body could not be read.
    #[error("request to `{url}` failed: {reason}")]
    Request { url: String, reason: String },

    /// The response body is larger than the transport's size limit.  Raised
    /// before the whole body has been read.
    #[error("response from `{url}` exceeds {limit} bytes")]
    TooLarge { url: String, limit: usize },

    /// The path could not be resolved into something the transport can
    /// fetch (empty path, unparsable URL, unsupported scheme).
    #[error("invalid path `{path}`: {reason}")]
    InvalidPath { path: String, reason: String },

    /// A filesystem read failed for a reason other than the file being
    /// absent.
    #[error("io error reading `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl TransportError {
    /// Returns `true` when the failure means the resource does not exist,
    /// as opposed to the transport itself misbehaving.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Convenience alias used throughout the transport crate.
pub type Result<T> = std::result::Result<T, TransportError>;
