//! Bridge error types.
//!
//! All bridge subsystems surface errors through [`BridgeError`].  Every
//! variant maps onto a [`LoadErrorCode`], the non-zero number handed to the
//! guest when a `LoadFile` request fails.

use std::fmt;

use guestio_transport::TransportError;

/// Error code passed to the guest's failure path.
///
/// Zero is never used, so a guest can treat `0` as "no error".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum LoadErrorCode {
    /// The path descriptor pointed outside guest memory.
    OutOfBounds = 1,
    /// The path bytes were not valid UTF-8.
    InvalidEncoding = 2,
    /// The transport failed (network, I/O, non-success status).
    TransportFailure = 3,
    /// The resource does not exist.
    NotFound = 4,
    /// The fetch did not complete within the configured limit.
    Timeout = 5,
    /// The resource is larger than the configured or addressable maximum.
    ResourceTooLarge = 6,
    /// The guest could not provide a destination buffer.
    AllocationFailed = 7,
    /// The host cancelled the request.
    Cancelled = 8,
    /// The host itself is misconfigured.
    Internal = 9,
}

impl LoadErrorCode {
    /// The raw value passed across the guest boundary.
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for LoadErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::OutOfBounds => "out_of_bounds",
            Self::InvalidEncoding => "invalid_encoding",
            Self::TransportFailure => "transport_failure",
            Self::NotFound => "not_found",
            Self::Timeout => "timeout",
            Self::ResourceTooLarge => "resource_too_large",
            Self::AllocationFailed => "allocation_failed",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        };
        write!(f, "{name}({})", self.as_u32())
    }
}

/// Unified error type for the `LoadFile` bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    // -- Request errors -----------------------------------------------------
    /// A guest range does not fit inside the current memory.
    #[error("guest range {offset}+{len} exceeds memory size {memory_size}")]
    OutOfBounds {
        offset: u32,
        len: u32,
        memory_size: usize,
    },

    /// The path bytes are not valid UTF-8.
    #[error("path is not valid utf-8: {0}")]
    InvalidEncoding(#[from] std::str::Utf8Error),

    /// The transport could not produce the resource.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// The fetch exceeded the configured time limit.
    #[error("fetch timed out after {limit_ms}ms")]
    Timeout { limit_ms: u64 },

    /// The resource is larger than the bridge will copy into the guest.
    #[error("resource too large: {len} > {limit} bytes")]
    ResourceTooLarge { len: usize, limit: usize },

    /// The fetch task panicked before producing a result.
    #[error("fetch of `{path}` panicked")]
    FetchPanicked { path: String },

    /// The request was cancelled by the host before it was delivered.
    #[error("request cancelled")]
    Cancelled,

    // -- Guest contract errors ----------------------------------------------
    /// The guest allocator returned a region outside its own memory.
    #[error(
        "guest allocation contract violated: {address}+{len} exceeds memory size {memory_size}"
    )]
    AllocationInvariantViolated {
        address: u32,
        len: u32,
        memory_size: usize,
    },

    /// A guest export trapped or returned an error.
    #[error("guest export `{export}` failed: {reason}")]
    Guest { export: String, reason: String },

    /// A required guest export is missing or has the wrong signature.
    #[error("guest export `{name}` unavailable: {reason}")]
    MissingExport { name: String, reason: String },

    // -- Setup errors -------------------------------------------------------
    /// The Wasm module failed to compile.
    #[error("wasm compilation error: {0}")]
    Compilation(String),

    /// The Wasm module could not be instantiated or linked.
    #[error("wasm instantiation error: {0}")]
    Instantiation(String),

    /// No tokio runtime was available to run fetches on.
    #[error("no tokio runtime available to drive fetches")]
    NoRuntime,

    /// The bridge configuration is invalid.
    #[error("configuration error: {0}")]
    Config(String),
}

impl BridgeError {
    /// The code reported to the guest for this failure.
    pub fn code(&self) -> LoadErrorCode {
        match self {
            Self::OutOfBounds { .. } => LoadErrorCode::OutOfBounds,
            Self::InvalidEncoding(_) => LoadErrorCode::InvalidEncoding,
            Self::Transport(e) if e.is_not_found() => LoadErrorCode::NotFound,
            Self::Transport(TransportError::TooLarge { .. }) => LoadErrorCode::ResourceTooLarge,
            Self::Transport(_) | Self::FetchPanicked { .. } => LoadErrorCode::TransportFailure,
            Self::Timeout { .. } => LoadErrorCode::Timeout,
            Self::ResourceTooLarge { .. } => LoadErrorCode::ResourceTooLarge,
            Self::Cancelled => LoadErrorCode::Cancelled,
            Self::AllocationInvariantViolated { .. } | Self::Guest { .. } => {
                LoadErrorCode::AllocationFailed
            }
            Self::MissingExport { .. }
            | Self::Compilation(_)
            | Self::Instantiation(_)
            | Self::NoRuntime
            | Self::Config(_) => LoadErrorCode::Internal,
        }
    }
}

/// Convenience alias used throughout the bridge crate.
pub type Result<T> = std::result::Result<T, BridgeError>;
