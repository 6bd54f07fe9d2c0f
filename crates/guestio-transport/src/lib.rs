//! Byte-source transports for the guestio `LoadFile` bridge.
//!
//! - **[`traits`]** -- the [`Transport`] trait every byte source implements.
//! - **[`error`]** -- [`TransportError`] enumerates every failure mode.
//! - **[`file`]** -- [`FileTransport`] reads resources below a root directory.
//! - **[`http`]** -- [`HttpTransport`] issues cache-bypassing `GET` requests.
//! - **[`scheme`]** -- [`SchemeTransport`] routes URLs to HTTP and everything
//!   else to a fallback.

pub mod error;
pub mod file;
pub mod http;
pub mod scheme;
pub mod traits;

pub use error::{Result, TransportError};
pub use file::FileTransport;
pub use http::{HttpTransport, no_cache_headers};
pub use scheme::SchemeTransport;
pub use traits::Transport;
