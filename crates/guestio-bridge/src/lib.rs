//! Host bridge that serves `LoadFile` requests from WebAssembly guests.
//!
//! A guest with no I/O of its own calls
//! `LoadFile(path_ptr, path_len, callback_token)`.  The host reads the path
//! out of guest memory, fetches the resource asynchronously, asks the guest
//! to allocate a buffer, copies the bytes in, and calls the guest back with
//! the buffer's address and length.
//!
//! - **[`reader`]** -- bounds-checked reads of guest memory.
//! - **[`loader`]** -- [`Loader`] fetches through a
//!   [`Transport`](guestio_transport::Transport) with a timeout and size cap.
//! - **[`guest`]** -- the [`Guest`] trait and the opaque tokens passed back
//!   to the guest.
//! - **[`marshal`]** -- allocate, copy, and dispatch into the guest.
//! - **[`bridge`]** -- [`Bridge`] and [`BridgeHandle`]: the request table,
//!   the completion queue, and delivery.
//! - **[`wasm`]** -- [`GuestRuntime`] and [`WasmGuest`], the wasmtime
//!   implementation of [`Guest`] with the `LoadFile` import.
//! - **[`config`]** -- [`BridgeConfig`] names and limits.
//! - **[`error`]** -- [`BridgeError`] and the [`LoadErrorCode`]s the guest
//!   sees.
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use guestio_bridge::{Bridge, BridgeConfig, GuestRuntime};
//! # use guestio_transport::FileTransport;
//! # async fn example(wasm: &[u8]) -> guestio_bridge::Result<()> {
//! let config = BridgeConfig::default();
//! let mut bridge = Bridge::from_config(Arc::new(FileTransport::new("assets")), &config)?;
//! let runtime = GuestRuntime::new(config)?;
//! let mut guest = runtime.load(wasm, bridge.handle())?;
//!
//! guest.call("main")?;
//! for delivery in bridge.run_until_idle(&mut guest).await {
//!     tracing::info!(?delivery, "delivered");
//! }
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod config;
pub mod error;
pub mod guest;
pub mod loader;
pub mod marshal;
pub mod reader;
pub mod wasm;

// Re-export the most commonly used types at the crate root.
pub use bridge::{Bridge, BridgeHandle, Completion, Delivery, Outcome, RequestId, RequestState};
pub use config::{BridgeConfig, GuestExports};
pub use error::{BridgeError, LoadErrorCode, Result};
pub use guest::{CallbackToken, ContextToken, Guest};
pub use loader::Loader;
pub use wasm::{GuestRuntime, HostState, WasmGuest};
