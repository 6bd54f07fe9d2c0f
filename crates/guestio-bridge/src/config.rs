//! Bridge configuration.
//!
//! [`BridgeConfig`] names the guest import and exports the bridge wires up
//! and sets the limits applied to fetches and to the guest instance.
//! Defaults come from the [`Default`] implementation; callers can override
//! fields with the `with_*` builder methods or load a TOML document with
//! [`BridgeConfig::from_toml_str`].  Missing TOML keys keep their defaults.

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Names of the guest exports the bridge calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuestExports {
    /// Exported linear memory.
    pub memory: String,
    /// `() -> context`
    pub current_execution_context: String,
    /// `(byte_length, context) -> address`
    pub allocate: String,
    /// `(address, byte_length, callback_token, context)`
    pub dispatch_callback: String,
    /// Optional `(callback_token, error_code, context)`.  When the guest does
    /// not export it, failures are reported as
    /// `dispatch_callback(error_code, 0, callback_token, context)`: a
    /// zero-length callback with a non-zero address is a failure, and the
    /// address is the error code.  Empty resources always arrive as
    /// `(0, 0)`.
    pub dispatch_failure: String,
}

impl Default for GuestExports {
    fn default() -> Self {
        Self {
            memory: "memory".into(),
            current_execution_context: "current_execution_context".into(),
            allocate: "allocate".into(),
            dispatch_callback: "dispatch_callback".into(),
            dispatch_failure: "dispatch_failure".into(),
        }
    }
}

/// Limits and wiring for a bridge instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Module name of the `LoadFile` import.
    ///
    /// Default: **`env`**.
    pub import_module: String,

    /// Field name of the `LoadFile` import.
    ///
    /// Default: **`LoadFile`**.
    pub import_name: String,

    /// Guest export names.
    pub exports: GuestExports,

    /// Fetch timeout in milliseconds; `0` disables the timeout.
    ///
    /// Default: **30 000 ms**.
    pub fetch_timeout_ms: u64,

    /// Largest resource, in bytes, the bridge copies into the guest.
    ///
    /// Default: **64 MiB**.
    pub max_resource_bytes: usize,

    /// Maximum linear memory the guest may grow to, in bytes.
    ///
    /// Default: **256 MiB**.
    pub max_memory: usize,

    /// Fuel granted to the guest before each entry from the host.
    ///
    /// Default: **10 000 000**.
    pub max_fuel: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            import_module: "env".into(),
            import_name: "LoadFile".into(),
            exports: GuestExports::default(),
            fetch_timeout_ms: 30_000,
            max_resource_bytes: 64 * 1024 * 1024,
            max_memory: 256 * 1024 * 1024,
            max_fuel: 10_000_000,
        }
    }
}

impl BridgeConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document and validate the result.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(s).map_err(|e| BridgeError::Config(format!("invalid toml: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every name is set and every limit is usable.
    pub fn validate(&self) -> Result<()> {
        let names = [
            ("import_module", &self.import_module),
            ("import_name", &self.import_name),
            ("exports.memory", &self.exports.memory),
            (
                "exports.current_execution_context",
                &self.exports.current_execution_context,
            ),
            ("exports.allocate", &self.exports.allocate),
            ("exports.dispatch_callback", &self.exports.dispatch_callback),
            ("exports.dispatch_failure", &self.exports.dispatch_failure),
        ];
        if let Some((field, _)) = names.iter().find(|(_, v)| v.is_empty()) {
            return Err(BridgeError::Config(format!("`{field}` must not be empty")));
        }
        if self.max_resource_bytes == 0 {
            return Err(BridgeError::Config(
                "`max_resource_bytes` must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// The fetch timeout, or `None` when disabled.
    pub fn fetch_timeout(&self) -> Option<std::time::Duration> {
        (self.fetch_timeout_ms > 0).then(|| std::time::Duration::from_millis(self.fetch_timeout_ms))
    }

    /// Set the `LoadFile` import location.
    pub fn with_import(mut self, module: impl Into<String>, name: impl Into<String>) -> Self {
        self.import_module = module.into();
        self.import_name = name.into();
        self
    }

    /// Replace the guest export names.
    pub fn with_exports(mut self, exports: GuestExports) -> Self {
        self.exports = exports;
        self
    }

    /// Set the fetch timeout in milliseconds (`0` disables it).
    pub fn with_fetch_timeout_ms(mut self, ms: u64) -> Self {
        self.fetch_timeout_ms = ms;
        self
    }

    /// Set the largest resource the bridge will deliver.
    pub fn with_max_resource_bytes(mut self, bytes: usize) -> Self {
        self.max_resource_bytes = bytes;
        self
    }

    /// Set the guest memory cap in bytes.
    pub fn with_max_memory(mut self, bytes: usize) -> Self {
        self.max_memory = bytes;
        self
    }

    /// Set the fuel granted per guest entry.
    pub fn with_max_fuel(mut self, fuel: u64) -> Self {
        self.max_fuel = fuel;
        self
    }
}
