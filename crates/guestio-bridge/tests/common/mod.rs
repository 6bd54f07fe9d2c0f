//! Test doubles shared by the bridge integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use guestio_bridge::{CallbackToken, ContextToken, Guest, LoadErrorCode, Result};
use guestio_transport::{Transport, TransportError};

/// Install a subscriber once so `RUST_LOG=debug cargo test` shows bridge logs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum Response {
    Bytes { body: Vec<u8>, delay: Duration },
    Gated { body: Vec<u8>, gate: Arc<Notify> },
    NotFound,
    Status(u16),
    Panic,
}

/// Transport serving canned responses and recording every fetch.
#[derive(Default)]
pub struct MockTransport {
    responses: Mutex<HashMap<String, Response>>,
    calls: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn serve(&self, path: &str, body: &[u8]) {
        self.serve_after(path, body, Duration::ZERO);
    }

    pub fn serve_after(&self, path: &str, body: &[u8], delay: Duration) {
        self.responses.lock().unwrap().insert(
            path.to_owned(),
            Response::Bytes {
                body: body.to_vec(),
                delay,
            },
        );
    }

    /// Serve `body` only once the returned gate is notified.
    pub fn serve_gated(&self, path: &str, body: &[u8]) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.responses.lock().unwrap().insert(
            path.to_owned(),
            Response::Gated {
                body: body.to_vec(),
                gate: gate.clone(),
            },
        );
        gate
    }

    pub fn not_found(&self, path: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(path.to_owned(), Response::NotFound);
    }

    /// Make the fetch of `path` panic.
    pub fn panic_on(&self, path: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(path.to_owned(), Response::Panic);
    }

    pub fn status(&self, path: &str, status: u16) {
        self.responses
            .lock()
            .unwrap()
            .insert(path.to_owned(), Response::Status(status));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch(&self, path: &str) -> guestio_transport::Result<Vec<u8>> {
        self.calls.lock().unwrap().push(path.to_owned());
        let response = self.responses.lock().unwrap().get(path).cloned();
        match response {
            Some(Response::Bytes { body, delay }) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(body)
            }
            Some(Response::Gated { body, gate }) => {
                gate.notified().await;
                Ok(body)
            }
            Some(Response::Panic) => panic!("mock transport panicked on `{path}`"),
            Some(Response::Status(status)) => Err(TransportError::Status {
                url: path.to_owned(),
                status,
            }),
            Some(Response::NotFound) | None => Err(TransportError::NotFound {
                path: path.to_owned(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Guest
// ---------------------------------------------------------------------------

/// One invocation of the guest's callback or failure entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Callback {
    pub address: u32,
    pub len: u32,
    pub token: CallbackToken,
    pub context: ContextToken,
    /// Set when the failure entry point was used.
    pub error: Option<LoadErrorCode>,
    /// Contents of `[address, address + len)` at the time of the call.
    pub bytes: Vec<u8>,
}

/// In-memory guest with a bump allocator.
pub struct MockGuest {
    pub memory: Vec<u8>,
    /// Buffers replaced by relocation, kept to check they were never written.
    pub retired: Vec<Vec<u8>>,
    pub heap: u32,
    /// Value returned by `current_execution_context`.
    pub context: u32,
    /// Move memory into a new, larger buffer on every allocation.
    pub relocate_on_allocate: bool,
    /// Return this address from `allocate` regardless of memory size.
    pub bogus_address: Option<u32>,
    /// Whether the guest exports a dedicated failure entry point.
    pub failure_entry: bool,
    pub allocations: Vec<(u32, ContextToken)>,
    pub callbacks: Vec<Callback>,
}

impl MockGuest {
    pub fn new(size: usize) -> Self {
        Self {
            memory: vec![0; size],
            retired: Vec::new(),
            heap: (size / 2) as u32,
            context: 1,
            relocate_on_allocate: false,
            bogus_address: None,
            failure_entry: true,
            allocations: Vec::new(),
            callbacks: Vec::new(),
        }
    }

    pub fn write(&mut self, offset: usize, bytes: &[u8]) {
        self.memory[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Tokens of successful callbacks, in invocation order.
    pub fn delivered_tokens(&self) -> Vec<u32> {
        self.callbacks
            .iter()
            .filter(|c| c.error.is_none())
            .map(|c| c.token.0)
            .collect()
    }
}

impl Guest for MockGuest {
    fn memory(&self) -> &[u8] {
        &self.memory
    }

    fn memory_mut(&mut self) -> &mut [u8] {
        &mut self.memory
    }

    fn current_execution_context(&mut self) -> Result<ContextToken> {
        Ok(ContextToken(self.context))
    }

    fn allocate(&mut self, len: u32, context: ContextToken) -> Result<u32> {
        self.allocations.push((len, context));
        if let Some(address) = self.bogus_address {
            return Ok(address);
        }
        if self.relocate_on_allocate {
            let mut grown = vec![0; self.memory.len() + 64 * 1024 + len as usize];
            grown[..self.memory.len()].copy_from_slice(&self.memory);
            let old = std::mem::replace(&mut self.memory, grown);
            self.retired.push(old);
        }
        let address = self.heap;
        self.heap += len;
        Ok(address)
    }

    fn dispatch_callback(
        &mut self,
        address: u32,
        len: u32,
        token: CallbackToken,
        context: ContextToken,
    ) -> Result<()> {
        let start = address as usize;
        let bytes = self.memory[start..start + len as usize].to_vec();
        self.callbacks.push(Callback {
            address,
            len,
            token,
            context,
            error: None,
            bytes,
        });
        Ok(())
    }

    fn dispatch_failure(
        &mut self,
        token: CallbackToken,
        code: LoadErrorCode,
        context: ContextToken,
    ) -> Result<()> {
        if !self.failure_entry {
            return self.dispatch_callback(code.as_u32(), 0, token, context);
        }
        self.callbacks.push(Callback {
            address: 0,
            len: 0,
            token,
            context,
            error: Some(code),
            bytes: Vec::new(),
        });
        Ok(())
    }
}
