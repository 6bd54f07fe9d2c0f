//! The `LoadFile` bridge.
//!
//! A request moves through
//! `AwaitingFetch -> CopyingIntoGuest -> Invoked`, or ends in `Failed`.
//!
//! [`BridgeHandle::load_file`] is the synchronous entry point called while
//! the guest is running.  It decodes the path, registers the request, and
//! spawns the fetch on the tokio runtime.  The finished fetch is pushed onto
//! the completion channel; the host loop that owns the guest pulls it with
//! [`Bridge::next_completion`] and hands it to [`Bridge::deliver`], which
//! re-enters the guest to allocate, copy, and dispatch.
//!
//! Only requests still in flight live in the request table.  A completion
//! whose request has left the table (cancelled, or already delivered) is
//! discarded without touching the guest.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use guestio_transport::Transport;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, LoadErrorCode, Result};
use crate::guest::{CallbackToken, Guest};
use crate::loader::Loader;
use crate::marshal;
use crate::reader::read_string;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// Host-side identifier of one `LoadFile` call.  Never shown to the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    /// The raw counter value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Lifecycle state of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestState {
    /// The fetch has been issued and has not been delivered yet.
    AwaitingFetch,
    /// The fetch finished and the result is being written into the guest.
    CopyingIntoGuest,
    /// The guest callback was invoked with the data.
    Invoked,
    /// The request failed; the guest was told through the failure path.
    Failed,
}

struct PendingRequest {
    callback_token: CallbackToken,
    path: String,
    state: RequestState,
    task: Option<AbortHandle>,
}

/// A finished (or rejected) request waiting to be delivered to the guest.
#[derive(Debug)]
pub struct Completion {
    request: RequestId,
    callback_token: CallbackToken,
    kind: CompletionKind,
}

#[derive(Debug)]
enum CompletionKind {
    /// The fetch task finished.  Only delivered if the request is still in
    /// the table.
    Fetched(Result<Vec<u8>>),
    /// The request ended before or without a fetch (bad path, cancel).
    Rejected { code: LoadErrorCode, reason: String },
}

impl Completion {
    /// The request this completion belongs to.
    pub fn request(&self) -> RequestId {
        self.request
    }

    /// The guest token the result will be delivered to.
    pub fn callback_token(&self) -> CallbackToken {
        self.callback_token
    }
}

/// What [`Bridge::deliver`] did with a completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The callback was invoked with a buffer at `address`.
    Invoked { address: u32, len: u32 },
    /// The guest was told the load failed.
    Failed { code: LoadErrorCode, reason: String },
    /// The request was no longer in flight; the guest was not touched.
    Discarded,
}

impl Outcome {
    /// Terminal state reached, or `None` for a discarded completion.
    pub fn state(&self) -> Option<RequestState> {
        match self {
            Self::Invoked { .. } => Some(RequestState::Invoked),
            Self::Failed { .. } => Some(RequestState::Failed),
            Self::Discarded => None,
        }
    }
}

/// Result of delivering one completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub request: RequestId,
    pub callback_token: CallbackToken,
    pub outcome: Outcome,
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cloneable, thread-safe submission side of a [`Bridge`].
///
/// This is what the guest's `LoadFile` import holds on to.
#[derive(Clone)]
pub struct BridgeHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    loader: Loader,
    runtime: Handle,
    requests: DashMap<RequestId, PendingRequest>,
    next_id: AtomicU64,
    completions: mpsc::UnboundedSender<Completion>,
}

impl BridgeHandle {
    /// Entry point for `LoadFile(path_ptr, path_len, callback_token)`.
    ///
    /// Reads the path out of `memory` and starts the fetch.  A bad path
    /// descriptor is returned as an error, no fetch is issued, and a failure
    /// is still queued so the guest callback fires on the next delivery.
    pub fn load_file(
        &self,
        memory: &[u8],
        path_ptr: u32,
        path_len: u32,
        callback_token: CallbackToken,
    ) -> Result<RequestId> {
        let path = match read_string(memory, path_ptr, path_len) {
            Ok(path) => path,
            Err(err) => {
                let request = self.next_request_id();
                warn!(
                    request_id = %request,
                    callback_token = %callback_token,
                    path_ptr,
                    path_len,
                    error = %err,
                    "rejecting LoadFile with unreadable path"
                );
                self.enqueue(Completion {
                    request,
                    callback_token,
                    kind: CompletionKind::Rejected {
                        code: err.code(),
                        reason: err.to_string(),
                    },
                });
                return Err(err);
            }
        };
        Ok(self.submit(path, callback_token))
    }

    /// Start a fetch for an already decoded path.
    pub fn submit(&self, path: impl Into<String>, callback_token: CallbackToken) -> RequestId {
        let request = self.next_request_id();
        let path = path.into();

        debug!(request_id = %request, callback_token = %callback_token, path = %path, "LoadFile accepted");

        // Registered before the task exists so the completion always finds it.
        self.inner.requests.insert(
            request,
            PendingRequest {
                callback_token,
                path: path.clone(),
                state: RequestState::AwaitingFetch,
                task: None,
            },
        );

        let loader = self.inner.loader.clone();
        let fetch_path = path.clone();
        let fetch = self
            .inner
            .runtime
            .spawn(async move { loader.load(&fetch_path).await });

        if let Some(mut pending) = self.inner.requests.get_mut(&request) {
            pending.task = Some(fetch.abort_handle());
        }

        // The fetch runs in its own task so a panicking transport still
        // produces a completion.
        let completions = self.inner.completions.clone();
        self.inner.runtime.spawn(async move {
            let result = match fetch.await {
                Ok(result) => result,
                // Cancelled: `cancel` already queued the failure.
                Err(join_err) if join_err.is_cancelled() => return,
                Err(join_err) => {
                    error!(request_id = %request, path = %path, error = %join_err, "fetch task panicked");
                    Err(BridgeError::FetchPanicked { path })
                }
            };
            // A closed channel means the bridge was dropped; nobody is left
            // to deliver to.
            let _ = completions.send(Completion {
                request,
                callback_token,
                kind: CompletionKind::Fetched(result),
            });
        });
        request
    }

    /// Queue a failure for `callback_token` without issuing a fetch.
    ///
    /// Used when the request cannot even be read (e.g. the guest exports no
    /// memory).
    pub fn reject(
        &self,
        callback_token: CallbackToken,
        code: LoadErrorCode,
        reason: impl Into<String>,
    ) -> RequestId {
        let request = self.next_request_id();
        let reason = reason.into();
        warn!(request_id = %request, callback_token = %callback_token, %code, reason = %reason, "rejecting LoadFile");
        self.enqueue(Completion {
            request,
            callback_token,
            kind: CompletionKind::Rejected { code, reason },
        });
        request
    }

    /// Cancel an in-flight request.
    ///
    /// The fetch is aborted, the guest is told through the failure path, and
    /// a fetch result that was already queued is discarded on delivery.
    /// Returns `false` if the request is not waiting on its fetch.
    pub fn cancel(&self, request: RequestId) -> bool {
        let Some((_, pending)) = self
            .inner
            .requests
            .remove_if(&request, |_, p| p.state == RequestState::AwaitingFetch)
        else {
            return false;
        };

        if let Some(task) = pending.task {
            task.abort();
        }
        info!(request_id = %request, path = %pending.path, "request cancelled");
        self.enqueue(Completion {
            request,
            callback_token: pending.callback_token,
            kind: CompletionKind::Rejected {
                code: LoadErrorCode::Cancelled,
                reason: BridgeError::Cancelled.to_string(),
            },
        });
        true
    }

    /// Current state of an in-flight request; `None` once it is finished.
    pub fn state(&self, request: RequestId) -> Option<RequestState> {
        self.inner.requests.get(&request).map(|p| p.state)
    }

    /// Number of requests that have not been delivered yet.
    pub fn in_flight(&self) -> usize {
        self.inner.requests.len()
    }

    fn next_request_id(&self) -> RequestId {
        RequestId(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn enqueue(&self, completion: Completion) {
        // The receiver lives in the Bridge, which also owns a handle, so the
        // channel can only be closed while the bridge is being dropped.
        let _ = self.inner.completions.send(completion);
    }
}

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

/// The delivery side: owns the completion queue and writes results into the
/// guest.
pub struct Bridge {
    handle: BridgeHandle,
    completions: mpsc::UnboundedReceiver<Completion>,
}

impl Bridge {
    /// Create a bridge that spawns fetches on the current tokio runtime.
    pub fn new(loader: Loader) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| BridgeError::NoRuntime)?;
        Ok(Self::with_runtime(loader, runtime))
    }

    /// Create a bridge from a transport and configuration.
    pub fn from_config(transport: Arc<dyn Transport>, config: &BridgeConfig) -> Result<Self> {
        config.validate()?;
        Self::new(Loader::from_config(transport, config))
    }

    /// Create a bridge that spawns fetches on `runtime`.
    pub fn with_runtime(loader: Loader, runtime: Handle) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = BridgeHandle {
            inner: Arc::new(HandleInner {
                loader,
                runtime,
                requests: DashMap::new(),
                next_id: AtomicU64::new(1),
                completions: tx,
            }),
        };
        Self {
            handle,
            completions: rx,
        }
    }

    /// A submission handle for the guest import.
    pub fn handle(&self) -> BridgeHandle {
        self.handle.clone()
    }

    /// Number of requests that have not been delivered yet.
    pub fn in_flight(&self) -> usize {
        self.handle.in_flight()
    }

    /// Wait for the next completion.
    ///
    /// Returns `None` once nothing is in flight and the queue is empty.
    pub async fn next_completion(&mut self) -> Option<Completion> {
        if let Ok(completion) = self.completions.try_recv() {
            return Some(completion);
        }
        if self.handle.in_flight() == 0 {
            return None;
        }
        self.completions.recv().await
    }

    /// Take a completion if one is ready, without waiting.
    pub fn try_next_completion(&mut self) -> Option<Completion> {
        self.completions.try_recv().ok()
    }

    /// Deliver one completion into `guest`.
    ///
    /// Successful fetches are copied in and the callback is invoked; every
    /// failure is reported through the guest's failure path.  An `Err` means
    /// the guest itself misbehaved (allocator contract breach, a trapping
    /// callback, or a failure path that could not be invoked).
    pub fn deliver<G: Guest + ?Sized>(
        &self,
        guest: &mut G,
        completion: Completion,
    ) -> Result<Delivery> {
        let Completion {
            request,
            callback_token,
            kind,
        } = completion;

        let fetched = match kind {
            CompletionKind::Rejected { code, reason } => {
                return self.fail(guest, request, callback_token, code, reason);
            }
            CompletionKind::Fetched(fetched) => fetched,
        };

        let bytes = match fetched {
            Ok(bytes) => bytes,
            Err(err) => {
                if !self.finish_awaiting(request) {
                    return Ok(Self::discarded(request, callback_token));
                }
                return self.fail(guest, request, callback_token, err.code(), err.to_string());
            }
        };

        if !self.begin_copy(request) {
            return Ok(Self::discarded(request, callback_token));
        }

        let placement = match marshal::copy_into_guest(guest, &bytes) {
            Ok(placement) => placement,
            Err(err @ BridgeError::AllocationInvariantViolated { .. }) => {
                self.finish(request, RequestState::Failed);
                error!(request_id = %request, callback_token = %callback_token, error = %err, "aborting request");
                if let Err(signal_err) = marshal::signal_failure(guest, callback_token, err.code()) {
                    error!(request_id = %request, error = %signal_err, "could not report failure to guest");
                }
                return Err(err);
            }
            Err(err) => {
                self.finish(request, RequestState::Failed);
                return self.fail(guest, request, callback_token, err.code(), err.to_string());
            }
        };

        let invoked = marshal::invoke(guest, &placement, callback_token);
        self.finish(request, RequestState::Invoked);
        if let Err(err) = invoked {
            error!(request_id = %request, callback_token = %callback_token, error = %err, "guest callback failed");
            return Err(err);
        }

        debug!(
            request_id = %request,
            callback_token = %callback_token,
            address = placement.address,
            len = placement.len,
            "guest callback invoked"
        );
        Ok(Delivery {
            request,
            callback_token,
            outcome: Outcome::Invoked {
                address: placement.address,
                len: placement.len,
            },
        })
    }

    /// Deliver into a guest that other threads may also be running.
    ///
    /// The guest's lock is held for the whole allocate/copy/invoke sequence.
    pub async fn deliver_shared<G: Guest>(
        &self,
        guest: &tokio::sync::Mutex<G>,
        completion: Completion,
    ) -> Result<Delivery> {
        let mut guest = guest.lock().await;
        self.deliver(&mut *guest, completion)
    }

    /// Deliver completions until nothing is in flight.
    ///
    /// Requests the guest issues from inside its callbacks are served in the
    /// same run.
    pub async fn run_until_idle<G: Guest + ?Sized>(&mut self, guest: &mut G) -> Vec<Result<Delivery>> {
        let mut deliveries = Vec::new();
        while let Some(completion) = self.next_completion().await {
            deliveries.push(self.deliver(guest, completion));
        }
        deliveries
    }

    /// Move a request from `AwaitingFetch` to `CopyingIntoGuest`.
    fn begin_copy(&self, request: RequestId) -> bool {
        // The guard must be released before the guest runs: the guest may
        // call LoadFile, which inserts into the same map.
        match self.handle.inner.requests.get_mut(&request) {
            Some(mut pending) if pending.state == RequestState::AwaitingFetch => {
                pending.state = RequestState::CopyingIntoGuest;
                true
            }
            _ => false,
        }
    }

    /// Remove a request that failed before anything was copied.
    fn finish_awaiting(&self, request: RequestId) -> bool {
        self.handle
            .inner
            .requests
            .remove_if(&request, |_, p| p.state == RequestState::AwaitingFetch)
            .is_some()
    }

    fn discarded(request: RequestId, callback_token: CallbackToken) -> Delivery {
        debug!(request_id = %request, "discarding completion for a request no longer in flight");
        Delivery {
            request,
            callback_token,
            outcome: Outcome::Discarded,
        }
    }

    fn finish(&self, request: RequestId, state: RequestState) {
        if let Some((_, pending)) = self.handle.inner.requests.remove(&request) {
            debug!(request_id = %request, path = %pending.path, ?state, "request finished");
        }
    }

    fn fail<G: Guest + ?Sized>(
        &self,
        guest: &mut G,
        request: RequestId,
        callback_token: CallbackToken,
        code: LoadErrorCode,
        reason: String,
    ) -> Result<Delivery> {
        warn!(
            request_id = %request,
            callback_token = %callback_token,
            %code,
            reason = %reason,
            "load failed, signalling guest"
        );
        marshal::signal_failure(guest, callback_token, code).map_err(|err| {
            error!(request_id = %request, error = %err, "could not report failure to guest");
            err
        })?;
        Ok(Delivery {
            request,
            callback_token,
            outcome: Outcome::Failed { code, reason },
        })
    }
}
