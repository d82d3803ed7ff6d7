//! Process-wide graceful shutdown.
//!
//! [`ShutdownCoordinator`] owns a single-use latch. The first trigger, either
//! an OS termination signal or [`ShutdownCoordinator::request_shutdown`],
//! flips the latch and cancels every live [`CancellationHandle`] derived from
//! the coordinator. Later triggers are logged and otherwise ignored.
//!
//! The coordinator does not own operation lifetimes. It keeps weak
//! references to the handles it derived, and every handle's watcher task
//! exits as soon as the handle is cancelled for any reason, including being
//! dropped once its operation finishes.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use once_cell::sync::{Lazy, OnceCell};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::SyncError;

static GLOBAL: Lazy<Arc<ShutdownCoordinator>> = Lazy::new(|| Arc::new(ShutdownCoordinator::new()));

/// Why a [`CancellationHandle`] was cancelled. Only the first reason sticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// Global shutdown fired.
    Shutdown,
    /// The parent token was cancelled.
    ParentCancelled,
    /// The deadline attached at derivation passed.
    DeadlineExceeded,
    /// [`CancellationHandle::cancel`] was called.
    Requested,
    /// The last clone of the handle was dropped.
    Released,
}

impl CancelReason {
    /// Error reported to observers for an operation cancelled for this reason.
    pub fn to_error(self) -> SyncError {
        match self {
            CancelReason::DeadlineExceeded => SyncError::DeadlineExceeded,
            CancelReason::Shutdown => SyncError::Cancelled("shutdown requested".to_string()),
            CancelReason::ParentCancelled => {
                SyncError::Cancelled("parent operation cancelled".to_string())
            }
            CancelReason::Requested => SyncError::Cancelled("cancellation requested".to_string()),
            CancelReason::Released => SyncError::Cancelled("operation released".to_string()),
        }
    }
}

/// What triggered shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSource {
    /// An OS termination signal, by name.
    Signal(&'static str),
    /// An explicit programmatic request.
    Request,
}

impl fmt::Display for ShutdownSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownSource::Signal(name) => write!(f, "signal {}", name),
            ShutdownSource::Request => write!(f, "request"),
        }
    }
}

#[derive(Debug)]
struct HandleInner {
    id: u64,
    token: CancellationToken,
    reason: OnceCell<CancelReason>,
}

impl HandleInner {
    fn new(id: u64) -> Self {
        Self {
            id,
            token: CancellationToken::new(),
            reason: OnceCell::new(),
        }
    }

    /// Returns true if this call decided the reason.
    fn cancel_with(&self, reason: CancelReason) -> bool {
        let first = self.reason.set(reason).is_ok();
        self.token.cancel();
        first
    }
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        let _ = self.reason.set(CancelReason::Released);
        self.token.cancel();
    }
}

/// Cancellation handle for one derived operation.
///
/// Cloning shares the handle. The operation is released, and its watcher
/// stops, when the last clone is dropped.
#[derive(Debug, Clone)]
pub struct CancellationHandle {
    inner: Arc<HandleInner>,
}

impl CancellationHandle {
    /// Identifier assigned by the coordinator.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Whether the handle has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Resolves once the handle is cancelled.
    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await
    }

    /// The reason the handle was cancelled, if it has been.
    pub fn reason(&self) -> Option<CancelReason> {
        self.inner.reason.get().copied()
    }

    /// The error to report for this handle, if it has been cancelled.
    pub fn error(&self) -> Option<SyncError> {
        self.reason().map(CancelReason::to_error)
    }

    /// Cancel this operation only. Returns false if it was already cancelled.
    pub fn cancel(&self) -> bool {
        self.inner.cancel_with(CancelReason::Requested)
    }

    /// A token that observes this handle, for workers that only poll.
    ///
    /// Holding the token does not keep the operation alive.
    pub fn token(&self) -> CancellationToken {
        self.inner.token.clone()
    }
}

/// Decrements the live watcher count when a watcher task ends.
struct WatcherGuard(Arc<AtomicUsize>);

impl Drop for WatcherGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One-shot shutdown broadcaster.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    fired: AtomicBool,
    signaled: CancellationToken,
    registry: Mutex<Vec<Weak<HandleInner>>>,
    next_id: AtomicU64,
    watchers: Arc<AtomicUsize>,
    signals: AtomicUsize,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    /// Create an independent coordinator.
    pub fn new() -> Self {
        Self {
            fired: AtomicBool::new(false),
            signaled: CancellationToken::new(),
            registry: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            watchers: Arc::new(AtomicUsize::new(0)),
            signals: AtomicUsize::new(0),
        }
    }

    /// The process-wide coordinator.
    pub fn global() -> Arc<ShutdownCoordinator> {
        Arc::clone(&GLOBAL)
    }

    /// Request shutdown programmatically.
    ///
    /// Same effect as an OS termination signal. Returns true for the call
    /// that actually fired the shutdown.
    pub fn request_shutdown(&self) -> bool {
        self.fire(ShutdownSource::Request)
    }

    /// Whether shutdown has fired.
    pub fn is_shutdown_requested(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Resolves once shutdown has fired.
    pub async fn wait_for_shutdown(&self) {
        self.signaled.cancelled().await
    }

    /// Number of derived handles still alive.
    pub fn active_handles(&self) -> usize {
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        registry.retain(|weak| weak.strong_count() > 0);
        registry.len()
    }

    /// Number of watcher tasks still running.
    pub fn active_watchers(&self) -> usize {
        self.watchers.load(Ordering::SeqCst)
    }

    /// Fire the shutdown latch. Returns true only for the first trigger.
    pub fn fire(&self, source: ShutdownSource) -> bool {
        if self.fired.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            tracing::debug!("Shutdown signaled ({}). Already shutting down...", source);
            return false;
        }

        match source {
            ShutdownSource::Signal(name) => {
                tracing::info!("Received signal ({}). Shutting down...", name)
            }
            ShutdownSource::Request => tracing::info!("Shutdown requested. Shutting down..."),
        }

        // Derivations that lost the race observe `fired` under this lock
        let handles = {
            let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *registry)
        };

        let mut cancelled = 0usize;
        for handle in handles.iter().filter_map(Weak::upgrade) {
            if handle.cancel_with(CancelReason::Shutdown) {
                cancelled += 1;
            }
        }
        tracing::debug!("Cancelled {} in-flight operation(s) for shutdown", cancelled);

        self.signaled.cancel();
        true
    }

    /// Derive a handle cancelled by `parent` or by global shutdown.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn derive_cancellable(&self, parent: &CancellationToken) -> CancellationHandle {
        self.derive(parent, None)
    }

    /// Like [`derive_cancellable`](Self::derive_cancellable), additionally
    /// cancelled with [`CancelReason::DeadlineExceeded`] after `timeout`.
    pub fn derive_with_deadline(
        &self,
        parent: &CancellationToken,
        timeout: Duration,
    ) -> CancellationHandle {
        self.derive(parent, Some(timeout))
    }

    /// Derive with an optional deadline, as read from configuration.
    pub fn derive_with_timeout(
        &self,
        parent: &CancellationToken,
        timeout: Option<Duration>,
    ) -> CancellationHandle {
        self.derive(parent, timeout)
    }

    fn derive(&self, parent: &CancellationToken, deadline: Option<Duration>) -> CancellationHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::new(HandleInner::new(id));
        let handle = CancellationHandle {
            inner: Arc::clone(&inner),
        };

        {
            let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
            if self.fired.load(Ordering::Acquire) {
                drop(registry);
                inner.cancel_with(CancelReason::Shutdown);
                tracing::debug!("Operation {} derived after shutdown, cancelled immediately", id);
                return handle;
            }
            registry.retain(|weak| weak.strong_count() > 0);
            registry.push(Arc::downgrade(&inner));
        }

        if parent.is_cancelled() {
            inner.cancel_with(CancelReason::ParentCancelled);
            return handle;
        }

        self.spawn_watcher(&inner, parent.clone(), deadline);
        handle
    }

    fn spawn_watcher(
        &self,
        inner: &Arc<HandleInner>,
        parent: CancellationToken,
        deadline: Option<Duration>,
    ) {
        let id = inner.id;
        let own = inner.token.clone();
        let weak = Arc::downgrade(inner);

        self.watchers.fetch_add(1, Ordering::SeqCst);
        let guard = WatcherGuard(Arc::clone(&self.watchers));

        tokio::spawn(async move {
            let _guard = guard;
            let expired = sleep_or_forever(deadline);

            let reason = tokio::select! {
                biased;
                _ = own.cancelled() => None,
                _ = parent.cancelled() => Some(CancelReason::ParentCancelled),
                _ = expired => Some(CancelReason::DeadlineExceeded),
            };

            if let Some(reason) = reason {
                if let Some(inner) = weak.upgrade() {
                    if inner.cancel_with(reason) {
                        tracing::debug!("Operation {} cancelled: {:?}", id, reason);
                    }
                }
            }
            tracing::trace!("Watcher for operation {} exited", id);
        });
    }

    /// Listen for OS termination signals for the rest of the process.
    ///
    /// The first signal fires shutdown; every later one is drained and
    /// logged. On unix the SIGINT and SIGTERM handlers are installed before
    /// this returns. Must be called from within a Tokio runtime.
    pub fn spawn_signal_listener(self: &Arc<Self>) -> JoinHandle<()> {
        listen_for_signals(Arc::clone(self))
    }

    /// Number of OS termination signals the listener has received.
    pub fn signals_received(&self) -> usize {
        self.signals.load(Ordering::SeqCst)
    }

    fn on_signal(&self, name: &'static str) {
        self.signals.fetch_add(1, Ordering::SeqCst);
        self.fire(ShutdownSource::Signal(name));
    }
}

#[cfg(unix)]
fn listen_for_signals(coordinator: Arc<ShutdownCoordinator>) -> JoinHandle<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!("Failed to install SIGINT handler: {}", e);
            return tokio::spawn(async {});
        }
    };
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!("Failed to install SIGTERM handler: {}", e);
            return tokio::spawn(async {});
        }
    };

    tokio::spawn(async move {
        loop {
            let name = tokio::select! {
                Some(_) = sigint.recv() => "SIGINT",
                Some(_) = sigterm.recv() => "SIGTERM",
                else => break,
            };
            coordinator.on_signal(name);
        }
    })
}

#[cfg(not(unix))]
fn listen_for_signals(coordinator: Arc<ShutdownCoordinator>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for ctrl-c: {}", e);
                break;
            }
            coordinator.on_signal("ctrl-c");
        }
    })
}

fn sleep_or_forever(deadline: Option<Duration>) -> impl Future<Output = ()> {
    async move {
        match deadline {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending::<()>().await,
        }
    }
}
