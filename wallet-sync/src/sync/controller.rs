//! Sync lifecycle controller.
//!
//! Workers report raw progress through the entry points below. Each call is
//! applied to the current [`SyncSession`] under one lock and the resulting
//! callback is emitted to every observer before the lock is released, so
//! observers see events in acceptance order and nothing after the terminal
//! callback.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::events::{SpvSyncResponse, SyncNotification};
use super::phases::{PhaseTransition, SyncPhase};
use super::session::{SyncProgress, SyncSession};
use crate::config::{Config, Network};
use crate::error::{SyncError, SyncResult};
use crate::notify::call_isolated;
use crate::progress::now_unix;
use crate::shutdown::{CancellationHandle, ShutdownCoordinator};

/// Result of [`SyncLifecycleController::start`].
#[derive(Debug)]
pub struct SyncStart {
    pub session_id: u64,
    /// Peers with the network's default port applied.
    pub peers: Vec<String>,
    /// Cancelled by shutdown, the parent token or the sync deadline.
    pub handle: CancellationHandle,
}

/// Drives the SPV sync state machine and fans callbacks out to observers.
pub struct SyncLifecycleController {
    network: Network,
    observers: RwLock<Vec<Arc<dyn SpvSyncResponse>>>,
    session: Mutex<Option<SyncSession>>,
    next_session_id: AtomicU64,
}

impl std::fmt::Debug for SyncLifecycleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncLifecycleController")
            .field("network", &self.network)
            .field("phase", &self.phase())
            .finish()
    }
}

impl SyncLifecycleController {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            observers: RwLock::new(Vec::new()),
            session: Mutex::new(None),
            next_session_id: AtomicU64::new(1),
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Register an observer for all later callbacks.
    pub fn add_observer(&self, observer: Arc<dyn SpvSyncResponse>) {
        self.observers.write().unwrap_or_else(|e| e.into_inner()).push(observer);
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Phase of the current session, if one was started.
    pub fn phase(&self) -> Option<SyncPhase> {
        self.lock_session().as_ref().map(SyncSession::phase)
    }

    /// Whether a session is running.
    pub fn is_syncing(&self) -> bool {
        self.lock_session().as_ref().is_some_and(SyncSession::is_active)
    }

    pub fn current_session_id(&self) -> Option<u64> {
        self.lock_session().as_ref().map(SyncSession::id)
    }

    pub fn phase_history(&self) -> Vec<PhaseTransition> {
        self.lock_session()
            .as_ref()
            .map(|session| session.phase_history().to_vec())
            .unwrap_or_default()
    }

    /// Start a fresh session. Fails while another session is active.
    pub fn begin_session(&self) -> SyncResult<u64> {
        let mut guard = self.lock_session();
        if let Some(session) = guard.as_ref() {
            if session.is_active() {
                return Err(SyncError::SyncInProgress);
            }
        }

        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let mut session = SyncSession::new(id, now);
        session.begin(now)?;
        tracing::info!("Starting {} sync session {}", self.network, id);
        *guard = Some(session);
        Ok(id)
    }

    /// Start a session from `config` and derive its cancellation handle.
    ///
    /// A malformed peer address fails the session with code 3.
    pub fn start(
        &self,
        config: &Config,
        coordinator: &ShutdownCoordinator,
        parent: &CancellationToken,
    ) -> SyncResult<SyncStart> {
        let session_id = self.begin_session()?;

        let peers = match config.normalized_peers() {
            Ok(peers) => peers,
            Err(err) => {
                tracing::error!("Invalid peer address: {}", err);
                self.fail(err.clone())?;
                return Err(err);
            }
        };

        let handle = coordinator.derive_with_timeout(parent, config.sync_timeout);
        tracing::debug!(
            "Sync session {} bound to operation {} with {} peer(s)",
            session_id,
            handle.id(),
            peers.len()
        );

        Ok(SyncStart {
            session_id,
            peers,
            handle,
        })
    }

    pub fn peer_connected(&self, peer_count: i32) -> SyncResult<()> {
        self.apply(|session, _| {
            let peer_count = session.set_peer_count(peer_count)?;
            Ok(Some(SyncNotification::PeerConnected {
                peer_count,
            }))
        })
    }

    pub fn peer_disconnected(&self, peer_count: i32) -> SyncResult<()> {
        self.apply(|session, _| {
            let peer_count = session.set_peer_count(peer_count)?;
            Ok(Some(SyncNotification::PeerDisconnected {
                peer_count,
            }))
        })
    }

    /// Regressing counts are dropped silently.
    pub fn fetched_missing_cfilters(&self, fetched_count: i32) -> SyncResult<()> {
        self.apply(|session, at| {
            let accepted = session.record_missing_cfilters(fetched_count, at)?;
            Ok(accepted.then_some(SyncNotification::FetchMissingCFilters {
                fetched_count,
            }))
        })
    }

    /// Enter the header phase with the local chain at `start_height`.
    /// Emits nothing.
    pub fn begin_headers_fetch(&self, start_height: i32) -> SyncResult<()> {
        self.apply(|session, at| {
            session.begin_headers_fetch(start_height, at)?;
            Ok(None)
        })
    }

    pub fn fetched_headers(
        &self,
        peer_initial_height: i32,
        fetched_count: i32,
        last_header_time: i64,
    ) -> SyncResult<()> {
        self.apply(|session, at| {
            session.record_headers(peer_initial_height, fetched_count, last_header_time, at)?;
            Ok(Some(SyncNotification::FetchedHeaders {
                peer_initial_height,
                fetched_count,
                last_header_time,
            }))
        })
    }

    /// Updates after the final `finished = true` are dropped.
    pub fn discovered_addresses(&self, finished: bool) -> SyncResult<()> {
        self.apply(|session, at| {
            let accepted = session.record_discovery(finished, at)?;
            Ok(accepted.then_some(SyncNotification::DiscoveredAddresses {
                finished,
            }))
        })
    }

    /// Regressing heights are dropped silently.
    pub fn rescan_progress(&self, rescanned_through: i32) -> SyncResult<()> {
        self.apply(|session, at| {
            let accepted = session.record_rescan(rescanned_through, at)?;
            Ok(accepted.then_some(SyncNotification::RescanProgress {
                rescanned_through,
            }))
        })
    }

    /// Finish the session successfully.
    pub fn synced(&self) -> SyncResult<()> {
        self.apply(|session, at| {
            session.finish_synced(at)?;
            Ok(Some(SyncNotification::Synced {
                synced: true,
            }))
        })
    }

    /// Finish the session with `error`.
    pub fn fail(&self, error: SyncError) -> SyncResult<()> {
        self.apply(|session, at| {
            let terminal = session.fail(error, at)?;
            Ok(Some(SyncNotification::SyncError {
                code: terminal.code,
                error: terminal.error,
            }))
        })
    }

    /// Run the external sync driver until it finishes or `handle` is
    /// cancelled, then make sure the session has ended.
    ///
    /// The driver may emit the terminal callback itself. Otherwise success
    /// ends the session with `on_synced(true)`, and an error or cancellation
    /// with `on_sync_error`. On cancellation the driver future is dropped.
    /// A driver error arriving after the session already ended is logged and
    /// returned, without a second terminal callback.
    pub async fn drive<F>(&self, handle: &CancellationHandle, sync: F) -> SyncResult<()>
    where
        F: Future<Output = SyncResult<()>>,
    {
        let span = tracing::info_span!(
            "sync_session",
            id = self.current_session_id().unwrap_or_default(),
            network = %self.network,
            operation = handle.id()
        );

        let outcome = async {
            tokio::select! {
                biased;
                _ = handle.cancelled() => {
                    let err = handle
                        .error()
                        .unwrap_or_else(|| SyncError::Cancelled("operation cancelled".to_string()));
                    tracing::info!("Sync cancelled: {}", err);
                    Err(err)
                }
                result = sync => result,
            }
        }
        .instrument(span.clone())
        .await;

        span.in_scope(|| self.finish_if_active(outcome.err()))
    }

    /// Snapshot of the current session.
    pub fn progress(&self) -> Option<SyncProgress> {
        self.progress_at(Instant::now(), now_unix())
    }

    /// [`progress`](Self::progress) against explicit clocks.
    pub fn progress_at(&self, now: Instant, now_unix: i64) -> Option<SyncProgress> {
        self.lock_session()
            .as_mut()
            .map(|session| session.progress_at(self.network.label(), now, now_unix))
    }

    fn finish_if_active(&self, error: Option<SyncError>) -> SyncResult<()> {
        let mut guard = self.lock_session();
        let session = guard.as_mut().ok_or_else(no_session)?;

        if session.is_active() {
            let at = Instant::now();
            let event = match error {
                None => {
                    session.finish_synced(at)?;
                    SyncNotification::Synced {
                        synced: true,
                    }
                }
                Some(error) => {
                    let terminal = session.fail(error, at)?;
                    SyncNotification::SyncError {
                        code: terminal.code,
                        error: terminal.error,
                    }
                }
            };
            self.emit(session.id(), &event);
        } else if let Some(error) = error {
            // Terminal callback already sent; the caller still gets the fault
            let recorded = session.terminal_error().is_some_and(|t| t.error == error);
            if !error.is_cancellation() && !recorded {
                tracing::warn!(
                    "Sync driver failed after session {} ended ({}): {}",
                    session.id(),
                    session.phase(),
                    error
                );
                return Err(error);
            }
            tracing::debug!(
                "Sync session {} already ended before driver result: {}",
                session.id(),
                error
            );
        }

        match session.terminal_error() {
            Some(terminal) => Err(terminal.error.clone()),
            None => Ok(()),
        }
    }

    fn apply<F>(&self, f: F) -> SyncResult<()>
    where
        F: FnOnce(&mut SyncSession, Instant) -> SyncResult<Option<SyncNotification>>,
    {
        let mut guard = self.lock_session();
        let session = guard.as_mut().ok_or_else(no_session)?;
        let id = session.id();

        match f(session, Instant::now()) {
            Ok(Some(event)) => {
                self.emit(id, &event);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(err) => {
                tracing::warn!("Sync session {} rejected event: {}", id, err);
                Err(err)
            }
        }
    }

    /// Deliver `event` to every observer. Caller holds the session lock.
    fn emit(&self, session_id: u64, event: &SyncNotification) {
        let observers = self.observers.read().unwrap_or_else(|e| e.into_inner()).clone();
        tracing::debug!("Sync session {}: {}", session_id, event.description());

        for (index, observer) in observers.iter().enumerate() {
            if let Err(message) = call_isolated(|| event.dispatch(observer.as_ref())) {
                tracing::error!(
                    "Sync observer {} panicked handling {}: {}",
                    index,
                    event.description(),
                    message
                );
            }
        }
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<SyncSession>> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn no_session() -> SyncError {
    SyncError::InvalidState("no sync session started".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncErrorCode;
    use crate::test_utils::RecordingSyncObserver;
    use std::time::Duration;

    fn controller() -> (SyncLifecycleController, Arc<RecordingSyncObserver>) {
        let controller = SyncLifecycleController::new(Network::Mainnet);
        let observer = Arc::new(RecordingSyncObserver::default());
        controller.add_observer(observer.clone());
        (controller, observer)
    }

    #[test]
    fn test_events_require_session() {
        let (controller, observer) = controller();
        assert!(matches!(controller.peer_connected(1), Err(SyncError::InvalidState(_))));
        assert!(observer.events().is_empty());
    }

    #[test]
    fn test_second_session_rejected_while_active() {
        let (controller, _) = controller();
        let first = controller.begin_session().unwrap();
        assert_eq!(controller.begin_session(), Err(SyncError::SyncInProgress));

        controller.synced().unwrap();
        let second = controller.begin_session().unwrap();
        assert_ne!(first, second);
        assert_eq!(controller.phase(), Some(SyncPhase::ConnectingPeers));
    }

    #[test]
    fn test_full_lifecycle_order() {
        let (controller, observer) = controller();
        controller.begin_session().unwrap();

        controller.peer_connected(1).unwrap();
        controller.fetched_missing_cfilters(3).unwrap();
        controller.fetched_missing_cfilters(2).unwrap();
        controller.begin_headers_fetch(0).unwrap();
        controller.fetched_headers(500, 100, 1_700_000_000).unwrap();
        controller.discovered_addresses(false).unwrap();
        controller.discovered_addresses(true).unwrap();
        controller.discovered_addresses(true).unwrap();
        controller.rescan_progress(200).unwrap();
        controller.rescan_progress(150).unwrap();
        controller.synced().unwrap();

        assert_eq!(
            observer.events(),
            vec![
                SyncNotification::PeerConnected {
                    peer_count: 1
                },
                SyncNotification::FetchMissingCFilters {
                    fetched_count: 3
                },
                SyncNotification::FetchedHeaders {
                    peer_initial_height: 500,
                    fetched_count: 100,
                    last_header_time: 1_700_000_000,
                },
                SyncNotification::DiscoveredAddresses {
                    finished: false
                },
                SyncNotification::DiscoveredAddresses {
                    finished: true
                },
                SyncNotification::RescanProgress {
                    rescanned_through: 200
                },
                SyncNotification::Synced {
                    synced: true
                },
            ]
        );
    }

    #[test]
    fn test_no_callbacks_after_terminal() {
        let (controller, observer) = controller();
        controller.begin_session().unwrap();
        controller.fail(SyncError::Network("connection reset".into())).unwrap();

        assert!(controller.peer_connected(2).is_err());
        assert!(controller.synced().is_err());
        assert!(controller.fail(SyncError::DeadlineExceeded).is_err());

        assert_eq!(observer.terminal_count(), 1);
        assert_eq!(observer.error_codes(), vec![SyncErrorCode::Unexpected]);
    }

    #[test]
    fn test_panicking_observer_is_isolated() {
        let (controller, observer) = controller();
        controller.add_observer(Arc::new(crate::test_utils::PanickingSyncObserver));
        let late = Arc::new(RecordingSyncObserver::default());
        controller.add_observer(late.clone());

        controller.begin_session().unwrap();
        controller.peer_connected(1).unwrap();

        assert_eq!(observer.events().len(), 1);
        assert_eq!(late.events().len(), 1);
    }

    #[tokio::test]
    async fn test_start_with_invalid_peer_fails_with_code_3() {
        let (controller, observer) = controller();
        let coordinator = ShutdownCoordinator::new();
        let mut config = Config::mainnet();
        config.add_peer("host:abc:def");

        let err = controller.start(&config, &coordinator, &CancellationToken::new()).unwrap_err();
        assert_eq!(err.code(), SyncErrorCode::InvalidAddress);
        assert_eq!(observer.error_codes(), vec![SyncErrorCode::InvalidAddress]);
        assert_eq!(controller.phase(), Some(SyncPhase::Failed));
    }

    #[tokio::test]
    async fn test_drive_success_emits_synced_once() {
        let (controller, observer) = controller();
        let coordinator = ShutdownCoordinator::new();
        let mut config = Config::mainnet();
        config.add_peer("127.0.0.1");

        let start = controller.start(&config, &coordinator, &CancellationToken::new()).unwrap();
        assert_eq!(start.peers, vec!["127.0.0.1:9108".to_string()]);

        let result = controller
            .drive(&start.handle, async {
                controller.peer_connected(1)?;
                controller.synced()
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(observer.terminal_count(), 1);
        assert_eq!(controller.phase(), Some(SyncPhase::Synced));
    }

    #[tokio::test]
    async fn test_drive_shutdown_reports_code_1() {
        let (controller, observer) = controller();
        let coordinator = ShutdownCoordinator::new();
        let start =
            controller.start(&Config::mainnet(), &coordinator, &CancellationToken::new()).unwrap();

        let result = controller
            .drive(&start.handle, async {
                coordinator.request_shutdown();
                std::future::pending::<SyncResult<()>>().await
            })
            .await;

        assert_eq!(result.unwrap_err().code(), SyncErrorCode::Cancelled);
        assert_eq!(observer.error_codes(), vec![SyncErrorCode::Cancelled]);
    }

    #[tokio::test]
    async fn test_drive_deadline_reports_code_2() {
        let (controller, observer) = controller();
        let coordinator = ShutdownCoordinator::new();
        let config = Config::mainnet().with_sync_timeout(Duration::from_millis(20));
        let start = controller.start(&config, &coordinator, &CancellationToken::new()).unwrap();

        let result = controller.drive(&start.handle, std::future::pending()).await;

        assert_eq!(result, Err(SyncError::DeadlineExceeded));
        assert_eq!(observer.error_codes(), vec![SyncErrorCode::DeadlineExceeded]);
    }

    #[tokio::test]
    async fn test_drive_driver_error() {
        let (controller, observer) = controller();
        let coordinator = ShutdownCoordinator::new();
        let start =
            controller.start(&Config::mainnet(), &coordinator, &CancellationToken::new()).unwrap();

        let result = controller
            .drive(&start.handle, async { Err::<(), _>(SyncError::Storage("disk full".into())) })
            .await;

        assert_eq!(result, Err(SyncError::Storage("disk full".into())));
        assert_eq!(observer.error_codes(), vec![SyncErrorCode::Unexpected]);
    }

    #[tokio::test]
    async fn test_drive_error_after_synced_is_returned() {
        let (controller, observer) = controller();
        let coordinator = ShutdownCoordinator::new();
        let start =
            controller.start(&Config::mainnet(), &coordinator, &CancellationToken::new()).unwrap();

        let result = controller
            .drive(&start.handle, async {
                controller.synced()?;
                Err::<(), _>(SyncError::Storage("flush failed".into()))
            })
            .await;

        assert_eq!(result, Err(SyncError::Storage("flush failed".into())));
        assert_eq!(observer.terminal_count(), 1);
        assert_eq!(
            observer.events().last(),
            Some(&SyncNotification::Synced {
                synced: true
            })
        );
        assert_eq!(controller.phase(), Some(SyncPhase::Synced));
    }

    #[tokio::test]
    async fn test_drive_cancel_after_synced_keeps_success() {
        let (controller, observer) = controller();
        let coordinator = ShutdownCoordinator::new();
        let start =
            controller.start(&Config::mainnet(), &coordinator, &CancellationToken::new()).unwrap();

        let result = controller
            .drive(&start.handle, async {
                controller.synced()?;
                coordinator.request_shutdown();
                std::future::pending::<SyncResult<()>>().await
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(observer.terminal_count(), 1);
        assert!(observer.error_codes().is_empty());
    }

    #[test]
    fn test_progress_snapshot() {
        let (controller, _) = controller();
        assert!(controller.progress().is_none());

        controller.begin_session().unwrap();
        controller.peer_connected(3).unwrap();
        let progress = controller.progress().unwrap();
        assert_eq!(progress.peer_count, 3);
        assert_eq!(progress.phase, SyncPhase::ConnectingPeers);
        assert_eq!(progress.total_progress, 0);
    }
}
