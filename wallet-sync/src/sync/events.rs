//! Observer surface of the sync lifecycle.

use crate::error::{SyncError, SyncErrorCode};

/// Receives sync progress from a [`SyncLifecycleController`].
///
/// Callbacks run synchronously on the worker that produced the event while
/// the controller's session lock is held. Implementations must return
/// promptly and must not call back into the controller that invoked them;
/// doing so deadlocks that worker.
///
/// [`SyncLifecycleController`]: super::SyncLifecycleController
pub trait SpvSyncResponse: Send + Sync {
    fn on_peer_connected(&self, peer_count: i32);

    fn on_peer_disconnected(&self, peer_count: i32);

    /// Cumulative count of missing compact filters fetched.
    fn on_fetch_missing_cfilters(&self, fetched_cfilters_count: i32);

    /// Cumulative header count for the peer whose chain starts at
    /// `peer_initial_height`.
    fn on_fetched_headers(
        &self,
        peer_initial_height: i32,
        fetched_headers_count: i32,
        last_header_time: i64,
    );

    /// Progress ticks carry `false`; the final call carries `true`.
    fn on_discovered_addresses(&self, finished: bool);

    fn on_rescan_progress(&self, rescanned_through: i32);

    /// Terminal. Sync completed.
    fn on_synced(&self, synced: bool);

    /// Terminal. `code` is one of -1, 1, 2 or 3.
    fn on_sync_error(&self, code: SyncErrorCode, err: &SyncError);
}

/// One emitted sync callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncNotification {
    PeerConnected {
        peer_count: i32,
    },
    PeerDisconnected {
        peer_count: i32,
    },
    FetchMissingCFilters {
        fetched_count: i32,
    },
    FetchedHeaders {
        peer_initial_height: i32,
        fetched_count: i32,
        last_header_time: i64,
    },
    DiscoveredAddresses {
        finished: bool,
    },
    RescanProgress {
        rescanned_through: i32,
    },
    Synced {
        synced: bool,
    },
    SyncError {
        code: SyncErrorCode,
        error: SyncError,
    },
}

impl SyncNotification {
    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            SyncNotification::PeerConnected {
                peer_count,
            } => format!("PeerConnected(peers={})", peer_count),
            SyncNotification::PeerDisconnected {
                peer_count,
            } => format!("PeerDisconnected(peers={})", peer_count),
            SyncNotification::FetchMissingCFilters {
                fetched_count,
            } => format!("FetchMissingCFilters(count={})", fetched_count),
            SyncNotification::FetchedHeaders {
                peer_initial_height,
                fetched_count,
                last_header_time,
            } => format!(
                "FetchedHeaders(peer_height={}, count={}, last_time={})",
                peer_initial_height, fetched_count, last_header_time
            ),
            SyncNotification::DiscoveredAddresses {
                finished,
            } => format!("DiscoveredAddresses(finished={})", finished),
            SyncNotification::RescanProgress {
                rescanned_through,
            } => format!("RescanProgress(through={})", rescanned_through),
            SyncNotification::Synced {
                synced,
            } => format!("Synced({})", synced),
            SyncNotification::SyncError {
                code,
                error,
            } => format!("SyncError(code={}, {})", code, error),
        }
    }

    /// Whether this is the session's last callback.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncNotification::Synced {
                ..
            } | SyncNotification::SyncError {
                ..
            }
        )
    }

    /// Invoke the matching observer method.
    pub fn dispatch(&self, observer: &dyn SpvSyncResponse) {
        match self {
            SyncNotification::PeerConnected {
                peer_count,
            } => observer.on_peer_connected(*peer_count),
            SyncNotification::PeerDisconnected {
                peer_count,
            } => observer.on_peer_disconnected(*peer_count),
            SyncNotification::FetchMissingCFilters {
                fetched_count,
            } => observer.on_fetch_missing_cfilters(*fetched_count),
            SyncNotification::FetchedHeaders {
                peer_initial_height,
                fetched_count,
                last_header_time,
            } => observer.on_fetched_headers(*peer_initial_height, *fetched_count, *last_header_time),
            SyncNotification::DiscoveredAddresses {
                finished,
            } => observer.on_discovered_addresses(*finished),
            SyncNotification::RescanProgress {
                rescanned_through,
            } => observer.on_rescan_progress(*rescanned_through),
            SyncNotification::Synced {
                synced,
            } => observer.on_synced(*synced),
            SyncNotification::SyncError {
                code,
                error,
            } => observer.on_sync_error(*code, error),
        }
    }
}
