//! Recording observers and scripted scanners for tests.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{SyncError, SyncErrorCode, SyncResult};
use crate::notify::{TransactionListener, WalletNotification};
use crate::rescan::{BlockScanResponse, BlockScanner};
use crate::sync::{SpvSyncResponse, SyncNotification};
use crate::types::Transaction;

/// Records every sync callback in order.
#[derive(Debug, Default)]
pub struct RecordingSyncObserver {
    events: Mutex<Vec<SyncNotification>>,
}

impl RecordingSyncObserver {
    fn push(&self, event: SyncNotification) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<SyncNotification> {
        self.events.lock().unwrap().clone()
    }

    pub fn terminal_count(&self) -> usize {
        self.events.lock().unwrap().iter().filter(|e| e.is_terminal()).count()
    }

    pub fn error_codes(&self) -> Vec<SyncErrorCode> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                SyncNotification::SyncError {
                    code,
                    ..
                } => Some(*code),
                _ => None,
            })
            .collect()
    }

    pub fn rescan_heights(&self) -> Vec<i32> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                SyncNotification::RescanProgress {
                    rescanned_through,
                } => Some(*rescanned_through),
                _ => None,
            })
            .collect()
    }
}

impl SpvSyncResponse for RecordingSyncObserver {
    fn on_peer_connected(&self, peer_count: i32) {
        self.push(SyncNotification::PeerConnected {
            peer_count,
        });
    }

    fn on_peer_disconnected(&self, peer_count: i32) {
        self.push(SyncNotification::PeerDisconnected {
            peer_count,
        });
    }

    fn on_fetch_missing_cfilters(&self, fetched_cfilters_count: i32) {
        self.push(SyncNotification::FetchMissingCFilters {
            fetched_count: fetched_cfilters_count,
        });
    }

    fn on_fetched_headers(
        &self,
        peer_initial_height: i32,
        fetched_headers_count: i32,
        last_header_time: i64,
    ) {
        self.push(SyncNotification::FetchedHeaders {
            peer_initial_height,
            fetched_count: fetched_headers_count,
            last_header_time,
        });
    }

    fn on_discovered_addresses(&self, finished: bool) {
        self.push(SyncNotification::DiscoveredAddresses {
            finished,
        });
    }

    fn on_rescan_progress(&self, rescanned_through: i32) {
        self.push(SyncNotification::RescanProgress {
            rescanned_through,
        });
    }

    fn on_synced(&self, synced: bool) {
        self.push(SyncNotification::Synced {
            synced,
        });
    }

    fn on_sync_error(&self, code: SyncErrorCode, err: &SyncError) {
        self.push(SyncNotification::SyncError {
            code,
            error: err.clone(),
        });
    }
}

/// Panics on every callback.
#[derive(Debug, Default)]
pub struct PanickingSyncObserver;

impl SpvSyncResponse for PanickingSyncObserver {
    fn on_peer_connected(&self, _peer_count: i32) {
        panic!("observer failure");
    }

    fn on_peer_disconnected(&self, _peer_count: i32) {
        panic!("observer failure");
    }

    fn on_fetch_missing_cfilters(&self, _fetched_cfilters_count: i32) {
        panic!("observer failure");
    }

    fn on_fetched_headers(&self, _: i32, _: i32, _: i64) {
        panic!("observer failure");
    }

    fn on_discovered_addresses(&self, _finished: bool) {
        panic!("observer failure");
    }

    fn on_rescan_progress(&self, _rescanned_through: i32) {
        panic!("observer failure");
    }

    fn on_synced(&self, _synced: bool) {
        panic!("observer failure");
    }

    fn on_sync_error(&self, _code: SyncErrorCode, _err: &SyncError) {
        panic!("observer failure");
    }
}

/// Rescan callback as recorded by [`RecordingScanResponse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    Scan(i32),
    End(i32, bool),
    Error(SyncErrorCode, String),
}

/// Records rescan callbacks. Optionally asks to stop after a number of
/// scanned blocks.
#[derive(Debug, Default)]
pub struct RecordingScanResponse {
    events: Mutex<Vec<ScanEvent>>,
    stop_after: Option<usize>,
}

impl RecordingScanResponse {
    /// Return false from the `n`th `on_scan`.
    pub fn stop_after(n: usize) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            stop_after: Some(n),
        }
    }

    pub fn events(&self) -> Vec<ScanEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn scanned_heights(&self) -> Vec<i32> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ScanEvent::Scan(height) => Some(height),
                _ => None,
            })
            .collect()
    }

    /// `on_end` and `on_error` calls.
    pub fn terminal_events(&self) -> Vec<ScanEvent> {
        self.events().into_iter().filter(|e| !matches!(e, ScanEvent::Scan(_))).collect()
    }

    pub fn saw_end(&self) -> bool {
        self.events().iter().any(|e| matches!(e, ScanEvent::End(..)))
    }
}

impl BlockScanResponse for RecordingScanResponse {
    fn on_scan(&self, rescanned_through: i32) -> bool {
        let mut events = self.events.lock().unwrap();
        events.push(ScanEvent::Scan(rescanned_through));
        let scanned = events.iter().filter(|e| matches!(e, ScanEvent::Scan(_))).count();
        self.stop_after.map_or(true, |n| scanned < n)
    }

    fn on_end(&self, height: i32, cancelled: bool) {
        self.events.lock().unwrap().push(ScanEvent::End(height, cancelled));
    }

    fn on_error(&self, code: SyncErrorCode, message: &str) {
        self.events.lock().unwrap().push(ScanEvent::Error(code, message.to_string()));
    }
}

/// Scanner that records heights, optionally sleeping per block or failing
/// at a given height.
#[derive(Debug, Default)]
pub struct StepScanner {
    pub scanned: Vec<i32>,
    pub fail_at: Option<i32>,
    pub delay: Option<Duration>,
}

impl StepScanner {
    pub fn failing_at(height: i32) -> Self {
        Self {
            fail_at: Some(height),
            ..Self::default()
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }
}

#[async_trait]
impl BlockScanner for StepScanner {
    async fn scan_block(&mut self, height: i32) -> SyncResult<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_at == Some(height) {
            return Err(SyncError::Storage(format!("failed to read block {}", height)));
        }
        self.scanned.push(height);
        Ok(())
    }
}

/// Records wallet notifications.
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<WalletNotification>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<WalletNotification> {
        self.events.lock().unwrap().clone()
    }
}

impl TransactionListener for RecordingListener {
    fn on_transaction(&self, transaction: &Transaction) {
        self.events.lock().unwrap().push(WalletNotification::Transaction(transaction.clone()));
    }

    fn on_transaction_confirmed(&self, hash: &str, height: i32) {
        self.events.lock().unwrap().push(WalletNotification::TransactionConfirmed {
            hash: hash.to_string(),
            height,
        });
    }

    fn on_block_attached(&self, height: i32, timestamp: i64) {
        self.events.lock().unwrap().push(WalletNotification::BlockAttached {
            height,
            timestamp,
        });
    }
}
