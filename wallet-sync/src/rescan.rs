//! Bounded rescan through a target height.
//!
//! [`RescanController::rescan`] walks heights `start..=target`. For each
//! height it checks the cancellation handle, has the [`BlockScanner`]
//! process the block, and reports the height through
//! [`BlockScanResponse::on_scan`]. Every invocation ends with exactly one of
//! `on_end` or `on_error`, and no `on_scan` follows it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::Instrument;

use crate::error::{SyncError, SyncErrorCode, SyncResult};
use crate::notify::call_isolated;
use crate::shutdown::CancellationHandle;

/// Receives rescan progress.
///
/// Called on the task running the rescan. Implementations must return
/// promptly and must not start another rescan on the same controller from
/// inside a callback.
pub trait BlockScanResponse: Send + Sync {
    /// Block `rescanned_through` was scanned. Returning false stops the
    /// rescan before the next block.
    fn on_scan(&self, rescanned_through: i32) -> bool;

    /// Rescan stopped at `height`. `cancelled` is true when `on_scan`
    /// asked to stop.
    fn on_end(&self, height: i32, cancelled: bool);

    /// Rescan failed or its handle was cancelled.
    fn on_error(&self, code: SyncErrorCode, message: &str);
}

/// Processes one block during a rescan.
#[async_trait]
pub trait BlockScanner: Send {
    async fn scan_block(&mut self, height: i32) -> SyncResult<()>;
}

/// State of one rescan invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RescanSession {
    pub id: u64,
    pub start_height: i32,
    pub target_height: i32,
    /// Last height scanned. Never decreases.
    pub current_height: i32,
    /// Set once the observer asked to stop.
    pub cancelled: bool,
}

/// How a rescan ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RescanOutcome {
    /// Reported as `on_end(height, false)`.
    Completed {
        height: i32,
    },
    /// Reported as `on_end(height, true)`.
    Cancelled {
        height: i32,
    },
    /// Reported as `on_error(code, message)`.
    Failed {
        code: SyncErrorCode,
        message: String,
    },
}

impl RescanOutcome {
    fn from_error(err: &SyncError) -> Self {
        RescanOutcome::Failed {
            code: err.code(),
            message: err.to_string(),
        }
    }

    /// Deliver the terminal callback for this outcome.
    fn report(&self, response: &dyn BlockScanResponse) {
        let result = call_isolated(|| match self {
            RescanOutcome::Completed {
                height,
            } => response.on_end(*height, false),
            RescanOutcome::Cancelled {
                height,
            } => response.on_end(*height, true),
            RescanOutcome::Failed {
                code,
                message,
            } => response.on_error(*code, message),
        });
        if let Err(message) = result {
            tracing::error!("Rescan observer panicked handling terminal callback: {}", message);
        }
    }
}

/// Runs at most one rescan at a time.
#[derive(Debug, Default)]
pub struct RescanController {
    active: Mutex<Option<RescanSession>>,
    next_id: AtomicU64,
}

/// Clears the active slot, also when the rescan future is dropped.
struct ActiveRescan<'a> {
    slot: &'a Mutex<Option<RescanSession>>,
}

impl Drop for ActiveRescan<'_> {
    fn drop(&mut self) {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

impl RescanController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the running rescan, if any.
    pub fn current(&self) -> Option<RescanSession> {
        *self.lock_active()
    }

    pub fn is_rescanning(&self) -> bool {
        self.lock_active().is_some()
    }

    /// Rescan `start_height..=target_height`.
    ///
    /// An overlapping call is answered with `on_error(-1, ..)` and does not
    /// disturb the running rescan. When `start_height > target_height` the
    /// rescan ends at once with `on_end(target_height, false)`.
    pub async fn rescan(
        &self,
        start_height: i32,
        target_height: i32,
        scanner: &mut dyn BlockScanner,
        response: &dyn BlockScanResponse,
        handle: &CancellationHandle,
    ) -> RescanOutcome {
        let Some(_active) = self.claim(start_height, target_height) else {
            tracing::warn!("Rejecting rescan to {}: another rescan is running", target_height);
            let outcome = RescanOutcome::from_error(&SyncError::RescanInProgress);
            outcome.report(response);
            return outcome;
        };

        let span = tracing::info_span!(
            "rescan",
            id = self.current().map_or(0, |session| session.id),
            target = target_height,
            operation = handle.id()
        );

        let outcome = self
            .run(start_height, target_height, scanner, response, handle)
            .instrument(span.clone())
            .await;

        span.in_scope(|| {
            match &outcome {
                RescanOutcome::Completed {
                    height,
                } => tracing::info!("Rescan completed through {}", height),
                RescanOutcome::Cancelled {
                    height,
                } => tracing::info!("Rescan stopped by observer at {}", height),
                RescanOutcome::Failed {
                    code,
                    message,
                } => tracing::warn!("Rescan failed with code {}: {}", code, message),
            }
            outcome.report(response);
        });
        outcome
    }

    async fn run(
        &self,
        start_height: i32,
        target_height: i32,
        scanner: &mut dyn BlockScanner,
        response: &dyn BlockScanResponse,
        handle: &CancellationHandle,
    ) -> RescanOutcome {
        if start_height > target_height {
            tracing::debug!(
                "Rescan start {} is past target {}, nothing to scan",
                start_height,
                target_height
            );
            return RescanOutcome::Completed {
                height: target_height,
            };
        }

        for height in start_height..=target_height {
            if handle.is_cancelled() {
                return RescanOutcome::from_error(&cancellation_error(handle));
            }

            let scanned = tokio::select! {
                biased;
                _ = handle.cancelled() => Err(cancellation_error(handle)),
                result = scanner.scan_block(height) => result,
            };
            if let Err(err) = scanned {
                return RescanOutcome::from_error(&err);
            }

            self.advance(height);

            match call_isolated(|| response.on_scan(height)) {
                Ok(true) => {}
                Ok(false) => {
                    self.mark_cancelled();
                    return RescanOutcome::Cancelled {
                        height,
                    };
                }
                Err(message) => {
                    return RescanOutcome::from_error(&SyncError::Internal(format!(
                        "scan observer panicked: {}",
                        message
                    )));
                }
            }
        }

        RescanOutcome::Completed {
            height: target_height,
        }
    }

    fn claim(&self, start_height: i32, target_height: i32) -> Option<ActiveRescan<'_>> {
        let mut active = self.lock_active();
        if active.is_some() {
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!("Rescan {} from {} through {}", id, start_height, target_height);
        *active = Some(RescanSession {
            id,
            start_height,
            target_height,
            current_height: start_height.saturating_sub(1),
            cancelled: false,
        });
        Some(ActiveRescan {
            slot: &self.active,
        })
    }

    fn advance(&self, height: i32) {
        if let Some(session) = self.lock_active().as_mut() {
            session.current_height = session.current_height.max(height);
        }
    }

    fn mark_cancelled(&self) {
        if let Some(session) = self.lock_active().as_mut() {
            session.cancelled = true;
        }
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<RescanSession>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn cancellation_error(handle: &CancellationHandle) -> SyncError {
    handle.error().unwrap_or_else(|| SyncError::Cancelled("operation cancelled".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::ShutdownCoordinator;
    use crate::test_utils::{RecordingScanResponse, ScanEvent, StepScanner};
    use tokio_util::sync::CancellationToken;

    fn handle(coordinator: &ShutdownCoordinator) -> CancellationHandle {
        coordinator.derive_cancellable(&CancellationToken::new())
    }

    #[tokio::test]
    async fn test_completes_through_target() {
        let coordinator = ShutdownCoordinator::new();
        let controller = RescanController::new();
        let response = RecordingScanResponse::default();
        let mut scanner = StepScanner::default();

        let outcome =
            controller.rescan(10, 13, &mut scanner, &response, &handle(&coordinator)).await;

        assert_eq!(
            outcome,
            RescanOutcome::Completed {
                height: 13
            }
        );
        assert_eq!(scanner.scanned, vec![10, 11, 12, 13]);
        assert_eq!(response.scanned_heights(), vec![10, 11, 12, 13]);
        assert_eq!(response.terminal_events(), vec![ScanEvent::End(13, false)]);
        assert!(!controller.is_rescanning());
    }

    #[tokio::test]
    async fn test_observer_stop() {
        let coordinator = ShutdownCoordinator::new();
        let controller = RescanController::new();
        let response = RecordingScanResponse::stop_after(2);
        let mut scanner = StepScanner::default();

        let outcome = controller.rescan(0, 100, &mut scanner, &response, &handle(&coordinator)).await;

        assert_eq!(
            outcome,
            RescanOutcome::Cancelled {
                height: 1
            }
        );
        assert_eq!(scanner.scanned, vec![0, 1]);
        assert_eq!(response.terminal_events(), vec![ScanEvent::End(1, true)]);
    }

    #[tokio::test]
    async fn test_scanner_fault() {
        let coordinator = ShutdownCoordinator::new();
        let controller = RescanController::new();
        let response = RecordingScanResponse::default();
        let mut scanner = StepScanner::failing_at(3);

        let outcome = controller.rescan(1, 5, &mut scanner, &response, &handle(&coordinator)).await;

        assert!(matches!(
            outcome,
            RescanOutcome::Failed {
                code: SyncErrorCode::Unexpected,
                ..
            }
        ));
        assert_eq!(response.scanned_heights(), vec![1, 2]);
        assert_eq!(response.terminal_events().len(), 1);
        assert!(!response.saw_end());
    }

    #[tokio::test]
    async fn test_start_past_target() {
        let coordinator = ShutdownCoordinator::new();
        let controller = RescanController::new();
        let response = RecordingScanResponse::default();
        let mut scanner = StepScanner::default();

        let outcome = controller.rescan(20, 10, &mut scanner, &response, &handle(&coordinator)).await;

        assert_eq!(
            outcome,
            RescanOutcome::Completed {
                height: 10
            }
        );
        assert!(scanner.scanned.is_empty());
        assert_eq!(response.terminal_events(), vec![ScanEvent::End(10, false)]);
    }

    #[tokio::test]
    async fn test_cancelled_handle_reports_code_1() {
        let coordinator = ShutdownCoordinator::new();
        let controller = RescanController::new();
        let response = RecordingScanResponse::default();
        let mut scanner = StepScanner::default();
        let handle = handle(&coordinator);
        coordinator.request_shutdown();

        let outcome = controller.rescan(0, 10, &mut scanner, &response, &handle).await;

        assert!(matches!(
            outcome,
            RescanOutcome::Failed {
                code: SyncErrorCode::Cancelled,
                ..
            }
        ));
        assert!(response.scanned_heights().is_empty());
    }

    #[tokio::test]
    async fn test_overlapping_rescan_rejected() {
        let controller = RescanController::new();
        let _active = controller.claim(0, 10).unwrap();

        let coordinator = ShutdownCoordinator::new();
        let response = RecordingScanResponse::default();
        let mut scanner = StepScanner::default();
        let outcome = controller.rescan(0, 5, &mut scanner, &response, &handle(&coordinator)).await;

        assert_eq!(
            outcome,
            RescanOutcome::Failed {
                code: SyncErrorCode::Unexpected,
                message: "Rescan already in progress".to_string(),
            }
        );
        assert!(scanner.scanned.is_empty());
        assert_eq!(controller.current().map(|s| s.target_height), Some(10));
    }
}
