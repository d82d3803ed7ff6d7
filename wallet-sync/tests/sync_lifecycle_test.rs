//! Tests for the sync lifecycle controller under concurrent workers.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use wallet_sync::sync::SyncNotification;
use wallet_sync::test_utils::RecordingSyncObserver;
use wallet_sync::{
    Config, Network, ShutdownCoordinator, SyncError, SyncErrorCode, SyncLifecycleController,
    SyncPhase,
};

fn create_controller() -> (Arc<SyncLifecycleController>, Arc<RecordingSyncObserver>) {
    let controller = Arc::new(SyncLifecycleController::new(Network::Testnet));
    let observer = Arc::new(RecordingSyncObserver::default());
    controller.add_observer(observer.clone());
    (controller, observer)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_rescan_reports_stay_monotone() {
    let (controller, observer) = create_controller();
    controller.begin_session().unwrap();
    controller.discovered_addresses(true).unwrap();

    let mut tasks = Vec::new();
    for worker in 0..8 {
        let controller = Arc::clone(&controller);
        tasks.push(tokio::spawn(async move {
            for step in 0..50 {
                let _ = controller.rescan_progress(step * 8 + worker);
                tokio::task::yield_now().await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let heights = observer.rescan_heights();
    assert!(!heights.is_empty());
    assert!(heights.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(controller.progress().unwrap().rescan_through_height, *heights.last().unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_terminal_reports_emit_once() {
    let (controller, observer) = create_controller();
    controller.begin_session().unwrap();

    let mut tasks = Vec::new();
    for worker in 0..16 {
        let controller = Arc::clone(&controller);
        tasks.push(tokio::spawn(async move {
            if worker % 2 == 0 {
                controller.synced().is_ok()
            } else {
                controller.fail(SyncError::Network("peer reset".into())).is_ok()
            }
        }));
    }

    let mut accepted = 0;
    for task in tasks {
        if task.await.unwrap() {
            accepted += 1;
        }
    }

    assert_eq!(accepted, 1);
    assert_eq!(observer.terminal_count(), 1);
    assert!(observer.events().last().unwrap().is_terminal());
}

#[tokio::test]
async fn test_shutdown_during_header_fetch() {
    let (controller, observer) = create_controller();
    let coordinator = ShutdownCoordinator::new();
    let mut config = Config::testnet();
    config.add_peer("10.0.0.1").add_peer("[::1]:19108");

    let start = controller.start(&config, &coordinator, &CancellationToken::new()).unwrap();
    assert_eq!(start.peers, vec!["10.0.0.1:19108".to_string(), "[::1]:19108".to_string()]);

    let driver = async {
        controller.peer_connected(2)?;
        controller.begin_headers_fetch(0)?;
        for batch in 1..=1000 {
            controller.fetched_headers(100_000, batch * 100, 1_600_000_000)?;
            if batch == 3 {
                coordinator.request_shutdown();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok::<(), SyncError>(())
    };

    let result = controller.drive(&start.handle, driver).await;
    assert_eq!(result.unwrap_err().code(), SyncErrorCode::Cancelled);

    let events = observer.events();
    assert_eq!(observer.terminal_count(), 1);
    assert!(matches!(
        events.last(),
        Some(SyncNotification::SyncError {
            code: SyncErrorCode::Cancelled,
            ..
        })
    ));
    assert_eq!(controller.phase(), Some(SyncPhase::Failed));

    // The driver is gone; late worker reports are rejected and not emitted
    assert!(controller.fetched_headers(100_000, 400, 1_600_000_000).is_err());
    assert_eq!(observer.events().len(), events.len());
}

#[tokio::test]
async fn test_parent_cancellation_reports_code_1() {
    let (controller, observer) = create_controller();
    let coordinator = ShutdownCoordinator::new();
    let parent = CancellationToken::new();
    let start = controller.start(&Config::testnet(), &coordinator, &parent).unwrap();

    let cancel = parent.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    });

    let result = controller.drive(&start.handle, std::future::pending()).await;
    assert!(matches!(result, Err(SyncError::Cancelled(_))));
    assert_eq!(observer.error_codes(), vec![SyncErrorCode::Cancelled]);
}

#[tokio::test]
async fn test_new_session_after_failure_starts_clean() {
    let (controller, observer) = create_controller();
    controller.begin_session().unwrap();
    controller.rescan_progress(500).unwrap();
    controller.fail(SyncError::Storage("disk full".into())).unwrap();

    controller.begin_session().unwrap();
    controller.rescan_progress(10).unwrap();

    assert_eq!(observer.rescan_heights(), vec![500, 10]);
    let progress = controller.progress().unwrap();
    assert_eq!(progress.rescan_through_height, 10);
    assert_eq!(progress.phase, SyncPhase::Rescanning);
}

#[test]
fn test_phase_history_records_transitions() {
    let (controller, _) = create_controller();
    controller.begin_session().unwrap();
    controller.fetched_missing_cfilters(1).unwrap();
    controller.begin_headers_fetch(10).unwrap();
    controller.synced().unwrap();

    let history: Vec<_> =
        controller.phase_history().iter().map(|t| (t.from_phase, t.to_phase)).collect();
    assert_eq!(
        history,
        vec![
            (SyncPhase::Idle, SyncPhase::ConnectingPeers),
            (SyncPhase::ConnectingPeers, SyncPhase::FetchingMissingFilters),
            (SyncPhase::FetchingMissingFilters, SyncPhase::FetchingHeaders),
            (SyncPhase::FetchingHeaders, SyncPhase::Synced),
        ]
    );
}
