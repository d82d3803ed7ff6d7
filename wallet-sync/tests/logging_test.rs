//! Tests for file logging. Kept in its own test binary because it installs
//! the global subscriber.

use std::fs;
use std::sync::Arc;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;

use wallet_sync::test_utils::{RecordingScanResponse, StepScanner};
use wallet_sync::{
    init_logging, Config, LogFileConfig, LoggingConfig, Network, RescanController,
    ShutdownCoordinator, SyncLifecycleController,
};

#[tokio::test]
async fn test_file_log_carries_session_and_rescan_spans() {
    let temp_dir = TempDir::new().unwrap();
    let guard = init_logging(LoggingConfig {
        level: Some(LevelFilter::DEBUG),
        console: false,
        file: Some(LogFileConfig {
            log_dir: temp_dir.path().to_path_buf(),
            max_files: 2,
        }),
    })
    .unwrap();

    let coordinator = ShutdownCoordinator::new();
    let controller = Arc::new(SyncLifecycleController::new(Network::Testnet));
    let mut config = Config::testnet();
    config.add_peer("127.0.0.1");
    let start = controller.start(&config, &coordinator, &CancellationToken::new()).unwrap();

    let rescanner = RescanController::new();
    let result = controller
        .drive(&start.handle, async {
            controller.peer_connected(1)?;
            let handle = coordinator.derive_cancellable(&start.handle.token());
            let response = RecordingScanResponse::default();
            let mut scanner = StepScanner::default();
            rescanner.rescan(10, 12, &mut scanner, &response, &handle).await;
            controller.synced()
        })
        .await;
    assert!(result.is_ok());

    // Flushes the non-blocking writer
    drop(guard);

    let log = fs::read_to_string(temp_dir.path().join("run.log")).unwrap();
    let session_id = start.session_id;
    assert!(log.contains(&format!("sync_session{{id={} network=testnet", session_id)));
    assert!(log.contains("rescan{id=1 target=12"));
    assert!(log.contains("Rescan completed through 12"));
    assert!(log.contains("close"));
}
