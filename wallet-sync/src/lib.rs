//! Sync lifecycle engine for SPV light wallets.
//!
//! This library drives the progress reporting side of a light wallet sync:
//!
//! - Track sync phases reported by peer, header and rescan workers and turn
//!   them into ordered observer callbacks
//! - Estimate remaining sync time and the projected chain tip
//! - Run bounded rescans with cooperative per-block cancellation
//! - Cancel every in-flight operation exactly once on shutdown
//! - Fan out post-sync wallet notifications with per-listener isolation
//!
//! Wire protocol handling, filter and header validation, signing and wallet
//! storage are left to the caller.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use wallet_sync::{Config, ShutdownCoordinator, SyncLifecycleController};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::testnet();
//!     config.add_peer("127.0.0.1");
//!
//!     let coordinator = ShutdownCoordinator::global();
//!     coordinator.spawn_signal_listener();
//!
//!     let controller = SyncLifecycleController::new(config.network);
//!     let start = controller.start(&config, &coordinator, &CancellationToken::new())?;
//!
//!     controller
//!         .drive(&start.handle, async {
//!             controller.peer_connected(1)?;
//!             controller.begin_headers_fetch(0)?;
//!             controller.fetched_headers(1000, 1000, 1_700_000_000)?;
//!             controller.synced()
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub mod address;
pub mod config;
pub mod error;
pub mod logging;
pub mod notify;
pub mod progress;
pub mod rescan;
pub mod shutdown;
pub mod sync;
pub mod types;
pub mod units;
pub mod utils;

// Re-export main types for convenience
pub use address::normalize_address;
pub use config::{Config, Network};
pub use error::{
    AmountError, EncodingError, LoggingError, LoggingResult, NotificationError, ParseError,
    SyncError, SyncErrorCode, SyncResult, WalletSyncError,
};
pub use logging::{init_console_logging, init_logging, LogFileConfig, LoggingConfig, LoggingGuard};
pub use notify::{
    BlockNotificationError, ListenerId, NotificationHub, TransactionListener, WalletNotification,
};
pub use progress::TimeEstimate;
pub use rescan::{BlockScanResponse, BlockScanner, RescanController, RescanOutcome, RescanSession};
pub use shutdown::{CancelReason, CancellationHandle, ShutdownCoordinator};
pub use sync::{SpvSyncResponse, SyncLifecycleController, SyncPhase, SyncProgress};
pub use types::{Balance, Direction, Transaction};
pub use units::{amount_atom, amount_coin};

/// Current version of the wallet-sync library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
