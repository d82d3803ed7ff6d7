//! Error types for the wallet sync engine.

use std::fmt;
use std::io;
use thiserror::Error;

/// Main error type for the wallet sync engine.
#[derive(Debug, Error)]
pub enum WalletSyncError {
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("Amount error: {0}")]
    Amount(#[from] AmountError),

    #[error("Logging error: {0}")]
    Logging(#[from] LoggingError),
}

/// Error codes reported through the terminal error callbacks.
///
/// The numeric values are part of the observer contract and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum SyncErrorCode {
    /// Unexpected or internal failure.
    Unexpected = -1,
    /// The operation was cancelled through shutdown or its parent.
    Cancelled = 1,
    /// The operation ran past its deadline.
    DeadlineExceeded = 2,
    /// An invalid address was encountered during setup.
    InvalidAddress = 3,
}

impl SyncErrorCode {
    /// Numeric value handed to observers.
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for SyncErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i32())
    }
}

/// Synchronization and rescan errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// A sync session is already running on this controller
    #[error("Sync already in progress")]
    SyncInProgress,

    /// A rescan is already running on this controller
    #[error("Rescan already in progress")]
    RescanInProgress,

    /// An event arrived that the current phase does not accept
    #[error("Invalid sync state: {0}")]
    InvalidState(String),

    /// Cancelled through shutdown, the parent operation or an explicit request
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// The deadline attached to the operation passed
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// A peer or wallet address was rejected during setup
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Network-related failure reported by a peer worker
    #[error("Network error: {0}")]
    Network(String),

    /// Storage-related failure reported by the wallet backend
    #[error("Storage error: {0}")]
    Storage(String),

    /// Received data failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Anything else
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Code reported through `on_sync_error` / `on_error`.
    pub fn code(&self) -> SyncErrorCode {
        match self {
            SyncError::Cancelled(_) => SyncErrorCode::Cancelled,
            SyncError::DeadlineExceeded => SyncErrorCode::DeadlineExceeded,
            SyncError::InvalidAddress(_) => SyncErrorCode::InvalidAddress,
            SyncError::SyncInProgress
            | SyncError::RescanInProgress
            | SyncError::InvalidState(_)
            | SyncError::Network(_)
            | SyncError::Storage(_)
            | SyncError::Validation(_)
            | SyncError::Internal(_) => SyncErrorCode::Unexpected,
        }
    }

    /// Returns a static string representing the error category based on the variant
    pub fn category(&self) -> &'static str {
        match self {
            SyncError::SyncInProgress
            | SyncError::RescanInProgress
            | SyncError::InvalidState(_) => "state",
            SyncError::Cancelled(_) => "cancelled",
            SyncError::DeadlineExceeded => "timeout",
            SyncError::InvalidAddress(_) => "address",
            SyncError::Network(_) => "network",
            SyncError::Storage(_) => "storage",
            SyncError::Validation(_) => "validation",
            SyncError::Internal(_) => "internal",
        }
    }

    /// Whether this error is a cancellation outcome rather than a fault.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, SyncError::Cancelled(_) | SyncError::DeadlineExceeded)
    }
}

/// Parse-related errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("address {addr}: missing port in address")]
    MissingPort {
        addr: String,
    },

    #[error("address {addr}: too many colons in address")]
    TooManyColons {
        addr: String,
    },

    #[error("address {addr}: missing ']' in address")]
    MissingBracket {
        addr: String,
    },

    #[error("address {addr}: unexpected '{found}' in address")]
    UnexpectedCharacter {
        addr: String,
        found: char,
    },

    #[error("Invalid network name: {0}")]
    InvalidNetwork(String),
}

/// Failures isolated while fanning out wallet notifications.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotificationError {
    #[error("listener {listener} panicked handling {event}: {message}")]
    ListenerPanicked {
        listener: u64,
        event: &'static str,
        message: String,
    },
}

/// Hex and base64 decoding errors.
#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("Invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("Invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Coin to atom conversion errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AmountError {
    #[error("invalid coin amount: {0}")]
    NotFinite(f64),

    #[error("coin amount {0} is out of range")]
    OutOfRange(f64),
}

/// Logging-related errors.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to create log directory: {0}")]
    DirectoryCreation(#[from] std::io::Error),

    #[error("Subscriber initialization failed: {0}")]
    SubscriberInit(String),

    #[error("Log rotation failed: {0}")]
    RotationFailed(String),
}

/// Type alias for Result with WalletSyncError.
pub type Result<T> = std::result::Result<T, WalletSyncError>;

/// Type alias for sync and rescan operation results.
pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Type alias for parse results.
pub type ParseResult<T> = std::result::Result<T, ParseError>;

/// Type alias for logging operation results.
pub type LoggingResult<T> = std::result::Result<T, LoggingError>;
