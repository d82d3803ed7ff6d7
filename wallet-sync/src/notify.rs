//! Fan-out of post-sync wallet events.
//!
//! [`NotificationHub`] delivers every [`WalletNotification`] synchronously to
//! each registered [`TransactionListener`], in registration order, on the
//! caller's thread. A listener that panics is isolated: the panic is logged,
//! reported to the [`BlockNotificationError`] sink if one is set, and the
//! remaining listeners still receive the event.
//!
//! Listeners run on the producer's execution context and must not block
//! indefinitely. Nothing enforces this.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::error::NotificationError;
use crate::types::Transaction;

/// Receives wallet events once sync or rescan work has settled.
pub trait TransactionListener: Send + Sync {
    /// A transaction relevant to the wallet was seen for the first time.
    fn on_transaction(&self, transaction: &Transaction);

    /// A previously seen transaction was mined at `height`.
    fn on_transaction_confirmed(&self, hash: &str, height: i32);

    /// A new block became the chain tip.
    fn on_block_attached(&self, height: i32, timestamp: i64);
}

/// Receives failures isolated during fan-out.
pub trait BlockNotificationError: Send + Sync {
    fn on_block_notification_error(&self, err: &NotificationError);
}

/// Events delivered by [`NotificationHub`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletNotification {
    Transaction(Transaction),
    TransactionConfirmed {
        hash: String,
        height: i32,
    },
    BlockAttached {
        height: i32,
        timestamp: i64,
    },
}

impl WalletNotification {
    /// Short event name for logs and error reports.
    pub fn name(&self) -> &'static str {
        match self {
            WalletNotification::Transaction(_) => "transaction",
            WalletNotification::TransactionConfirmed {
                ..
            } => "transaction_confirmed",
            WalletNotification::BlockAttached {
                ..
            } => "block_attached",
        }
    }

    /// Invoke the matching listener method.
    pub fn dispatch(&self, listener: &dyn TransactionListener) {
        match self {
            WalletNotification::Transaction(tx) => listener.on_transaction(tx),
            WalletNotification::TransactionConfirmed {
                hash,
                height,
            } => listener.on_transaction_confirmed(hash, *height),
            WalletNotification::BlockAttached {
                height,
                timestamp,
            } => listener.on_block_attached(*height, *timestamp),
        }
    }
}

/// Identifies a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

type Listeners = Vec<(ListenerId, Arc<dyn TransactionListener>)>;

/// Registry and fan-out point for [`TransactionListener`]s.
pub struct NotificationHub {
    listeners: RwLock<Listeners>,
    error_sink: RwLock<Option<Arc<dyn BlockNotificationError>>>,
    next_id: AtomicU64,
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NotificationHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationHub").field("listeners", &self.listener_count()).finish()
    }
}

impl NotificationHub {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            error_sink: RwLock::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a listener. It receives events from the next dispatch on.
    pub fn register(&self, listener: Arc<dyn TransactionListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().unwrap_or_else(|e| e.into_inner()).push((id, listener));
        tracing::debug!("Registered transaction listener {}", id);
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        before != listeners.len()
    }

    /// Route isolated listener failures to `sink`.
    pub fn set_error_sink(&self, sink: Arc<dyn BlockNotificationError>) {
        *self.error_sink.write().unwrap_or_else(|e| e.into_inner()) = Some(sink);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn on_transaction(&self, transaction: Transaction) -> usize {
        self.notify(&WalletNotification::Transaction(transaction))
    }

    pub fn on_transaction_confirmed(&self, hash: impl Into<String>, height: i32) -> usize {
        self.notify(&WalletNotification::TransactionConfirmed {
            hash: hash.into(),
            height,
        })
    }

    pub fn on_block_attached(&self, height: i32, timestamp: i64) -> usize {
        self.notify(&WalletNotification::BlockAttached {
            height,
            timestamp,
        })
    }

    /// Deliver `event` to every listener. Returns how many handled it
    /// without panicking.
    pub fn notify(&self, event: &WalletNotification) -> usize {
        // Snapshot so listeners may (un)register from inside a callback
        let listeners: Listeners =
            self.listeners.read().unwrap_or_else(|e| e.into_inner()).iter().cloned().collect();

        let mut delivered = 0;
        for (id, listener) in &listeners {
            match call_isolated(|| event.dispatch(listener.as_ref())) {
                Ok(()) => delivered += 1,
                Err(message) => {
                    tracing::error!(
                        "Transaction listener {} panicked handling {}: {}",
                        id,
                        event.name(),
                        message
                    );
                    self.report(NotificationError::ListenerPanicked {
                        listener: id.as_u64(),
                        event: event.name(),
                        message,
                    });
                }
            }
        }
        delivered
    }

    fn report(&self, err: NotificationError) {
        let sink = self.error_sink.read().unwrap_or_else(|e| e.into_inner()).clone();
        if let Some(sink) = sink {
            if let Err(message) = call_isolated(|| sink.on_block_notification_error(&err)) {
                tracing::error!("Block notification error sink panicked: {}", message);
            }
        }
    }
}

/// Run an observer callback, turning a panic into an error message.
pub(crate) fn call_isolated<R>(f: impl FnOnce() -> R) -> Result<R, String> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| panic_message(payload.as_ref()))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
