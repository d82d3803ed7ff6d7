//! SPV sync lifecycle: phases, per-run session state and the controller
//! that turns worker reports into ordered observer callbacks.

mod controller;
mod events;
mod phases;
mod session;

pub use controller::{SyncLifecycleController, SyncStart};
pub use events::{SpvSyncResponse, SyncNotification};
pub use phases::{PhaseTransition, SyncPhase};
pub use session::{SyncProgress, SyncSession, TerminalError};
