//! Phase definitions for the SPV sync lifecycle

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Represents the current synchronization phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SyncPhase {
    /// No session started yet
    #[default]
    Idle,

    /// Waiting for peer connections
    ConnectingPeers,

    /// Fetching compact filters missing from the local store
    FetchingMissingFilters,

    /// Fetching block headers from peers
    FetchingHeaders,

    /// Discovering used wallet addresses
    DiscoveringAddresses,

    /// Rescanning the chain for wallet transactions
    Rescanning,

    /// Fully synchronized. Terminal.
    Synced,

    /// Ended with an error or cancellation. Terminal.
    Failed,
}

impl SyncPhase {
    /// Get a human-readable name for the phase
    pub fn name(&self) -> &'static str {
        match self {
            SyncPhase::Idle => "Idle",
            SyncPhase::ConnectingPeers => "Connecting Peers",
            SyncPhase::FetchingMissingFilters => "Fetching Missing Filters",
            SyncPhase::FetchingHeaders => "Fetching Headers",
            SyncPhase::DiscoveringAddresses => "Discovering Addresses",
            SyncPhase::Rescanning => "Rescanning",
            SyncPhase::Synced => "Synced",
            SyncPhase::Failed => "Failed",
        }
    }

    /// Check if this phase is actively syncing
    pub fn is_syncing(&self) -> bool {
        !matches!(self, SyncPhase::Idle | SyncPhase::Synced | SyncPhase::Failed)
    }

    /// No event changes a terminal phase.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncPhase::Synced | SyncPhase::Failed)
    }

    /// Position in the forward sequence. `Failed` sorts last.
    pub fn order(&self) -> u8 {
        match self {
            SyncPhase::Idle => 0,
            SyncPhase::ConnectingPeers => 1,
            SyncPhase::FetchingMissingFilters => 2,
            SyncPhase::FetchingHeaders => 3,
            SyncPhase::DiscoveringAddresses => 4,
            SyncPhase::Rescanning => 5,
            SyncPhase::Synced => 6,
            SyncPhase::Failed => 7,
        }
    }

    /// Transitions only move forward. `Failed` is reachable from every
    /// non-terminal phase, and nothing leaves a terminal phase.
    pub fn can_transition_to(&self, next: SyncPhase) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            SyncPhase::Failed => true,
            _ => next.order() > self.order(),
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Represents a phase transition in the sync process
#[derive(Debug, Clone)]
pub struct PhaseTransition {
    /// The phase we're transitioning from
    pub from_phase: SyncPhase,
    /// The phase we're transitioning to
    pub to_phase: SyncPhase,
    /// When the transition occurred
    pub timestamp: Instant,
    /// Reason for the transition
    pub reason: String,
}

impl PhaseTransition {
    pub fn new(from_phase: SyncPhase, to_phase: SyncPhase, reason: impl Into<String>) -> Self {
        Self {
            from_phase,
            to_phase,
            timestamp: Instant::now(),
            reason: reason.into(),
        }
    }
}
