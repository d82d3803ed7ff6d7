//! Per-run sync state and progress composition.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::phases::{PhaseTransition, SyncPhase};
use crate::error::{SyncError, SyncErrorCode, SyncResult};
use crate::progress::{
    calculate_days_behind_at, calculate_total_time_remaining, estimate_final_block_height_at,
    TimeEstimate, DISCOVERY_PERCENTAGE, RESCAN_PERCENTAGE,
};

/// Error recorded when a session fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalError {
    pub code: SyncErrorCode,
    pub error: SyncError,
}

/// Snapshot of a session for callers polling progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncProgress {
    pub session_id: u64,
    pub phase: SyncPhase,
    pub peer_count: i32,
    pub fetched_filter_count: i32,
    pub fetched_header_count: i32,
    pub current_header_height: i32,
    pub discovery_finished: bool,
    pub rescan_through_height: i32,
    /// Overall progress, 0 to 100. Never decreases within a session.
    pub total_progress: u8,
    /// None until the header fetch rate is known.
    pub estimate: Option<TimeEstimate>,
}

/// State of one sync run.
///
/// A fresh session is created for every run. Counters that must not go
/// backwards are guarded here; the controller decides what to emit from the
/// return values.
#[derive(Debug)]
pub struct SyncSession {
    id: u64,
    phase: SyncPhase,
    started_at: Instant,
    finished_at: Option<Instant>,

    peer_count: i32,
    fetched_filter_count: i32,

    headers_started_at: Option<Instant>,
    headers_start_height: i32,
    peer_initial_height: i32,
    fetched_header_count: i32,
    last_header_timestamp: i64,

    discovery_started_at: Option<Instant>,
    discovery_finished: bool,

    rescan_started_at: Option<Instant>,
    rescan_through_height: i32,

    terminal_error: Option<TerminalError>,
    phase_history: Vec<PhaseTransition>,
    best_progress: u8,
}

impl SyncSession {
    /// Create a session in [`SyncPhase::Idle`].
    pub fn new(id: u64, at: Instant) -> Self {
        Self {
            id,
            phase: SyncPhase::Idle,
            started_at: at,
            finished_at: None,
            peer_count: 0,
            fetched_filter_count: 0,
            headers_started_at: None,
            headers_start_height: 0,
            peer_initial_height: 0,
            fetched_header_count: 0,
            last_header_timestamp: 0,
            discovery_started_at: None,
            discovery_finished: false,
            rescan_started_at: None,
            rescan_through_height: 0,
            terminal_error: None,
            phase_history: Vec::new(),
            best_progress: 0,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn peer_count(&self) -> i32 {
        self.peer_count
    }

    pub fn fetched_filter_count(&self) -> i32 {
        self.fetched_filter_count
    }

    pub fn fetched_header_count(&self) -> i32 {
        self.fetched_header_count
    }

    pub fn last_header_timestamp(&self) -> i64 {
        self.last_header_timestamp
    }

    pub fn discovery_finished(&self) -> bool {
        self.discovery_finished
    }

    pub fn rescan_through_height(&self) -> i32 {
        self.rescan_through_height
    }

    pub fn terminal_error(&self) -> Option<&TerminalError> {
        self.terminal_error.as_ref()
    }

    pub fn phase_history(&self) -> &[PhaseTransition] {
        &self.phase_history
    }

    /// Whether the session still accepts events.
    pub fn is_active(&self) -> bool {
        !self.phase.is_terminal()
    }

    /// Height the header chain has reached so far.
    pub fn current_header_height(&self) -> i32 {
        self.headers_start_height.saturating_add(self.fetched_header_count)
    }

    /// Move from `Idle` to `ConnectingPeers`.
    pub fn begin(&mut self, at: Instant) -> SyncResult<()> {
        if self.phase != SyncPhase::Idle {
            return Err(SyncError::InvalidState(format!(
                "session {} already started ({})",
                self.id, self.phase
            )));
        }
        self.transition(SyncPhase::ConnectingPeers, "session started", at)
    }

    /// Record the current peer count. Negative counts are clamped to zero.
    pub fn set_peer_count(&mut self, peer_count: i32) -> SyncResult<i32> {
        self.ensure_active()?;
        self.peer_count = peer_count.max(0);
        Ok(self.peer_count)
    }

    /// Returns false when `count` regresses and must not be emitted.
    pub fn record_missing_cfilters(&mut self, count: i32, at: Instant) -> SyncResult<bool> {
        self.enter(SyncPhase::FetchingMissingFilters, "fetching missing cfilters", at)?;
        if count < self.fetched_filter_count {
            tracing::debug!(
                "Ignoring regressing cfilter count {} (have {})",
                count,
                self.fetched_filter_count
            );
            return Ok(false);
        }
        self.fetched_filter_count = count;
        Ok(true)
    }

    /// Enter `FetchingHeaders` with the local chain at `start_height`.
    pub fn begin_headers_fetch(&mut self, start_height: i32, at: Instant) -> SyncResult<()> {
        self.enter(SyncPhase::FetchingHeaders, "fetching headers", at)?;
        self.headers_start_height = start_height;
        Ok(())
    }

    /// Record cumulative header progress. Always emitted; the stored count
    /// only moves forward.
    pub fn record_headers(
        &mut self,
        peer_initial_height: i32,
        fetched_count: i32,
        last_header_time: i64,
        at: Instant,
    ) -> SyncResult<()> {
        self.enter(SyncPhase::FetchingHeaders, "fetching headers", at)?;
        self.peer_initial_height = self.peer_initial_height.max(peer_initial_height);
        if fetched_count >= self.fetched_header_count {
            self.fetched_header_count = fetched_count;
            self.last_header_timestamp = self.last_header_timestamp.max(last_header_time);
        }
        Ok(())
    }

    /// Returns false once discovery has already finished.
    pub fn record_discovery(&mut self, finished: bool, at: Instant) -> SyncResult<bool> {
        self.enter(SyncPhase::DiscoveringAddresses, "discovering addresses", at)?;
        if self.discovery_finished {
            tracing::debug!("Ignoring address discovery update after discovery finished");
            return Ok(false);
        }
        self.discovery_finished = finished;
        Ok(true)
    }

    /// Returns false when `through` regresses and must not be emitted.
    pub fn record_rescan(&mut self, through: i32, at: Instant) -> SyncResult<bool> {
        self.enter(SyncPhase::Rescanning, "rescanning", at)?;
        if through < self.rescan_through_height {
            tracing::debug!(
                "Ignoring regressing rescan height {} (have {})",
                through,
                self.rescan_through_height
            );
            return Ok(false);
        }
        self.rescan_through_height = through;
        Ok(true)
    }

    pub fn finish_synced(&mut self, at: Instant) -> SyncResult<()> {
        self.ensure_active()?;
        self.transition(SyncPhase::Synced, "synced", at)
    }

    /// Move to `Failed` and record `error`.
    pub fn fail(&mut self, error: SyncError, at: Instant) -> SyncResult<TerminalError> {
        self.ensure_active()?;
        self.transition(SyncPhase::Failed, error.to_string(), at)?;
        let terminal = TerminalError {
            code: error.code(),
            error,
        };
        self.terminal_error = Some(terminal.clone());
        Ok(terminal)
    }

    /// Snapshot with a time estimate.
    ///
    /// The estimate extrapolates total header fetch time from the fraction
    /// fetched so far, then adds discovery and rescan shares of that total.
    /// The reported percentage is clamped so it never decreases.
    pub fn progress_at(&mut self, network: &str, now: Instant, now_unix: i64) -> SyncProgress {
        let current_header_height = self.current_header_height();
        let mut estimate = self.estimate(network, now, now_unix, current_header_height);

        let raw = match self.phase {
            SyncPhase::Synced => 100,
            _ => estimate.as_ref().map_or(0, |e| e.total_progress),
        };
        let total_progress = raw.max(self.best_progress);
        self.best_progress = total_progress;
        if let Some(estimate) = estimate.as_mut() {
            estimate.total_progress = total_progress;
            if self.phase == SyncPhase::Synced {
                estimate.seconds_remaining = 0;
                estimate.time_remaining = calculate_total_time_remaining(0);
            }
        }

        SyncProgress {
            session_id: self.id,
            phase: self.phase,
            peer_count: self.peer_count,
            fetched_filter_count: self.fetched_filter_count,
            fetched_header_count: self.fetched_header_count,
            current_header_height,
            discovery_finished: self.discovery_finished,
            rescan_through_height: self.rescan_through_height,
            total_progress,
            estimate,
        }
    }

    fn estimate(
        &self,
        network: &str,
        now: Instant,
        now_unix: i64,
        current_header_height: i32,
    ) -> Option<TimeEstimate> {
        let headers_started = self.headers_started_at?;
        let end = self.finished_at.unwrap_or(now);

        let headers_end = self.discovery_started_at.or(self.rescan_started_at).unwrap_or(end);
        let headers_spent = seconds_between(headers_started, headers_end);

        let projected = estimate_final_block_height_at(
            now_unix,
            network,
            self.last_header_timestamp,
            current_header_height,
        )
        .max(self.peer_initial_height);

        let fraction = if self.phase.order() > SyncPhase::FetchingHeaders.order() {
            1.0
        } else {
            let to_fetch = i64::from(projected) - i64::from(self.headers_start_height);
            if to_fetch <= 0 {
                1.0
            } else {
                (f64::from(self.fetched_header_count) / to_fetch as f64).clamp(0.0, 1.0)
            }
        };
        if fraction <= 0.0 || headers_spent <= 0.0 {
            return None;
        }

        let estimated_headers_time = headers_spent / fraction;
        let estimated_discovery_time = estimated_headers_time * DISCOVERY_PERCENTAGE;
        let estimated_rescan_time = estimated_headers_time * RESCAN_PERCENTAGE;
        let estimated_total_time =
            estimated_headers_time + estimated_discovery_time + estimated_rescan_time;

        let discovery_spent = self
            .discovery_started_at
            .map_or(0.0, |start| seconds_between(start, self.rescan_started_at.unwrap_or(end)));
        let rescan_spent = self.rescan_started_at.map_or(0.0, |start| seconds_between(start, end));
        let spent = headers_spent + discovery_spent + rescan_spent;

        let seconds_remaining = (estimated_total_time - spent).max(0.0).round() as i64;
        let total_progress = ((spent / estimated_total_time) * 100.0).clamp(0.0, 99.0) as u8;

        Some(TimeEstimate {
            seconds_remaining,
            time_remaining: calculate_total_time_remaining(seconds_remaining),
            days_behind: calculate_days_behind_at(now_unix, self.last_header_timestamp),
            projected_final_height: projected,
            total_progress,
        })
    }

    fn ensure_active(&self) -> SyncResult<()> {
        if self.phase.is_terminal() {
            return Err(SyncError::InvalidState(format!(
                "session {} already finished ({})",
                self.id, self.phase
            )));
        }
        Ok(())
    }

    /// Auto-advance to `phase` for a phase event. Earlier phases are rejected.
    fn enter(&mut self, phase: SyncPhase, reason: &str, at: Instant) -> SyncResult<()> {
        self.ensure_active()?;
        if self.phase == phase {
            return Ok(());
        }
        if phase.order() < self.phase.order() {
            return Err(SyncError::InvalidState(format!(
                "{} event received during {}",
                phase, self.phase
            )));
        }
        self.transition(phase, reason, at)
    }

    fn transition(
        &mut self,
        next: SyncPhase,
        reason: impl Into<String>,
        at: Instant,
    ) -> SyncResult<()> {
        if !self.phase.can_transition_to(next) {
            return Err(SyncError::InvalidState(format!(
                "cannot move from {} to {}",
                self.phase, next
            )));
        }

        match next {
            SyncPhase::FetchingHeaders => self.headers_started_at = Some(at),
            SyncPhase::DiscoveringAddresses => self.discovery_started_at = Some(at),
            SyncPhase::Rescanning => self.rescan_started_at = Some(at),
            SyncPhase::Synced | SyncPhase::Failed => self.finished_at = Some(at),
            _ => {}
        }

        let reason = reason.into();
        tracing::info!(
            "Sync session {} phase: {} -> {} ({})",
            self.id,
            self.phase.name(),
            next.name(),
            reason
        );
        self.phase_history.push(PhaseTransition {
            from_phase: self.phase,
            to_phase: next,
            timestamp: at,
            reason,
        });
        self.phase = next;
        Ok(())
    }
}

fn seconds_between(start: Instant, end: Instant) -> f64 {
    end.saturating_duration_since(start).as_secs_f64()
}
