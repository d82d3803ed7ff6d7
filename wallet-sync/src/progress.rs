//! Progress estimation primitives.
//!
//! Pure functions that turn raw timestamps and heights into the labels and
//! projections shown to users. Nothing here holds state; every function that
//! depends on the current time has an `_at` twin taking an explicit unix
//! timestamp.

use serde::{Deserialize, Serialize};

/// Approximate time (in seconds) to mine a block on mainnet.
pub const MAINNET_TARGET_TIME_PER_BLOCK: i64 = 300;

/// Approximate time (in seconds) to mine a block on every other network.
pub const TESTNET_TARGET_TIME_PER_BLOCK: i64 = 120;

/// Share of the estimated total headers fetch time used to estimate rescan time.
pub const RESCAN_PERCENTAGE: f64 = 0.1;

/// Share of the estimated total headers fetch time used to estimate address
/// discovery time.
pub const DISCOVERY_PERCENTAGE: f64 = 0.8;

/// Network label that selects the mainnet block interval.
pub const MAINNET_LABEL: &str = "mainnet";

/// Derived time estimate for a sync in progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeEstimate {
    /// Estimated seconds until the whole sync completes.
    pub seconds_remaining: i64,
    /// `seconds_remaining` rendered by [`calculate_total_time_remaining`].
    pub time_remaining: String,
    /// How far the last fetched header is behind, see [`calculate_days_behind`].
    pub days_behind: String,
    /// Projected chain tip height.
    pub projected_final_height: i32,
    /// Overall progress, 0 to 100.
    pub total_progress: u8,
}

/// Current unix time in seconds.
pub fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Target block interval for a network label.
pub fn target_time_per_block(net_type: &str) -> i64 {
    if net_type == MAINNET_LABEL {
        MAINNET_TARGET_TIME_PER_BLOCK
    } else {
        TESTNET_TARGET_TIME_PER_BLOCK
    }
}

/// Project the current chain tip from the best known block.
pub fn estimate_final_block_height(
    net_type: &str,
    best_block_timestamp: i64,
    best_block_height: i32,
) -> i32 {
    estimate_final_block_height_at(now_unix(), net_type, best_block_timestamp, best_block_height)
}

/// [`estimate_final_block_height`] against an explicit `now`.
///
/// Uses truncating division, so clock skew (a timestamp in the future) pulls
/// the projection below `best_block_height`.
pub fn estimate_final_block_height_at(
    now: i64,
    net_type: &str,
    best_block_timestamp: i64,
    best_block_height: i32,
) -> i32 {
    let elapsed = now.saturating_sub(best_block_timestamp);
    let blocks = elapsed / target_time_per_block(net_type);
    let projected = i64::from(best_block_height) + blocks;
    projected.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

/// Render remaining time in whole minutes, or whole seconds under a minute.
pub fn calculate_total_time_remaining(seconds_remaining: i64) -> String {
    let minutes = seconds_remaining / 60;
    if minutes > 0 {
        format!("{} min", minutes)
    } else {
        format!("{} sec", seconds_remaining)
    }
}

/// Describe how many days `timestamp` lies behind now.
pub fn calculate_days_behind(timestamp: i64) -> String {
    calculate_days_behind_at(now_unix(), timestamp)
}

/// [`calculate_days_behind`] against an explicit `now`.
///
/// The elapsed seconds are divided by 60 and then by 24, so one reported
/// "day" is 1440 seconds. Callers relying on calendar days must not use this.
pub fn calculate_days_behind_at(now: i64, timestamp: i64) -> String {
    let hours_behind = now.saturating_sub(timestamp) as f64 / 60.0;
    let days_behind = (hours_behind / 24.0).round() as i64;
    match days_behind {
        d if d < 1 => "<1 day".to_string(),
        1 => "1 day".to_string(),
        d => format!("{} days", d),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    #[test]
    fn test_time_remaining_boundary() {
        assert_eq!(calculate_total_time_remaining(0), "0 sec");
        assert_eq!(calculate_total_time_remaining(59), "59 sec");
        assert_eq!(calculate_total_time_remaining(60), "1 min");
        assert_eq!(calculate_total_time_remaining(119), "1 min");
        assert_eq!(calculate_total_time_remaining(3600), "60 min");
    }

    #[test]
    fn test_time_remaining_negative_stays_in_seconds() {
        assert_eq!(calculate_total_time_remaining(-30), "-30 sec");
    }

    #[test]
    fn test_days_behind_labels() {
        // One "day" is 1440 seconds under the minute-based arithmetic
        assert_eq!(calculate_days_behind_at(NOW, NOW), "<1 day");
        assert_eq!(calculate_days_behind_at(NOW, NOW - 719), "<1 day");
        assert_eq!(calculate_days_behind_at(NOW, NOW - 720), "1 day");
        assert_eq!(calculate_days_behind_at(NOW, NOW - 1440), "1 day");
        assert_eq!(calculate_days_behind_at(NOW, NOW - 2160), "2 days");
        assert_eq!(calculate_days_behind_at(NOW, NOW - 2880), "2 days");
    }

    #[test]
    fn test_days_behind_calendar_inputs() {
        // A real calendar day reads as 60 "days"
        assert_eq!(calculate_days_behind_at(NOW, NOW - 86_400), "60 days");
        assert_eq!(calculate_days_behind_at(NOW, NOW - 172_800), "120 days");
    }

    #[test]
    fn test_days_behind_future_timestamp() {
        assert_eq!(calculate_days_behind_at(NOW, NOW + 100_000), "<1 day");
    }

    #[test]
    fn test_final_height_mainnet_interval() {
        let ts = NOW - 3000;
        assert_eq!(estimate_final_block_height_at(NOW, "mainnet", ts, 100), 110);
        assert_eq!(estimate_final_block_height_at(NOW + 299, "mainnet", ts, 100), 110);
        assert_eq!(estimate_final_block_height_at(NOW + 300, "mainnet", ts, 100), 111);
    }

    #[test]
    fn test_final_height_other_networks() {
        let ts = NOW - 1200;
        assert_eq!(estimate_final_block_height_at(NOW, "testnet", ts, 0), 10);
        assert_eq!(estimate_final_block_height_at(NOW, "simnet", ts, 0), 10);
        assert_eq!(estimate_final_block_height_at(NOW, "", ts, 0), 10);
        assert_eq!(estimate_final_block_height_at(NOW + 120, "testnet", ts, 0), 11);
    }

    #[test]
    fn test_final_height_monotone_in_elapsed_time() {
        let ts = NOW;
        let mut last = i32::MIN;
        for elapsed in (0..10_000).step_by(37) {
            let h = estimate_final_block_height_at(NOW + elapsed, "mainnet", ts, 500);
            assert!(h >= last);
            assert_eq!(h, 500 + (elapsed / 300) as i32);
            last = h;
        }
    }

    #[test]
    fn test_final_height_clock_skew() {
        // Truncation toward zero: -299s is still zero blocks, -300s is minus one
        assert_eq!(estimate_final_block_height_at(NOW, "mainnet", NOW + 299, 50), 50);
        assert_eq!(estimate_final_block_height_at(NOW, "mainnet", NOW + 300, 50), 49);
    }

    #[test]
    fn test_extreme_timestamps_saturate() {
        assert_eq!(estimate_final_block_height_at(NOW, "mainnet", i64::MIN, 0), i32::MAX);
        assert_eq!(estimate_final_block_height_at(NOW, "mainnet", i64::MAX, 0), i32::MIN);
        assert_eq!(estimate_final_block_height_at(i64::MIN, "testnet", i64::MAX, 7), i32::MIN);

        assert!(calculate_days_behind_at(NOW, i64::MIN).ends_with(" days"));
        assert_eq!(calculate_days_behind_at(NOW, i64::MAX), "<1 day");
        assert_eq!(calculate_days_behind_at(i64::MIN, i64::MAX), "<1 day");
    }

    #[test]
    fn test_weighting_constants() {
        assert_eq!(RESCAN_PERCENTAGE, 0.1);
        assert_eq!(DISCOVERY_PERCENTAGE, 0.8);
    }
}
