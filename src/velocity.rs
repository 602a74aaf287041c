//! Per-user transaction rate monitoring
//!
//! Sits beside the scoring pipeline, not inside it: a velocity alert is
//! reported alongside the verdict and never changes it.

use crate::config::VelocityConfig;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Rate observed for one user when a transaction was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VelocityReport {
    /// Transactions in the window, including the one just recorded
    pub tx_in_window: usize,
    /// Window length in seconds
    pub window_secs: u64,
    /// True when `tx_in_window` exceeds the configured threshold
    pub alert: bool,
}

/// Sliding-window counter keyed by sender account.
pub struct VelocityTracker {
    window: Duration,
    window_secs: u64,
    alert_threshold: usize,
    history: Mutex<History>,
}

#[derive(Default)]
struct History {
    users: HashMap<String, VecDeque<DateTime<Utc>>>,
    last_sweep: Option<DateTime<Utc>>,
}

impl History {
    /// Drop every user whose newest transaction has left the window.
    /// Runs at most once per window length.
    fn sweep(&mut self, now: DateTime<Utc>, window: Duration) {
        if self.last_sweep.map_or(false, |last| now - last < window) {
            return;
        }
        let before = self.users.len();
        self.users
            .retain(|_, timestamps| timestamps.back().map_or(false, |&t| now - t < window));
        self.last_sweep = Some(now);

        let evicted = before - self.users.len();
        if evicted > 0 {
            debug!(evicted = evicted, remaining = self.users.len(), "Velocity history swept");
        }
    }
}

impl VelocityTracker {
    pub fn new(config: &VelocityConfig) -> Self {
        Self {
            window: Duration::seconds(config.window_secs as i64),
            window_secs: config.window_secs,
            alert_threshold: config.alert_threshold,
            history: Mutex::new(History::default()),
        }
    }

    /// Record a transaction for `user` at `now` and report the rate.
    ///
    /// Timestamps older than the window are evicted on every call, so each
    /// user's history holds at most one window's worth of entries. Users with
    /// nothing left in the window are dropped by a sweep that runs once per
    /// window length.
    pub fn record(&self, user: &str, now: DateTime<Utc>) -> VelocityReport {
        let tx_in_window = match self.history.lock() {
            Ok(mut history) => {
                history.sweep(now, self.window);
                let timestamps = history.users.entry(user.to_string()).or_default();
                while let Some(&oldest) = timestamps.front() {
                    if now - oldest >= self.window {
                        timestamps.pop_front();
                    } else {
                        break;
                    }
                }
                timestamps.push_back(now);
                timestamps.len()
            }
            Err(e) => {
                warn!(user = %user, error = %e, "Velocity history poisoned; counting this transaction only");
                1
            }
        };

        let alert = tx_in_window > self.alert_threshold;
        if alert {
            warn!(
                user = %user,
                tx_in_window = tx_in_window,
                window_secs = self.window_secs,
                "Velocity alert"
            );
        } else {
            debug!(user = %user, tx_in_window = tx_in_window, "Velocity recorded");
        }

        VelocityReport {
            tx_in_window,
            window_secs: self.window_secs,
            alert,
        }
    }

    /// Number of users currently held, including any idle users the next
    /// sweep will drop.
    pub fn tracked_users(&self) -> usize {
        self.history.lock().map(|h| h.users.len()).unwrap_or(0)
    }
}

impl Default for VelocityTracker {
    fn default() -> Self {
        Self::new(&VelocityConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_third_transaction_in_a_minute_alerts() {
        let tracker = VelocityTracker::default();

        let first = tracker.record("USER_B", at(0));
        let second = tracker.record("USER_B", at(10));
        let third = tracker.record("USER_B", at(20));

        assert_eq!(first.tx_in_window, 1);
        assert!(!first.alert);
        assert_eq!(second.tx_in_window, 2);
        assert!(!second.alert);
        assert_eq!(third.tx_in_window, 3);
        assert!(third.alert);
    }

    #[test]
    fn test_old_transactions_leave_the_window() {
        let tracker = VelocityTracker::default();

        tracker.record("USER_A", at(0));
        tracker.record("USER_A", at(30));
        let report = tracker.record("USER_A", at(61));

        // the first transaction is 61s old
        assert_eq!(report.tx_in_window, 2);
        assert!(!report.alert);
    }

    #[test]
    fn test_users_are_tracked_separately() {
        let tracker = VelocityTracker::default();

        tracker.record("USER_B", at(0));
        tracker.record("USER_B", at(1));
        let other = tracker.record("USER_D", at(2));

        assert_eq!(other.tx_in_window, 1);
        assert_eq!(tracker.tracked_users(), 2);
    }

    #[test]
    fn test_idle_users_are_dropped() {
        let tracker = VelocityTracker::default();

        for i in 0..10 {
            tracker.record(&format!("C{:09}", i), at(i * 3600));
        }

        // each sweep drops the user from an hour earlier
        assert_eq!(tracker.tracked_users(), 1);
    }

    #[test]
    fn test_sweep_keeps_users_still_in_window() {
        let tracker = VelocityTracker::default();

        tracker.record("USER_A", at(0));
        tracker.record("USER_B", at(50));
        tracker.record("USER_A", at(70));
        let report = tracker.record("USER_B", at(80));

        // USER_B's first transaction is 30s old and survives the sweep at 70s
        assert_eq!(report.tx_in_window, 2);
        assert_eq!(tracker.tracked_users(), 2);
    }

    #[test]
    fn test_custom_threshold() {
        let tracker = VelocityTracker::new(&VelocityConfig {
            window_secs: 10,
            alert_threshold: 0,
        });

        let report = tracker.record("USER_A", at(0));
        assert!(report.alert);
        assert_eq!(report.window_secs, 10);
    }
}
