//! Escalation of persistent provider failures.
//!
//! Tracks consecutive failures per provider action. When an action fails
//! `threshold` times in a row an [`Alert`] is raised and logged at `error`;
//! it stays raised until that action succeeds again.

use std::collections::BTreeMap;

use fleet_core::EpochSecs;
use fleetgrid_provider::ProviderAction;
use tracing::{error, info};

/// A raised alert for an action that keeps failing.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub action: ProviderAction,
    pub consecutive_failures: u32,
    pub last_error: String,
    pub raised_at: EpochSecs,
}

#[derive(Debug)]
pub struct FailureTracker {
    threshold: u32,
    streaks: BTreeMap<ProviderAction, u32>,
    alerts: BTreeMap<ProviderAction, Alert>,
}

impl FailureTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            streaks: BTreeMap::new(),
            alerts: BTreeMap::new(),
        }
    }

    /// Record a failed call. Returns the alert if this failure raised one.
    pub fn record_failure(
        &mut self,
        action: ProviderAction,
        err: &str,
        now: EpochSecs,
    ) -> Option<Alert> {
        let streak = self.streaks.entry(action).or_insert(0);
        *streak += 1;
        let streak = *streak;

        if let Some(alert) = self.alerts.get_mut(&action) {
            alert.consecutive_failures = streak;
            alert.last_error = err.to_string();
            return None;
        }
        if streak < self.threshold {
            return None;
        }

        let alert = Alert {
            action,
            consecutive_failures: streak,
            last_error: err.to_string(),
            raised_at: now,
        };
        error!(
            %action,
            failures = streak,
            error = %err,
            "provider action failing persistently"
        );
        self.alerts.insert(action, alert.clone());
        Some(alert)
    }

    /// Record a successful call, clearing any streak and alert.
    pub fn record_success(&mut self, action: ProviderAction) {
        self.streaks.remove(&action);
        if let Some(alert) = self.alerts.remove(&action) {
            info!(
                %action,
                failures = alert.consecutive_failures,
                "provider action recovered"
            );
        }
    }

    pub fn consecutive_failures(&self, action: ProviderAction) -> u32 {
        self.streaks.get(&action).copied().unwrap_or(0)
    }

    /// Currently raised alerts.
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_raised_at_threshold_only_once() {
        let mut tracker = FailureTracker::new(3);
        assert!(tracker.record_failure(ProviderAction::Launch, "quota", 1).is_none());
        assert!(tracker.record_failure(ProviderAction::Launch, "quota", 2).is_none());
        let alert = tracker
            .record_failure(ProviderAction::Launch, "quota", 3)
            .unwrap();
        assert_eq!(alert.consecutive_failures, 3);
        assert_eq!(alert.raised_at, 3);

        // Further failures update the alert without raising again.
        assert!(tracker.record_failure(ProviderAction::Launch, "limit", 4).is_none());
        let alerts = tracker.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].consecutive_failures, 4);
        assert_eq!(alerts[0].last_error, "limit");
    }

    #[test]
    fn success_clears_streak_and_alert() {
        let mut tracker = FailureTracker::new(1);
        assert!(tracker.record_failure(ProviderAction::Terminate, "x", 1).is_some());
        tracker.record_success(ProviderAction::Terminate);
        assert!(tracker.alerts().is_empty());
        assert_eq!(tracker.consecutive_failures(ProviderAction::Terminate), 0);
    }

    #[test]
    fn actions_tracked_independently() {
        let mut tracker = FailureTracker::new(2);
        tracker.record_failure(ProviderAction::Launch, "a", 1);
        tracker.record_failure(ProviderAction::Tag, "b", 1);
        tracker.record_success(ProviderAction::Tag);
        assert_eq!(tracker.consecutive_failures(ProviderAction::Launch), 1);
        assert_eq!(tracker.consecutive_failures(ProviderAction::Tag), 0);
    }

    #[test]
    fn zero_threshold_treated_as_one() {
        let mut tracker = FailureTracker::new(0);
        assert!(tracker.record_failure(ProviderAction::Describe, "down", 5).is_some());
    }
}
