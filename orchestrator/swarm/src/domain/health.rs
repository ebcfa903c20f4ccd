// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Per-peer health history and failure classification.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Samples retained per peer.
pub const HISTORY_CAPACITY: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureMode {
    /// No unhealthy sample in the window.
    Healthy,
    /// Unhealthy samples, but fewer consecutive than the degraded threshold.
    Intermittent,
    /// Exactly the degraded threshold of consecutive unhealthy samples.
    Degraded,
    /// More consecutive unhealthy samples than the degraded threshold.
    Critical,
}

/// Thresholds applied when recording and classifying samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthThresholds {
    /// A sample at or above this risk is unhealthy.
    pub unhealthy_risk: f64,
    /// Risk strictly below this counts toward recovery.
    pub recovery_risk: f64,
    pub degraded_consecutive: u32,
}

/// Fixed-capacity ring of risk samples for one peer.
#[derive(Debug, Clone)]
pub struct HealthHistory {
    samples: [f64; HISTORY_CAPACITY],
    head: usize,
    len: usize,
    /// Consecutive samples whose health fell below threshold (risk at or
    /// above the unhealthy threshold). Reset by any healthy sample.
    consecutive_below_threshold: u32,
    first_unhealthy_at: Option<DateTime<Utc>>,
    recovering_since: Option<DateTime<Utc>>,
    thresholds: HealthThresholds,
}

impl HealthHistory {
    pub fn new(thresholds: HealthThresholds) -> Self {
        Self {
            samples: [0.0; HISTORY_CAPACITY],
            head: 0,
            len: 0,
            consecutive_below_threshold: 0,
            first_unhealthy_at: None,
            recovering_since: None,
            thresholds,
        }
    }

    pub fn record(&mut self, risk_score: f64, at: DateTime<Utc>) {
        self.samples[self.head] = risk_score;
        self.head = (self.head + 1) % HISTORY_CAPACITY;
        self.len = (self.len + 1).min(HISTORY_CAPACITY);

        if risk_score >= self.thresholds.unhealthy_risk {
            if self.consecutive_below_threshold == 0 {
                self.first_unhealthy_at = Some(at);
            }
            self.consecutive_below_threshold += 1;
        } else {
            self.consecutive_below_threshold = 0;
            self.first_unhealthy_at = None;
        }

        if risk_score < self.thresholds.recovery_risk {
            self.recovering_since.get_or_insert(at);
        } else {
            self.recovering_since = None;
        }
    }

    pub fn consecutive_below_threshold(&self) -> u32 {
        self.consecutive_below_threshold
    }

    /// Start of the current unhealthy streak.
    pub fn first_unhealthy_at(&self) -> Option<DateTime<Utc>> {
        self.first_unhealthy_at
    }

    /// How long risk has stayed under the recovery threshold, as of `now`.
    pub fn recovered_for(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.recovering_since.map(|since| now - since)
    }

    pub fn latest(&self) -> Option<f64> {
        if self.len == 0 {
            None
        } else {
            Some(self.samples[(self.head + HISTORY_CAPACITY - 1) % HISTORY_CAPACITY])
        }
    }

    /// Retained samples, oldest first.
    pub fn samples(&self) -> Vec<f64> {
        let start = (self.head + HISTORY_CAPACITY - self.len) % HISTORY_CAPACITY;
        (0..self.len)
            .map(|i| self.samples[(start + i) % HISTORY_CAPACITY])
            .collect()
    }

    pub fn classify(&self) -> FailureMode {
        let degraded = self.thresholds.degraded_consecutive;
        let consecutive = self.consecutive_below_threshold;
        if consecutive > degraded {
            FailureMode::Critical
        } else if consecutive == degraded {
            FailureMode::Degraded
        } else if self
            .samples()
            .iter()
            .any(|risk| *risk >= self.thresholds.unhealthy_risk)
        {
            FailureMode::Intermittent
        } else {
            FailureMode::Healthy
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history() -> HealthHistory {
        HealthHistory::new(HealthThresholds {
            unhealthy_risk: 0.3,
            recovery_risk: 0.2,
            degraded_consecutive: 3,
        })
    }

    #[test]
    fn test_ring_keeps_latest_six() {
        let mut h = history();
        let t = Utc::now();
        for i in 0..8 {
            h.record(i as f64 / 100.0, t);
        }
        assert_eq!(h.samples(), vec![0.02, 0.03, 0.04, 0.05, 0.06, 0.07]);
        assert_eq!(h.latest(), Some(0.07));
    }

    #[test]
    fn test_classification_progression() {
        let mut h = history();
        let t = Utc::now();
        h.record(0.1, t);
        assert_eq!(h.classify(), FailureMode::Healthy);
        h.record(0.5, t);
        assert_eq!(h.classify(), FailureMode::Intermittent);
        h.record(0.5, t);
        assert_eq!(h.classify(), FailureMode::Intermittent);
        h.record(0.5, t);
        assert_eq!(h.classify(), FailureMode::Degraded);
        h.record(0.5, t);
        assert_eq!(h.classify(), FailureMode::Critical);
    }

    #[test]
    fn test_healthy_sample_resets_streak() {
        let mut h = history();
        let t = Utc::now();
        h.record(0.4, t);
        h.record(0.4, t);
        h.record(0.1, t);
        h.record(0.4, t);
        assert_eq!(h.consecutive_below_threshold(), 1);
        assert_eq!(h.classify(), FailureMode::Intermittent);
    }

    #[test]
    fn test_recovery_window_tracking() {
        let mut h = history();
        let t0 = Utc::now();
        h.record(0.1, t0);
        h.record(0.15, t0 + Duration::seconds(30));
        assert_eq!(h.recovered_for(t0 + Duration::seconds(90)), Some(Duration::seconds(90)));
        h.record(0.25, t0 + Duration::seconds(60));
        assert_eq!(h.recovered_for(t0 + Duration::seconds(90)), None);
    }

    #[test]
    fn test_first_unhealthy_sample_time() {
        let mut h = history();
        let t0 = Utc::now();
        h.record(0.5, t0);
        h.record(0.5, t0 + Duration::seconds(30));
        assert_eq!(h.first_unhealthy_at(), Some(t0));
        h.record(0.0, t0 + Duration::seconds(60));
        assert_eq!(h.first_unhealthy_at(), None);
    }
}
