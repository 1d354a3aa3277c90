//! Scan statistics and their cross-instance merge

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counters and timestamps one instance reports about its own scan.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStats {
    pub requests: u64,
    pub responses: u64,
    pub timed_out: u64,
    pub pages_crawled: u64,
    pub elements_audited: u64,
    pub issues_found: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
}

impl ScanStats {
    /// Element-wise merge: numeric fields sum, timestamps take the max of
    /// `last_activity` while `started_at` keeps the earliest known value.
    pub fn merge(&mut self, other: &ScanStats) {
        self.requests += other.requests;
        self.responses += other.responses;
        self.timed_out += other.timed_out;
        self.pages_crawled += other.pages_crawled;
        self.elements_audited += other.elements_audited;
        self.issues_found += other.issues_found;
        self.started_at = match (self.started_at, other.started_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.last_activity = match (self.last_activity, other.last_activity) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }

    pub fn touch(&mut self) {
        self.last_activity = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn merge_sums_counters_and_maxes_activity() {
        let early = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();

        let mut local = ScanStats {
            requests: 10,
            responses: 9,
            pages_crawled: 3,
            issues_found: 1,
            started_at: Some(late),
            last_activity: Some(early),
            ..Default::default()
        };
        let remote = ScanStats {
            requests: 5,
            responses: 5,
            pages_crawled: 2,
            issues_found: 2,
            started_at: Some(early),
            last_activity: Some(late),
            ..Default::default()
        };

        local.merge(&remote);
        assert_eq!(local.requests, 15);
        assert_eq!(local.responses, 14);
        assert_eq!(local.pages_crawled, 5);
        assert_eq!(local.issues_found, 3);
        assert_eq!(local.started_at, Some(early));
        assert_eq!(local.last_activity, Some(late));
    }

    #[test]
    fn merge_handles_missing_timestamps() {
        let mut local = ScanStats::default();
        let stamp = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        local.merge(&ScanStats {
            last_activity: Some(stamp),
            ..Default::default()
        });
        assert_eq!(local.last_activity, Some(stamp));
    }
}
