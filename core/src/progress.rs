//! Live-progress payloads

use serde::{Deserialize, Serialize};

use crate::issue::IssueSummary;
use crate::stats::ScanStats;

/// Scan lifecycle state as reported over the RPC surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    NotStarted,
    Preparing,
    Crawling,
    Distributing,
    Auditing,
    Paused,
    CleaningUp,
    Done,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }
}

fn default_true() -> bool {
    true
}

/// Which sections a `progress` call should include.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressOptions {
    #[serde(default = "default_true")]
    pub stats: bool,
    #[serde(default = "default_true")]
    pub messages: bool,
    #[serde(default = "default_true")]
    pub slaves: bool,
    #[serde(default = "default_true")]
    pub issues: bool,
    #[serde(default)]
    pub as_hash: bool,
}

impl Default for ProgressOptions {
    fn default() -> Self {
        Self {
            stats: true,
            messages: true,
            slaves: true,
            issues: true,
            as_hash: false,
        }
    }
}

/// Stat row for one instance in the `instances` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceProgress {
    pub url: String,
    pub status: RunStatus,
    #[serde(default)]
    pub busy: bool,
    #[serde(flatten)]
    pub stats: ScanStats,
}

/// The merged progress payload returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub status: RunStatus,
    pub busy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<ScanStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issues: Option<Vec<IssueSummary>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issues_as_hash: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instances: Option<Vec<InstanceProgress>>,
}
