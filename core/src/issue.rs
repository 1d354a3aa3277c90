//! Issue model, buffering and summary deduplication

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// How many issues the buffer holds before an automatic flush.
pub const BUFFER_SIZE: usize = 100;
/// How many pushes may arrive without reaching `BUFFER_SIZE` before the
/// buffer flushes anyway.
pub const BUFFER_FILLUP_ATTEMPTS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Informational,
    Low,
    Medium,
    High,
}

/// One observed instance of an issue: the request that triggered it and
/// what came back. Stripped from summaries to keep live traffic small.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueVariation {
    pub injected: String,
    pub proof: Option<String>,
    pub response_body: Option<String>,
}

/// A finding produced by an audit module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub id: Uuid,
    /// Stable digest of (check, url, element); identical findings from
    /// different instances deduplicate on this.
    pub unique_id: String,
    pub check: String,
    pub name: String,
    pub url: String,
    pub element: String,
    pub severity: Severity,
    pub remarks: Vec<String>,
    #[serde(default)]
    pub variations: Vec<IssueVariation>,
}

impl Issue {
    pub fn new(
        check: impl Into<String>,
        name: impl Into<String>,
        url: impl Into<String>,
        element: impl Into<String>,
        severity: Severity,
    ) -> Self {
        let check = check.into();
        let name = name.into();
        let url = url.into();
        let element = element.into();
        let unique_id = digest(&check, &url, &element);
        Self {
            id: Uuid::new_v4(),
            unique_id,
            check,
            name,
            url,
            element,
            severity,
            remarks: Vec::new(),
            variations: Vec::new(),
        }
    }

    pub fn with_variation(mut self, variation: IssueVariation) -> Self {
        self.variations.push(variation);
        self
    }

    /// Stripped copy suitable for live UI streaming: no variations, no
    /// response bodies.
    pub fn summary(&self) -> IssueSummary {
        IssueSummary {
            unique_id: self.unique_id.clone(),
            check: self.check.clone(),
            name: self.name.clone(),
            url: self.url.clone(),
            element: self.element.clone(),
            severity: self.severity,
        }
    }
}

fn digest(check: &str, url: &str, element: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(check.as_bytes());
    hasher.update(b"\x00");
    hasher.update(url.as_bytes());
    hasher.update(b"\x00");
    hasher.update(element.as_bytes());
    hex::encode(hasher.finalize())
}

/// A stripped issue for live reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueSummary {
    pub unique_id: String,
    pub check: String,
    pub name: String,
    pub url: String,
    pub element: String,
    pub severity: Severity,
}

/// Size/attempt-triggered auto-flushing issue buffer.
///
/// Slaves push findings here instead of calling the master per issue; a
/// flush hands the accumulated batch to the registered callback in one RPC
/// worth of data.
pub struct IssueBuffer {
    issues: Vec<Issue>,
    attempts: usize,
    on_flush: Option<Box<dyn Fn(Vec<Issue>) + Send + Sync>>,
}

impl IssueBuffer {
    pub fn new() -> Self {
        Self {
            issues: Vec::new(),
            attempts: 0,
            on_flush: None,
        }
    }

    /// Register the flush callback. Replaces any previous one.
    pub fn on_flush<F>(&mut self, callback: F)
    where
        F: Fn(Vec<Issue>) + Send + Sync + 'static,
    {
        self.on_flush = Some(Box::new(callback));
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    /// Append a batch. Flushes when the buffer reaches `BUFFER_SIZE`, or
    /// when `BUFFER_FILLUP_ATTEMPTS` pushes have arrived without reaching
    /// it and the buffer is non-empty.
    pub fn push(&mut self, issues: Vec<Issue>) {
        self.issues.extend(issues);
        self.attempts += 1;

        if self.issues.len() >= BUFFER_SIZE {
            self.flush();
        } else if self.attempts >= BUFFER_FILLUP_ATTEMPTS && !self.issues.is_empty() {
            self.flush();
        }
    }

    /// Remove and return the contents without notifying the callback.
    /// For the terminal drain, where the caller awaits delivery itself.
    pub fn take(&mut self) -> Vec<Issue> {
        self.attempts = 0;
        std::mem::take(&mut self.issues)
    }

    /// Swap out the contents, reset the attempt counter and invoke the
    /// callback with the batch. Returns the batch as well.
    pub fn flush(&mut self) -> Vec<Issue> {
        self.attempts = 0;
        let batch = std::mem::take(&mut self.issues);
        if batch.is_empty() {
            return batch;
        }
        if let Some(callback) = &self.on_flush {
            callback(batch.clone());
        }
        batch
    }
}

impl Default for IssueBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for IssueBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssueBuffer")
            .field("issues", &self.issues.len())
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

/// Summaries deduplicated by `unique_id`, ordered for stable output.
#[derive(Debug, Default, Clone)]
pub struct IssueSummarySet {
    entries: BTreeMap<String, IssueSummary>,
}

impl IssueSummarySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge summaries; the first summary seen for a unique id wins.
    pub fn merge<I>(&mut self, summaries: I)
    where
        I: IntoIterator<Item = IssueSummary>,
    {
        for summary in summaries {
            self.entries
                .entry(summary.unique_id.clone())
                .or_insert(summary);
        }
    }

    pub fn list(&self) -> Vec<IssueSummary> {
        self.entries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    fn issue(check: &str, url: &str) -> Issue {
        Issue::new(check, "Test finding", url, "input[q]", Severity::Medium)
    }

    fn batch(count: usize) -> Vec<Issue> {
        (0..count).map(|i| issue("xss", &format!("http://t/{i}"))).collect()
    }

    #[test]
    fn unique_id_is_stable_across_instances() {
        let a = issue("xss", "http://t/1");
        let b = issue("xss", "http://t/1");
        assert_ne!(a.id, b.id);
        assert_eq!(a.unique_id, b.unique_id);
    }

    #[test]
    fn summary_strips_variations() {
        let full = issue("sqli", "http://t/login").with_variation(IssueVariation {
            injected: "' OR 1=1".to_string(),
            proof: Some("syntax error".to_string()),
            response_body: Some("<html>...".to_string()),
        });
        let summary = full.summary();
        assert_eq!(summary.unique_id, full.unique_id);
        assert_eq!(summary.check, "sqli");
    }

    #[test]
    fn buffer_flushes_on_size() {
        let flushed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&flushed);

        let mut buffer = IssueBuffer::new();
        buffer.on_flush(move |issues| sink.lock().unwrap().push(issues.len()));

        buffer.push(batch(99));
        assert!(flushed.lock().unwrap().is_empty());

        buffer.push(batch(1));
        assert_eq!(*flushed.lock().unwrap(), vec![100]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn buffer_flushes_after_fillup_attempts() {
        let flushed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&flushed);

        let mut buffer = IssueBuffer::new();
        buffer.on_flush(move |issues| sink.lock().unwrap().push(issues.len()));

        for _ in 0..9 {
            buffer.push(batch(9));
        }
        assert!(flushed.lock().unwrap().is_empty());

        buffer.push(batch(9));
        assert_eq!(*flushed.lock().unwrap(), vec![90]);

        // Counter was reset: a single large batch still flushes on size.
        buffer.push(batch(100));
        assert_eq!(*flushed.lock().unwrap(), vec![90, 100]);
    }

    #[test]
    fn empty_pushes_do_not_flush() {
        let flushed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&flushed);

        let mut buffer = IssueBuffer::new();
        buffer.on_flush(move |issues| sink.lock().unwrap().push(issues.len()));

        for _ in 0..20 {
            buffer.push(Vec::new());
        }
        assert!(flushed.lock().unwrap().is_empty());
    }

    #[test]
    fn summary_set_dedupes_by_unique_id() {
        let mut set = IssueSummarySet::new();
        set.merge(vec![issue("xss", "http://t/1").summary()]);
        set.merge(vec![
            issue("xss", "http://t/1").summary(),
            issue("sqli", "http://t/2").summary(),
        ]);
        assert_eq!(set.len(), 2);
    }
}
