//! Audit collaborator interface and the per-instance result sink

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use gs_core::element::ElementId;
use gs_core::issue::{Issue, IssueSummary};
use gs_core::page::Page;
use gs_core::Result;

/// What one instance is allowed to audit after workload distribution.
#[derive(Debug, Default, Clone)]
pub struct AuditScope {
    /// URLs this instance audits. Empty means unrestricted.
    pub restrict_paths: Vec<String>,
    /// Element ids this instance audits. Empty means unrestricted.
    pub restrict_elements: BTreeSet<ElementId>,
    /// Plugin-discovered pages assigned to this instance.
    pub pages: Vec<Page>,
}

impl AuditScope {
    /// True when an element falls inside this instance's share.
    pub fn covers_element(&self, id: &ElementId) -> bool {
        self.restrict_elements.is_empty() || self.restrict_elements.contains(id)
    }

    pub fn covers_url(&self, url: &str) -> bool {
        self.restrict_paths.is_empty() || self.restrict_paths.iter().any(|p| url.starts_with(p))
    }
}

/// The audit modules subsystem, reached through a trait so the grid layer
/// never depends on module internals.
#[async_trait]
pub trait AuditEngine: Send + Sync {
    fn modules(&self) -> Vec<String>;

    /// Run every module over the scope, registering findings with the sink.
    async fn audit(&self, scope: AuditScope, sink: Arc<ResultSink>) -> Result<()>;
}

type IssueListener = Box<dyn Fn(&[Issue]) + Send + Sync>;

/// Per-instance issue store.
///
/// Modules register findings here instead of mutating any global state; on
/// a slave, a listener forwards each registered batch upstream.
pub struct ResultSink {
    issues: RwLock<Vec<Issue>>,
    listener: std::sync::RwLock<Option<IssueListener>>,
}

impl ResultSink {
    pub fn new() -> Self {
        Self {
            issues: RwLock::new(Vec::new()),
            listener: std::sync::RwLock::new(None),
        }
    }

    /// Install the registration listener. Replaces any previous one.
    pub fn set_listener<F>(&self, listener: F)
    where
        F: Fn(&[Issue]) + Send + Sync + 'static,
    {
        *self.listener.write().unwrap() = Some(Box::new(listener));
    }

    /// Store findings, skipping ones whose `unique_id` is already present.
    pub async fn register(&self, batch: Vec<Issue>) {
        if batch.is_empty() {
            return;
        }
        if let Some(listener) = self.listener.read().unwrap().as_ref() {
            listener(&batch);
        }
        let mut issues = self.issues.write().await;
        for issue in batch {
            if !issues.iter().any(|i| i.unique_id == issue.unique_id) {
                issues.push(issue);
            }
        }
    }

    pub async fn issues(&self) -> Vec<Issue> {
        self.issues.read().await.clone()
    }

    pub async fn summaries(&self) -> Vec<IssueSummary> {
        self.issues.read().await.iter().map(Issue::summary).collect()
    }

    pub async fn len(&self) -> usize {
        self.issues.read().await.len()
    }

    /// Non-blocking length probe, for poll loops.
    pub fn try_len(&self) -> Option<usize> {
        self.issues.try_read().map(|issues| issues.len()).ok()
    }

    pub async fn is_empty(&self) -> bool {
        self.issues.read().await.is_empty()
    }
}

impl Default for ResultSink {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ResultSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultSink").finish_non_exhaustive()
    }
}

/// Engine with no modules. Placeholder until the embedding scanner plugs
/// its module set in.
#[derive(Default)]
pub struct InertAuditEngine;

#[async_trait]
impl AuditEngine for InertAuditEngine {
    fn modules(&self) -> Vec<String> {
        Vec::new()
    }

    async fn audit(&self, _scope: AuditScope, _sink: Arc<ResultSink>) -> Result<()> {
        Ok(())
    }
}
