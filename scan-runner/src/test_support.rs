//! In-process grid plumbing for tests: a loopback connector that wires
//! sessions to each other directly, plus scripted spider/audit doubles.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use gs_core::element::{ElementId, ElementIdMap};
use gs_core::error::Error;
use gs_core::instance::InstanceInfo;
use gs_core::issue::{Issue, IssueSummary, Severity};
use gs_core::options::ScanOptions;
use gs_core::page::Page;
use gs_core::progress::{Progress, ProgressOptions};
use gs_core::Result;

use crate::audit::{AuditEngine, AuditScope, ResultSink};
use crate::client::{InstanceRpc, RpcConnector};
use crate::dispatcher::HttpDispatcherConnector;
use crate::report::ReporterSet;
use crate::session::{ScanSession, SessionCollaborators};
use crate::spider::{Spider, SpiderEvent};

/// Routes peer calls straight into the target session, no HTTP involved.
/// A URL marked dead answers every call with a transport error.
#[derive(Default)]
pub struct LoopbackConnector {
    sessions: RwLock<HashMap<String, Arc<ScanSession>>>,
    dead: RwLock<HashMap<String, Arc<AtomicBool>>>,
}

impl LoopbackConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, url: &str, session: Arc<ScanSession>) {
        self.sessions
            .write()
            .unwrap()
            .insert(url.to_string(), session);
        self.dead
            .write()
            .unwrap()
            .insert(url.to_string(), Arc::new(AtomicBool::new(false)));
    }

    pub fn kill(&self, url: &str) {
        if let Some(flag) = self.dead.read().unwrap().get(url) {
            flag.store(true, Ordering::SeqCst);
        }
    }
}

impl RpcConnector for LoopbackConnector {
    fn connect(&self, url: &str) -> Arc<dyn InstanceRpc> {
        let session = self.sessions.read().unwrap().get(url).cloned();
        let dead = self
            .dead
            .read()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_else(|| Arc::new(AtomicBool::new(false)));
        Arc::new(LoopbackPeer {
            url: url.to_string(),
            session,
            dead,
        })
    }
}

struct LoopbackPeer {
    url: String,
    session: Option<Arc<ScanSession>>,
    dead: Arc<AtomicBool>,
}

impl LoopbackPeer {
    fn target(&self) -> Result<&Arc<ScanSession>> {
        if self.dead.load(Ordering::SeqCst) {
            return Err(Error::rpc_transport(format!("{} unreachable", self.url)));
        }
        self.session
            .as_ref()
            .ok_or_else(|| Error::rpc_transport(format!("{} unknown", self.url)))
    }
}

#[async_trait]
impl InstanceRpc for LoopbackPeer {
    async fn set_options(&self, options: ScanOptions) -> Result<bool> {
        self.target()?.set_options(options).await
    }

    async fn set_master(&self, url: String, token: String) -> Result<bool> {
        self.target()?.set_master(url, token).await
    }

    async fn restrict_paths(&self, paths: Vec<String>) -> Result<bool> {
        self.target()?.restrict_paths(paths).await
    }

    async fn restrict_to_elements(&self, elements: Vec<ElementId>, token: String) -> Result<bool> {
        self.target()?.restrict_to_elements(elements, &token).await
    }

    async fn update_page_queue(&self, pages: Vec<Page>, token: String) -> Result<bool> {
        self.target()?.update_page_queue(pages, &token).await
    }

    async fn update_element_ids_per_page(
        &self,
        map: ElementIdMap,
        token: String,
        done_peer_url: Option<String>,
    ) -> Result<bool> {
        self.target()?
            .update_element_ids_per_page(map, &token, done_peer_url)
            .await
    }

    async fn run(&self) -> Result<bool> {
        self.target()?.run().await
    }

    async fn pause(&self) -> Result<bool> {
        self.target()?.pause().await
    }

    async fn resume(&self) -> Result<bool> {
        self.target()?.resume().await
    }

    async fn clean_up(&self) -> Result<bool> {
        self.target()?.clean_up().await
    }

    async fn busy(&self) -> Result<bool> {
        Ok(self.target()?.busy())
    }

    async fn progress(&self, options: ProgressOptions) -> Result<Progress> {
        self.target()?.progress(options).await
    }

    async fn slave_done(&self, url: String, token: String) -> Result<bool> {
        self.target()?.slave_done(url, &token).await
    }

    async fn register_issues(&self, issues: Vec<Issue>, token: String) -> Result<bool> {
        self.target()?.register_issues(issues, &token).await
    }

    async fn register_issue_summaries(
        &self,
        issues: Vec<IssueSummary>,
        token: String,
    ) -> Result<bool> {
        self.target()?.register_issue_summaries(issues, &token).await
    }

    async fn plugin_results(&self) -> Result<HashMap<String, serde_json::Value>> {
        Ok(self.target()?.plugin_results().await)
    }
}

/// Spider double that emits a fixed page list (honoring path restrictions)
/// and completes.
pub struct ScriptedSpider {
    pages: Vec<Page>,
}

impl ScriptedSpider {
    pub fn new(pages: Vec<Page>) -> Self {
        Self { pages }
    }
}

#[async_trait]
impl Spider for ScriptedSpider {
    async fn start(
        &self,
        restrict_paths: Vec<String>,
        events: mpsc::Sender<SpiderEvent>,
    ) -> Result<()> {
        let pages: Vec<Page> = self
            .pages
            .iter()
            .filter(|page| {
                restrict_paths.is_empty()
                    || restrict_paths.iter().any(|p| page.url.starts_with(p.as_str()))
            })
            .cloned()
            .collect();
        tokio::spawn(async move {
            for page in pages {
                let _ = events.send(SpiderEvent::Page(page)).await;
            }
            let _ = events.send(SpiderEvent::RunComplete).await;
            let _ = events.send(SpiderEvent::CrawlComplete).await;
        });
        Ok(())
    }

    async fn update_peers(&self, _peers: Vec<InstanceInfo>) -> Result<()> {
        Ok(())
    }

    async fn peer_done(&self, _url: String) -> Result<()> {
        Ok(())
    }
}

/// Audit double: one issue per element in scope, and a shared log of which
/// instance audited which element so tests can assert disjointness.
pub struct RecordingAuditEngine {
    label: String,
    audited: Arc<Mutex<Vec<(String, ElementId)>>>,
}

impl RecordingAuditEngine {
    pub fn new(label: &str, audited: Arc<Mutex<Vec<(String, ElementId)>>>) -> Self {
        Self {
            label: label.to_string(),
            audited,
        }
    }
}

#[async_trait]
impl AuditEngine for RecordingAuditEngine {
    fn modules(&self) -> Vec<String> {
        vec!["taint".to_string()]
    }

    async fn audit(&self, scope: AuditScope, sink: Arc<ResultSink>) -> Result<()> {
        let mut issues = Vec::new();
        for id in &scope.restrict_elements {
            self.audited
                .lock()
                .unwrap()
                .push((self.label.clone(), id.clone()));
            issues.push(Issue::new(
                "taint",
                "Tainted input",
                format!("http://target/{}", id),
                id.as_str(),
                Severity::Medium,
            ));
        }
        sink.register(issues).await;
        Ok(())
    }
}

pub fn collaborators(
    connector: Arc<LoopbackConnector>,
    spider: Arc<dyn Spider>,
    audit: Arc<dyn AuditEngine>,
) -> SessionCollaborators {
    SessionCollaborators {
        connector,
        dispatchers: Arc::new(HttpDispatcherConnector),
        spider,
        audit,
        reporters: ReporterSet::new(),
    }
}

pub fn options_for(url: &str, port: u16) -> ScanOptions {
    ScanOptions {
        rpc_address: url.to_string(),
        rpc_port: port,
        url: "http://target".to_string(),
        ..Default::default()
    }
}

/// Poll until `probe` yields true or the timeout expires.
pub async fn wait_until<F>(mut probe: F, timeout: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if probe() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
