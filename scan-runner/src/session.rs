//! Scan session: role state machine and grid surface
//!
//! A session starts solo. The first `enslave` (or an explicit
//! `set_as_master`) turns it into a master; `set_master` turns it into a
//! slave. Both transitions are terminal for the duration of the scan.
//!
//! Privileged intra-grid calls are gated by the local token on a master; a
//! slave accepts them unconditionally since its only peer is its master.
//! Guard failures are reported as `Ok(false)`, never as errors, so nothing
//! leaks across the RPC boundary.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

use gs_core::element::{ElementId, ElementIdFilter, ElementIdMap};
use gs_core::instance::{InstanceInfo, InstanceRegistry};
use gs_core::issue::{Issue, IssueBuffer, IssueSummary, IssueSummarySet};
use gs_core::options::{GridMode, ScanOptions};
use gs_core::page::{Page, PageQueue};
use gs_core::progress::RunStatus;
use gs_core::stats::ScanStats;
use gs_core::token::AuthToken;
use gs_core::Result;

use crate::audit::{AuditEngine, ResultSink};
use crate::client::RpcConnector;
use crate::dispatcher::DispatcherConnector;
use crate::plugin::PluginSet;
use crate::report::ReporterSet;
use crate::spider::Spider;

/// Build revision baked into progress and report payloads.
pub const REVISION: &str = env!("CARGO_PKG_VERSION");

/// Grid role of this instance. Exactly one variant holds at any moment.
#[derive(Debug)]
pub enum Role {
    Solo,
    Master { slaves: InstanceRegistry },
    Slave { master_url: String, master_priv_token: String },
}

impl Role {
    pub fn is_solo(&self) -> bool {
        matches!(self, Role::Solo)
    }

    pub fn is_master(&self) -> bool {
        matches!(self, Role::Master { .. })
    }

    pub fn is_slave(&self) -> bool {
        matches!(self, Role::Slave { .. })
    }
}

/// Batches a slave forwards to its master from synchronous contexts.
#[derive(Debug)]
pub(crate) enum UpstreamMessage {
    Issues(Vec<Issue>),
    Summaries(Vec<IssueSummary>),
}

/// External collaborators injected into a session.
pub struct SessionCollaborators {
    pub connector: Arc<dyn RpcConnector>,
    pub dispatchers: Arc<dyn DispatcherConnector>,
    pub spider: Arc<dyn Spider>,
    pub audit: Arc<dyn AuditEngine>,
    pub reporters: ReporterSet,
}

pub struct ScanSession {
    self_url: String,
    public_token: AuthToken,
    local_token: AuthToken,

    pub(crate) options: RwLock<ScanOptions>,
    pub(crate) role: RwLock<Role>,
    status: RwLock<RunStatus>,
    pub(crate) extended_running: AtomicBool,
    paused: AtomicBool,
    pub(crate) prepared: AtomicBool,
    cleaned_up: AtomicBool,
    pub(crate) finished_auditing: AtomicBool,

    pub(crate) element_ids: RwLock<ElementIdMap>,
    pub(crate) restrict_elements: RwLock<BTreeSet<ElementId>>,
    pub(crate) local_sitemap: RwLock<BTreeSet<String>>,
    pub(crate) override_sitemap: RwLock<BTreeSet<String>>,
    pub(crate) page_queue: Mutex<PageQueue>,
    pub(crate) summaries: RwLock<IssueSummarySet>,
    pub(crate) messages: RwLock<Vec<String>>,
    pub(crate) stats: RwLock<ScanStats>,
    pub(crate) plugins: RwLock<PluginSet>,
    pub(crate) sink: Arc<ResultSink>,

    // Slave-side element dedup and issue buffering. Touched from the crawl
    // loop and the sink listener only.
    pub(crate) element_filter: StdMutex<ElementIdFilter>,
    pub(crate) slave_delta: StdMutex<ElementIdMap>,
    pub(crate) slave_buffer: Arc<StdMutex<IssueBuffer>>,
    pub(crate) upstream_tx: StdMutex<Option<mpsc::UnboundedSender<UpstreamMessage>>>,

    pub(crate) collaborators: SessionCollaborators,
}

impl ScanSession {
    pub fn new(options: ScanOptions, collaborators: SessionCollaborators) -> Arc<Self> {
        let self_url = options.self_url();
        let public_token = options
            .token
            .as_deref()
            .map(AuthToken::from_string)
            .unwrap_or_else(AuthToken::generate);
        let role = if options.high_performance() {
            Role::Master {
                slaves: InstanceRegistry::new(),
            }
        } else {
            Role::Solo
        };

        Arc::new(Self {
            self_url,
            public_token,
            local_token: AuthToken::generate(),
            options: RwLock::new(options),
            role: RwLock::new(role),
            status: RwLock::new(RunStatus::NotStarted),
            extended_running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            prepared: AtomicBool::new(false),
            cleaned_up: AtomicBool::new(false),
            finished_auditing: AtomicBool::new(false),
            element_ids: RwLock::new(ElementIdMap::new()),
            restrict_elements: RwLock::new(BTreeSet::new()),
            local_sitemap: RwLock::new(BTreeSet::new()),
            override_sitemap: RwLock::new(BTreeSet::new()),
            page_queue: Mutex::new(PageQueue::new()),
            summaries: RwLock::new(IssueSummarySet::new()),
            messages: RwLock::new(Vec::new()),
            stats: RwLock::new(ScanStats::default()),
            plugins: RwLock::new(PluginSet::new()),
            sink: Arc::new(ResultSink::new()),
            element_filter: StdMutex::new(ElementIdFilter::new()),
            slave_delta: StdMutex::new(ElementIdMap::new()),
            slave_buffer: Arc::new(StdMutex::new(IssueBuffer::new())),
            upstream_tx: StdMutex::new(None),
            collaborators,
        })
    }

    // ------------------------------------------------------------------
    // Identity and role queries
    // ------------------------------------------------------------------

    pub fn self_url(&self) -> &str {
        &self.self_url
    }

    /// The public RPC token of this instance.
    pub fn token(&self) -> &str {
        self.public_token.as_str()
    }

    /// The privileged token shared only with cooperating grid members.
    pub fn local_token(&self) -> &str {
        self.local_token.as_str()
    }

    pub async fn solo(&self) -> bool {
        self.role.read().await.is_solo()
    }

    pub async fn master(&self) -> bool {
        self.role.read().await.is_master()
    }

    pub async fn slave(&self) -> bool {
        self.role.read().await.is_slave()
    }

    /// Registered slaves, empty unless this instance is a master.
    pub async fn slaves(&self) -> Vec<InstanceInfo> {
        match &*self.role.read().await {
            Role::Master { slaves } => slaves.list().to_vec(),
            _ => Vec::new(),
        }
    }

    pub(crate) async fn master_target(&self) -> Option<(String, String)> {
        match &*self.role.read().await {
            Role::Slave {
                master_url,
                master_priv_token,
            } => Some((master_url.clone(), master_priv_token.clone())),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    pub async fn status(&self) -> RunStatus {
        if self.paused.load(Ordering::SeqCst) && self.extended_running.load(Ordering::SeqCst) {
            return RunStatus::Paused;
        }
        *self.status.read().await
    }

    pub(crate) async fn set_status(&self, status: RunStatus) {
        *self.status.write().await = status;
        self.stats.write().await.touch();
    }

    /// True from `run()` until all grid work completes.
    pub fn busy(&self) -> bool {
        self.extended_running.load(Ordering::SeqCst)
    }

    pub fn paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub async fn stats(&self) -> ScanStats {
        self.stats.read().await.clone()
    }

    pub async fn push_message(&self, message: impl Into<String>) {
        let message = message.into();
        debug!("{}", message);
        self.messages.write().await.push(message);
    }

    pub async fn list_modules(&self) -> Vec<String> {
        self.collaborators.audit.modules()
    }

    pub async fn list_plugins(&self) -> Vec<String> {
        self.plugins.read().await.list().to_vec()
    }

    pub fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    pub fn revision(&self) -> &'static str {
        REVISION
    }

    pub async fn issues(&self) -> Vec<Issue> {
        self.sink.issues().await
    }

    pub async fn issues_as_hash(&self) -> Vec<serde_json::Value> {
        self.sink
            .issues()
            .await
            .iter()
            .filter_map(|issue| serde_json::to_value(issue).ok())
            .collect()
    }

    pub async fn plugin_results(
        &self,
    ) -> std::collections::HashMap<String, serde_json::Value> {
        self.plugins.read().await.results().clone()
    }

    // ------------------------------------------------------------------
    // Options
    // ------------------------------------------------------------------

    /// Accept option propagation from the master: target and plugin set.
    pub async fn set_options(&self, incoming: ScanOptions) -> Result<bool> {
        let mut options = self.options.write().await;
        options.url = incoming.url;
        options.plugins = incoming.plugins;
        Ok(true)
    }

    /// Restrict the local audit to the given URL chunk.
    pub async fn restrict_paths(&self, paths: Vec<String>) -> Result<bool> {
        self.options.write().await.restrict_paths = paths;
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Token gate
    // ------------------------------------------------------------------

    /// On a master every privileged call must present the local token; a
    /// slave has no external peers and accepts unconditionally.
    pub(crate) async fn guard(&self, token: &str) -> bool {
        if self.role.read().await.is_master() {
            self.local_token.validate(token)
        } else {
            true
        }
    }

    // ------------------------------------------------------------------
    // Role transitions
    // ------------------------------------------------------------------

    /// Enable master behavior. Only valid from solo; a second call is a
    /// no-op `false`.
    pub async fn set_as_master(&self) -> bool {
        let mut role = self.role.write().await;
        if !role.is_solo() {
            return false;
        }
        *role = Role::Master {
            slaves: InstanceRegistry::new(),
        };
        self.options.write().await.grid_mode = GridMode::HighPerformance;
        info!("Grid mode enabled, instance {} is now master", self.self_url);
        true
    }

    /// Attach this instance to a master. Only valid from solo.
    pub async fn set_master(self: &Arc<Self>, master_url: String, token: String) -> Result<bool> {
        {
            let mut role = self.role.write().await;
            if !role.is_solo() {
                warn!("set_master rejected: instance is not solo");
                return Ok(false);
            }
            *role = Role::Slave {
                master_url: master_url.clone(),
                master_priv_token: token.clone(),
            };
        }
        self.options.write().await.master_priv_token = Some(token);

        self.install_upstream_forwarder(master_url).await;

        let plugin_names = self.options.read().await.plugins.clone();
        self.plugins.write().await.load(plugin_names);
        self.prepare().await;
        info!("Instance {} is now a slave", self.self_url);
        Ok(true)
    }

    /// Wire the slave-side reporting pipeline: issues flow into the buffer,
    /// buffer flushes and fresh summaries travel upstream in batches.
    async fn install_upstream_forwarder(self: &Arc<Self>, master_url: String) {
        let (tx, mut rx) = mpsc::unbounded_channel::<UpstreamMessage>();
        *self.upstream_tx.lock().unwrap() = Some(tx.clone());

        let buffer_tx = tx.clone();
        self.slave_buffer.lock().unwrap().on_flush(move |batch| {
            let _ = buffer_tx.send(UpstreamMessage::Issues(batch));
        });

        let buffer = Arc::clone(&self.slave_buffer);
        self.sink.set_listener(move |batch| {
            let summaries = batch.iter().map(Issue::summary).collect::<Vec<_>>();
            let _ = tx.send(UpstreamMessage::Summaries(summaries));
            buffer.lock().unwrap().push(batch.to_vec());
        });

        let client = self.collaborators.connector.connect(&master_url);
        let session = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let Some((_, token)) = session.master_target().await else {
                    break;
                };
                let result = match message {
                    UpstreamMessage::Issues(issues) => {
                        client.register_issues(issues, token).await
                    }
                    UpstreamMessage::Summaries(summaries) => {
                        client.register_issue_summaries(summaries, token).await
                    }
                };
                if let Err(e) = result {
                    warn!("Upstream report to master failed: {}", e);
                }
            }
        });
    }

    /// Add a peer to the grid as a slave of this instance. Implicitly
    /// elevates a solo instance to master.
    pub async fn enslave(self: &Arc<Self>, info: InstanceInfo) -> Result<bool> {
        info.validate()?;

        {
            let role = self.role.read().await;
            if role.is_slave() {
                warn!("enslave rejected: a slave cannot enslave");
                return Ok(false);
            }
            if let Role::Master { slaves } = &*role {
                if slaves.get(&info.url).is_some() {
                    return Ok(false);
                }
            }
        }
        self.set_as_master().await;

        let client = self.collaborators.connector.connect(&info.url);
        let sanitized = self.options.read().await.sanitized_for_slave();
        client.set_options(sanitized).await?;
        let accepted = client
            .set_master(self.self_url.clone(), self.local_token.as_str().to_string())
            .await?;
        if !accepted {
            warn!("Instance {} refused set_master", info.url);
            return Ok(false);
        }

        let mut role = self.role.write().await;
        if let Role::Master { slaves } = &mut *role {
            info!("Enslaved instance {}", info.url);
            slaves.add(info);
        }
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Pause / resume / clean-up
    // ------------------------------------------------------------------

    /// Suspend the scan. Fans out to all slaves; the local run loop parks
    /// at its next suspension point.
    pub async fn pause(&self) -> Result<bool> {
        self.paused.store(true, Ordering::SeqCst);
        for slave in self.slaves().await {
            let client = self.collaborators.connector.connect(&slave.url);
            if let Err(e) = client.pause().await {
                warn!("Pause of {} failed: {}", slave.url, e);
            }
        }
        self.push_message("Scan paused").await;
        Ok(true)
    }

    pub async fn resume(&self) -> Result<bool> {
        for slave in self.slaves().await {
            let client = self.collaborators.connector.connect(&slave.url);
            if let Err(e) = client.resume().await {
                warn!("Resume of {} failed: {}", slave.url, e);
            }
        }
        self.paused.store(false, Ordering::SeqCst);
        self.push_message("Scan resumed").await;
        Ok(true)
    }

    /// Tear the grid down and merge remote plugin results. Idempotent: the
    /// second call returns `false`.
    pub async fn clean_up(&self) -> Result<bool> {
        if self.cleaned_up.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        self.set_status(RunStatus::CleaningUp).await;
        self.push_message("Cleaning up").await;

        for slave in self.slaves().await {
            let client = self.collaborators.connector.connect(&slave.url);
            if let Err(e) = client.clean_up().await {
                warn!("Clean-up of {} failed: {}", slave.url, e);
                continue;
            }
            match client.plugin_results().await {
                Ok(results) => self.plugins.write().await.merge_results(results),
                Err(e) => warn!("Plugin results from {} lost: {}", slave.url, e),
            }
        }

        self.set_status(RunStatus::Done).await;
        self.extended_running.store(false, Ordering::SeqCst);
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Privileged grid surface
    // ------------------------------------------------------------------

    /// Narrow the local audit to the given element ids.
    pub async fn restrict_to_elements(
        &self,
        elements: Vec<ElementId>,
        token: &str,
    ) -> Result<bool> {
        if !self.guard(token).await {
            return Ok(false);
        }
        *self.restrict_elements.write().await = elements.into_iter().collect();
        Ok(true)
    }

    /// Merge a peer's per-page element ids into the authoritative map. With
    /// `done_peer_url` the spider is told that peer finished crawling.
    pub async fn update_element_ids_per_page(
        &self,
        map: ElementIdMap,
        token: &str,
        done_peer_url: Option<String>,
    ) -> Result<bool> {
        if !self.guard(token).await {
            return Ok(false);
        }
        self.element_ids.write().await.merge(map);
        if let Some(peer) = done_peer_url {
            if let Err(e) = self.collaborators.spider.peer_done(peer).await {
                warn!("Spider rejected peer-done signal: {}", e);
            }
        }
        Ok(true)
    }

    /// Push plugin-discovered pages into the local page queue.
    pub async fn update_page_queue(&self, pages: Vec<Page>, token: &str) -> Result<bool> {
        if !self.guard(token).await {
            return Ok(false);
        }
        self.page_queue.lock().await.extend(pages);
        Ok(true)
    }

    /// Record that a slave finished its share.
    pub async fn slave_done(self: &Arc<Self>, url: String, token: &str) -> Result<bool> {
        if !self.guard(token).await {
            return Ok(false);
        }
        {
            let mut role = self.role.write().await;
            if let Role::Master { slaves } = &mut *role {
                info!("Slave {} is done", url);
                slaves.mark_done(&url);
            } else {
                return Ok(false);
            }
        }
        self.cleanup_if_all_done().await;
        Ok(true)
    }

    /// Store full issues from a slave into the local result set.
    pub async fn register_issues(&self, issues: Vec<Issue>, token: &str) -> Result<bool> {
        if !self.guard(token).await {
            return Ok(false);
        }
        self.sink.register(issues).await;
        Ok(true)
    }

    /// Merge stripped summaries for live reporting, deduplicated by
    /// unique id.
    pub async fn register_issue_summaries(
        &self,
        issues: Vec<IssueSummary>,
        token: &str,
    ) -> Result<bool> {
        if !self.guard(token).await {
            return Ok(false);
        }
        self.summaries.write().await.merge(issues);
        Ok(true)
    }
}

impl std::fmt::Debug for ScanSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanSession")
            .field("self_url", &self.self_url)
            .field("busy", &self.busy())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as TestMutex;
    use std::time::Duration;

    use gs_core::issue::Severity;

    use crate::audit::InertAuditEngine;
    use crate::spider::InertSpider;
    use crate::test_support::{
        collaborators, options_for, wait_until, LoopbackConnector, RecordingAuditEngine,
    };

    use super::*;

    fn session_at(connector: &Arc<LoopbackConnector>, host: &str, port: u16) -> Arc<ScanSession> {
        let session = ScanSession::new(
            options_for(host, port),
            collaborators(
                Arc::clone(connector),
                Arc::new(InertSpider),
                Arc::new(InertAuditEngine),
            ),
        );
        session
            .options
            .try_write()
            .unwrap()
            .plugins
            .push("healthmap".to_string());
        connector.register(session.self_url(), Arc::clone(&session));
        session
    }

    async fn assert_exactly_one_role(session: &ScanSession) {
        let roles = [
            session.solo().await,
            session.master().await,
            session.slave().await,
        ];
        assert_eq!(roles.iter().filter(|r| **r).count(), 1, "roles: {roles:?}");
    }

    fn issue(url: &str) -> Issue {
        Issue::new("xss", "Reflected XSS", url, "input[q]", Severity::High)
    }

    #[tokio::test]
    async fn instances_start_solo_and_set_as_master_is_one_way() {
        let connector = LoopbackConnector::new();
        let session = session_at(&connector, "m", 1);

        assert!(session.solo().await);
        assert_exactly_one_role(&session).await;

        assert!(session.set_as_master().await);
        assert!(session.master().await);
        assert_exactly_one_role(&session).await;

        // Second call is a no-op false.
        assert!(!session.set_as_master().await);
        assert!(session.master().await);
    }

    #[tokio::test]
    async fn enslave_elevates_solo_to_master_and_registers_the_slave() {
        let connector = LoopbackConnector::new();
        let master = session_at(&connector, "m", 1);
        let slave = session_at(&connector, "s", 1);

        let enslaved = master
            .enslave(InstanceInfo::new(slave.self_url(), slave.token()))
            .await
            .unwrap();
        assert!(enslaved);

        assert!(master.master().await);
        assert!(slave.slave().await);
        assert_exactly_one_role(&master).await;
        assert_exactly_one_role(&slave).await;
        assert_eq!(master.slaves().await.len(), 1);

        // Option propagation reached the slave sanitized.
        let slave_options = slave.options.read().await;
        assert_eq!(slave_options.url, "http://target");
        assert_eq!(slave_options.plugins, vec!["healthmap".to_string()]);
    }

    #[tokio::test]
    async fn a_slave_cannot_enslave() {
        let connector = LoopbackConnector::new();
        let master = session_at(&connector, "m", 1);
        let slave = session_at(&connector, "s", 1);
        let third = session_at(&connector, "s", 2);

        master
            .enslave(InstanceInfo::new(slave.self_url(), slave.token()))
            .await
            .unwrap();

        let refused = slave
            .enslave(InstanceInfo::new(third.self_url(), third.token()))
            .await
            .unwrap();
        assert!(!refused);
        assert!(third.solo().await);
    }

    #[tokio::test]
    async fn enslave_rejects_malformed_descriptors() {
        let connector = LoopbackConnector::new();
        let master = session_at(&connector, "m", 1);

        let err = master
            .enslave(InstanceInfo::new("", "token"))
            .await
            .unwrap_err();
        assert!(matches!(err, gs_core::Error::MissingField(_)));
        // The failed call must not have elevated the instance.
        assert!(master.solo().await);
    }

    #[tokio::test]
    async fn set_master_only_works_from_solo() {
        let connector = LoopbackConnector::new();
        let session = session_at(&connector, "m", 1);
        session.set_as_master().await;

        let accepted = session
            .set_master("other:1".to_string(), "tok".to_string())
            .await
            .unwrap();
        assert!(!accepted);
        assert!(session.master().await);
    }

    #[tokio::test]
    async fn privileged_calls_need_the_local_token_on_a_master() {
        let connector = LoopbackConnector::new();
        let session = session_at(&connector, "m", 1);
        session.set_as_master().await;

        let accepted = session
            .register_issues(vec![issue("http://t/1")], "wrong")
            .await
            .unwrap();
        assert!(!accepted);
        assert!(session.issues().await.is_empty());

        let token = session.local_token().to_string();
        let accepted = session
            .register_issues(vec![issue("http://t/1")], &token)
            .await
            .unwrap();
        assert!(accepted);
        assert_eq!(session.issues().await.len(), 1);
    }

    #[tokio::test]
    async fn a_slave_accepts_privileged_calls_unconditionally() {
        let connector = LoopbackConnector::new();
        let master = session_at(&connector, "m", 1);
        let slave = session_at(&connector, "s", 1);
        master
            .enslave(InstanceInfo::new(slave.self_url(), slave.token()))
            .await
            .unwrap();

        let accepted = slave
            .restrict_to_elements(vec![ElementId::from("e1")], "anything")
            .await
            .unwrap();
        assert!(accepted);
        assert!(slave
            .restrict_elements
            .read()
            .await
            .contains(&ElementId::from("e1")));
    }

    #[tokio::test]
    async fn invalid_token_mutates_nothing() {
        let connector = LoopbackConnector::new();
        let session = session_at(&connector, "m", 1);
        session.set_as_master().await;

        let mut map = ElementIdMap::new();
        map.record("u1", vec![ElementId::from("e1")]);
        assert!(!session
            .update_element_ids_per_page(map, "wrong", None)
            .await
            .unwrap());
        assert!(session.element_ids.read().await.is_empty());

        assert!(!session
            .update_page_queue(vec![Page::new("http://t/x", vec![])], "wrong")
            .await
            .unwrap());
        assert!(session.page_queue.lock().await.is_empty());

        assert!(!session
            .register_issue_summaries(vec![issue("http://t/1").summary()], "wrong")
            .await
            .unwrap());
        assert!(session.summaries.read().await.is_empty());
    }

    #[tokio::test]
    async fn summaries_deduplicate_by_unique_id() {
        let connector = LoopbackConnector::new();
        let session = session_at(&connector, "m", 1);
        session.set_as_master().await;
        let token = session.local_token().to_string();

        session
            .register_issue_summaries(vec![issue("http://t/1").summary()], &token)
            .await
            .unwrap();
        session
            .register_issue_summaries(
                vec![issue("http://t/1").summary(), issue("http://t/2").summary()],
                &token,
            )
            .await
            .unwrap();
        assert_eq!(session.summaries.read().await.len(), 2);
    }

    #[tokio::test]
    async fn pause_and_resume_fan_out_to_all_slaves() {
        let connector = LoopbackConnector::new();
        let master = session_at(&connector, "m", 1);
        let slave_one = session_at(&connector, "s", 1);
        let slave_two = session_at(&connector, "s", 2);
        for slave in [&slave_one, &slave_two] {
            master
                .enslave(InstanceInfo::new(slave.self_url(), slave.token()))
                .await
                .unwrap();
        }

        master.pause().await.unwrap();
        assert!(master.paused());
        assert!(slave_one.paused());
        assert!(slave_two.paused());

        master.resume().await.unwrap();
        assert!(!master.paused());
        assert!(!slave_one.paused());
        assert!(!slave_two.paused());
    }

    #[tokio::test]
    async fn clean_up_is_idempotent_and_merges_plugin_results() {
        let connector = LoopbackConnector::new();
        let master = session_at(&connector, "m", 1);
        let slave = session_at(&connector, "s", 1);
        master
            .enslave(InstanceInfo::new(slave.self_url(), slave.token()))
            .await
            .unwrap();
        slave
            .plugins
            .write()
            .await
            .record_result("healthmap", serde_json::json!({"alive": 7}));

        assert!(master.clean_up().await.unwrap());
        assert!(!master.clean_up().await.unwrap());

        assert_eq!(
            master.plugin_results().await["healthmap"],
            serde_json::json!({"alive": 7})
        );
        // The slave was cleaned up too; its second call reports so.
        assert!(!slave.clean_up().await.unwrap());
    }

    #[tokio::test]
    async fn slave_done_records_completion_monotonically() {
        let connector = LoopbackConnector::new();
        let master = session_at(&connector, "m", 1);
        let slave = session_at(&connector, "s", 1);
        master
            .enslave(InstanceInfo::new(slave.self_url(), slave.token()))
            .await
            .unwrap();
        let token = master.local_token().to_string();

        assert!(master
            .slave_done(slave.self_url().to_string(), &token)
            .await
            .unwrap());
        // Repeat arrival stays recorded; the done set only grows.
        assert!(master
            .slave_done(slave.self_url().to_string(), &token)
            .await
            .unwrap());
        match &*master.role.read().await {
            Role::Master { slaves } => assert!(slaves.all_done()),
            other => panic!("unexpected role {other:?}"),
        };
    }

    #[tokio::test]
    async fn slave_forwards_buffered_issues_and_summaries_upstream() {
        let connector = LoopbackConnector::new();
        let master = session_at(&connector, "m", 1);
        let slave = session_at(&connector, "s", 1);
        master
            .enslave(InstanceInfo::new(slave.self_url(), slave.token()))
            .await
            .unwrap();

        // Nine issues per batch: summaries stream immediately, full issues
        // stay buffered until the fill-up attempt limit is hit.
        for batch in 0..9 {
            let issues: Vec<Issue> = (0..9)
                .map(|i| issue(&format!("http://t/{batch}/{i}")))
                .collect();
            slave.sink.register(issues).await;
        }
        assert!(
            wait_until(
                || master.summaries.try_read().map(|s| s.len() == 81).unwrap_or(false),
                Duration::from_secs(2)
            )
            .await
        );
        assert!(master.issues().await.is_empty());

        let issues: Vec<Issue> = (0..9).map(|i| issue(&format!("http://t/9/{i}"))).collect();
        slave.sink.register(issues).await;

        assert!(
            wait_until(
                || master.sink.try_len() == Some(90),
                Duration::from_secs(2)
            )
            .await
        );
    }

    #[tokio::test]
    async fn audit_engine_findings_reach_the_recording_log() {
        let audited = Arc::new(TestMutex::new(Vec::new()));
        let connector = LoopbackConnector::new();
        let session = ScanSession::new(
            options_for("m", 1),
            collaborators(
                Arc::clone(&connector),
                Arc::new(InertSpider),
                Arc::new(RecordingAuditEngine::new("m", Arc::clone(&audited))),
            ),
        );
        connector.register(session.self_url(), Arc::clone(&session));

        *session.restrict_elements.write().await =
            [ElementId::from("e1"), ElementId::from("e2")].into_iter().collect();
        assert!(session.run().await.unwrap());
        assert!(
            wait_until(|| !session.busy(), Duration::from_secs(2)).await,
            "solo scan did not finish"
        );
        assert_eq!(audited.lock().unwrap().len(), 2);
        assert_eq!(session.issues().await.len(), 2);
    }
}
