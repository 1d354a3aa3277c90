//! Scan run loops
//!
//! `run()` spawns one background task per role. The master task drives the
//! crawl, partitions the discovered workload across the grid, audits its
//! own share and converges on completion as slaves report done. The slave
//! task crawls and audits its assigned scope, streaming results upstream.
//! The RPC surface stays responsive throughout: pause, progress and the
//! privileged endpoints execute on the server loop while the run task
//! parks at suspension points.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use gs_core::instance::InstanceInfo;
use gs_core::element::ElementId;
use gs_core::page::Page;
use gs_core::partition::{partition_elements, partition_pages, partition_urls};
use gs_core::progress::RunStatus;
use gs_core::Result;

use crate::audit::AuditScope;
use crate::dispatcher::preferred_dispatchers;
use crate::session::{Role, ScanSession};
use crate::spider::SpiderEvent;

/// How often a parked run loop re-checks the paused flag.
const PAUSE_POLL: Duration = Duration::from_millis(200);

impl ScanSession {
    /// Run plugins and start the clock. Executes at most once per session.
    pub(crate) async fn prepare(&self) {
        if self.prepared.swap(true, Ordering::SeqCst) {
            return;
        }
        self.set_status(RunStatus::Preparing).await;
        let names = self.options.read().await.plugins.clone();
        self.plugins.write().await.load(names);
        self.stats.write().await.started_at = Some(chrono::Utc::now());
        self.push_message("Preparing scan").await;
    }

    /// Start the scan. Returns `false` when one is already in flight or
    /// has already completed; a session runs at most one scan.
    pub async fn run(self: &Arc<Self>) -> Result<bool> {
        if self.status().await == RunStatus::Done {
            return Ok(false);
        }
        if self.extended_running.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        self.prepare().await;

        let session = Arc::clone(self);
        let role = self.role.read().await;
        match &*role {
            Role::Slave { .. } => {
                tokio::spawn(async move { session.slave_task().await });
            }
            Role::Master { .. } => {
                tokio::spawn(async move { session.master_task().await });
            }
            Role::Solo => {
                tokio::spawn(async move { session.solo_task().await });
            }
        }
        Ok(true)
    }

    pub(crate) async fn wait_while_paused(&self) {
        while self.paused() {
            tokio::time::sleep(PAUSE_POLL).await;
        }
    }

    // ------------------------------------------------------------------
    // Solo
    // ------------------------------------------------------------------

    /// A solo scan degenerates to the local pipeline: crawl, audit, done.
    async fn solo_task(self: Arc<Self>) {
        let mut events = self.start_spider().await;
        while let Some(event) = events.recv().await {
            self.wait_while_paused().await;
            match event {
                SpiderEvent::Page(page) => self.record_crawled_page(&page).await,
                SpiderEvent::RunComplete | SpiderEvent::CrawlComplete => break,
            }
        }

        // No distribution: the local share is everything discovered.
        let pages = self.page_queue.lock().await.drain();
        {
            let mut map = self.element_ids.write().await;
            for page in &pages {
                map.record(&page.url, page.element_ids.iter().cloned());
            }
        }
        {
            let mut restrict = self.restrict_elements.write().await;
            if restrict.is_empty() {
                *restrict = self.element_ids.read().await.all_ids();
            }
        }

        self.audit_local_share(pages).await;
        self.finished_auditing.store(true, Ordering::SeqCst);
        self.set_status(RunStatus::Done).await;
        self.extended_running.store(false, Ordering::SeqCst);
        info!("Solo scan finished");
    }

    // ------------------------------------------------------------------
    // Master
    // ------------------------------------------------------------------

    async fn master_task(self: Arc<Self>) {
        self.wait_while_paused().await;
        self.spawn_dispatched_slaves().await;

        // Crawl until the local pass completes.
        let mut events = self.start_spider().await;
        let mut crawl_done = false;
        while let Some(event) = events.recv().await {
            self.wait_while_paused().await;
            match event {
                SpiderEvent::Page(page) => self.record_crawled_page(&page).await,
                SpiderEvent::RunComplete => break,
                SpiderEvent::CrawlComplete => {
                    crawl_done = true;
                    break;
                }
            }
        }

        let master_pages = self.distribute_workload().await;

        // Hand the spider the peer list so crawling continues across the
        // grid while everyone audits; late pages keep merging in.
        let slaves = self.slaves().await;
        if let Err(e) = self
            .collaborators
            .spider
            .update_peers(slaves.clone())
            .await
        {
            warn!("Peer broadcast to spider failed: {}", e);
        }
        if !crawl_done {
            let session = Arc::clone(&self);
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    match event {
                        SpiderEvent::Page(page) => session.record_crawled_page(&page).await,
                        SpiderEvent::CrawlComplete => break,
                        SpiderEvent::RunComplete => {}
                    }
                }
            });
        }

        self.audit_local_share(master_pages).await;
        self.finished_auditing.store(true, Ordering::SeqCst);
        self.cleanup_if_all_done().await;
    }

    /// Ask the preferred dispatchers to spawn the configured number of
    /// slave instances and enslave each one, one dispatch at a time.
    async fn spawn_dispatched_slaves(self: &Arc<Self>) {
        let (urls, spawns) = {
            let options = self.options.read().await;
            (options.dispatcher_urls.clone(), options.spawns)
        };
        if spawns == 0 || urls.is_empty() {
            return;
        }

        let dispatchers =
            preferred_dispatchers(self.collaborators.dispatchers.as_ref(), &urls).await;
        if dispatchers.is_empty() {
            warn!("No dispatcher reachable, running without spawned slaves");
            return;
        }

        for slot in 0..spawns {
            self.wait_while_paused().await;
            let dispatcher = &dispatchers[slot % dispatchers.len()];
            match dispatcher.dispatch(self.self_url().to_string()).await {
                Ok(info) => match self.enslave(info.clone()).await {
                    Ok(true) => {}
                    Ok(false) => warn!("Dispatched instance {} refused enslavement", info.url),
                    Err(e) => warn!("Enslaving dispatched instance failed: {}", e),
                },
                Err(e) => warn!("Dispatch failed: {}", e),
            }
        }
    }

    /// Freeze the crawl result, split it into slaves+1 disjoint chunks and
    /// push each slave its share. The last chunk stays with the master;
    /// its page share is returned.
    async fn distribute_workload(self: &Arc<Self>) -> Vec<Page> {
        self.set_status(RunStatus::Distributing).await;
        self.push_message("Distributing workload").await;

        // Drain the plugin page queue into the crawl result.
        let pages = self.page_queue.lock().await.drain();
        {
            let mut map = self.element_ids.write().await;
            for page in &pages {
                map.record(&page.url, page.element_ids.iter().cloned());
            }
        }
        {
            let local = self.local_sitemap.read().await.clone();
            let element_urls: Vec<String> = self
                .element_ids
                .read()
                .await
                .urls()
                .map(str::to_string)
                .collect();
            let mut sitemap = self.override_sitemap.write().await;
            sitemap.extend(local);
            sitemap.extend(pages.iter().map(|p| p.url.clone()));
            sitemap.extend(element_urls);
        }

        let slaves = self.slaves().await;
        let chunk_count = slaves.len() + 1;

        let urls: Vec<String> = self.override_sitemap.read().await.iter().cloned().collect();
        let mut url_chunks = partition_urls(urls, chunk_count);
        let mut element_chunks = {
            let map = self.element_ids.read().await;
            partition_elements(&map, chunk_count)
        };
        let mut page_chunks = partition_pages(pages, chunk_count);

        // By convention the master keeps the last chunk of each partition.
        let master_urls = url_chunks.pop().unwrap_or_default();
        let master_elements = element_chunks.pop().unwrap_or_default();
        let master_pages = page_chunks.pop().unwrap_or_default();

        let _ = self.restrict_paths(master_urls).await;
        *self.restrict_elements.write().await = master_elements.into_iter().collect();

        for (slave, (urls, (elements, pages))) in slaves.iter().zip(
            url_chunks
                .into_iter()
                .zip(element_chunks.into_iter().zip(page_chunks.into_iter())),
        ) {
            self.wait_while_paused().await;
            if let Err(e) = self.distribute_and_run(slave, urls, elements, pages).await {
                warn!("Distribution to {} failed: {}", slave.url, e);
            }
        }

        master_pages
    }

    async fn distribute_and_run(
        &self,
        slave: &InstanceInfo,
        urls: Vec<String>,
        elements: Vec<ElementId>,
        pages: Vec<Page>,
    ) -> Result<()> {
        let client = self.collaborators.connector.connect(&slave.url);
        let token = self.local_token().to_string();
        client.restrict_paths(urls).await?;
        client.restrict_to_elements(elements, token.clone()).await?;
        client.update_page_queue(pages, token).await?;
        client.run().await?;
        info!("Workload pushed to {}", slave.url);
        Ok(())
    }

    /// Finish the scan once the local audit is done and every slave has
    /// reported in. Invoked on local completion and on every `slave_done`.
    pub(crate) async fn cleanup_if_all_done(self: &Arc<Self>) {
        if !self.finished_auditing.load(Ordering::SeqCst) {
            return;
        }

        // A slave that died mid-scan never sends slave_done; probe the
        // stragglers and count the unreachable ones as done.
        let pending: Vec<InstanceInfo> = match &*self.role.read().await {
            Role::Master { slaves } => slaves.running().into_iter().cloned().collect(),
            _ => Vec::new(),
        };
        for slave in pending {
            let client = self.collaborators.connector.connect(&slave.url);
            if let Err(e) = client.busy().await {
                warn!("Slave {} unreachable ({}), counting it as done", slave.url, e);
                if let Role::Master { slaves } = &mut *self.role.write().await {
                    slaves.mark_done(&slave.url);
                }
            }
        }

        let all_done = match &*self.role.read().await {
            Role::Master { slaves } => slaves.all_done(),
            _ => true,
        };
        if !all_done {
            return;
        }

        if self.clean_up().await.unwrap_or(false) {
            info!("Grid scan finished");
        }
    }

    // ------------------------------------------------------------------
    // Slave
    // ------------------------------------------------------------------

    /// Crawl and audit the assigned share, reporting upstream throughout,
    /// then signal the master and go idle.
    async fn slave_task(self: Arc<Self>) {
        let mut events = self.start_spider().await;
        while let Some(event) = events.recv().await {
            self.wait_while_paused().await;
            match event {
                SpiderEvent::Page(page) => self.record_page_as_slave(&page).await,
                SpiderEvent::RunComplete => self.flush_element_delta(None).await,
                SpiderEvent::CrawlComplete => {
                    let own_url = self.self_url().to_string();
                    self.flush_element_delta(Some(own_url)).await;
                    break;
                }
            }
        }

        self.audit_local_share(Vec::new()).await;
        self.finished_auditing.store(true, Ordering::SeqCst);

        // Terminal drain of the issue buffer, awaited so the batch lands
        // before the done signal.
        if let Some((master_url, token)) = self.master_target().await {
            let client = self.collaborators.connector.connect(&master_url);
            let remainder = self.slave_buffer.lock().unwrap().take();
            if !remainder.is_empty() {
                if let Err(e) = client.register_issues(remainder, token.clone()).await {
                    warn!("Final issue batch lost: {}", e);
                }
            }
            if let Err(e) = client.slave_done(self.self_url().to_string(), token).await {
                warn!("Done signal to master failed: {}", e);
            }
        }

        self.set_status(RunStatus::Done).await;
        self.extended_running.store(false, Ordering::SeqCst);
        info!("Slave scan finished");
    }

    // ------------------------------------------------------------------
    // Shared pieces
    // ------------------------------------------------------------------

    async fn start_spider(&self) -> mpsc::Receiver<SpiderEvent> {
        self.set_status(RunStatus::Crawling).await;
        let target = self.options.read().await.url.clone();
        self.push_message(format!("Crawling {}", target)).await;

        let (tx, rx) = mpsc::channel(256);
        let restrict = self.options.read().await.restrict_paths.clone();
        if let Err(e) = self.collaborators.spider.start(restrict, tx).await {
            error!("Spider failed to start: {}", e);
        }
        rx
    }

    /// Master/solo crawl callback: record the page's elements and URL.
    pub(crate) async fn record_crawled_page(&self, page: &Page) {
        self.element_ids
            .write()
            .await
            .record(&page.url, page.element_ids.iter().cloned());
        self.local_sitemap.write().await.insert(page.url.clone());
        let mut stats = self.stats.write().await;
        stats.pages_crawled += 1;
        stats.touch();
    }

    /// Slave crawl callback: track the URL locally and stage only ids the
    /// master has not seen from us yet.
    pub(crate) async fn record_page_as_slave(&self, page: &Page) {
        self.local_sitemap.write().await.insert(page.url.clone());
        {
            let mut stats = self.stats.write().await;
            stats.pages_crawled += 1;
            stats.touch();
        }
        let fresh = self
            .element_filter
            .lock()
            .unwrap()
            .filter(page.element_ids.iter().cloned());
        if !fresh.is_empty() {
            self.slave_delta.lock().unwrap().record(&page.url, fresh);
        }
    }

    /// Ship the staged element-id delta upstream. With `done_peer` set the
    /// master also learns this peer finished crawling.
    pub(crate) async fn flush_element_delta(&self, done_peer: Option<String>) {
        let delta = std::mem::take(&mut *self.slave_delta.lock().unwrap());
        if delta.is_empty() && done_peer.is_none() {
            return;
        }
        let Some((master_url, token)) = self.master_target().await else {
            return;
        };
        let client = self.collaborators.connector.connect(&master_url);
        if let Err(e) = client
            .update_element_ids_per_page(delta, token, done_peer)
            .await
        {
            warn!("Element-id report to master failed: {}", e);
        }
    }

    /// Audit this instance's share of the workload and fold the findings
    /// into the local summary set and stats.
    async fn audit_local_share(&self, pages: Vec<Page>) {
        self.set_status(RunStatus::Auditing).await;
        self.push_message("Auditing").await;

        let scope = AuditScope {
            restrict_paths: self.options.read().await.restrict_paths.clone(),
            restrict_elements: self.restrict_elements.read().await.clone(),
            pages,
        };
        let audited = scope.restrict_elements.len() as u64;
        if let Err(e) = self
            .collaborators
            .audit
            .audit(scope, Arc::clone(&self.sink))
            .await
        {
            error!("Audit failed: {}", e);
        }

        let summaries = self.sink.summaries().await;
        self.summaries.write().await.merge(summaries);
        let issues_found = self.sink.len().await as u64;
        let mut stats = self.stats.write().await;
        stats.elements_audited += audited;
        stats.issues_found = issues_found;
        stats.touch();
    }
}
