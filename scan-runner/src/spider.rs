//! Spider collaborator interface
//!
//! The crawler is external; the coordination layer consumes it as a stream
//! of events on an mpsc channel. `RunComplete` marks the end of one local
//! crawl pass (the master distributes the workload at that point);
//! `CrawlComplete` marks convergence of the whole distributed crawl.

use async_trait::async_trait;
use tokio::sync::mpsc;

use gs_core::instance::InstanceInfo;
use gs_core::page::Page;
use gs_core::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpiderEvent {
    Page(Page),
    RunComplete,
    CrawlComplete,
}

#[async_trait]
pub trait Spider: Send + Sync {
    /// Begin crawling, optionally restricted to the given paths. Events are
    /// pushed to `events` until `CrawlComplete`.
    async fn start(&self, restrict_paths: Vec<String>, events: mpsc::Sender<SpiderEvent>)
        -> Result<()>;

    /// Hand the spider the grid peer list for distributed crawling.
    async fn update_peers(&self, peers: Vec<InstanceInfo>) -> Result<()>;

    /// A peer signalled that it finished crawling its share.
    async fn peer_done(&self, url: String) -> Result<()>;
}

/// Spider that discovers nothing. Stands in until a real crawler is wired
/// up by the embedding scanner; completes immediately so solo scans of
/// pre-seeded workloads still terminate.
#[derive(Default)]
pub struct InertSpider;

#[async_trait]
impl Spider for InertSpider {
    async fn start(
        &self,
        _restrict_paths: Vec<String>,
        events: mpsc::Sender<SpiderEvent>,
    ) -> Result<()> {
        let _ = events.send(SpiderEvent::RunComplete).await;
        let _ = events.send(SpiderEvent::CrawlComplete).await;
        Ok(())
    }

    async fn update_peers(&self, _peers: Vec<InstanceInfo>) -> Result<()> {
        Ok(())
    }

    async fn peer_done(&self, _url: String) -> Result<()> {
        Ok(())
    }
}
