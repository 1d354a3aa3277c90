//! Dispatcher clients
//!
//! A dispatcher is an external service that spawns scanner instances on
//! demand. Dispatchers sharing one pipe (network line) report the same
//! `pipe_id`; the master prefers one dispatcher per pipe so slave traffic
//! aggregates across distinct lines.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::warn;

use gs_core::error::Error;
use gs_core::instance::InstanceInfo;
use gs_core::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatcherInfo {
    pub url: String,
    pub pipe_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DispatchRequest {
    owner: String,
}

#[async_trait]
pub trait DispatcherRpc: Send + Sync {
    async fn info(&self) -> Result<DispatcherInfo>;
    /// Spawn a fresh scanner instance owned by `owner` (the master's url).
    async fn dispatch(&self, owner: String) -> Result<InstanceInfo>;
}

pub trait DispatcherConnector: Send + Sync {
    fn connect(&self, url: &str) -> Arc<dyn DispatcherRpc>;
}

pub struct HttpDispatcherClient {
    client: Client,
    base: String,
}

impl HttpDispatcherClient {
    pub fn new(url: &str) -> Self {
        let base = if url.starts_with("http://") || url.starts_with("https://") {
            url.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", url.trim_end_matches('/'))
        };
        Self {
            client: Client::builder()
                .no_proxy()
                .build()
                .unwrap_or_else(|_| Client::new()),
            base,
        }
    }
}

#[async_trait]
impl DispatcherRpc for HttpDispatcherClient {
    async fn info(&self) -> Result<DispatcherInfo> {
        let res = self
            .client
            .get(format!("{}/api/v1/dispatcher/info", self.base))
            .send()
            .await
            .map_err(|e| Error::rpc_transport(format!("{}: {}", self.base, e)))?;
        res.json()
            .await
            .map_err(|e| Error::rpc_transport(format!("{}: invalid response: {}", self.base, e)))
    }

    async fn dispatch(&self, owner: String) -> Result<InstanceInfo> {
        let res = self
            .client
            .post(format!("{}/api/v1/dispatcher/dispatch", self.base))
            .json(&DispatchRequest { owner })
            .send()
            .await
            .map_err(|e| Error::rpc_transport(format!("{}: {}", self.base, e)))?;
        res.json()
            .await
            .map_err(|e| Error::rpc_transport(format!("{}: invalid response: {}", self.base, e)))
    }
}

#[derive(Default)]
pub struct HttpDispatcherConnector;

impl DispatcherConnector for HttpDispatcherConnector {
    fn connect(&self, url: &str) -> Arc<dyn DispatcherRpc> {
        Arc::new(HttpDispatcherClient::new(url))
    }
}

/// Resolve the dispatchers to spawn from: one per distinct pipe id, in the
/// order configured. Unreachable dispatchers are skipped.
pub async fn preferred_dispatchers(
    connector: &dyn DispatcherConnector,
    urls: &[String],
) -> Vec<Arc<dyn DispatcherRpc>> {
    let mut seen_pipes = HashSet::new();
    let mut preferred = Vec::new();

    for url in urls {
        let dispatcher = connector.connect(url);
        match dispatcher.info().await {
            Ok(info) => {
                if seen_pipes.insert(info.pipe_id.clone()) {
                    preferred.push(dispatcher);
                }
            }
            Err(e) => {
                warn!("Dispatcher {} unreachable, skipping: {}", url, e);
            }
        }
    }

    preferred
}
