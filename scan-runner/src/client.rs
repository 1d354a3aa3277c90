//! RPC client for peer instances
//!
//! Every cross-instance interaction goes through [`InstanceRpc`]; the HTTP
//! implementation maps each call onto the peer's `rpc-server` endpoints.
//! Transport failures surface as `Error::RpcTransport` so aggregation code
//! can drop the peer for that cycle without unwinding.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;

use gs_core::element::{ElementId, ElementIdMap};
use gs_core::error::Error;
use gs_core::issue::{Issue, IssueSummary};
use gs_core::options::ScanOptions;
use gs_core::page::Page;
use gs_core::progress::{Progress, ProgressOptions};
use gs_core::Result;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SetMasterRequest {
    url: String,
    token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RestrictPathsRequest {
    paths: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RestrictElementsRequest {
    elements: Vec<ElementId>,
    token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PageQueueRequest {
    pages: Vec<Page>,
    token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ElementIdsRequest {
    map: ElementIdMap,
    token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    done_peer_url: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SlaveDoneRequest {
    url: String,
    token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterIssuesRequest {
    issues: Vec<Issue>,
    token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterSummariesRequest {
    issues: Vec<IssueSummary>,
    token: String,
}

/// The intra-grid calls one instance can make on a peer.
#[async_trait]
pub trait InstanceRpc: Send + Sync {
    async fn set_options(&self, options: ScanOptions) -> Result<bool>;
    async fn set_master(&self, url: String, token: String) -> Result<bool>;
    async fn restrict_paths(&self, paths: Vec<String>) -> Result<bool>;
    async fn restrict_to_elements(&self, elements: Vec<ElementId>, token: String) -> Result<bool>;
    async fn update_page_queue(&self, pages: Vec<Page>, token: String) -> Result<bool>;
    async fn update_element_ids_per_page(
        &self,
        map: ElementIdMap,
        token: String,
        done_peer_url: Option<String>,
    ) -> Result<bool>;
    async fn run(&self) -> Result<bool>;
    async fn pause(&self) -> Result<bool>;
    async fn resume(&self) -> Result<bool>;
    async fn clean_up(&self) -> Result<bool>;
    async fn busy(&self) -> Result<bool>;
    async fn progress(&self, options: ProgressOptions) -> Result<Progress>;
    async fn slave_done(&self, url: String, token: String) -> Result<bool>;
    async fn register_issues(&self, issues: Vec<Issue>, token: String) -> Result<bool>;
    async fn register_issue_summaries(
        &self,
        issues: Vec<IssueSummary>,
        token: String,
    ) -> Result<bool>;
    async fn plugin_results(&self) -> Result<HashMap<String, serde_json::Value>>;
}

/// Builds an [`InstanceRpc`] handle for a peer address.
pub trait RpcConnector: Send + Sync {
    fn connect(&self, url: &str) -> Arc<dyn InstanceRpc>;
}

/// HTTP-backed peer client.
pub struct HttpInstanceClient {
    client: Client,
    base: String,
}

impl HttpInstanceClient {
    pub fn new(url: &str) -> Self {
        let base = if url.starts_with("http://") || url.starts_with("https://") {
            url.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", url.trim_end_matches('/'))
        };
        Self {
            // Grid peers are addressed directly, never through a proxy
            client: Client::builder()
                .no_proxy()
                .build()
                .unwrap_or_else(|_| Client::new()),
            base,
        }
    }

    async fn post<Req, Res>(&self, path: &str, body: &Req) -> Result<Res>
    where
        Req: Serialize + Sync,
        Res: DeserializeOwned,
    {
        let res = self
            .client
            .post(format!("{}{}", self.base, path))
            .json(body)
            .send()
            .await
            .map_err(|e| Error::rpc_transport(format!("{}: {}", self.base, e)))?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(Error::rpc_transport(format!(
                "{}{} returned {}: {}",
                self.base, path, status, text
            )));
        }

        res.json::<Res>()
            .await
            .map_err(|e| Error::rpc_transport(format!("{}: invalid response: {}", self.base, e)))
    }

    async fn get<Res>(&self, path: &str) -> Result<Res>
    where
        Res: DeserializeOwned,
    {
        let res = self
            .client
            .get(format!("{}{}", self.base, path))
            .send()
            .await
            .map_err(|e| Error::rpc_transport(format!("{}: {}", self.base, e)))?;

        if !res.status().is_success() {
            return Err(Error::rpc_transport(format!(
                "{}{} returned {}",
                self.base,
                path,
                res.status()
            )));
        }

        res.json::<Res>()
            .await
            .map_err(|e| Error::rpc_transport(format!("{}: invalid response: {}", self.base, e)))
    }
}

#[async_trait]
impl InstanceRpc for HttpInstanceClient {
    async fn set_options(&self, options: ScanOptions) -> Result<bool> {
        self.post("/api/v1/scan/options", &options).await
    }

    async fn set_master(&self, url: String, token: String) -> Result<bool> {
        self.post("/api/v1/grid/set-master", &SetMasterRequest { url, token })
            .await
    }

    async fn restrict_paths(&self, paths: Vec<String>) -> Result<bool> {
        self.post(
            "/api/v1/scan/restrict-paths",
            &RestrictPathsRequest { paths },
        )
        .await
    }

    async fn restrict_to_elements(&self, elements: Vec<ElementId>, token: String) -> Result<bool> {
        self.post(
            "/api/v1/grid/restrict-elements",
            &RestrictElementsRequest { elements, token },
        )
        .await
    }

    async fn update_page_queue(&self, pages: Vec<Page>, token: String) -> Result<bool> {
        self.post("/api/v1/grid/page-queue", &PageQueueRequest { pages, token })
            .await
    }

    async fn update_element_ids_per_page(
        &self,
        map: ElementIdMap,
        token: String,
        done_peer_url: Option<String>,
    ) -> Result<bool> {
        self.post(
            "/api/v1/grid/element-ids",
            &ElementIdsRequest {
                map,
                token,
                done_peer_url,
            },
        )
        .await
    }

    async fn run(&self) -> Result<bool> {
        self.post("/api/v1/scan/run", &serde_json::json!({})).await
    }

    async fn pause(&self) -> Result<bool> {
        self.post("/api/v1/scan/pause", &serde_json::json!({})).await
    }

    async fn resume(&self) -> Result<bool> {
        self.post("/api/v1/scan/resume", &serde_json::json!({}))
            .await
    }

    async fn clean_up(&self) -> Result<bool> {
        self.post("/api/v1/scan/clean-up", &serde_json::json!({}))
            .await
    }

    async fn busy(&self) -> Result<bool> {
        self.get("/api/v1/scan/busy").await
    }

    async fn progress(&self, options: ProgressOptions) -> Result<Progress> {
        self.post("/api/v1/scan/progress", &options).await
    }

    async fn slave_done(&self, url: String, token: String) -> Result<bool> {
        self.post("/api/v1/grid/slave-done", &SlaveDoneRequest { url, token })
            .await
    }

    async fn register_issues(&self, issues: Vec<Issue>, token: String) -> Result<bool> {
        self.post(
            "/api/v1/grid/issues",
            &RegisterIssuesRequest { issues, token },
        )
        .await
    }

    async fn register_issue_summaries(
        &self,
        issues: Vec<IssueSummary>,
        token: String,
    ) -> Result<bool> {
        self.post(
            "/api/v1/grid/issue-summaries",
            &RegisterSummariesRequest { issues, token },
        )
        .await
    }

    async fn plugin_results(&self) -> Result<HashMap<String, serde_json::Value>> {
        self.get("/api/v1/scan/plugin-results").await
    }
}

/// Default connector producing [`HttpInstanceClient`] handles.
#[derive(Default)]
pub struct HttpRpcConnector;

impl RpcConnector for HttpRpcConnector {
    fn connect(&self, url: &str) -> Arc<dyn InstanceRpc> {
        Arc::new(HttpInstanceClient::new(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_normalizes_host_port_addresses() {
        let client = HttpInstanceClient::new("10.0.0.2:7331");
        assert_eq!(client.base, "http://10.0.0.2:7331");

        let client = HttpInstanceClient::new("https://scanner.example/");
        assert_eq!(client.base, "https://scanner.example");
    }
}
