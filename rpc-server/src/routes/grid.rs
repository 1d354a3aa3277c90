//! Grid role surface and the privileged intra-grid endpoints
//!
//! Privileged endpoints carry the caller's token in the body; the session
//! validates it against the local token when this instance is a master.
//! Guard failures come back as a `false` payload, never as an error body.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use gs_core::element::{ElementId, ElementIdMap};
use gs_core::instance::InstanceInfo;
use gs_core::issue::{Issue, IssueSummary};
use gs_core::page::Page;

use crate::routes::{map_error, ErrorResponse};
use crate::state::AppState;

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetMasterRequest {
    url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestrictElementsRequest {
    elements: Vec<ElementId>,
    token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ElementIdsRequest {
    map: ElementIdMap,
    token: String,
    done_peer_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageQueueRequest {
    pages: Vec<Page>,
    token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SlaveDoneRequest {
    url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterIssuesRequest {
    issues: Vec<Issue>,
    token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterSummariesRequest {
    issues: Vec<IssueSummary>,
    token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RoleResponse {
    solo: bool,
    master: bool,
    slave: bool,
    self_url: String,
    token: String,
}

async fn enslave(
    State(state): State<AppState>,
    Json(info): Json<InstanceInfo>,
) -> ApiResult<bool> {
    state.session().enslave(info).await.map(Json).map_err(map_error)
}

async fn set_as_master(State(state): State<AppState>) -> Json<bool> {
    Json(state.session().set_as_master().await)
}

async fn set_master(
    State(state): State<AppState>,
    Json(req): Json<SetMasterRequest>,
) -> ApiResult<bool> {
    state
        .session()
        .set_master(req.url, req.token)
        .await
        .map(Json)
        .map_err(map_error)
}

async fn role(State(state): State<AppState>) -> Json<RoleResponse> {
    let session = state.session();
    Json(RoleResponse {
        solo: session.solo().await,
        master: session.master().await,
        slave: session.slave().await,
        self_url: session.self_url().to_string(),
        token: session.token().to_string(),
    })
}

async fn restrict_elements(
    State(state): State<AppState>,
    Json(req): Json<RestrictElementsRequest>,
) -> ApiResult<bool> {
    state
        .session()
        .restrict_to_elements(req.elements, &req.token)
        .await
        .map(Json)
        .map_err(map_error)
}

async fn element_ids(
    State(state): State<AppState>,
    Json(req): Json<ElementIdsRequest>,
) -> ApiResult<bool> {
    state
        .session()
        .update_element_ids_per_page(req.map, &req.token, req.done_peer_url)
        .await
        .map(Json)
        .map_err(map_error)
}

async fn page_queue(
    State(state): State<AppState>,
    Json(req): Json<PageQueueRequest>,
) -> ApiResult<bool> {
    state
        .session()
        .update_page_queue(req.pages, &req.token)
        .await
        .map(Json)
        .map_err(map_error)
}

async fn slave_done(
    State(state): State<AppState>,
    Json(req): Json<SlaveDoneRequest>,
) -> ApiResult<bool> {
    state
        .session()
        .slave_done(req.url, &req.token)
        .await
        .map(Json)
        .map_err(map_error)
}

async fn register_issues(
    State(state): State<AppState>,
    Json(req): Json<RegisterIssuesRequest>,
) -> ApiResult<bool> {
    state
        .session()
        .register_issues(req.issues, &req.token)
        .await
        .map(Json)
        .map_err(map_error)
}

async fn register_issue_summaries(
    State(state): State<AppState>,
    Json(req): Json<RegisterSummariesRequest>,
) -> ApiResult<bool> {
    state
        .session()
        .register_issue_summaries(req.issues, &req.token)
        .await
        .map(Json)
        .map_err(map_error)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/grid/enslave", post(enslave))
        .route("/api/v1/grid/set-as-master", post(set_as_master))
        .route("/api/v1/grid/set-master", post(set_master))
        .route("/api/v1/grid/role", get(role))
        .route("/api/v1/grid/restrict-elements", post(restrict_elements))
        .route("/api/v1/grid/element-ids", post(element_ids))
        .route("/api/v1/grid/page-queue", post(page_queue))
        .route("/api/v1/grid/slave-done", post(slave_done))
        .route("/api/v1/grid/issues", post(register_issues))
        .route("/api/v1/grid/issue-summaries", post(register_issue_summaries))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use gs_core::options::ScanOptions;
    use scan_runner::audit::InertAuditEngine;
    use scan_runner::dispatcher::HttpDispatcherConnector;
    use scan_runner::report::ReporterSet;
    use scan_runner::spider::InertSpider;
    use scan_runner::{HttpRpcConnector, ScanSession, SessionCollaborators};

    use crate::state::AppState;

    fn build_state() -> AppState {
        let options = ScanOptions {
            rpc_address: "127.0.0.1".to_string(),
            rpc_port: 7331,
            url: "http://target".to_string(),
            ..Default::default()
        };
        let session = ScanSession::new(
            options,
            SessionCollaborators {
                connector: Arc::new(HttpRpcConnector),
                dispatchers: Arc::new(HttpDispatcherConnector),
                spider: Arc::new(InertSpider),
                audit: Arc::new(InertAuditEngine),
                reporters: ReporterSet::new(),
            },
        );
        AppState::new(session)
    }

    fn app(state: &AppState) -> Router {
        super::router()
            .merge(crate::routes::scan::router())
            .with_state(state.clone())
    }

    async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("Content-Type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn role_starts_solo_with_identity() {
        let state = build_state();
        let (status, body) = get_json(app(&state), "/api/v1/grid/role").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["solo"], json!(true));
        assert_eq!(body["master"], json!(false));
        assert_eq!(body["selfUrl"], json!("127.0.0.1:7331"));
        assert!(body["token"].as_str().unwrap().len() >= 32);
    }

    #[tokio::test]
    async fn enslave_requires_url_and_token() {
        let state = build_state();
        let (status, body) = post_json(
            app(&state),
            "/api/v1/grid/enslave",
            json!({"url": "", "token": "t"}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("url"));

        // The bad request must not have elevated the instance.
        let (_, role) = get_json(app(&state), "/api/v1/grid/role").await;
        assert_eq!(role["solo"], json!(true));
    }

    #[tokio::test]
    async fn set_as_master_is_idempotent_false_on_repeat() {
        let state = build_state();
        let (status, body) =
            post_json(app(&state), "/api/v1/grid/set-as-master", json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!(true));

        let (_, body) = post_json(app(&state), "/api/v1/grid/set-as-master", json!({})).await;
        assert_eq!(body, json!(false));
    }

    #[tokio::test]
    async fn privileged_endpoint_with_bad_token_returns_false_and_mutates_nothing() {
        let state = build_state();
        post_json(app(&state), "/api/v1/grid/set-as-master", json!({})).await;

        let issue = json!({
            "id": "8f2b5a64-1111-2222-3333-444455556666",
            "uniqueId": "abc",
            "check": "xss",
            "name": "Reflected XSS",
            "url": "http://t/1",
            "element": "input[q]",
            "severity": "high",
            "remarks": [],
            "variations": []
        });
        let (status, body) = post_json(
            app(&state),
            "/api/v1/grid/issues",
            json!({"issues": [issue], "token": "wrong"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!(false));

        let (_, issues) = get_json(app(&state), "/api/v1/scan/issues").await;
        assert_eq!(issues, json!([]));
    }

    #[tokio::test]
    async fn privileged_endpoint_accepts_the_local_token() {
        let state = build_state();
        post_json(app(&state), "/api/v1/grid/set-as-master", json!({})).await;
        let token = state.session().local_token().to_string();

        let (status, body) = post_json(
            app(&state),
            "/api/v1/grid/page-queue",
            json!({"pages": [{"url": "http://t/p", "elementIds": ["e1"]}], "token": token}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!(true));
    }

    #[tokio::test]
    async fn scan_surface_reports_status_and_version() {
        let state = build_state();
        let (status, body) = get_json(app(&state), "/api/v1/scan/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!("not_started"));

        let (_, busy) = get_json(app(&state), "/api/v1/scan/busy").await;
        assert_eq!(busy, json!(false));

        let (_, version) = get_json(app(&state), "/api/v1/version").await;
        assert!(version["version"].as_str().is_some());
    }

    #[tokio::test]
    async fn unknown_report_component_is_a_404() {
        let state = build_state();
        let (status, _) = get_json(app(&state), "/api/v1/scan/report/xml").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn progress_answers_with_defaulted_sections() {
        let state = build_state();
        let (status, body) = post_json(app(&state), "/api/v1/scan/progress", json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("not_started"));
        assert_eq!(body["busy"], json!(false));
        assert!(body["issues"].is_array());
        assert!(body["instances"].is_array());
    }
}
