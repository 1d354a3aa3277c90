//! Public scan surface

use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use gs_core::issue::Issue;
use gs_core::options::ScanOptions;
use gs_core::progress::{Progress, ProgressOptions, RunStatus};
use gs_core::stats::ScanStats;
use scan_runner::report::ScanReport;

use crate::routes::{map_error, ErrorResponse};
use crate::state::AppState;

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestrictPathsRequest {
    paths: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VersionResponse {
    version: String,
    revision: String,
}

async fn run(State(state): State<AppState>) -> ApiResult<bool> {
    state.session().run().await.map(Json).map_err(map_error)
}

async fn pause(State(state): State<AppState>) -> ApiResult<bool> {
    state.session().pause().await.map(Json).map_err(map_error)
}

async fn resume(State(state): State<AppState>) -> ApiResult<bool> {
    state.session().resume().await.map(Json).map_err(map_error)
}

async fn clean_up(State(state): State<AppState>) -> ApiResult<bool> {
    state.session().clean_up().await.map(Json).map_err(map_error)
}

async fn busy(State(state): State<AppState>) -> Json<bool> {
    Json(state.session().busy())
}

async fn status(State(state): State<AppState>) -> Json<RunStatus> {
    Json(state.session().status().await)
}

async fn stats(State(state): State<AppState>) -> Json<ScanStats> {
    Json(state.session().stats().await)
}

async fn progress(
    State(state): State<AppState>,
    Json(options): Json<ProgressOptions>,
) -> ApiResult<Progress> {
    state
        .session()
        .progress(options)
        .await
        .map(Json)
        .map_err(map_error)
}

async fn issues(State(state): State<AppState>) -> Json<Vec<Issue>> {
    Json(state.session().issues().await)
}

async fn issues_as_hash(State(state): State<AppState>) -> Json<Vec<serde_json::Value>> {
    Json(state.session().issues_as_hash().await)
}

async fn report(State(state): State<AppState>) -> Json<ScanReport> {
    Json(state.session().report().await)
}

async fn serialized_report(State(state): State<AppState>) -> ApiResult<String> {
    state
        .session()
        .serialized_report()
        .await
        .map(Json)
        .map_err(map_error)
}

async fn report_as(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<String> {
    state
        .session()
        .report_as(&name)
        .await
        .map(Json)
        .map_err(map_error)
}

async fn plugin_results(
    State(state): State<AppState>,
) -> Json<HashMap<String, serde_json::Value>> {
    Json(state.session().plugin_results().await)
}

async fn set_options(
    State(state): State<AppState>,
    Json(options): Json<ScanOptions>,
) -> ApiResult<bool> {
    state
        .session()
        .set_options(options)
        .await
        .map(Json)
        .map_err(map_error)
}

async fn restrict_paths(
    State(state): State<AppState>,
    Json(req): Json<RestrictPathsRequest>,
) -> ApiResult<bool> {
    state
        .session()
        .restrict_paths(req.paths)
        .await
        .map(Json)
        .map_err(map_error)
}

async fn list_modules(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.session().list_modules().await)
}

async fn list_plugins(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.session().list_plugins().await)
}

async fn version(State(state): State<AppState>) -> Json<VersionResponse> {
    Json(VersionResponse {
        version: state.session().version().to_string(),
        revision: state.session().revision().to_string(),
    })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/scan/run", post(run))
        .route("/api/v1/scan/pause", post(pause))
        .route("/api/v1/scan/resume", post(resume))
        .route("/api/v1/scan/clean-up", post(clean_up))
        .route("/api/v1/scan/busy", get(busy))
        .route("/api/v1/scan/status", get(status))
        .route("/api/v1/scan/stats", get(stats))
        .route("/api/v1/scan/progress", post(progress))
        .route("/api/v1/scan/issues", get(issues))
        .route("/api/v1/scan/issues/as-hash", get(issues_as_hash))
        .route("/api/v1/scan/report", get(report))
        .route("/api/v1/scan/report/serialized", get(serialized_report))
        .route("/api/v1/scan/report/{name}", get(report_as))
        .route("/api/v1/scan/plugin-results", get(plugin_results))
        .route("/api/v1/scan/options", post(set_options))
        .route("/api/v1/scan/restrict-paths", post(restrict_paths))
        .route("/api/v1/modules", get(list_modules))
        .route("/api/v1/plugins", get(list_plugins))
        .route("/api/v1/version", get(version))
}
