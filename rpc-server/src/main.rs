//! RPC server for a Gridscan scanner instance
//!
//! Hosts one scan session and exposes the public and intra-grid HTTP
//! surface over it. Whether the instance ends up solo, master or slave is
//! decided at runtime by the grid calls it receives.

mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gs_core::options::ScanOptions;
use scan_runner::audit::InertAuditEngine;
use scan_runner::dispatcher::HttpDispatcherConnector;
use scan_runner::report::ReporterSet;
use scan_runner::spider::InertSpider;
use scan_runner::{HttpRpcConnector, ScanSession, SessionCollaborators};

use crate::state::AppState;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rpc_server=debug,scan_runner=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let options = ScanOptions::from_env();
    let addr: SocketAddr = format!("{}:{}", options.rpc_address, options.rpc_port)
        .parse()
        .expect("Invalid GRIDSCAN_RPC_ADDRESS/GRIDSCAN_RPC_PORT");

    tracing::info!("Scanning target: {}", options.url);

    // The embedding scanner swaps the inert spider and audit engine for its
    // real crawler and module set.
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
    let state = AppState::new(session);

    let app = Router::new()
        .merge(routes::health::router())
        .merge(routes::scan::router())
        .merge(routes::grid::router())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!("Grid RPC server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
