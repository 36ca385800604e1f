//! `api` crate — a thin `axum` HTTP surface over the commit log and
//! orchestrator, sketching the client-facing operations of the workflow
//! engine: create, start, execute, output, cancel, terminate, get_status,
//! plus a webhook trigger endpoint.
//!
//! Concrete node-function implementations are out of scope (see the
//! workspace's Non-goals); [`default_node_registry`] registers the one node
//! type this workspace ships, [`nodes::testing::TestFunctionNode`], which is
//! enough to drive and smoke-test real workflow graphs end to end.

pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use commit::CommitLog;
use engine::{NodeRegistry, NodeRegistryBuilder};
use process::Registry;

/// Shared state handed to every handler: the commit log (wraps the db pool
/// and the process registry) plus the node-type registry the orchestrator
/// dispatches against.
#[derive(Clone)]
pub struct AppState {
    pub commit: CommitLog,
    pub process: Registry,
    pub nodes: Arc<NodeRegistry>,
}

/// The node registry this workspace ships out of the box. A deployment with
/// real node implementations would build its own and pass it to [`serve`]
/// instead.
pub fn default_node_registry() -> NodeRegistry {
    NodeRegistryBuilder::new().register("function", nodes::testing::TestFunctionNode).build()
}

pub async fn serve(bind: &str, db: db::DbPool, process: Registry, nodes: Arc<NodeRegistry>) -> Result<(), std::io::Error> {
    let commit = CommitLog::new(db, process.clone());
    let state = AppState { commit, process, nodes };

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let api_router = Router::new()
        .route("/workflows", get(handlers::workflows::list).post(handlers::workflows::create))
        .route("/workflows/:id", get(handlers::workflows::get).delete(handlers::workflows::delete))
        .route("/workflows/:id/start", post(handlers::executions::start))
        .route("/workflows/:id/execute", post(handlers::executions::execute))
        .route("/workflows/:id/output", get(handlers::executions::output))
        .route("/workflows/:id/status", get(handlers::executions::get_status))
        .route("/workflows/:id/cancel", post(handlers::executions::cancel))
        .route("/workflows/:id/terminate", post(handlers::executions::terminate));

    let app = Router::new()
        .nest("/api/v1", api_router)
        .route("/webhook/:path", post(handlers::webhooks::handle_webhook))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await
}
