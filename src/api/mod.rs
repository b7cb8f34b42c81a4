mod handlers;
mod middleware;
mod models;

use std::sync::Arc;

use axum::middleware as axum_mw;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::sandbox::manager::SandboxManager;

/// Shared application state available to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub manager: Arc<SandboxManager>,
}

/// Build the complete API router with auth and content-type middleware.
pub fn router(config: Arc<Config>, manager: Arc<SandboxManager>) -> Router {
    let state = AppState { config, manager };

    // Routes that require authentication (when API_KEY is set).
    let api_routes = Router::new()
        .route(
            "/sandboxes",
            get(handlers::list_sandboxes).post(handlers::create_sandbox),
        )
        .route(
            "/sandboxes/{id}",
            get(handlers::get_sandbox).delete(handlers::destroy_sandbox),
        )
        .route("/sandboxes/{id}/exec", post(handlers::exec_command))
        .route("/sandboxes/{id}/pause", post(handlers::pause_sandbox))
        .route("/sandboxes/{id}/resume", post(handlers::resume_sandbox))
        .route("/sandboxes/{id}/files/write", post(handlers::write_file))
        .route("/sandboxes/{id}/files/read", get(handlers::read_file))
        .route("/sandboxes/{id}/files/list", get(handlers::list_files))
        .route("/sandboxes/{id}/files/stat", get(handlers::stat_file))
        .route("/sandboxes/{id}/files/mkdir", post(handlers::mkdir))
        .route("/sandboxes/{id}/files/delete", post(handlers::delete_file))
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    // Health endpoint — no auth required.
    let public_routes = Router::new().route("/health", get(handlers::health));

    public_routes
        .merge(api_routes)
        .layer(axum_mw::from_fn(middleware::require_json_content_type))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
