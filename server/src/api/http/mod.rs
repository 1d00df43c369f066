//! HTTP API handlers

mod credential;
mod health;
mod instance;

use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::AppState;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Instance routes
        .route(
            "/instances",
            get(instance::list_instances).post(instance::create_instance),
        )
        .route("/instances/reorder", post(instance::reorder_instances))
        .route(
            "/instances/{id}",
            put(instance::update_instance).delete(instance::delete_instance),
        )
        .route("/instances/{id}/start", post(instance::start_instance))
        .route("/instances/{id}/stop", post(instance::stop_instance))
        .route("/instances/{id}/quota", get(instance::get_quota))
        // Credential routes
        .route(
            "/credentials/{account_type}",
            get(credential::list_credentials),
        )
        .route(
            "/credentials/{account_type}/{file}/projects",
            get(credential::resolve_projects),
        );

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
