// Route definitions for the Assay API

use assay_common::layout::PUBLIC_RESULTS_PREFIX;
use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::{handlers, sessions, AppState};

pub fn routes(state: Arc<AppState>) -> Router {
    // Read-only view of results/, no directory listings, never cached
    let results = ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .service(
            ServeDir::new(state.layout.results_root()).append_index_html_on_directories(false),
        );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/assignments/:id/upload", post(handlers::upload_submission))
        .route("/api/assignments/:id/grade", post(handlers::grade_submission))
        .route("/ws", get(sessions::session_socket))
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics))
        .nest_service(PUBLIC_RESULTS_PREFIX, results)
        .layer(DefaultBodyLimit::max(state.max_upload_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
