//! HTTP routes for the audiodrop server.

pub mod convert;
pub mod download;
pub mod health;
pub mod index;

use axum::http::{header, Method};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Creates the main router with all routes mounted.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(index::router())
        .merge(health::router(state.clone()))
        .merge(convert::router(state.clone()))
        .merge(download::router(state))
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
}

/// Any origin may call the API; browser scripts may read the download headers.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers([header::CONTENT_DISPOSITION, header::CONTENT_LENGTH])
}
