//! Download endpoint.

use axum::{
    extract::{Path, State},
    routing::get,
    Router,
};

use crate::error::AppError;
use crate::gateway::Download;
use crate::state::AppState;

/// Creates the download router.
///
/// The name is captured with a wildcard so that names containing `/` reach
/// the handler and are rejected as malformed rather than falling through to
/// the router's 404.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/download/{*name}", get(download))
        .with_state(state)
}

/// GET /download/{identifier}_{name}.mp3
async fn download(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Download, AppError> {
    let download = state.gateway.open(&name).await.map_err(|e| {
        tracing::debug!(requested = %name, error = %e, "Download rejected");
        e
    })?;

    tracing::info!(stored_name = %download.name, size = download.size, "Serving artifact");
    Ok(download)
}
