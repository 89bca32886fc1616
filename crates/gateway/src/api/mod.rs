pub mod auth;
pub mod discovery;
pub mod downloads;
pub mod providers;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use proxy_http::mount_all;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use discovery::DiscoveryController;
use downloads::DownloaderController;
use providers::ProviderController;

/// Build the full API router by mounting each controller in turn, plus a
/// `/healthz` liveness endpoint that isn't part of the registry protocol.
pub fn router() -> Router<AppState> {
    let router = Router::new().route("/healthz", get(healthz));

    mount_all(
        router,
        &[&DiscoveryController, &ProviderController, &DownloaderController],
    )
    .layer(TraceLayer::new_for_http())
}

async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.cache.cache_stats())
}
