//! `GET /.well-known/terraform.json` — service discovery document.

use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use proxy_http::Controller;

use crate::state::AppState;

pub struct DiscoveryController;

impl Controller<AppState> for DiscoveryController {
    fn register(&self, router: Router<AppState>) -> Router<AppState> {
        router.route("/.well-known/terraform.json", get(discovery))
    }
}

/// The set of endpoints this process advertises, keyed by service name
/// with the absolute path prefix they're mounted under.
async fn discovery() -> impl IntoResponse {
    Json(serde_json::json!({
        "providers.v1": "/v1/providers/",
    }))
}
