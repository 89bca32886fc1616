//! `/downloads/provider` — serves a cached archive directly, or falls back
//! to reverse-proxying the reconstructed upstream URL.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use proxy_http::{Controller, ProxyRequest};
use tokio::fs::File;
use tokio_util::io::ReaderStream;

use crate::state::AppState;

pub struct DownloaderController;

impl Controller<AppState> for DownloaderController {
    fn register(&self, router: Router<AppState>) -> Router<AppState> {
        router.route("/downloads/provider/:remote_host/*remote_path", get(download))
    }
}

async fn download(
    State(state): State<AppState>,
    Path((remote_host, remote_path)): Path<(String, String)>,
) -> Response {
    let upstream_url = format!("https://{remote_host}/{remote_path}");

    if let Some(entry) = state.cache.find_by_download_url(&upstream_url) {
        return match serve_archive(&entry.archive_path).await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(error = %e, path = %entry.archive_path.display(), "serving cached archive");
                proxy_upstream(&state, &upstream_url).await
            }
        };
    }

    proxy_upstream(&state, &upstream_url).await
}

async fn serve_archive(path: &std::path::Path) -> std::io::Result<Response> {
    let file = File::open(path).await?;
    let len = file.metadata().await?.len();
    let stream = ReaderStream::new(file);

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_LENGTH, len.to_string()),
        ],
        axum::body::Body::from_stream(stream),
    )
        .into_response())
}

async fn proxy_upstream(state: &AppState, upstream_url: &str) -> Response {
    let url = match url::Url::parse(upstream_url) {
        Ok(u) => u,
        Err(e) => {
            return (
                StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    };

    match ProxyRequest::new(state.http.clone(), axum::http::Method::GET, url)
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(e) => e.into_response(),
    }
}
