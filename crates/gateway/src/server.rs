//! Server lifecycle: bind, run the cache worker and the HTTP server
//! concurrently, and drain both on cancellation within the configured
//! grace period.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use provider_cache::{CacheLayout, ProviderCache};
use tfrelay_domain::Config;
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

pub struct BoundServer {
    pub addr: SocketAddr,
    listener: tokio::net::TcpListener,
    state: AppState,
    file_mode: u32,
    shutdown_timeout: Duration,
}

/// Resolves `host:port` and binds immediately — for `port = 0` this is the
/// point at which the OS assigns the ephemeral port callers need to report.
pub async fn listen(config: Arc<Config>) -> anyhow::Result<BoundServer> {
    let addr_str = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr_str)
        .await
        .with_context(|| format!("binding to {addr_str}"))?;
    let addr = listener.local_addr().context("reading bound local address")?;

    let layout = CacheLayout::new(config.cache.resolved_cache_dir());
    let cache = ProviderCache::new(layout);
    let http = reqwest::Client::builder()
        .build()
        .context("building reqwest client")?;
    let state = AppState::new(config.clone(), cache, http);

    Ok(BoundServer {
        addr,
        listener,
        state,
        file_mode: config.cache.extracted_file_mode,
        shutdown_timeout: Duration::from_secs(config.server.shutdown_timeout_secs),
    })
}

impl BoundServer {
    /// Runs the cache worker and the HTTP server concurrently until
    /// `cancel` fires; the server's graceful drain is then bounded by the
    /// configured shutdown timeout while the worker's cleanup runs in
    /// parallel. Returns the aggregated error, if any, of both halves.
    pub async fn run(self, cancel: CancellationToken) -> anyhow::Result<()> {
        let BoundServer {
            addr,
            listener,
            state,
            file_mode,
            shutdown_timeout,
        } = self;

        tracing::info!(%addr, "tfrelay listening");

        let worker = tokio::spawn({
            let cache = state.cache.clone();
            let http = state.http.clone();
            let cancel = cancel.clone();
            async move { provider_cache::run_cache_worker(cache, http, file_mode, cancel).await }
        });

        let app = crate::api::router().with_state(state);
        let shutdown_cancel = cancel.clone();
        let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
            shutdown_cancel.cancelled().await;
        });

        let serve_result = drain_within(serve, cancel, shutdown_timeout).await;
        let worker_result = worker.await.context("cache worker task panicked")?;

        match (serve_result, worker_result) {
            (Ok(()), Ok(())) => Ok(()),
            (Ok(()), Err(e)) => Err(anyhow::anyhow!("cache worker reported errors at shutdown: {e}")),
            (Err(e), Ok(())) => Err(e.context("axum server error")),
            (Err(e), Err(worker_err)) => {
                tracing::error!(error = %worker_err, "cache worker also reported errors at shutdown");
                Err(e.context("axum server error"))
            }
        }
    }
}

/// Runs `serve` to completion (it only returns early on a bind-level I/O
/// error), but once `cancel` fires bounds the remaining graceful-drain wait
/// by `timeout` rather than letting stuck connections block shutdown
/// indefinitely.
async fn drain_within<F>(serve: F, cancel: CancellationToken, timeout: Duration) -> anyhow::Result<()>
where
    F: Future<Output = std::io::Result<()>>,
{
    tokio::pin!(serve);

    tokio::select! {
        res = &mut serve => return res.map_err(anyhow::Error::from),
        _ = cancel.cancelled() => {}
    }

    match tokio::time::timeout(timeout, serve).await {
        Ok(res) => res.map_err(anyhow::Error::from),
        Err(_) => {
            tracing::warn!(?timeout, "graceful shutdown exceeded grace period, forcing exit");
            Ok(())
        }
    }
}
