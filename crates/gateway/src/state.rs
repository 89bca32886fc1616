use std::sync::Arc;

use provider_cache::ProviderCache;
use tfrelay_domain::Config;

/// Shared process state handed to every controller via axum's `State`
/// extractor. Cloning is cheap — every field is `Arc`-backed or already
/// a cheap-clone handle.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub cache: ProviderCache,
    pub http: reqwest::Client,
    /// SHA-256 digest of the configured bearer token. `None` when no
    /// token is configured (dev mode — `/v1/providers` is unguarded).
    pub api_token_hash: Option<Arc<[u8]>>,
}

impl AppState {
    pub fn new(config: Arc<Config>, cache: ProviderCache, http: reqwest::Client) -> Self {
        let api_token_hash = config
            .server
            .token
            .as_ref()
            .filter(|t| !t.is_empty())
            .map(|t| {
                use sha2::{Digest, Sha256};
                Arc::from(Sha256::digest(t.as_bytes()).as_slice())
            });

        Self {
            config,
            cache,
            http,
            api_token_hash,
        }
    }
}
