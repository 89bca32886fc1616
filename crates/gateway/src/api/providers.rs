//! `/v1/providers` — versions proxy and find-a-package with URL rewrite.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use provider_auth::{Hash, SigningKey};
use provider_cache::PackageAuthContext;
use provider_identity::{ProviderIdentity, Sentinel};
use proxy_http::{modify_json_body, strip_accept_encoding, Controller, ProxyRequest};
use serde::Deserialize;
use serde_json::{Map, Value};
use url::Url;

use crate::api::auth::ProviderAuthGuard;
use crate::state::AppState;

const REWRITTEN_FIELDS: [&str; 3] = ["download_url", "shasums_url", "shasums_signature_url"];

/// The `signing_keys` object on a find-package response, per the
/// provider-registry protocol.
#[derive(Debug, Deserialize)]
struct SigningKeysDoc {
    #[serde(default)]
    gpg_public_keys: Vec<GpgPublicKey>,
}

#[derive(Debug, Deserialize)]
struct GpgPublicKey {
    ascii_armor: String,
    #[serde(default)]
    trust_signature: Option<String>,
}

pub struct ProviderController;

impl Controller<AppState> for ProviderController {
    fn register(&self, router: Router<AppState>) -> Router<AppState> {
        router
            .route("/v1/providers/:registry/:namespace/:name/versions", get(versions))
            .route(
                "/v1/providers/:registry/:namespace/:name/:version/download/:os/:arch",
                get(find_package),
            )
    }
}

async fn versions(
    State(state): State<AppState>,
    _guard: ProviderAuthGuard,
    Path((registry, namespace, name)): Path<(String, String, String)>,
) -> Response {
    if !known_registry(&state, &registry) {
        return unknown_registry();
    }

    let identity = ProviderIdentity::new(registry, namespace, name, "", "", "");
    let url = match identity.versions_url() {
        Ok(u) => u,
        Err(e) => return bad_gateway(e),
    };

    match ProxyRequest::new(state.http.clone(), axum::http::Method::GET, url)
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(e) => e.into_response(),
    }
}

async fn find_package(
    State(state): State<AppState>,
    _guard: ProviderAuthGuard,
    Path((registry, namespace, name, version, os, arch)): Path<(
        String,
        String,
        String,
        String,
        String,
        String,
    )>,
) -> Response {
    if !known_registry(&state, &registry) {
        return unknown_registry();
    }

    let mut identity = ProviderIdentity::new(registry, namespace, name, version, os, arch);
    let mut need_cache = false;
    let mut keep_archive = false;

    match identity.sentinel() {
        Some(Sentinel::CacheProviderAndArchive) => {
            need_cache = true;
            keep_archive = true;
            let (host_os, host_arch) = host_platform();
            identity = identity.with_platform(host_os, host_arch);
        }
        Some(Sentinel::CacheProvider) => {
            need_cache = true;
            let (host_os, host_arch) = host_platform();
            identity = identity.with_platform(host_os, host_arch);
        }
        None => {}
    }

    let url = match identity.package_url() {
        Ok(u) => u,
        Err(e) => return bad_gateway(e),
    };

    let upstream = match strip_accept_encoding(state.http.get(url)).send().await {
        Ok(r) => r,
        Err(e) => return proxy_http::ProxyError::Upstream(e).into_response(),
    };

    let local_host = state.config.server.host.clone();
    let local_port = state.config.server.port;
    let mut captured_download_url: Option<String> = None;
    let mut captured_shasums_url: Option<String> = None;
    let mut captured_shasums_signature_url: Option<String> = None;
    let mut auth_context: Option<PackageAuthContext> = None;

    let rewritten = modify_json_body::<Map<String, Value>, _>(upstream, |body| {
        auth_context = parse_auth_context(body);
        captured_download_url =
            rewrite_package_urls(body, &local_host, local_port, "download_url");
        captured_shasums_url = rewrite_package_urls(body, &local_host, local_port, "shasums_url");
        captured_shasums_signature_url =
            rewrite_package_urls(body, &local_host, local_port, "shasums_signature_url");
    })
    .await;

    let rewritten = match rewritten {
        Ok(r) => r,
        Err(e) => return e.into_response(),
    };

    // Upstream returned something other than 2xx: `modify_json_body` leaves
    // the body (and the capture closures) untouched in that case, so forward
    // the real status verbatim instead of scheduling a cache populate that
    // has nothing to fetch.
    if !need_cache || !rewritten.status().is_success() {
        return rewritten;
    }

    if let Some(download_url) = captured_download_url {
        if let Some(auth) = &mut auth_context {
            if let Some(shasums_url) = captured_shasums_url {
                auth.shasums_url = shasums_url;
            }
            if let Some(shasums_signature_url) = captured_shasums_signature_url {
                auth.shasums_signature_url = shasums_signature_url;
            }
        }
        identity.download_url = Some(download_url);
        state.cache.cache_provider(identity, keep_archive, auth_context);
    }

    StatusCode::LOCKED.into_response()
}

/// Builds the authentication context from a find-package response body, if
/// it carries a `shasum`. The `shasums_url`/`shasums_signature_url` fields
/// are filled in separately with their pre-rewrite values since this runs
/// before those fields are captured.
fn parse_auth_context(body: &Map<String, Value>) -> Option<PackageAuthContext> {
    let shasum = body.get("shasum")?.as_str()?;
    let signing_keys = body
        .get("signing_keys")
        .cloned()
        .and_then(|v| serde_json::from_value::<SigningKeysDoc>(v).ok())
        .map(|doc| {
            doc.gpg_public_keys
                .into_iter()
                .map(|k| match k.trust_signature {
                    Some(sig) => SigningKey::new(k.ascii_armor).with_trust_signature(sig),
                    None => SigningKey::new(k.ascii_armor),
                })
                .collect()
        })
        .unwrap_or_default();

    Some(PackageAuthContext {
        expected_hash: Hash::from_hex(shasum),
        shasums_url: String::new(),
        shasums_signature_url: String::new(),
        signing_keys,
    })
}

/// Rewrites one URL field in place, returning its pre-rewrite value (used to
/// capture the real upstream `download_url` before it's replaced). Leaves
/// the field untouched if it's missing, not a string, or not a valid URL —
/// per the JSON-rewrite error policy, a malformed field aborts the rewrite
/// for that field only.
fn rewrite_package_urls(
    body: &mut Map<String, Value>,
    local_host: &str,
    local_port: u16,
    field: &str,
) -> Option<String> {
    let raw = body.get(field)?.as_str()?.to_string();
    let remote = Url::parse(&raw).ok()?;
    let remote_host = remote.host_str()?;
    let remote_path = remote.path().trim_start_matches('/');

    let local_url = format!("http://{local_host}:{local_port}/downloads/provider/{remote_host}/{remote_path}");
    body.insert(field.to_string(), Value::String(local_url));
    Some(raw)
}

/// Maps `std::env::consts::{OS,ARCH}` onto the provider-registry protocol's
/// platform vocabulary (`linux`/`darwin`/`windows`, `amd64`/`386`/`arm64`/`arm`).
fn host_platform() -> (&'static str, &'static str) {
    let os = match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    };
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "x86" => "386",
        "aarch64" => "arm64",
        other => other,
    };
    (os, arch)
}

fn known_registry(state: &AppState, registry: &str) -> bool {
    state
        .config
        .cache
        .registry_names
        .iter()
        .any(|r| r == registry)
}

fn unknown_registry() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "unknown registry" })),
    )
        .into_response()
}

fn bad_gateway(e: impl std::fmt::Display) -> Response {
    (
        StatusCode::BAD_GATEWAY,
        Json(serde_json::json!({ "error": e.to_string() })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrite_package_urls_rewrites_and_returns_original() {
        let mut body: Map<String, Value> = serde_json::from_value(serde_json::json!({
            "download_url": "https://registry.example.com/a/b.zip",
            "os": "linux",
        }))
        .unwrap();

        let original = rewrite_package_urls(&mut body, "localhost", 5758, "download_url");
        assert_eq!(original.as_deref(), Some("https://registry.example.com/a/b.zip"));
        assert_eq!(
            body["download_url"].as_str().unwrap(),
            "http://localhost:5758/downloads/provider/registry.example.com/a/b.zip"
        );
        assert_eq!(body["os"].as_str().unwrap(), "linux");
    }

    #[test]
    fn rewrite_package_urls_leaves_malformed_field_untouched() {
        let mut body: Map<String, Value> = serde_json::from_value(serde_json::json!({
            "download_url": 42,
        }))
        .unwrap();

        let original = rewrite_package_urls(&mut body, "localhost", 5758, "download_url");
        assert_eq!(original, None);
        assert_eq!(body["download_url"], Value::from(42));
    }

    #[test]
    fn parse_auth_context_reads_shasum_and_signing_keys() {
        let body: Map<String, Value> = serde_json::from_value(serde_json::json!({
            "shasum": "a".repeat(64),
            "signing_keys": {
                "gpg_public_keys": [
                    {"ascii_armor": "-----BEGIN PGP PUBLIC KEY-----", "trust_signature": "sig"},
                    {"ascii_armor": "-----BEGIN PGP PUBLIC KEY-----"},
                ]
            }
        }))
        .unwrap();

        let ctx = parse_auth_context(&body).unwrap();
        assert_eq!(ctx.expected_hash.hex(), "a".repeat(64));
        assert_eq!(ctx.signing_keys.len(), 2);
        assert_eq!(ctx.signing_keys[0].trust_signature.as_deref(), Some("sig"));
        assert!(ctx.signing_keys[1].trust_signature.is_none());
    }

    #[test]
    fn parse_auth_context_none_without_shasum() {
        let body: Map<String, Value> = serde_json::from_value(serde_json::json!({
            "download_url": "https://registry.example.com/a/b.zip",
        }))
        .unwrap();
        assert!(parse_auth_context(&body).is_none());
    }

    #[test]
    fn host_platform_maps_macos_to_darwin() {
        let (os, _arch) = host_platform();
        assert_ne!(os, "macos");
    }
}
