//! Bearer-token guard for `/v1/providers`.
//!
//! If `server.token` is unset (or empty) in configuration, the gate is
//! disabled and every request passes (dev mode). Otherwise the request
//! must carry `Authorization: Bearer <token>` matching the configured
//! token, compared in constant time over its SHA-256 digest.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::Json;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::state::AppState;

pub struct ProviderAuthGuard;

#[async_trait]
impl FromRequestParts<AppState> for ProviderAuthGuard {
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let expected_hash = match &state.api_token_hash {
            Some(h) => h,
            None => return Ok(ProviderAuthGuard),
        };

        let provided = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .unwrap_or("");

        let provided_hash = Sha256::digest(provided.as_bytes());

        if !bool::from(provided_hash.as_slice().ct_eq(expected_hash.as_ref())) {
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({ "error": "invalid or missing bearer token" })),
            ));
        }

        Ok(ProviderAuthGuard)
    }
}
