//! A thin builder over `reqwest` for issuing an outbound request and
//! streaming (or rewriting) the response back to an axum client.

use std::future::Future;
use std::pin::Pin;

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("upstream request failed: {0}")]
    Upstream(#[source] reqwest::Error),

    #[error("decoding proxied body: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("building proxied response: {0}")]
    Build(#[source] axum::http::Error),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        tracing::warn!(error = %self, "reverse proxy error");
        (StatusCode::BAD_GATEWAY, self.to_string()).into_response()
    }
}

type RewriteFn = Box<dyn FnOnce(reqwest::RequestBuilder) -> reqwest::RequestBuilder + Send>;
type ModifyResponseFn = Box<
    dyn FnOnce(reqwest::Response) -> Pin<Box<dyn Future<Output = Result<Response, ProxyError>> + Send>>
        + Send,
>;

/// Constructs and issues an outbound request to `url`, optionally rewriting
/// the request before it's sent and the response before it's returned.
pub struct ProxyRequest {
    client: reqwest::Client,
    method: Method,
    url: url::Url,
    rewrite: Option<RewriteFn>,
    modify_response: Option<ModifyResponseFn>,
}

impl ProxyRequest {
    pub fn new(client: reqwest::Client, method: Method, url: url::Url) -> Self {
        Self {
            client,
            method,
            url,
            rewrite: None,
            modify_response: None,
        }
    }

    /// Mutate the outbound request before it's sent — e.g. to strip
    /// `Accept-Encoding` so the response body arrives uncompressed and can
    /// be rewritten downstream.
    pub fn with_rewrite<F>(mut self, f: F) -> Self
    where
        F: FnOnce(reqwest::RequestBuilder) -> reqwest::RequestBuilder + Send + 'static,
    {
        self.rewrite = Some(Box::new(f));
        self
    }

    /// Called once the response headers are in, before the body is
    /// streamed to the client. May consume and replace the body entirely.
    pub fn with_modify_response<F, Fut>(mut self, f: F) -> Self
    where
        F: FnOnce(reqwest::Response) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Response, ProxyError>> + Send + 'static,
    {
        self.modify_response = Some(Box::new(move |resp| Box::pin(f(resp))));
        self
    }

    pub async fn send(self) -> Result<Response, ProxyError> {
        let mut builder = self.client.request(self.method, self.url);
        if let Some(rewrite) = self.rewrite {
            builder = rewrite(builder);
        }
        let response = builder.send().await.map_err(ProxyError::Upstream)?;

        match self.modify_response {
            Some(modify) => modify(response).await,
            None => stream_passthrough(response),
        }
    }
}

/// Strips response compression so an upstream body can be decoded and
/// rewritten in place (used before find-package URL rewriting).
pub fn strip_accept_encoding(builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
    builder.header(reqwest::header::ACCEPT_ENCODING, "identity")
}

fn stream_passthrough(response: reqwest::Response) -> Result<Response, ProxyError> {
    let status = StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = Response::builder().status(status);
    for (name, value) in response.headers().iter() {
        builder = builder.header(name.clone(), value.clone());
    }
    builder
        .body(Body::from_stream(response.bytes_stream()))
        .map_err(ProxyError::Build)
}

/// On a 2xx response, decodes the full body as JSON of shape `T`, runs
/// `modify` over it, re-encodes, and installs the new body with an updated
/// `Content-Length`. Non-2xx bodies are passed through untouched.
pub async fn modify_json_body<T, F>(response: reqwest::Response, modify: F) -> Result<Response, ProxyError>
where
    T: serde::de::DeserializeOwned + serde::Serialize,
    F: FnOnce(&mut T),
{
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.bytes().await.map_err(ProxyError::Upstream)?;
    rewrite_json_bytes(status, &headers, bytes, modify)
}

/// Synchronous core of [`modify_json_body`], split out so it can be tested
/// without constructing a real `reqwest::Response`.
fn rewrite_json_bytes<T, F>(
    status: reqwest::StatusCode,
    headers: &HeaderMap,
    bytes: Bytes,
    modify: F,
) -> Result<Response, ProxyError>
where
    T: serde::de::DeserializeOwned + serde::Serialize,
    F: FnOnce(&mut T),
{
    if !status.is_success() {
        return passthrough_bytes(status, headers, bytes);
    }

    let mut value: T = serde_json::from_slice(&bytes).map_err(ProxyError::Decode)?;
    modify(&mut value);
    let encoded = serde_json::to_vec(&value).map_err(ProxyError::Decode)?;
    passthrough_bytes(status, headers, Bytes::from(encoded))
}

fn passthrough_bytes(
    status: reqwest::StatusCode,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let status = StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = Response::builder().status(status);
    for (name, value) in headers.iter() {
        if name == reqwest::header::CONTENT_LENGTH || name == reqwest::header::TRANSFER_ENCODING {
            continue;
        }
        builder = builder.header(name.clone(), value.clone());
    }
    builder = builder.header(axum::http::header::CONTENT_LENGTH, body.len());
    builder.body(Body::from(body)).map_err(ProxyError::Build)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Shape {
        download_url: String,
        #[serde(default)]
        extra: Option<String>,
    }

    #[tokio::test]
    async fn rewrite_json_bytes_rewrites_and_preserves_unknown_fields() {
        let body = serde_json::json!({
            "download_url": "https://upstream.example.com/a.zip",
            "extra": "kept"
        })
        .to_string();

        let rewritten = rewrite_json_bytes::<Shape, _>(
            reqwest::StatusCode::OK,
            &HeaderMap::new(),
            Bytes::from(body),
            |shape| {
                shape.download_url =
                    "http://localhost:5758/downloads/provider/upstream.example.com/a.zip".to_string();
            },
        )
        .unwrap();

        assert_eq!(rewritten.status(), StatusCode::OK);
        let content_length = rewritten
            .headers()
            .get(axum::http::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap();

        let body_bytes = axum::body::to_bytes(rewritten.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(body_bytes.len(), content_length);
        let decoded: Shape = serde_json::from_slice(&body_bytes).unwrap();
        assert_eq!(
            decoded.download_url,
            "http://localhost:5758/downloads/provider/upstream.example.com/a.zip"
        );
        assert_eq!(decoded.extra.as_deref(), Some("kept"));
    }

    #[tokio::test]
    async fn rewrite_json_bytes_passes_through_non_2xx() {
        let passed = rewrite_json_bytes::<Shape, _>(
            reqwest::StatusCode::NOT_FOUND,
            &HeaderMap::new(),
            Bytes::from_static(b"not found"),
            |_| panic!("modify must not run on non-2xx responses"),
        )
        .unwrap();

        assert_eq!(passed.status(), StatusCode::NOT_FOUND);
        let body_bytes = axum::body::to_bytes(passed.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body_bytes[..], b"not found");
    }
}
