//! # API Forwarder
//!
//! Passes `/api/*` requests through to the upstream API server. The path and
//! query string are kept as received; hop-by-hop headers are stripped in both
//! directions. Requests are never retried since most `/api` calls are not
//! idempotent.

use axum::body::{to_bytes, Body};
use axum::extract::Request;
use axum::http::header::{self, HeaderMap, HeaderName};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use reqwest::redirect::Policy;
use reqwest::{Client, Url};

use crate::error::HubError;

/// Largest request body buffered for forwarding.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// A reqwest client bound to one upstream base URL.
#[derive(Debug, Clone)]
pub struct ApiForwarder {
    client: Client,
    base_url: Url,
}

impl ApiForwarder {
    /// `proxy_url` is `host:port` or a full `http://` URL.
    pub fn new(proxy_url: &str) -> Result<Self, HubError> {
        let raw = if proxy_url.contains("://") {
            proxy_url.to_string()
        } else {
            format!("http://{proxy_url}")
        };
        let base_url = Url::parse(&raw)
            .map_err(|e| HubError::Config(format!("invalid proxy url {proxy_url:?}: {e}")))?;

        let client = Client::builder().redirect(Policy::none()).build()?;

        Ok(Self { client, base_url })
    }

    /// The upstream origin requests are sent to.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Upstream URL for a request path and optional query.
    pub fn upstream_url(&self, path: &str, query: Option<&str>) -> Url {
        let mut url = self.base_url.clone();
        url.set_path(path);
        url.set_query(query);
        url
    }

    /// Forwards one request. Any upstream failure becomes `502 Bad Gateway`.
    pub async fn forward(&self, request: Request) -> Response {
        let path = request.uri().path().to_owned();
        match self.try_forward(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "API forward failed");
                (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
            }
        }
    }

    async fn try_forward(&self, request: Request) -> Result<Response, HubError> {
        let (parts, body) = request.into_parts();
        let url = self.upstream_url(parts.uri.path(), parts.uri.query());
        let body = to_bytes(body, MAX_BODY_BYTES)
            .await
            .map_err(|e| HubError::Body(e.to_string()))?;

        tracing::debug!(method = %parts.method, %url, "Forwarding API request");

        let upstream = self
            .client
            .request(parts.method, url)
            .headers(forwardable_headers(&parts.headers))
            .body(body)
            .send()
            .await?;

        let status = upstream.status();
        let headers = forwardable_headers(upstream.headers());
        let bytes = upstream.bytes().await?;

        let mut response = Response::new(Body::from(bytes));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

/// Copies `headers` minus hop-by-hop fields, those named in `Connection`,
/// `Host` and `Content-Length` (the body is re-framed on each side).
pub fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let named_by_connection: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let drop = HOP_BY_HOP.contains(name)
            || name == header::HOST
            || name == header::CONTENT_LENGTH
            || named_by_connection.iter().any(|n| n == name.as_str());
        if !drop {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn host_port_defaults_to_http() {
        let forwarder = ApiForwarder::new("localhost:8084").unwrap();
        assert_eq!(forwarder.base_url().as_str(), "http://localhost:8084/");
        assert_eq!(
            forwarder
                .upstream_url("/api/ads/list", Some("page=2&q=a%20b"))
                .as_str(),
            "http://localhost:8084/api/ads/list?page=2&q=a%20b"
        );
        assert_eq!(
            forwarder.upstream_url("/api/x", None).as_str(),
            "http://localhost:8084/api/x"
        );
    }

    #[test]
    fn strips_hop_by_hop_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("hub.local"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-trace"));
        headers.insert("x-trace", HeaderValue::from_static("1"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.append("x-custom", HeaderValue::from_static("a"));
        headers.append("x-custom", HeaderValue::from_static("b"));

        let kept = forwardable_headers(&headers);
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[header::CONTENT_TYPE], "application/json");
        assert_eq!(kept.get_all("x-custom").iter().count(), 2);
        assert!(kept.get("x-trace").is_none());
        assert!(kept.get(header::HOST).is_none());
    }

    #[tokio::test]
    async fn unreachable_upstream_is_bad_gateway() {
        let forwarder = ApiForwarder::new("127.0.0.1:1").unwrap();
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/api/orders?x=1")
            .body(Body::from("{}"))
            .unwrap();
        let response = forwarder.forward(request).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
