//! Cache-aside proxy in front of the origin site.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    response::Response,
};
use bytes::Bytes;
use metrics::counter;
use tracing::warn;

use crate::application::error::AppError;
use crate::application::ports::{EdgeCache, OriginClient};
use crate::cache::{CacheConfig, CachedResponse, EdgeKey};
use crate::infra::telemetry::METRIC_BACKGROUND_FAILED;

/// Connection-scoped headers that must not be forwarded.
const HOP_BY_HOP: [header::HeaderName; 6] = [
    header::CONNECTION,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::TE,
    header::TRAILER,
    header::PROXY_AUTHENTICATE,
];

#[derive(Clone)]
pub struct ProxyService {
    origin: Arc<dyn OriginClient>,
    edge: Arc<dyn EdgeCache>,
    cache_control: HeaderValue,
}

impl ProxyService {
    pub fn new(
        origin: Arc<dyn OriginClient>,
        edge: Arc<dyn EdgeCache>,
        config: &CacheConfig,
    ) -> Result<Self, AppError> {
        let cache_control = HeaderValue::from_str(&config.proxy_cache_control())
            .map_err(|err| AppError::unexpected(format!("invalid cache-control policy: {err}")))?;
        Ok(Self {
            origin,
            edge,
            cache_control,
        })
    }

    /// Serve a cached copy of `key` if one is fresh.
    pub async fn cached(&self, key: &EdgeKey) -> Option<Response> {
        self.edge
            .lookup(key)
            .await
            .map(CachedResponse::into_response)
    }

    /// Fetch `upstream_url`, stamp the long-lived cache policy on it and, for
    /// successful idempotent requests, store a copy at the edge in the
    /// background.
    pub async fn proxy_and_cache(
        &self,
        key: EdgeKey,
        upstream_url: &str,
    ) -> Result<Response, AppError> {
        let upstream = self.origin.get(upstream_url, false).await?;

        let mut headers = forwardable_headers(&upstream.headers);
        headers.insert(header::CACHE_CONTROL, self.cache_control.clone());

        let cacheable = upstream.status.is_success()
            && matches!(*key.method(), Method::GET | Method::HEAD);
        if cacheable {
            let cached = CachedResponse::new(upstream.status, &headers, upstream.body.clone());
            store_in_background(self.edge.clone(), key, cached);
        }

        Ok(build_response(upstream.status, headers, upstream.body))
    }
}

/// Write `response` to the edge without holding up the caller. Failures are
/// logged and dropped.
pub(crate) fn store_in_background(edge: Arc<dyn EdgeCache>, key: EdgeKey, response: CachedResponse) {
    tokio::spawn(async move {
        let label = key.to_string();
        if let Err(err) = edge.store(key, response).await {
            counter!(METRIC_BACKGROUND_FAILED, "task" => "edge_store").increment(1);
            warn!(
                target = "canopy::proxy",
                key = %label,
                error = %err,
                "edge store failed"
            );
        }
    });
}

pub(crate) fn forwardable_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = upstream.clone();
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove(header::CONTENT_LENGTH);
    headers
}

pub(crate) fn build_response(status: StatusCode, headers: HeaderMap, body: Bytes) -> Response {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
