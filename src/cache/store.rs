//! In-process edge response store.
//!
//! LRU-bounded, request-keyed, and aware of each entry's own
//! `Cache-Control` lifetime.

use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, StatusCode, header::CACHE_CONTROL},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use lru::LruCache;
use metrics::counter;
use tracing::debug;

use crate::application::ports::{EdgeCache, EdgeError};

use super::config::CacheConfig;
use super::keys::EdgeKey;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

pub(crate) const METRIC_EDGE_HIT: &str = "canopy_edge_hit_total";
pub(crate) const METRIC_EDGE_MISS: &str = "canopy_edge_miss_total";
pub(crate) const METRIC_EDGE_EVICT: &str = "canopy_edge_evict_total";

/// Buffered response as held by the edge cache.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    stored_at: Instant,
}

impl CachedResponse {
    pub fn new(status: StatusCode, headers: &HeaderMap, body: Bytes) -> Self {
        Self {
            status: status.as_u16(),
            headers: headers
                .iter()
                .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
                .collect(),
            body,
            stored_at: Instant::now(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Lifetime granted by `s-maxage`, falling back to `max-age`.
    /// `None` when the response carries neither.
    pub fn freshness_lifetime(&self) -> Option<Duration> {
        let policy = self.header(CACHE_CONTROL.as_str())?;
        let directive = |name: &str| {
            policy.split(',').find_map(|part| {
                let (key, value) = part.trim().split_once('=')?;
                key.eq_ignore_ascii_case(name)
                    .then(|| value.trim().trim_matches('"').parse::<u64>().ok())
                    .flatten()
            })
        };
        directive("s-maxage")
            .or_else(|| directive("max-age"))
            .map(Duration::from_secs)
    }

    pub fn is_fresh(&self, now: Instant) -> bool {
        match self.freshness_lifetime() {
            Some(lifetime) => now.saturating_duration_since(self.stored_at) < lifetime,
            None => true,
        }
    }

    fn is_storable(&self) -> bool {
        self.header(CACHE_CONTROL.as_str()).is_none_or(|policy| {
            let policy = policy.to_ascii_lowercase();
            !policy.contains("no-store") && !policy.contains("private")
        })
    }

    pub fn into_response(self) -> Response {
        let mut builder = Response::builder().status(self.status);

        for (name, value) in self.headers {
            if let Ok(header_value) = HeaderValue::from_str(&value) {
                builder = builder.header(name, header_value);
            }
        }

        builder
            .body(Body::from(self.body))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
    }
}

/// Default `EdgeCache` implementation.
pub struct EdgeStore {
    responses: RwLock<LruCache<EdgeKey, CachedResponse>>,
}

impl EdgeStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            responses: RwLock::new(LruCache::new(config.edge_response_limit_non_zero())),
        }
    }

    pub fn len(&self) -> usize {
        rw_read(&self.responses, SOURCE, "edge_len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EdgeCache for EdgeStore {
    async fn lookup(&self, key: &EdgeKey) -> Option<CachedResponse> {
        let mut responses = rw_write(&self.responses, SOURCE, "edge_lookup");
        let hit = match responses.get(key) {
            Some(cached) if cached.is_fresh(Instant::now()) => Some(cached.clone()),
            Some(_) => {
                responses.pop(key);
                None
            }
            None => None,
        };
        drop(responses);

        if hit.is_some() {
            counter!(METRIC_EDGE_HIT).increment(1);
            debug!(target = "canopy::cache::edge", key = %key, outcome = "hit");
        } else {
            counter!(METRIC_EDGE_MISS).increment(1);
            debug!(target = "canopy::cache::edge", key = %key, outcome = "miss");
        }
        hit
    }

    async fn store(&self, key: EdgeKey, response: CachedResponse) -> Result<(), EdgeError> {
        if !response.is_storable() {
            return Err(EdgeError::Rejected(format!(
                "`{key}` is marked private or no-store"
            )));
        }

        let evicted = rw_write(&self.responses, SOURCE, "edge_store").push(key.clone(), response);
        if let Some((evicted_key, _)) = evicted
            && evicted_key != key
        {
            counter!(METRIC_EDGE_EVICT).increment(1);
        }
        Ok(())
    }

    async fn invalidate_all(&self) {
        let mut responses = rw_write(&self.responses, SOURCE, "edge_invalidate_all");
        let dropped = responses.len();
        responses.clear();
        drop(responses);
        debug!(target = "canopy::cache::edge", dropped, "edge store cleared");
    }
}
