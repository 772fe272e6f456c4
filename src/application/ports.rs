//! Capability traits describing the external collaborators of the core.
//!
//! Every adapter in `infra` implements one of these; tests substitute
//! in-memory fakes.

use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;

use crate::cache::{CachedResponse, EdgeKey};
use crate::domain::items::RawItem;

#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("content store request for `{collection}` failed: {message}")]
    Transport { collection: String, message: String },
    #[error("content store answered {status} for `{collection}`")]
    Status { collection: String, status: u16 },
    #[error("content store payload for `{collection}` is malformed: {message}")]
    Decode { collection: String, message: String },
}

/// Paginated read access to the upstream content store.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Every item of a collection, all pages concatenated.
    async fn fetch_all(&self, collection_id: &str) -> Result<Vec<RawItem>, FetchError>;
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("durable store io failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("durable store payload could not be encoded or decoded: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Durable key-value storage with per-key expiry.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;
    async fn put(&self, key: &str, value: Value, ttl: Duration) -> Result<(), StoreError>;
}

#[derive(Debug, Error)]
pub enum EdgeError {
    #[error("edge cache rejected response: {0}")]
    Rejected(String),
}

/// Request-keyed response cache sitting in front of the origin.
#[async_trait]
pub trait EdgeCache: Send + Sync {
    async fn lookup(&self, key: &EdgeKey) -> Option<CachedResponse>;
    async fn store(&self, key: EdgeKey, response: CachedResponse) -> Result<(), EdgeError>;
    /// Drop every stored response.
    async fn invalidate_all(&self);
}

#[derive(Debug, Clone)]
pub struct OriginResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug, Error)]
pub enum OriginError {
    #[error("origin request to `{url}` failed: {message}")]
    Unreachable { url: String, message: String },
}

/// Plain GET access to the proxied site.
#[async_trait]
pub trait OriginClient: Send + Sync {
    /// `bypass_cache` asks intermediaries for a fresh copy.
    async fn get(&self, url: &str, bypass_cache: bool) -> Result<OriginResponse, OriginError>;
}

#[derive(Debug, Error)]
pub enum PurgeError {
    #[error("purge request failed: {0}")]
    Transport(String),
    #[error("purge endpoint answered {0}")]
    Status(u16),
}

/// Bulk URL invalidation at the CDN.
#[async_trait]
pub trait Purger: Send + Sync {
    async fn purge(&self, urls: &[String]) -> Result<(), PurgeError>;
}
