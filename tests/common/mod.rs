#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use bytes::Bytes;
use canopy::application::ports::{
    ContentSource, EdgeCache, FetchError, KeyValueStore, OriginClient, OriginError,
    OriginResponse, PurgeError, Purger, StoreError,
};
use canopy::application::{
    proxy::ProxyService, rebuild::RebuildService, sitemap::SitemapService,
};
use canopy::cache::{CacheConfig, CollectionIds, EdgeStore, MapCache};
use canopy::config::SiteSettings;
use canopy::domain::items::RawItem;
use canopy::infra::http::{HttpState, WebhookVerifier};
use canopy::infra::kv::MemoryKvStore;
use serde_json::{Value, json};

pub const ORIGIN: &str = "https://origin.test";
pub const PUBLIC_URL: &str = "https://www.example.test";
pub const HOOK_SECRET: &str = "hook-secret";

/// In-memory content store; collections can be swapped between rebuilds.
#[derive(Default)]
pub struct FakeSource {
    collections: Mutex<HashMap<String, Vec<RawItem>>>,
    fetches: AtomicUsize,
    fail: AtomicBool,
}

impl FakeSource {
    pub fn seeded() -> Arc<Self> {
        let source = Self::default();
        source.set("ov", vec![RawItem::new("ov1", "electronics")]);
        source.set(
            "fam",
            vec![RawItem::new("f1", "cables").with_field("belongs-to", json!("ov1"))],
        );
        source.set(
            "det",
            vec![RawItem::new("d1", "usb-c").with_field("product-family", json!("f1"))],
        );
        Arc::new(source)
    }

    pub fn set(&self, collection: &str, items: Vec<RawItem>) {
        self.collections
            .lock()
            .expect("collections lock")
            .insert(collection.to_string(), items);
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentSource for FakeSource {
    async fn fetch_all(&self, collection_id: &str) -> Result<Vec<RawItem>, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(FetchError::Status {
                collection: collection_id.to_string(),
                status: 503,
            });
        }
        Ok(self
            .collections
            .lock()
            .expect("collections lock")
            .get(collection_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Origin serving canned bodies by URL; unknown URLs answer 404.
#[derive(Default)]
pub struct FakeOrigin {
    pages: Mutex<HashMap<String, (StatusCode, &'static str, Bytes)>>,
    requests: Mutex<Vec<(String, bool)>>,
}

impl FakeOrigin {
    pub fn serve(&self, url: &str, content_type: &'static str, body: impl Into<Bytes>) {
        self.pages
            .lock()
            .expect("pages lock")
            .insert(url.to_string(), (StatusCode::OK, content_type, body.into()));
    }

    pub fn requests(&self) -> Vec<(String, bool)> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl OriginClient for FakeOrigin {
    async fn get(&self, url: &str, bypass_cache: bool) -> Result<OriginResponse, OriginError> {
        self.requests
            .lock()
            .expect("requests lock")
            .push((url.to_string(), bypass_cache));

        if url.contains("/unreachable") {
            return Err(OriginError::Unreachable {
                url: url.to_string(),
                message: "connection refused".to_string(),
            });
        }

        let page = self.pages.lock().expect("pages lock").get(url).cloned();
        let (status, content_type, body) =
            page.unwrap_or((StatusCode::NOT_FOUND, "text/html", Bytes::from_static(b"missing")));
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        Ok(OriginResponse {
            status,
            headers,
            body,
        })
    }
}

/// Durable store that never retains anything.
pub struct ForgetfulStore;

#[async_trait]
impl KeyValueStore for ForgetfulStore {
    async fn get(&self, _key: &str) -> Result<Option<Value>, StoreError> {
        Ok(None)
    }

    async fn put(&self, _key: &str, _value: Value, _ttl: Duration) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingPurger {
    batches: Mutex<Vec<Vec<String>>>,
}

impl RecordingPurger {
    pub fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().expect("batches lock").clone()
    }
}

#[async_trait]
impl Purger for RecordingPurger {
    async fn purge(&self, urls: &[String]) -> Result<(), PurgeError> {
        self.batches
            .lock()
            .expect("batches lock")
            .push(urls.to_vec());
        Ok(())
    }
}

pub fn collection_ids() -> CollectionIds {
    CollectionIds {
        overview: "ov".to_string(),
        family: "fam".to_string(),
        detail: "det".to_string(),
    }
}

pub fn site() -> SiteSettings {
    SiteSettings {
        origin: ORIGIN.to_string(),
        public_url: PUBLIC_URL.to_string(),
        base_path: "/products".to_string(),
        user_agent: "Googlebot".to_string(),
    }
}

pub struct Harness {
    pub state: HttpState,
    pub source: Arc<FakeSource>,
    pub origin: Arc<FakeOrigin>,
    pub edge: Arc<EdgeStore>,
    pub purger: Arc<RecordingPurger>,
}

pub fn harness() -> Harness {
    harness_with(FakeSource::seeded())
}

pub fn harness_with(source: Arc<FakeSource>) -> Harness {
    let config = CacheConfig::default();
    let site = site();
    let maps = MapCache::new(
        config.clone(),
        site.base_path.clone(),
        collection_ids(),
        source.clone(),
        Arc::new(MemoryKvStore::new()),
    );
    let origin = Arc::new(FakeOrigin::default());
    let edge = Arc::new(EdgeStore::new(&config));
    let purger = Arc::new(RecordingPurger::default());

    let edge_port: Arc<dyn EdgeCache> = edge.clone();
    let proxy = ProxyService::new(origin.clone(), edge_port.clone(), &config).expect("proxy");
    let sitemap = SitemapService::new(
        maps.clone(),
        origin.clone(),
        edge_port.clone(),
        PUBLIC_URL,
        &config,
    )
    .expect("sitemap");
    let rebuild = RebuildService::new(
        maps.clone(),
        edge_port,
        Some(purger.clone() as Arc<dyn Purger>),
        PUBLIC_URL,
    );

    let state = HttpState {
        maps,
        proxy: Arc::new(proxy),
        sitemap: Arc::new(sitemap),
        rebuild: Arc::new(rebuild),
        webhook: WebhookVerifier::new(Some(HOOK_SECRET.to_string()), Duration::from_secs(300)),
        site: Arc::new(site),
    };

    Harness {
        state,
        source,
        origin,
        edge,
        purger,
    }
}

/// Let spawned background work (edge stores, rebuilds, purges) run.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}
