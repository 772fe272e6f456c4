//! Map cache: the authoritative `Maps` snapshot.
//!
//! Three tiers back every lookup:
//!
//! - an in-process memo, served while younger than `memo_ttl`;
//! - a durable snapshot under [`SNAPSHOT_KEY`], trusted whenever it decodes;
//! - a full rebuild from the content store.
//!
//! At most one rebuild runs per process. Late callers join the running one
//! and receive the same `Arc<Maps>` (or the same error). A rebuild is
//! spawned onto the runtime, so it completes even if every waiter goes away.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::future::{BoxFuture, FutureExt, Shared};
use metrics::{counter, histogram};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::application::hierarchy::{Collections, resolve_maps};
use crate::application::ports::{ContentSource, FetchError, KeyValueStore};
use crate::domain::maps::{Entry, Maps};

use super::config::CacheConfig;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::maps";

/// Durable-store key holding the serialized snapshot.
pub const SNAPSHOT_KEY: &str = "maps";

pub(crate) const METRIC_MEMO_HIT: &str = "canopy_maps_memo_hit_total";
pub(crate) const METRIC_STORE_HIT: &str = "canopy_maps_store_hit_total";
pub(crate) const METRIC_REBUILD: &str = "canopy_maps_rebuild_total";
pub(crate) const METRIC_REBUILD_JOINED: &str = "canopy_maps_rebuild_joined_total";
pub(crate) const METRIC_REBUILD_FAILED: &str = "canopy_maps_rebuild_failed_total";
pub(crate) const METRIC_REBUILD_MS: &str = "canopy_maps_rebuild_ms";
pub(crate) const METRIC_STALE_SERVED: &str = "canopy_maps_stale_served_total";

/// Content-store collection ids feeding a rebuild.
#[derive(Debug, Clone)]
pub struct CollectionIds {
    pub overview: String,
    pub family: String,
    pub detail: String,
}

#[derive(Debug, Clone, Error)]
pub enum RebuildError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("rebuild task ended abnormally: {0}")]
    Aborted(String),
}

type Flight = Shared<BoxFuture<'static, Result<Arc<Maps>, RebuildError>>>;

struct Memo {
    maps: Arc<Maps>,
    at: Instant,
}

#[derive(Default)]
struct CacheState {
    memo: Option<Memo>,
    /// Bumped on every publication; guards store reads against racing rebuilds.
    epoch: u64,
    in_flight: Option<(u64, Flight)>,
    next_flight: u64,
}

struct MapCacheInner {
    config: CacheConfig,
    base_path: String,
    collections: CollectionIds,
    source: Arc<dyn ContentSource>,
    store: Arc<dyn KeyValueStore>,
    state: Mutex<CacheState>,
}

/// Cheap to clone; clones share one cache state.
#[derive(Clone)]
pub struct MapCache {
    inner: Arc<MapCacheInner>,
}

impl MapCache {
    pub fn new(
        config: CacheConfig,
        base_path: impl Into<String>,
        collections: CollectionIds,
        source: Arc<dyn ContentSource>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            inner: Arc::new(MapCacheInner {
                config,
                base_path: base_path.into(),
                collections,
                source,
                store,
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    /// Last published snapshot regardless of age.
    pub fn snapshot(&self) -> Option<Arc<Maps>> {
        mutex_lock(&self.inner.state, SOURCE, "snapshot")
            .memo
            .as_ref()
            .map(|memo| memo.maps.clone())
    }

    pub fn is_rebuilding(&self) -> bool {
        mutex_lock(&self.inner.state, SOURCE, "is_rebuilding")
            .in_flight
            .is_some()
    }

    pub async fn get_maps(&self) -> Result<Arc<Maps>, RebuildError> {
        let epoch = {
            let state = mutex_lock(&self.inner.state, SOURCE, "get_maps.memo");
            if let Some(memo) = &state.memo
                && memo.at.elapsed() < self.inner.config.memo_ttl()
            {
                counter!(METRIC_MEMO_HIT).increment(1);
                return Ok(memo.maps.clone());
            }
            state.epoch
        };

        if let Some(maps) = self.load_snapshot().await {
            let mut state = mutex_lock(&self.inner.state, SOURCE, "get_maps.store");
            if state.epoch == epoch {
                state.memo = Some(Memo {
                    maps: maps.clone(),
                    at: Instant::now(),
                });
            }
            counter!(METRIC_STORE_HIT).increment(1);
            return Ok(maps);
        }

        match self.rebuild_maps().await {
            Ok(maps) => Ok(maps),
            Err(err) => match self.snapshot() {
                Some(stale) => {
                    counter!(METRIC_STALE_SERVED).increment(1);
                    warn!(
                        target = "canopy::cache::maps",
                        error = %err,
                        "rebuild failed; serving last known-good maps"
                    );
                    Ok(stale)
                }
                None => Err(err),
            },
        }
    }

    /// Rebuild from the content store, joining a rebuild already in flight.
    pub async fn rebuild_maps(&self) -> Result<Arc<Maps>, RebuildError> {
        let flight = {
            let mut state = mutex_lock(&self.inner.state, SOURCE, "rebuild_maps");
            match &state.in_flight {
                Some((_, flight)) => {
                    counter!(METRIC_REBUILD_JOINED).increment(1);
                    flight.clone()
                }
                None => {
                    let id = state.next_flight;
                    state.next_flight += 1;
                    let flight = MapCacheInner::launch(self.inner.clone(), id);
                    state.in_flight = Some((id, flight.clone()));
                    flight
                }
            }
        };

        flight.await
    }

    /// Look a slug up in the detail then family table. A miss forces one
    /// rebuild before absence is reported; if that rebuild fails the miss is
    /// reported as the rebuild error.
    pub async fn find_hit(&self, slug: &str) -> Result<Option<Entry>, RebuildError> {
        let maps = self.get_maps().await?;
        if let Some(hit) = maps.find(slug) {
            return Ok(Some(hit.clone()));
        }

        debug!(
            target = "canopy::cache::maps",
            slug, "slug missing from snapshot, forcing rebuild"
        );
        let maps = self.rebuild_maps().await?;
        Ok(maps.find(slug).cloned())
    }

    async fn load_snapshot(&self) -> Option<Arc<Maps>> {
        match self.inner.store.get(SNAPSHOT_KEY).await {
            Ok(Some(value)) => match serde_json::from_value::<Maps>(value) {
                Ok(maps) => Some(Arc::new(maps)),
                Err(err) => {
                    warn!(
                        target = "canopy::cache::maps",
                        error = %err,
                        "ignoring malformed durable snapshot"
                    );
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!(
                    target = "canopy::cache::maps",
                    error = %err,
                    "durable snapshot read failed"
                );
                None
            }
        }
    }
}

/// Clears the in-flight marker when a rebuild task ends without publishing,
/// including by panic.
struct FlightGuard {
    inner: Arc<MapCacheInner>,
    id: u64,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        let mut state = mutex_lock(&self.inner.state, SOURCE, "flight_guard");
        if state.in_flight.as_ref().is_some_and(|(id, _)| *id == self.id) {
            state.in_flight = None;
        }
    }
}

impl MapCacheInner {
    fn launch(inner: Arc<Self>, id: u64) -> Flight {
        counter!(METRIC_REBUILD).increment(1);
        let task = tokio::spawn(inner.run(id));
        async move {
            task.await
                .unwrap_or_else(|err| Err(RebuildError::Aborted(err.to_string())))
        }
        .boxed()
        .shared()
    }

    async fn run(self: Arc<Self>, id: u64) -> Result<Arc<Maps>, RebuildError> {
        let _guard = FlightGuard {
            inner: self.clone(),
            id,
        };
        let started = Instant::now();
        info!(target = "canopy::cache::maps", flight = id, "rebuilding maps");

        let ids = &self.collections;
        let fetched = tokio::try_join!(
            self.source.fetch_all(&ids.overview),
            self.source.fetch_all(&ids.family),
            self.source.fetch_all(&ids.detail),
        );
        let (overview, family, detail) = match fetched {
            Ok(collections) => collections,
            Err(err) => {
                counter!(METRIC_REBUILD_FAILED).increment(1);
                error!(
                    target = "canopy::cache::maps",
                    flight = id,
                    error = %err,
                    "rebuild failed; keeping previous snapshot"
                );
                return Err(err.into());
            }
        };

        let collections = Collections {
            overview,
            family,
            detail,
        };
        let maps = Arc::new(resolve_maps(&collections, &self.base_path));

        self.persist(&maps).await;

        {
            let mut state = mutex_lock(&self.state, SOURCE, "publish");
            state.memo = Some(Memo {
                maps: maps.clone(),
                at: Instant::now(),
            });
            state.epoch += 1;
            if state.in_flight.as_ref().is_some_and(|(current, _)| *current == id) {
                state.in_flight = None;
            }
        }

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        histogram!(METRIC_REBUILD_MS).record(elapsed_ms);
        info!(
            target = "canopy::cache::maps",
            flight = id,
            families = maps.family.len(),
            details = maps.detail.len(),
            elapsed_ms,
            "maps rebuilt"
        );
        Ok(maps)
    }

    async fn persist(&self, maps: &Maps) {
        let value = match serde_json::to_value(maps) {
            Ok(value) => value,
            Err(err) => {
                warn!(target = "canopy::cache::maps", error = %err, "snapshot encoding failed");
                return;
            }
        };
        if let Err(err) = self
            .store
            .put(SNAPSHOT_KEY, value, self.config.snapshot_ttl())
            .await
        {
            warn!(
                target = "canopy::cache::maps",
                error = %err,
                "snapshot persistence failed; serving from memory only"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{Value, json};
    use tokio::sync::Semaphore;

    use super::*;
    use crate::application::ports::StoreError;
    use crate::domain::items::RawItem;
    use crate::infra::kv::MemoryKvStore;

    /// Content source backed by mutable collections, counting fetches.
    #[derive(Default)]
    struct FakeSource {
        collections: Mutex<HashMap<String, Vec<RawItem>>>,
        fetches: AtomicUsize,
        fail: std::sync::atomic::AtomicBool,
        gate: Option<Semaphore>,
    }

    impl FakeSource {
        fn gated() -> Self {
            Self {
                gate: Some(Semaphore::new(0)),
                ..Default::default()
            }
        }

        fn set(&self, collection: &str, items: Vec<RawItem>) {
            mutex_lock(&self.collections, "test", "set").insert(collection.to_string(), items);
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ContentSource for FakeSource {
        async fn fetch_all(&self, collection_id: &str) -> Result<Vec<RawItem>, FetchError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.acquire().await.expect("gate open").forget();
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(FetchError::Status {
                    collection: collection_id.to_string(),
                    status: 500,
                });
            }
            Ok(mutex_lock(&self.collections, "test", "fetch")
                .get(collection_id)
                .cloned()
                .unwrap_or_default())
        }
    }

    fn ids() -> CollectionIds {
        CollectionIds {
            overview: "ov".to_string(),
            family: "fam".to_string(),
            detail: "det".to_string(),
        }
    }

    fn seeded_source(source: FakeSource) -> Arc<FakeSource> {
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

    fn cache_with(
        source: Arc<FakeSource>,
        store: Arc<MemoryKvStore>,
        config: CacheConfig,
    ) -> MapCache {
        MapCache::new(config, "/products", ids(), source, store)
    }

    #[tokio::test]
    async fn rebuild_publishes_memo_and_persists_snapshot() {
        let source = seeded_source(FakeSource::default());
        let store = Arc::new(MemoryKvStore::new());
        let cache = cache_with(source.clone(), store.clone(), CacheConfig::default());

        let maps = cache.rebuild_maps().await.expect("rebuild");
        assert_eq!(
            maps.detail["usb-c"].pretty_path,
            "/products/electronics/cables/usb-c"
        );
        assert_eq!(source.fetches(), 3);
        assert!(Arc::ptr_eq(&cache.snapshot().expect("memo"), &maps));

        let stored = store.get(SNAPSHOT_KEY).await.expect("read").expect("stored");
        let decoded: Maps = serde_json::from_value(stored).expect("decodes");
        assert_eq!(decoded, *maps);
        assert!(!cache.is_rebuilding());
    }

    #[tokio::test]
    async fn fresh_memo_is_served_without_fetching() {
        let source = seeded_source(FakeSource::default());
        let cache = cache_with(
            source.clone(),
            Arc::new(MemoryKvStore::new()),
            CacheConfig::default(),
        );

        let first = cache.get_maps().await.expect("first");
        let second = cache.get_maps().await.expect("second");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(source.fetches(), 3);
    }

    #[tokio::test]
    async fn durable_snapshot_is_used_before_rebuilding() {
        let source = seeded_source(FakeSource::default());
        let store = Arc::new(MemoryKvStore::new());
        let persisted = Maps::default();
        store
            .put(
                SNAPSHOT_KEY,
                serde_json::to_value(&persisted).expect("encode"),
                Duration::from_secs(60),
            )
            .await
            .expect("seed store");

        let cache = cache_with(source.clone(), store, CacheConfig::default());
        let maps = cache.get_maps().await.expect("maps");

        assert!(maps.is_empty());
        assert_eq!(source.fetches(), 0);
    }

    #[tokio::test]
    async fn malformed_snapshot_triggers_rebuild() {
        let source = seeded_source(FakeSource::default());
        let store = Arc::new(MemoryKvStore::new());
        store
            .put(SNAPSHOT_KEY, json!({ "family": 3 }), Duration::from_secs(60))
            .await
            .expect("seed store");

        let cache = cache_with(source.clone(), store, CacheConfig::default());
        let maps = cache.get_maps().await.expect("maps");

        assert!(maps.detail.contains_key("usb-c"));
        assert_eq!(source.fetches(), 3);
    }

    #[tokio::test]
    async fn concurrent_rebuilds_share_one_flight() {
        let source = seeded_source(FakeSource::gated());
        let cache = cache_with(
            source.clone(),
            Arc::new(MemoryKvStore::new()),
            CacheConfig::default(),
        );

        let waiters: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.rebuild_maps().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.is_rebuilding());
        source.gate.as_ref().expect("gated").add_permits(3);

        let mut results = Vec::new();
        for waiter in waiters {
            results.push(waiter.await.expect("join").expect("rebuild"));
        }

        assert_eq!(source.fetches(), 3);
        assert!(results.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert!(!cache.is_rebuilding());
    }

    #[tokio::test]
    async fn failed_rebuild_keeps_previous_snapshot_and_reaches_all_waiters() {
        let source = seeded_source(FakeSource::default());
        let cache = cache_with(
            source.clone(),
            Arc::new(MemoryKvStore::new()),
            CacheConfig::default(),
        );
        let good = cache.rebuild_maps().await.expect("first rebuild");

        source.fail.store(true, Ordering::SeqCst);
        let (a, b) = tokio::join!(cache.rebuild_maps(), cache.rebuild_maps());

        assert!(matches!(a, Err(RebuildError::Fetch(FetchError::Status { .. }))));
        assert!(matches!(b, Err(RebuildError::Fetch(FetchError::Status { .. }))));
        assert!(Arc::ptr_eq(&cache.snapshot().expect("memo kept"), &good));
        assert!(!cache.is_rebuilding());
    }

    /// Durable store that never retains anything.
    struct ForgetfulStore;

    #[async_trait]
    impl KeyValueStore for ForgetfulStore {
        async fn get(&self, _key: &str) -> Result<Option<Value>, StoreError> {
            Ok(None)
        }

        async fn put(&self, _key: &str, _value: Value, _ttl: Duration) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn expired_memo_is_served_when_rebuild_fails_and_store_is_empty() {
        let source = seeded_source(FakeSource::default());
        let config = CacheConfig {
            memo_ttl_seconds: 0,
            ..Default::default()
        };
        let cache = MapCache::new(
            config,
            "/products",
            ids(),
            source.clone(),
            Arc::new(ForgetfulStore),
        );
        let good = cache.get_maps().await.expect("first build");

        source.fail.store(true, Ordering::SeqCst);

        let served = cache.get_maps().await.expect("last known-good maps");
        assert!(Arc::ptr_eq(&served, &good));

        let known = cache.find_hit("cables").await.expect("lookup");
        assert_eq!(
            known.expect("known slug").pretty_path,
            "/products/electronics/cables"
        );

        // Absence cannot be confirmed while the content store is down.
        assert!(cache.find_hit("nope").await.is_err());
    }

    #[tokio::test]
    async fn cold_cache_reports_rebuild_failure() {
        let source = seeded_source(FakeSource::default());
        source.fail.store(true, Ordering::SeqCst);
        let cache = MapCache::new(
            CacheConfig::default(),
            "/products",
            ids(),
            source,
            Arc::new(ForgetfulStore),
        );

        assert!(matches!(
            cache.get_maps().await,
            Err(RebuildError::Fetch(FetchError::Status { .. }))
        ));
        assert!(cache.snapshot().is_none());
    }

    #[tokio::test]
    async fn find_hit_rebuilds_exactly_once_on_miss() {
        let source = seeded_source(FakeSource::default());
        let cache = cache_with(
            source.clone(),
            Arc::new(MemoryKvStore::new()),
            CacheConfig::default(),
        );
        cache.get_maps().await.expect("prime");
        assert_eq!(source.fetches(), 3);

        source.set(
            "det",
            vec![
                RawItem::new("d1", "usb-c").with_field("product-family", json!("f1")),
                RawItem::new("d2", "hdmi").with_field("product-family", json!("f1")),
            ],
        );

        let hit = cache.find_hit("hdmi").await.expect("lookup").expect("hit");
        assert_eq!(hit.pretty_path, "/products/electronics/cables/hdmi");
        assert_eq!(source.fetches(), 6);

        let known = cache.find_hit("cables").await.expect("lookup");
        assert!(known.is_some());
        assert_eq!(source.fetches(), 6);

        let missing = cache.find_hit("nope").await.expect("lookup");
        assert!(missing.is_none());
        assert_eq!(source.fetches(), 9);
    }

    #[tokio::test]
    async fn stale_memo_is_refreshed_from_store() {
        let source = seeded_source(FakeSource::default());
        let store = Arc::new(MemoryKvStore::new());
        let config = CacheConfig {
            memo_ttl_seconds: 0,
            ..Default::default()
        };
        let cache = cache_with(source.clone(), store, config);

        let rebuilt = cache.get_maps().await.expect("rebuild");
        let reloaded = cache.get_maps().await.expect("store");

        assert_eq!(source.fetches(), 3);
        assert_eq!(*rebuilt, *reloaded);
        assert!(!Arc::ptr_eq(&rebuilt, &reloaded));
    }
}
