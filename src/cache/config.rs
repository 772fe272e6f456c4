//! Cache configuration.
//!
//! Freshness windows for the map snapshot tiers and the `Cache-Control`
//! policies attached to proxied and rewritten responses.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

const DEFAULT_MEMO_TTL_SECS: u64 = 300;
const DEFAULT_SNAPSHOT_TTL_SECS: u64 = 86_400;
const DEFAULT_EDGE_RESPONSE_LIMIT: usize = 500;
const DEFAULT_PROXY_S_MAXAGE_SECS: u64 = 86_400;
const DEFAULT_PROXY_STALE_WHILE_REVALIDATE_SECS: u64 = 31_536_000;
const DEFAULT_SITEMAP_MAX_AGE_SECS: u64 = 120;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How long the in-process snapshot is served without consulting the store.
    pub memo_ttl_seconds: u64,
    /// Expiry attached to the persisted snapshot.
    pub snapshot_ttl_seconds: u64,
    /// Maximum responses held by the in-process edge store.
    pub edge_response_limit: usize,
    pub proxy_s_maxage_seconds: u64,
    pub proxy_stale_while_revalidate_seconds: u64,
    pub sitemap_max_age_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memo_ttl_seconds: DEFAULT_MEMO_TTL_SECS,
            snapshot_ttl_seconds: DEFAULT_SNAPSHOT_TTL_SECS,
            edge_response_limit: DEFAULT_EDGE_RESPONSE_LIMIT,
            proxy_s_maxage_seconds: DEFAULT_PROXY_S_MAXAGE_SECS,
            proxy_stale_while_revalidate_seconds: DEFAULT_PROXY_STALE_WHILE_REVALIDATE_SECS,
            sitemap_max_age_seconds: DEFAULT_SITEMAP_MAX_AGE_SECS,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            memo_ttl_seconds: settings.memo_ttl.as_secs(),
            snapshot_ttl_seconds: settings.snapshot_ttl.as_secs(),
            edge_response_limit: settings.edge_response_limit.get(),
            proxy_s_maxage_seconds: settings.proxy_s_maxage_seconds,
            proxy_stale_while_revalidate_seconds: settings.proxy_stale_while_revalidate_seconds,
            sitemap_max_age_seconds: settings.sitemap_max_age_seconds,
        }
    }
}

impl CacheConfig {
    pub fn memo_ttl(&self) -> Duration {
        Duration::from_secs(self.memo_ttl_seconds)
    }

    pub fn snapshot_ttl(&self) -> Duration {
        Duration::from_secs(self.snapshot_ttl_seconds)
    }

    /// Returns the edge response limit as NonZeroUsize, clamping to 1 if zero.
    pub fn edge_response_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.edge_response_limit).unwrap_or(NonZeroUsize::MIN)
    }

    /// Long-lived public policy stamped on every proxied response.
    pub fn proxy_cache_control(&self) -> String {
        format!(
            "public, s-maxage={}, stale-while-revalidate={}",
            self.proxy_s_maxage_seconds, self.proxy_stale_while_revalidate_seconds
        )
    }

    pub fn sitemap_cache_control(&self) -> String {
        format!("public, max-age={}", self.sitemap_max_age_seconds)
    }
}
