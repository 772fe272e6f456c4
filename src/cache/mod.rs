//! Canopy cache system
//!
//! Two independent caches live here:
//!
//! - **Map cache**: the slug-to-path snapshot, memoized in process and
//!   persisted to the durable store, rebuilt single-flight.
//! - **Edge store**: proxied and rewritten HTTP responses keyed by request.
//!
//! ## Configuration
//!
//! Both are tuned from the `[cache]` section of `canopy.toml`:
//!
//! ```toml
//! [cache]
//! memo_ttl_seconds = 300
//! snapshot_ttl_seconds = 86400
//! edge_response_limit = 500
//! # ... see config.rs for all options
//! ```

mod config;
mod keys;
mod lock;
mod maps;
mod store;

pub use config::CacheConfig;
pub use keys::EdgeKey;
pub use maps::{CollectionIds, MapCache, RebuildError, SNAPSHOT_KEY};
pub use store::{CachedResponse, EdgeStore};
