//! Sitemap rewriting: legacy real-path URLs become canonical pretty URLs.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use bytes::Bytes;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::debug;

use crate::application::error::AppError;
use crate::application::ports::{EdgeCache, OriginClient};
use crate::application::proxy::{build_response, forwardable_headers, store_in_background};
use crate::cache::{CacheConfig, CachedResponse, EdgeKey, MapCache};
use crate::domain::maps::{Entry, Maps};

/// `<loc>` values padded with whitespace on both sides.
static PADDED_LOC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<loc>\s+([^<>\s][^<>]*?)\s+</loc>").expect("valid loc regex")
});

static DETAIL_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"https://[^<"]+/products/detail/([^<"]+)"#).expect("valid detail regex")
});

static FAMILY_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"https://[^<"]+/products/family/([^<"]+)"#).expect("valid family regex")
});

const XML_CONTENT_TYPE: &str = "application/xml; charset=utf-8";

#[derive(Clone)]
pub struct SitemapService {
    maps: MapCache,
    origin: Arc<dyn OriginClient>,
    edge: Arc<dyn EdgeCache>,
    public_url: String,
    cache_control: HeaderValue,
}

impl SitemapService {
    pub fn new(
        maps: MapCache,
        origin: Arc<dyn OriginClient>,
        edge: Arc<dyn EdgeCache>,
        public_url: impl Into<String>,
        config: &CacheConfig,
    ) -> Result<Self, AppError> {
        let cache_control = HeaderValue::from_str(&config.sitemap_cache_control())
            .map_err(|err| AppError::unexpected(format!("invalid cache-control policy: {err}")))?;
        Ok(Self {
            maps,
            origin,
            edge,
            public_url: public_url.into(),
            cache_control,
        })
    }

    /// Serve the rewritten sitemap for `key`, from the edge unless `bypass`.
    pub async fn rewrite_sitemap(
        &self,
        key: EdgeKey,
        upstream_url: &str,
        bypass: bool,
    ) -> Result<Response, AppError> {
        if !bypass && let Some(hit) = self.edge.lookup(&key).await {
            return Ok(hit.into_response());
        }

        let upstream = self.origin.get(upstream_url, true).await?;
        if !upstream.status.is_success() {
            debug!(
                target = "canopy::sitemap",
                status = upstream.status.as_u16(),
                url = upstream_url,
                "upstream sitemap not served; passing through"
            );
            return Ok(build_response(
                upstream.status,
                forwardable_headers(&upstream.headers),
                upstream.body,
            ));
        }

        let Ok(document) = std::str::from_utf8(&upstream.body) else {
            debug!(
                target = "canopy::sitemap",
                url = upstream_url,
                "sitemap body is not text; passing through"
            );
            return Ok(build_response(
                upstream.status,
                forwardable_headers(&upstream.headers),
                upstream.body,
            ));
        };

        let maps = self.maps.get_maps().await?;
        let rewritten = Bytes::from(rewrite_document(document, &maps, &self.public_url));

        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(XML_CONTENT_TYPE),
        );
        headers.insert(header::CACHE_CONTROL, self.cache_control.clone());

        let cached = CachedResponse::new(StatusCode::OK, &headers, rewritten.clone());
        store_in_background(self.edge.clone(), key, cached);

        Ok(build_response(StatusCode::OK, headers, rewritten))
    }
}

/// Normalize padded `<loc>` values, then swap every known detail and family
/// URL for `public_url` + its pretty path. Unknown URLs are left untouched.
pub fn rewrite_document(document: &str, maps: &Maps, public_url: &str) -> String {
    let normalized = PADDED_LOC.replace_all(document, "<loc>$1</loc>");
    let detail = substitute(&DETAIL_URL, normalized, &maps.detail, public_url);
    substitute(&FAMILY_URL, detail, &maps.family, public_url).into_owned()
}

fn substitute<'a>(
    pattern: &Regex,
    document: Cow<'a, str>,
    table: &BTreeMap<String, Entry>,
    public_url: &str,
) -> Cow<'a, str> {
    let replaced = match pattern.replace_all(&document, |caps: &Captures<'_>| {
        match table.get(&caps[1]) {
            Some(entry) => format!("{public_url}{}", entry.pretty_path),
            None => caps[0].to_string(),
        }
    }) {
        Cow::Borrowed(_) => None,
        Cow::Owned(owned) => Some(owned),
    };
    match replaced {
        Some(owned) => Cow::Owned(owned),
        None => document,
    }
}
