use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::{Query, State},
    http::{
        HeaderMap, HeaderValue, Method, Request, StatusCode,
        header::{CACHE_CONTROL, LOCATION},
    },
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::Bytes;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::{
    application::{
        error::{AppError, HttpError},
        proxy::ProxyService,
        rebuild::RebuildService,
        sitemap::SitemapService,
    },
    cache::{EdgeKey, MapCache},
    config::SiteSettings,
    domain::maps::{DETAIL_REAL_PREFIX, FAMILY_REAL_PREFIX},
};

use super::{
    middleware::{log_responses, set_request_context},
    webhook::WebhookVerifier,
};

const OVERVIEW_REAL_PREFIX: &str = "/products/overview/";

static SITEMAP_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/sitemap.*\.xml(?:\.gz)?$").expect("valid sitemap path regex"));

#[derive(Clone)]
pub struct HttpState {
    pub maps: MapCache,
    pub proxy: Arc<ProxyService>,
    pub sitemap: Arc<SitemapService>,
    pub rebuild: Arc<RebuildService>,
    pub webhook: WebhookVerifier,
    pub site: Arc<SiteSettings>,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/__rebuild", get(rebuild_hook).post(rebuild_hook))
        .route("/_health", get(health))
        .fallback(dispatch)
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RebuildQuery {
    key: Option<String>,
}

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn rebuild_hook(
    State(state): State<HttpState>,
    method: Method,
    Query(query): Query<RebuildQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let by_key = query
        .key
        .as_deref()
        .map(|key| state.webhook.verify_key(key));
    let authorized = match by_key {
        Some(Ok(())) => true,
        _ if method == Method::POST => match state.webhook.verify_signature(&headers, &body) {
            Ok(()) => true,
            Err(err) => {
                debug!(target = "canopy::http::rebuild", error = %err, "webhook rejected");
                false
            }
        },
        _ => false,
    };

    if !authorized {
        return Err(AppError::Forbidden);
    }

    state.rebuild.trigger("webhook");
    Ok(StatusCode::NO_CONTENT)
}

/// How an incoming path is served.
#[derive(Debug, PartialEq, Eq)]
enum RouteKind<'a> {
    Sitemap,
    Detail(&'a str),
    Family(&'a str),
    Overview,
    Catalogue,
    Unhandled,
}

fn classify<'a>(path: &'a str, base_path: &str) -> RouteKind<'a> {
    if SITEMAP_PATH.is_match(path) {
        return RouteKind::Sitemap;
    }
    if let Some(slug) = single_segment(path, DETAIL_REAL_PREFIX) {
        return RouteKind::Detail(slug);
    }
    if let Some(slug) = single_segment(path, FAMILY_REAL_PREFIX) {
        return RouteKind::Family(slug);
    }
    if path
        .strip_prefix(OVERVIEW_REAL_PREFIX)
        .is_some_and(|rest| !rest.is_empty())
    {
        return RouteKind::Overview;
    }
    if is_catalogue_path(path, base_path) || path.starts_with("/products/") {
        return RouteKind::Catalogue;
    }
    RouteKind::Unhandled
}

fn single_segment<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    path.strip_prefix(prefix)
        .filter(|slug| !slug.is_empty() && !slug.contains('/'))
}

fn is_catalogue_path(path: &str, base_path: &str) -> bool {
    let prefix = base_path.trim_end_matches('/');
    path.strip_prefix(prefix)
        .is_some_and(|rest| rest.len() > 1 && rest.starts_with('/'))
}

async fn dispatch(State(state): State<HttpState>, request: Request<Body>) -> Response {
    let path = request.uri().path().to_string();
    let key = EdgeKey::for_request(&request);
    let bypass = requests_no_cache(request.headers());

    let result = match classify(&path, &state.site.base_path) {
        RouteKind::Sitemap => {
            let upstream = format!("{}{path}", state.site.origin);
            state.sitemap.rewrite_sitemap(key, &upstream, bypass).await
        }
        RouteKind::Detail(slug) => match state.maps.get_maps().await {
            Ok(maps) => match maps.detail.get(slug) {
                Some(hit) => redirect(&state.site.public_url, &hit.pretty_path),
                None => catalogue(&state, key, &path).await,
            },
            Err(err) => Err(err.into()),
        },
        RouteKind::Family(slug) => match state.maps.get_maps().await {
            Ok(maps) => match maps.family.get(slug) {
                Some(hit) => redirect(&state.site.public_url, &hit.pretty_path),
                None => catalogue(&state, key, &path).await,
            },
            Err(err) => Err(err.into()),
        },
        RouteKind::Overview => {
            let upstream = format!("{}{path}", state.site.origin);
            state.proxy.proxy_and_cache(key, &upstream).await
        }
        RouteKind::Catalogue => catalogue(&state, key, &path).await,
        RouteKind::Unhandled => {
            return HttpError::new(
                "infra::http::public::dispatch",
                StatusCode::NOT_FOUND,
                "Not handled",
                format!("no route serves `{path}`"),
            )
            .into_response();
        }
    };

    result.unwrap_or_else(IntoResponse::into_response)
}

/// Generic catalogue path: edge copy, else resolve the last segment, then
/// redirect to the canonical path or proxy the real one.
async fn catalogue(state: &HttpState, key: EdgeKey, path: &str) -> Result<Response, AppError> {
    if let Some(hit) = state.proxy.cached(&key).await {
        return Ok(hit);
    }

    let slug = path.rsplit('/').next().unwrap_or_default();
    if slug.is_empty() {
        return Err(AppError::NotFound);
    }

    let Some(entry) = state.maps.find_hit(slug).await? else {
        return Err(AppError::NotFound);
    };

    if path != entry.pretty_path {
        return redirect(&state.site.public_url, &entry.pretty_path);
    }

    let upstream = format!("{}{}", state.site.origin, entry.real_path);
    state.proxy.proxy_and_cache(key, &upstream).await
}

fn redirect(public_url: &str, pretty_path: &str) -> Result<Response, AppError> {
    let location = HeaderValue::from_str(&format!("{public_url}{pretty_path}"))
        .map_err(|err| AppError::unexpected(format!("invalid redirect target: {err}")))?;
    Ok((StatusCode::MOVED_PERMANENTLY, [(LOCATION, location)]).into_response())
}

fn requests_no_cache(headers: &HeaderMap) -> bool {
    headers
        .get_all(CACHE_CONTROL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|directive| directive.trim().eq_ignore_ascii_case("no-cache"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_routes_by_path_shape() {
        let base = "/products";
        assert_eq!(classify("/sitemap.xml", base), RouteKind::Sitemap);
        assert_eq!(classify("/sitemap-2.xml.gz", base), RouteKind::Sitemap);
        assert_eq!(
            classify("/products/detail/usb-c", base),
            RouteKind::Detail("usb-c")
        );
        assert_eq!(
            classify("/products/family/cables", base),
            RouteKind::Family("cables")
        );
        assert_eq!(classify("/products/overview/electronics", base), RouteKind::Overview);
        assert_eq!(
            classify("/products/electronics/cables/usb-c", base),
            RouteKind::Catalogue
        );
        assert_eq!(classify("/products/detail/a/b", base), RouteKind::Catalogue);
        assert_eq!(classify("/products", base), RouteKind::Unhandled);
        assert_eq!(classify("/about", base), RouteKind::Unhandled);
        assert_eq!(classify("/sitemap.xml.bak", base), RouteKind::Unhandled);
    }

    #[test]
    fn custom_base_path_is_routed_to_catalogue() {
        assert_eq!(
            classify("/catalogue/electronics/cables", "/catalogue"),
            RouteKind::Catalogue
        );
        assert_eq!(classify("/catalogue", "/catalogue"), RouteKind::Unhandled);
    }

    #[test]
    fn no_cache_directive_is_detected() {
        let mut headers = HeaderMap::new();
        assert!(!requests_no_cache(&headers));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=0, no-cache"));
        assert!(requests_no_cache(&headers));
    }
}
