//! Edge cache key definitions.

use std::fmt;

use axum::http::{Method, Request, Uri};

/// Identifies a cached response: request method plus path and query.
///
/// Host and headers are deliberately left out; the proxy serves one site.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EdgeKey {
    method: Method,
    path_and_query: String,
}

impl EdgeKey {
    pub fn new(method: Method, uri: &Uri) -> Self {
        let path_and_query = uri
            .path_and_query()
            .map_or_else(|| uri.path().to_string(), |pq| pq.as_str().to_string());
        Self {
            method,
            path_and_query,
        }
    }

    pub fn for_request<B>(request: &Request<B>) -> Self {
        Self::new(request.method().clone(), request.uri())
    }

    pub fn method(&self) -> &Method {
        &self.method
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path_and_query)
    }
}
