use async_trait::async_trait;
use axum::http::header::{CACHE_CONTROL, PRAGMA, USER_AGENT};
use reqwest::Client;

use crate::application::ports::{OriginClient, OriginError, OriginResponse};

/// Fetches pages from the proxied site, announcing a fixed user agent.
#[derive(Clone)]
pub struct HttpOriginClient {
    client: Client,
    user_agent: String,
}

impl HttpOriginClient {
    pub fn new(client: Client, user_agent: impl Into<String>) -> Self {
        Self {
            client,
            user_agent: user_agent.into(),
        }
    }
}

#[async_trait]
impl OriginClient for HttpOriginClient {
    async fn get(&self, url: &str, bypass_cache: bool) -> Result<OriginResponse, OriginError> {
        let unreachable = |err: reqwest::Error| OriginError::Unreachable {
            url: url.to_string(),
            message: err.to_string(),
        };

        let mut request = self.client.get(url).header(USER_AGENT, &self.user_agent);
        if bypass_cache {
            request = request
                .header(CACHE_CONTROL, "no-cache")
                .header(PRAGMA, "no-cache");
        }

        let response = request.send().await.map_err(unreachable)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(unreachable)?;

        Ok(OriginResponse {
            status,
            headers,
            body,
        })
    }
}
