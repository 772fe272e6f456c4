//! Content store adapter: paginated collection reads over HTTPS.

use std::num::NonZeroU32;

use async_trait::async_trait;
use axum::http::header::AUTHORIZATION;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::application::ports::{ContentSource, FetchError};
use crate::config::UpstreamSettings;
use crate::domain::items::RawItem;

const ACCEPT_VERSION_HEADER: &str = "accept-version";

#[derive(Debug, Deserialize)]
struct ItemsPage {
    items: Vec<RawItem>,
}

#[derive(Clone)]
pub struct HttpContentSource {
    client: Client,
    api_base: String,
    api_token: String,
    accept_version: String,
    page_size: NonZeroU32,
}

impl HttpContentSource {
    pub fn new(client: Client, settings: &UpstreamSettings) -> Self {
        Self {
            client,
            api_base: settings.api_base.clone(),
            api_token: settings.api_token.clone(),
            accept_version: settings.accept_version.clone(),
            page_size: settings.page_size,
        }
    }

    async fn fetch_page(
        &self,
        collection_id: &str,
        offset: usize,
    ) -> Result<Vec<RawItem>, FetchError> {
        let url = format!("{}/collections/{collection_id}/items", self.api_base);
        let response = self
            .client
            .get(url)
            .query(&[
                ("limit", self.page_size.get().to_string()),
                ("offset", offset.to_string()),
            ])
            .header(AUTHORIZATION, format!("Bearer {}", self.api_token))
            .header(ACCEPT_VERSION_HEADER, &self.accept_version)
            .send()
            .await
            .map_err(|err| FetchError::Transport {
                collection: collection_id.to_string(),
                message: err.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                collection: collection_id.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await.map_err(|err| FetchError::Transport {
            collection: collection_id.to_string(),
            message: err.to_string(),
        })?;
        let page: ItemsPage =
            serde_json::from_slice(&bytes).map_err(|err| FetchError::Decode {
                collection: collection_id.to_string(),
                message: err.to_string(),
            })?;
        Ok(page.items)
    }
}

#[async_trait]
impl ContentSource for HttpContentSource {
    async fn fetch_all(&self, collection_id: &str) -> Result<Vec<RawItem>, FetchError> {
        let page_size = self.page_size.get() as usize;
        let mut items = Vec::new();
        loop {
            let page = self.fetch_page(collection_id, items.len()).await?;
            let short = page.len() < page_size;
            items.extend(page);
            if short {
                break;
            }
        }

        debug!(
            target = "canopy::infra::content",
            collection = collection_id,
            items = items.len(),
            "collection fetched"
        );
        Ok(items)
    }
}
