use async_trait::async_trait;
use axum::http::header::AUTHORIZATION;
use reqwest::Client;
use serde::Serialize;

use crate::application::ports::{PurgeError, Purger};
use crate::config::PurgeSettings;

#[derive(Serialize)]
struct PurgeRequest<'a> {
    files: &'a [String],
}

/// Bulk URL purge against a CDN API (`POST {"files": [...]}`, bearer auth).
#[derive(Clone)]
pub struct HttpPurger {
    client: Client,
    endpoint: String,
    api_token: String,
}

impl HttpPurger {
    pub fn new(client: Client, settings: &PurgeSettings) -> Self {
        Self {
            client,
            endpoint: settings.endpoint.clone(),
            api_token: settings.api_token.clone(),
        }
    }
}

#[async_trait]
impl Purger for HttpPurger {
    async fn purge(&self, urls: &[String]) -> Result<(), PurgeError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_token))
            .json(&PurgeRequest { files: urls })
            .send()
            .await
            .map_err(|err| PurgeError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PurgeError::Status(status.as_u16()));
        }
        Ok(())
    }
}
