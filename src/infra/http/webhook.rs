//! Authorization for the rebuild trigger: a shared key or a signed webhook.

use std::time::Duration;

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use time::OffsetDateTime;

use crate::config::HookSettings;

pub const TIMESTAMP_HEADER: &str = "x-webflow-timestamp";
pub const SIGNATURE_HEADER: &str = "x-webflow-signature";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WebhookError {
    #[error("no hook secret is configured")]
    NotConfigured,
    #[error("missing `{0}` header")]
    MissingHeader(&'static str),
    #[error("timestamp header is not a millisecond epoch")]
    MalformedTimestamp,
    #[error("timestamp is outside the accepted window")]
    Stale,
    #[error("signature is not valid hex")]
    MalformedSignature,
    #[error("signature mismatch")]
    Mismatch,
}

#[derive(Debug, Clone)]
pub struct WebhookVerifier {
    secret: Option<String>,
    tolerance: Duration,
}

impl WebhookVerifier {
    pub fn new(secret: Option<String>, tolerance: Duration) -> Self {
        Self { secret, tolerance }
    }

    pub fn from_settings(settings: &HookSettings) -> Self {
        Self::new(settings.secret.clone(), settings.tolerance)
    }

    /// Constant-time comparison of a `?key=` value against the secret.
    pub fn verify_key(&self, candidate: &str) -> Result<(), WebhookError> {
        let secret = self.secret.as_deref().ok_or(WebhookError::NotConfigured)?;
        if secret.as_bytes().ct_eq(candidate.as_bytes()).unwrap_u8() == 1 {
            Ok(())
        } else {
            Err(WebhookError::Mismatch)
        }
    }

    /// Check `hex(HMAC-SHA256(secret, "<timestamp>:<body>"))` and that the
    /// millisecond timestamp lies within the tolerance of now.
    pub fn verify_signature(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), WebhookError> {
        self.verify_signature_at(headers, body, now_millis())
    }

    fn verify_signature_at(
        &self,
        headers: &HeaderMap,
        body: &[u8],
        now_ms: i128,
    ) -> Result<(), WebhookError> {
        let secret = self.secret.as_deref().ok_or(WebhookError::NotConfigured)?;
        let timestamp = header_str(headers, TIMESTAMP_HEADER)?;
        let signature = header_str(headers, SIGNATURE_HEADER)?;

        let sent_ms: i128 = timestamp
            .trim()
            .parse()
            .map_err(|_| WebhookError::MalformedTimestamp)?;
        if (now_ms - sent_ms).unsigned_abs() >= self.tolerance.as_millis() {
            return Err(WebhookError::Stale);
        }

        let provided =
            hex::decode(signature.trim()).map_err(|_| WebhookError::MalformedSignature)?;
        let expected = sign(secret, timestamp, body);
        if expected.as_slice().ct_eq(provided.as_slice()).unwrap_u8() == 1 {
            Ok(())
        } else {
            Err(WebhookError::Mismatch)
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, WebhookError> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .ok_or(WebhookError::MissingHeader(name))
}

fn sign(secret: &str, timestamp: &str, body: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return Vec::new(),
    };
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body);
    mac.finalize().into_bytes().to_vec()
}

fn now_millis() -> i128 {
    OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000
}
