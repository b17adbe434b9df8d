//! Signed webhook HTTP client.

use crate::error::WebhookError;
use crate::types::*;
use hmac::{Hmac, Mac};
use reqwest::Client;
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, instrument, warn};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex HMAC-SHA256 of the request body.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Send timeout for a single delivery attempt.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Serialize a payload to the exact bytes that are signed and sent.
pub fn canonical_json<T: serde::Serialize>(payload: &T) -> Result<Vec<u8>, WebhookError> {
    Ok(serde_json::to_vec(payload)?)
}

/// `hex(HMAC-SHA256(secret, body))`.
pub fn sign_payload(secret: &str, body: &[u8]) -> Result<String, WebhookError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| WebhookError::Signing(e.to_string()))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// HTTP client that POSTs signed envelopes to merchant endpoints.
#[derive(Clone)]
pub struct WebhookClient {
    client: Client,
}

impl WebhookClient {
    /// Create a client with the given per-attempt timeout.
    ///
    /// Redirects are not followed: a 3xx reaches the caller as a failed
    /// delivery instead of a POST silently rewritten to a GET.
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, WebhookError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self { client })
    }

    /// Deliver an envelope. Any non-2xx response is an error.
    ///
    /// The signature header is only attached when a secret is configured.
    #[instrument(skip(self, envelope, secret), fields(id = %envelope.id, kind = %envelope.kind))]
    pub async fn deliver(
        &self,
        url: &str,
        envelope: &WebhookEnvelope,
        secret: Option<&str>,
    ) -> Result<DeliveryReceipt, WebhookError> {
        let body = canonical_json(envelope)?;

        let mut request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");

        let signed = match secret {
            Some(secret) => {
                request = request.header(SIGNATURE_HEADER, sign_payload(secret, &body)?);
                true
            }
            None => false,
        };

        let response = request.body(body).send().await.map_err(|e| {
            if e.is_timeout() {
                WebhookError::Timeout(url.to_string())
            } else {
                WebhookError::Http(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Webhook endpoint {} returned {}", url, status);
            return Err(WebhookError::Status {
                status: status.as_u16(),
                body,
            });
        }

        debug!("Delivered webhook to {} ({})", url, status);
        Ok(DeliveryReceipt {
            status: status.as_u16(),
            signed,
        })
    }
}
