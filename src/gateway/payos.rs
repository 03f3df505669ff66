//! PayOS checkout adapter.
//!
//! Requests and webhooks are signed with HMAC-SHA256 over `key=value` pairs
//! sorted by key and joined with `&`, hex encoded, keyed by the checksum key.

use super::{CheckoutIntent, CheckoutRequest, PaymentGateway, WebhookEvent, WebhookPayload};
use crate::config::settings::GatewaySettings;
use crate::errors::{Error, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use sha2::Sha256;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

type HmacSha256 = Hmac<Sha256>;

/// Response envelope shared by every PayOS endpoint
#[derive(Debug, Deserialize)]
struct ApiResponse {
    code: String,
    #[serde(default)]
    desc: String,
    #[serde(default)]
    data: Option<Value>,
}

/// PayOS REST client
#[derive(Debug, Clone)]
pub struct PayOsGateway {
    client: reqwest::Client,
    settings: GatewaySettings,
}

impl PayOsGateway {
    /// Builds the HTTP client with the configured timeout.
    pub fn new(settings: GatewaySettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout())
            .build()?;

        info!(
            client_id_loaded = !settings.client_id.is_empty(),
            api_key_loaded = !settings.api_key.is_empty(),
            checksum_loaded = !settings.checksum_key.is_empty(),
            base_url = %settings.base_url,
            "PayOS gateway configured"
        );

        Ok(Self { client, settings })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.settings.base_url.trim_end_matches('/'))
    }

    async fn read_response(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Gateway {
                message: format!("PayOS returned HTTP {status}: {body}"),
            });
        }

        let body: ApiResponse = response.json().await?;
        if body.code != "00" {
            return Err(Error::Gateway {
                message: format!("PayOS error {}: {}", body.code, body.desc),
            });
        }
        body.data.ok_or_else(|| Error::Gateway {
            message: "PayOS response missing data".to_string(),
        })
    }
}

/// Renders a JSON value the way PayOS expects inside the signature string.
fn signature_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Builds the canonical `a=1&b=2` string from arbitrary fields.
#[must_use]
pub fn canonical_string<'a, I>(fields: I) -> String
where
    I: IntoIterator<Item = (&'a str, String)>,
{
    let sorted: BTreeMap<&str, String> = fields.into_iter().collect();
    sorted
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Hex HMAC-SHA256 of `payload` under `key`.
pub fn sign(key: &str, payload: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes()).map_err(|e| Error::Config {
        message: format!("Invalid checksum key: {e}"),
    })?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Signature for a checkout request (five fixed fields).
pub fn sign_checkout(key: &str, request: &CheckoutRequest) -> Result<String> {
    let payload = canonical_string([
        ("amount", request.amount.to_string()),
        ("cancelUrl", request.cancel_url.clone()),
        ("description", request.description.clone()),
        ("orderCode", request.order_code.to_string()),
        ("returnUrl", request.return_url.clone()),
    ]);
    sign(key, &payload)
}

/// Signature over every field of a webhook `data` object.
pub fn sign_webhook_data(key: &str, data: &Map<String, Value>) -> Result<String> {
    let payload = canonical_string(data.iter().map(|(k, v)| (k.as_str(), signature_value(v))));
    sign(key, &payload)
}

/// Validates a webhook body with `key` and extracts reference and status.
///
/// Status falls back to the top-level `success` flag, then to `code == "00"`,
/// when `data.status` is absent.
pub fn parse_webhook_with_key(key: &str, payload: &WebhookPayload) -> Result<WebhookEvent> {
    let provided = hex::decode(payload.signature.trim()).map_err(|_| Error::InvalidSignature)?;
    let mut mac = HmacSha256::new_from_slice(key.as_bytes()).map_err(|e| Error::Config {
        message: format!("Invalid checksum key: {e}"),
    })?;
    let canonical = canonical_string(
        payload
            .data
            .iter()
            .map(|(k, v)| (k.as_str(), signature_value(v))),
    );
    mac.update(canonical.as_bytes());
    mac.verify_slice(&provided)
        .map_err(|_| Error::InvalidSignature)?;

    let gateway_reference = payload
        .data
        .get("orderCode")
        .map(signature_value)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::Validation {
            message: "Webhook data has no orderCode".to_string(),
        })?;

    let status = match payload.data.get("status").map(signature_value) {
        Some(status) if !status.is_empty() => status,
        _ => {
            let paid = payload.success.unwrap_or_else(|| {
                payload.code.as_deref() == Some("00")
                    || payload.data.get("code").map(signature_value).as_deref() == Some("00")
            });
            let fallback = if paid { "PAID" } else { "FAILED" };
            fallback.to_string()
        }
    };

    Ok(WebhookEvent {
        gateway_reference,
        status,
        raw: Value::Object(payload.data.clone()).to_string(),
    })
}

#[async_trait]
impl PaymentGateway for PayOsGateway {
    #[instrument(skip(self, request), fields(order_code = request.order_code))]
    async fn create_intent(&self, request: &CheckoutRequest) -> Result<CheckoutIntent> {
        let signature = sign_checkout(&self.settings.checksum_key, request)?;
        let body = json!({
            "orderCode": request.order_code,
            "amount": request.amount,
            "description": request.description,
            "items": [{
                "name": request.description,
                "quantity": 1,
                "price": request.amount,
            }],
            "returnUrl": request.return_url,
            "cancelUrl": request.cancel_url,
            "signature": signature,
        });

        let response = self
            .client
            .post(self.endpoint("/v2/payment-requests"))
            .header("x-client-id", &self.settings.client_id)
            .header("x-api-key", &self.settings.api_key)
            .json(&body)
            .send()
            .await?;
        let data = Self::read_response(response).await?;

        let checkout_url = data
            .get("checkoutUrl")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Gateway {
                message: "PayOS response missing checkoutUrl".to_string(),
            })?
            .to_string();
        let gateway_reference = data
            .get("orderCode")
            .map_or_else(|| request.order_code.to_string(), signature_value);

        info!(gateway_reference = %gateway_reference, "PayOS checkout created");
        Ok(CheckoutIntent {
            checkout_url,
            gateway_reference,
        })
    }

    #[instrument(skip(self))]
    async fn verify(&self, gateway_reference: &str) -> Result<String> {
        let response = self
            .client
            .get(self.endpoint(&format!("/v2/payment-requests/{gateway_reference}")))
            .header("x-client-id", &self.settings.client_id)
            .header("x-api-key", &self.settings.api_key)
            .send()
            .await?;
        let data = Self::read_response(response).await?;

        match data.get("status").and_then(Value::as_str) {
            Some(status) => {
                debug!(status, "PayOS status fetched");
                Ok(status.to_string())
            }
            None => {
                warn!("PayOS verify response has no status, treating as pending");
                Ok("PENDING".to_string())
            }
        }
    }

    fn parse_webhook(&self, payload: &WebhookPayload) -> Result<WebhookEvent> {
        parse_webhook_with_key(&self.settings.checksum_key, payload)
    }
}
