//! Payment gateway port and the PayOS adapter.
//!
//! The core only needs three things from a checkout provider: open a checkout
//! for a transaction, ask for the current status of a reference, and turn a
//! signed webhook body into a trusted `(reference, status)` pair.

pub mod payos;

pub use payos::PayOsGateway;

use crate::errors::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// What the core asks the gateway to charge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutRequest {
    /// Numeric order code; the payment transaction id
    pub order_code: i64,
    pub amount: i64,
    pub description: String,
    /// Success redirect, carries `ref=<internal reference>`
    pub return_url: String,
    /// Cancel redirect, carries `ref=<internal reference>&cancel=1`
    pub cancel_url: String,
}

/// Accepted checkout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutIntent {
    pub checkout_url: String,
    /// Provider reference used in webhooks and verification
    pub gateway_reference: String,
}

/// Raw webhook body as the provider posts it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub desc: Option<String>,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub signature: String,
}

/// Webhook content after signature validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    pub gateway_reference: String,
    /// Provider status word, mapped by `PaymentStatus::from_external`
    pub status: String,
    /// Serialized `data` object, kept for the audit log
    pub raw: String,
}

/// Checkout provider
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Opens a checkout and returns where to send the payer.
    async fn create_intent(&self, request: &CheckoutRequest) -> Result<CheckoutIntent>;

    /// Returns the provider's current status word for `gateway_reference`.
    async fn verify(&self, gateway_reference: &str) -> Result<String>;

    /// Validates the signature and extracts reference and status.
    ///
    /// Must fail with `Error::InvalidSignature` before anything else is read.
    fn parse_webhook(&self, payload: &WebhookPayload) -> Result<WebhookEvent>;
}
