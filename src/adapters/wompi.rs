use async_trait::async_trait;
use chrono::{Local, TimeDelta, Utc};
use hmac::{Hmac, Mac};
use rand::rngs::SysRng;
use rand::TryRng;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use super::{build_client, json_or_upstream, trim_base, DEFAULT_TIMEOUT};
use crate::error::{AvaBotError, Result};
use crate::interfaces::services::{
    PaymentLink, PaymentLinkRequest, PaymentService, TransactionRequest,
};

type HmacSha256 = Hmac<Sha256>;

pub const CHECKOUT_BASE: &str = "https://checkout.wompi.co/l";

/// `true` iff `signature` is the lowercase hex HMAC-SHA256 of `body`.
pub fn verify_signature(event_key: &[u8], body: &[u8], signature: &str) -> bool {
    if signature.chars().any(|c| c.is_ascii_uppercase()) {
        return false;
    }
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(event_key) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

pub fn sign(event_key: &[u8], body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(event_key)
        .map_err(|e| AvaBotError::Config(e.to_string()))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// `ref_<YYYYMMDDHHMMSS>_<8 hex>`.
pub fn generate_reference() -> Result<String> {
    let mut seed = [0u8; 16];
    let mut rng = SysRng;
    rng.try_fill_bytes(&mut seed)
        .map_err(|e| AvaBotError::Runtime(e.to_string()))?;
    let digest = hex::encode(Sha256::digest(seed));
    Ok(format!(
        "ref_{}_{}",
        Local::now().format("%Y%m%d%H%M%S"),
        &digest[..8]
    ))
}

pub struct WompiClient {
    base_url: String,
    private_key: String,
    event_key: Option<String>,
    client: reqwest::Client,
}

impl WompiClient {
    pub fn new(base_url: &str, private_key: &str, event_key: Option<String>) -> Result<Self> {
        if private_key.trim().is_empty() {
            return Err(AvaBotError::Config("WOMPI_PRIVATE_KEY is empty".to_string()));
        }
        Ok(Self {
            base_url: trim_base(base_url),
            private_key: private_key.trim().to_string(),
            event_key,
            client: build_client(DEFAULT_TIMEOUT)?,
        })
    }

    async fn post(&self, path: &str, payload: &Value) -> Result<Value> {
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(&self.private_key)
            .json(payload)
            .send()
            .await?;
        json_or_upstream(response).await
    }
}

pub fn payment_link_payload(request: &PaymentLinkRequest, reference: &str) -> Value {
    let expires_at = Utc::now() + TimeDelta::minutes(i64::from(request.expires_in_minutes));
    json!({
        "name": request.name,
        "description": request.description,
        "single_use": true,
        "collect_shipping": false,
        "currency": request.currency,
        "amount_in_cents": request.amount_in_cents,
        "expires_at": expires_at.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        "sku": reference,
    })
}

#[async_trait]
impl PaymentService for WompiClient {
    async fn create_transaction(&self, request: &TransactionRequest) -> Result<Value> {
        let reference = match &request.reference {
            Some(reference) => reference.clone(),
            None => generate_reference()?,
        };
        let mut payload = json!({
            "amount_in_cents": request.amount_in_cents,
            "currency": request.currency,
            "customer_email": request.customer_email,
            "payment_method": request.payment_method,
            "reference": reference,
        });
        if let Some(redirect_url) = &request.redirect_url {
            payload["redirect_url"] = Value::String(redirect_url.clone());
        }
        info!(reference = %reference, amount_in_cents = request.amount_in_cents, "creating wompi transaction");
        self.post("/transactions", &payload).await
    }

    async fn get_transaction(&self, transaction_id: &str) -> Result<Value> {
        let response = self
            .client
            .get(format!("{}/transactions/{transaction_id}", self.base_url))
            .bearer_auth(&self.private_key)
            .send()
            .await?;
        json_or_upstream(response).await
    }

    async fn create_payment_link(&self, request: &PaymentLinkRequest) -> Result<PaymentLink> {
        let reference = generate_reference()?;
        info!(reference = %reference, amount_in_cents = request.amount_in_cents, "creating wompi payment link");
        let body = self
            .post("/payment_links", &payment_link_payload(request, &reference))
            .await?;
        let id = body
            .pointer("/data/id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                AvaBotError::Serialization("wompi payment link response without data.id".to_string())
            })?;
        Ok(PaymentLink {
            id: id.to_string(),
            url: format!("{CHECKOUT_BASE}/{id}"),
            reference,
        })
    }

    fn verify_webhook(&self, body: &[u8], signature: &str) -> bool {
        match &self.event_key {
            Some(key) => verify_signature(key.as_bytes(), body, signature),
            None => {
                warn!("wompi webhook received but no event key is configured");
                false
            }
        }
    }
}
