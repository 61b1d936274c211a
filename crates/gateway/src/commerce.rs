//! Commerce provider client: catalog lookups, order creation and discount
//! code minting for the orchestrator's follow-on actions.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::info;

use crate::client::{GatewayClient, GatewayError, RequestSpec};

#[derive(Debug, Error)]
pub enum CommerceError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("commerce response missing field `{0}`")]
    MalformedResponse(&'static str),
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Product {
    pub sku: String,
    pub name: String,
    pub price_cents: i64,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DiscountCode {
    pub code: String,
    pub percent: u8,
    pub expires_at: DateTime<Utc>,
}

/// Mint a time-boxed discount code locally; the provider only needs to
/// honor it at checkout.
pub fn mint_discount_code(percent: u8, valid_hours: u32) -> DiscountCode {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..8)
        .map(|_| {
            const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
            ALPHABET[rng.gen_range(0..ALPHABET.len())] as char
        })
        .collect();
    DiscountCode {
        code: format!("SAVE{percent}-{suffix}"),
        percent,
        expires_at: Utc::now() + Duration::hours(i64::from(valid_hours)),
    }
}

#[async_trait]
pub trait CommerceProvider: Send + Sync {
    /// Products matching a free-text query, for recommendations and LLM
    /// context.
    async fn search_products(&self, query: &str) -> Result<Vec<Product>, CommerceError>;
    /// Create a draft order for the customer; returns the provider order id.
    async fn create_order(
        &self,
        customer_external_id: &str,
        skus: &[String],
    ) -> Result<String, CommerceError>;
    /// Register a minted discount code with the provider.
    async fn register_discount(&self, discount: &DiscountCode) -> Result<(), CommerceError>;
}

pub struct HttpCommerceClient {
    gateway: GatewayClient,
    base_url: String,
    api_key: SecretString,
}

impl HttpCommerceClient {
    pub fn new(
        gateway: GatewayClient,
        base_url: impl Into<String>,
        api_key: SecretString,
    ) -> Self {
        Self { gateway, base_url: base_url.into(), api_key }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }
}

#[async_trait]
impl CommerceProvider for HttpCommerceClient {
    async fn search_products(&self, query: &str) -> Result<Vec<Product>, CommerceError> {
        let spec = RequestSpec::post(self.url("products/search"), json!({ "query": query }))
            .with_bearer(self.api_key.clone());
        let body = self.gateway.call(spec).await?;
        let items = body.get("products").cloned().unwrap_or(body);
        serde_json::from_value(items).map_err(|_| CommerceError::MalformedResponse("products"))
    }

    async fn create_order(
        &self,
        customer_external_id: &str,
        skus: &[String],
    ) -> Result<String, CommerceError> {
        let spec = RequestSpec::post(
            self.url("orders"),
            json!({ "customer_id": customer_external_id, "skus": skus }),
        )
        .with_bearer(self.api_key.clone())
        .fail_fast_on_client_error();
        let body = self.gateway.call(spec).await?;
        let order_id = body["order_id"]
            .as_str()
            .ok_or(CommerceError::MalformedResponse("order_id"))?
            .to_string();
        info!(event_name = "order_created", order_id = %order_id, "draft order created");
        Ok(order_id)
    }

    async fn register_discount(&self, discount: &DiscountCode) -> Result<(), CommerceError> {
        let spec = RequestSpec::post(
            self.url("discounts"),
            json!({
                "code": discount.code,
                "percent": discount.percent,
                "expires_at": discount.expires_at.to_rfc3339(),
            }),
        )
        .with_bearer(self.api_key.clone());
        self.gateway.call(spec).await?;
        Ok(())
    }
}

/// Empty catalog, always-successful orders. For orchestrator tests.
#[derive(Default)]
pub struct NoopCommerceProvider;

#[async_trait]
impl CommerceProvider for NoopCommerceProvider {
    async fn search_products(&self, _query: &str) -> Result<Vec<Product>, CommerceError> {
        Ok(Vec::new())
    }

    async fn create_order(
        &self,
        _customer_external_id: &str,
        _skus: &[String],
    ) -> Result<String, CommerceError> {
        Ok("order-noop".to_string())
    }

    async fn register_discount(&self, _discount: &DiscountCode) -> Result<(), CommerceError> {
        Ok(())
    }
}
