use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, TimeZone};
use reqwest::{header, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use thiserror::Error;
use tracing::{instrument, warn};
use utoipa::ToSchema;

use crate::config::PaymentGatewayConfig;

/// Gateway limit on item names.
pub const MAX_ITEM_NAME_CHARS: usize = 50;
const EXPIRY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("gateway rejected transaction ({status}): {messages:?}")]
    Rejected { status: u16, messages: Vec<String> },
    #[error("gateway refused cancellation ({status_code}): {status_message}")]
    CancelRefused {
        status_code: String,
        status_message: String,
    },
    #[error("invalid gateway response: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionDetails {
    pub order_id: String,
    pub gross_amount: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDetail {
    pub id: String,
    pub name: String,
    pub price: i64,
    pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerDetails {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expiry {
    pub start_time: String,
    pub unit: String,
    pub duration: u32,
}

/// Hosted-payment transaction request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapRequest {
    pub transaction_details: TransactionDetails,
    pub item_details: Vec<ItemDetail>,
    pub customer_details: CustomerDetails,
    pub expiry: Expiry,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PaymentIntent {
    pub token: String,
    pub redirect_url: String,
}

#[derive(Debug, Deserialize)]
struct SnapErrorBody {
    #[serde(default)]
    error_messages: Vec<String>,
}

// status_code arrives as a string, some sandbox responses send a number.
#[derive(Debug, Deserialize)]
struct CoreStatusBody {
    #[serde(default)]
    status_code: serde_json::Value,
    #[serde(default)]
    status_message: String,
}

impl CoreStatusBody {
    fn code(&self) -> String {
        match &self.status_code {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

/// One purchased product line of an intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentLine {
    pub product_id: String,
    pub name: String,
    pub price: i64,
    pub quantity: i32,
}

/// External order reference, `<prefix>-<order id>`.
pub fn order_reference(prefix: &str, order_id: i64) -> String {
    format!("{}-{}", prefix, order_id)
}

/// Recovers the numeric order id from an external reference.
pub fn parse_order_reference(prefix: &str, reference: &str) -> Option<i64> {
    reference
        .strip_prefix(prefix)?
        .strip_prefix('-')?
        .parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
}

/// `hex(SHA-512(order_id || status_code || gross_amount || server_key))`
pub fn notification_signature(
    order_id: &str,
    status_code: &str,
    gross_amount: &str,
    server_key: &str,
) -> String {
    let mut hasher = Sha512::new();
    hasher.update(order_id.as_bytes());
    hasher.update(status_code.as_bytes());
    hasher.update(gross_amount.as_bytes());
    hasher.update(server_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compares a received signature against the expected one without
/// short-circuiting on the first differing byte.
pub fn signature_matches(expected: &str, received: &str) -> bool {
    let (a, b) = (expected.as_bytes(), received.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub fn truncate_item_name(name: &str) -> String {
    name.chars().take(MAX_ITEM_NAME_CHARS).collect()
}

pub fn expiry_start_time<Tz>(now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    now.format(EXPIRY_TIME_FORMAT).to_string()
}

impl SnapRequest {
    /// Assembles the intent for an order: one item per product line plus a
    /// synthetic freight item named by the courier code.
    #[allow(clippy::too_many_arguments)]
    pub fn for_order<Tz>(
        config: &PaymentGatewayConfig,
        order_id: i64,
        lines: &[IntentLine],
        courier_code: &str,
        freight_cost: i64,
        gross_amount: i64,
        customer: CustomerDetails,
        now: &DateTime<Tz>,
    ) -> Self
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        let reference = order_reference(&config.order_id_prefix, order_id);
        let mut item_details: Vec<ItemDetail> = lines
            .iter()
            .map(|line| ItemDetail {
                id: line.product_id.clone(),
                name: truncate_item_name(&line.name),
                price: line.price,
                quantity: line.quantity,
            })
            .collect();
        item_details.push(ItemDetail {
            id: format!("freight-{}", reference),
            name: truncate_item_name(courier_code),
            price: freight_cost,
            quantity: 1,
        });

        SnapRequest {
            transaction_details: TransactionDetails {
                order_id: reference,
                gross_amount,
            },
            item_details,
            customer_details: customer,
            expiry: Expiry {
                start_time: expiry_start_time(now),
                unit: config.expiry_unit.clone(),
                duration: config.expiry_duration,
            },
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates a hosted payment page for the transaction.
    async fn create_intent(&self, request: &SnapRequest) -> Result<PaymentIntent, GatewayError>;
    /// Cancels a live transaction by its external order reference.
    async fn cancel_transaction(&self, order_ref: &str) -> Result<(), GatewayError>;
}

/// HTTP client of the hosted payment gateway.
#[derive(Clone)]
pub struct SnapGatewayClient {
    client: reqwest::Client,
    snap_base_url: String,
    core_api_base_url: String,
    authorization: String,
}

impl SnapGatewayClient {
    pub fn new(config: &PaymentGatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(Self {
            client,
            snap_base_url: config.snap_base_url.trim_end_matches('/').to_string(),
            core_api_base_url: config.core_api_base_url.trim_end_matches('/').to_string(),
            authorization: format!("Basic {}", STANDARD.encode(format!("{}:", config.server_key))),
        })
    }
}

#[async_trait]
impl PaymentGateway for SnapGatewayClient {
    #[instrument(skip(self, request), fields(order_ref = %request.transaction_details.order_id))]
    async fn create_intent(&self, request: &SnapRequest) -> Result<PaymentIntent, GatewayError> {
        let response = self
            .client
            .post(format!("{}/snap/v1/transactions", self.snap_base_url))
            .header(header::AUTHORIZATION, &self.authorization)
            .header(header::ACCEPT, "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::CREATED {
            let body = response.text().await?;
            let messages = serde_json::from_str::<SnapErrorBody>(&body)
                .map(|b| b.error_messages)
                .unwrap_or_else(|_| vec![body]);
            warn!(%status, ?messages, "payment intent rejected");
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                messages,
            });
        }

        response
            .json::<PaymentIntent>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }

    #[instrument(skip(self))]
    async fn cancel_transaction(&self, order_ref: &str) -> Result<(), GatewayError> {
        let response = self
            .client
            .post(format!("{}/v2/{}/cancel", self.core_api_base_url, order_ref))
            .header(header::AUTHORIZATION, &self.authorization)
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;

        let http_status = response.status();
        let body = response
            .json::<CoreStatusBody>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;

        // 412: the transaction is already cancelled.
        let code = body.code();
        if http_status == StatusCode::OK && (code == "200" || code == "412") {
            return Ok(());
        }

        warn!(%http_status, status_code = %code, "gateway refused cancellation");
        Err(GatewayError::CancelRefused {
            status_code: if code.is_empty() {
                http_status.as_u16().to_string()
            } else {
                code
            },
            status_message: body.status_message,
        })
    }
}
