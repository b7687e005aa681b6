use async_trait::async_trait;
use reqwest::{header, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};
use utoipa::ToSchema;

use crate::config::FreightConfig;

const CART_QUOTE_PATH: &str = "/api/v1/internal/rate-complex-precalculate";
const PRODUCT_QUOTE_PATH: &str = "/api/v1/internal/rate-complex";

#[derive(Debug, Error)]
pub enum FreightError {
    /// The courier-rate service knows no rates for the destination.
    #[error("there are no rates available for this route")]
    NoRoute,
    #[error("freight request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("freight service responded with status {0}")]
    Status(u16),
    #[error("invalid freight response: {0}")]
    Decode(String),
}

/// Aggregate shipment of a cart, quoted by total weight and volume.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CartShipment {
    #[serde(rename = "ID")]
    pub area_id: i32,
    #[serde(rename = "Weight", with = "rust_decimal::serde::float")]
    pub weight: Decimal,
    #[serde(rename = "Volume", with = "rust_decimal::serde::float")]
    pub volume: Decimal,
}

/// A single product shipment, quoted by its own dimensions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductShipment {
    #[serde(rename = "id")]
    pub area_id: i32,
    #[serde(with = "rust_decimal::serde::float")]
    pub weight: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub length: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub width: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub height: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRate {
    pub product_code: String,
    pub product_name: String,
    pub etd: String,
    pub rates: i64,
}

/// Offers grouped by courier as returned by the courier-rate service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateTable {
    #[serde(default)]
    pub anteraja: Vec<ServiceRate>,
    #[serde(default)]
    pub sicepat: Vec<ServiceRate>,
}

/// Courier offer re-labeled with the composite `courier-productcode` key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FreightOption {
    #[schema(example = "anteraja-REG")]
    pub product_code: String,
    #[schema(example = "anteraja")]
    pub courier_name: String,
    pub product_name: String,
    pub etd: String,
    pub rates: i64,
}

impl RateTable {
    /// Flattens the table into options, anteraja first then sicepat.
    pub fn into_options(self) -> Vec<FreightOption> {
        let RateTable { anteraja, sicepat } = self;
        [("anteraja", anteraja), ("sicepat", sicepat)]
            .into_iter()
            .flat_map(|(courier, rates)| {
                rates.into_iter().map(move |rate| FreightOption {
                    product_code: format!("{}-{}", courier, rate.product_code),
                    courier_name: courier.to_string(),
                    product_name: rate.product_name,
                    etd: rate.etd,
                    rates: rate.rates,
                })
            })
            .collect()
    }
}

/// Finds the option whose composite code matches `courier_code`.
pub fn find_option<'a>(options: &'a [FreightOption], courier_code: &str) -> Option<&'a FreightOption> {
    options
        .iter()
        .find(|option| option.product_code == courier_code)
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FreightQuoter: Send + Sync {
    async fn quote_cart(&self, shipment: &CartShipment) -> Result<RateTable, FreightError>;
    async fn quote_product(&self, shipment: &ProductShipment) -> Result<RateTable, FreightError>;
}

/// HTTP client of the courier-rate service.
#[derive(Clone)]
pub struct HttpFreightClient {
    client: reqwest::Client,
    base_url: String,
    authorization: String,
}

impl HttpFreightClient {
    pub fn new(config: &FreightConfig) -> Result<Self, FreightError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            authorization: config.authorization.clone(),
        })
    }

    // The service reads a JSON body on GET.
    async fn fetch<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<RateTable, FreightError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .header(header::AUTHORIZATION, &self.authorization)
            .json(body)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(FreightError::NoRoute),
            status if status.is_success() => response
                .json::<RateTable>()
                .await
                .map_err(|e| FreightError::Decode(e.to_string())),
            status => {
                warn!(%status, path, "freight service returned an error status");
                Err(FreightError::Status(status.as_u16()))
            }
        }
    }
}

#[async_trait]
impl FreightQuoter for HttpFreightClient {
    #[instrument(skip(self))]
    async fn quote_cart(&self, shipment: &CartShipment) -> Result<RateTable, FreightError> {
        debug!("requesting cart freight quote");
        self.fetch(CART_QUOTE_PATH, shipment).await
    }

    #[instrument(skip(self))]
    async fn quote_product(&self, shipment: &ProductShipment) -> Result<RateTable, FreightError> {
        debug!("requesting product freight quote");
        self.fetch(PRODUCT_QUOTE_PATH, shipment).await
    }
}
