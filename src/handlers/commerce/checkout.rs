use crate::handlers::common::validate_input;
use crate::{
    auth::AuthCustomer,
    errors::ApiError,
    services::{
        commerce::{CheckoutRequest, PreCheckoutItem},
        freight::FreightOption,
        payment_gateway::PaymentIntent,
    },
    ApiResult, ApiResponse, AppState,
};
use axum::{
    extract::{Json, Query, State},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

/// Creates the router for checkout endpoints
pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(checkout))
        .route("/freight", get(freight_options))
        .route("/items", get(checked_items))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct FreightQuery {
    #[serde(alias = "address_code")]
    pub address_id: Uuid,
}

#[utoipa::path(
    get,
    path = "/api/v1/checkout/freight",
    params(FreightQuery),
    responses(
        (status = 200, description = "Courier offers for the checked cart", body = [FreightOption]),
        (status = 404, description = "Unknown address or no route", body = crate::errors::ErrorResponse),
        (status = 409, description = "Nothing checked", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Checkout"
)]
pub async fn freight_options(
    State(state): State<AppState>,
    customer: AuthCustomer,
    Query(query): Query<FreightQuery>,
) -> ApiResult<Vec<FreightOption>> {
    let options = state
        .services
        .precheckout
        .freight_options(customer.customer_id, query.address_id)
        .await?;
    Ok(Json(ApiResponse::success(options)))
}

#[utoipa::path(
    get,
    path = "/api/v1/checkout/items",
    responses(
        (status = 200, description = "Checked cart items", body = [PreCheckoutItem]),
        (status = 409, description = "Nothing checked", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Checkout"
)]
pub async fn checked_items(
    State(state): State<AppState>,
    customer: AuthCustomer,
) -> ApiResult<Vec<PreCheckoutItem>> {
    let items = state
        .services
        .precheckout
        .checked_items(customer.customer_id)
        .await?;
    Ok(Json(ApiResponse::success(items)))
}

#[utoipa::path(
    post,
    path = "/api/v1/checkout",
    request_body = CheckoutRequest,
    responses(
        (status = 200, description = "Order placed; redirect to the payment page", body = PaymentIntent),
        (status = 404, description = "Unknown address or no route", body = crate::errors::ErrorResponse),
        (status = 409, description = "Nothing checked or invalid courier", body = crate::errors::ErrorResponse),
        (status = 500, description = "Persistence or gateway failure", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Checkout"
)]
pub async fn checkout(
    State(state): State<AppState>,
    customer: AuthCustomer,
    Json(payload): Json<CheckoutRequest>,
) -> Result<Json<ApiResponse<PaymentIntent>>, ApiError> {
    validate_input(&payload)?;
    let intent = state
        .services
        .checkout
        .checkout(customer.customer_id, payload)
        .await?;
    Ok(Json(ApiResponse::success(intent)))
}
