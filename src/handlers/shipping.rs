use crate::{services::freight::FreightOption, ApiResult, ApiResponse, AppState};
use axum::{
    extract::{Json, Query, State},
    routing::get,
    Router,
};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

pub fn shipping_routes() -> Router<AppState> {
    Router::new().route("/rates", get(product_rates))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ProductRatesQuery {
    pub product_id: Uuid,
    pub area_id: i32,
}

#[utoipa::path(
    get,
    path = "/api/v1/shipping/rates",
    params(ProductRatesQuery),
    responses(
        (status = 200, description = "Courier offers for one product", body = [FreightOption]),
        (status = 404, description = "Unknown product or no route", body = crate::errors::ErrorResponse)
    ),
    tag = "Shipping"
)]
pub async fn product_rates(
    State(state): State<AppState>,
    Query(query): Query<ProductRatesQuery>,
) -> ApiResult<Vec<FreightOption>> {
    let options = state
        .services
        .product_rates
        .product_rates(query.product_id, query.area_id)
        .await?;
    Ok(Json(ApiResponse::success(options)))
}
