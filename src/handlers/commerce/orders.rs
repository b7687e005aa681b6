use crate::{
    auth::AuthCustomer,
    services::commerce::{CancelOutcome, OrderDetail, OrderSummary},
    ApiResult, ApiResponse, AppState,
};
use axum::{
    extract::{Json, Path, State},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use utoipa::ToSchema;

/// Creates the router for order endpoints
pub fn orders_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders))
        .route("/:id", get(get_order))
        .route("/:id/cancel", post(cancel_order))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CancelResponse {
    pub order_id: i64,
    pub outcome: CancelOutcome,
}

#[utoipa::path(
    get,
    path = "/api/v1/orders",
    responses(
        (status = 200, description = "Orders of the customer, newest first", body = [OrderSummary]),
        (status = 404, description = "No orders yet", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    customer: AuthCustomer,
) -> ApiResult<Vec<OrderSummary>> {
    let orders = state.services.orders.list_orders(customer.customer_id).await?;
    Ok(Json(ApiResponse::success(orders)))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = i64, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order detail", body = OrderDetail),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    customer: AuthCustomer,
    Path(id): Path<i64>,
) -> ApiResult<OrderDetail> {
    let detail = state
        .services
        .orders
        .order_detail(customer.customer_id, id)
        .await?;
    Ok(Json(ApiResponse::success(detail)))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/cancel",
    params(("id" = i64, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order cancelled or cancellation requested", body = CancelResponse),
        (status = 404, description = "No cancellable order", body = crate::errors::ErrorResponse),
        (status = 500, description = "Gateway refused the cancellation", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    customer: AuthCustomer,
    Path(id): Path<i64>,
) -> ApiResult<CancelResponse> {
    let outcome = state
        .services
        .cancellation
        .cancel(customer.customer_id, id)
        .await?;
    Ok(Json(ApiResponse::success(CancelResponse {
        order_id: id,
        outcome,
    })))
}
