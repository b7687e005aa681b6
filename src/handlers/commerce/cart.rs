use crate::handlers::common::{created_response, no_content_response, validate_input};
use crate::{
    auth::AuthCustomer,
    errors::ApiError,
    services::commerce::{
        AddToCartInput, CartCount, CartLineView, CheckAllInput, CheckItemInput,
    },
    ApiResult, ApiResponse, AppState,
};
use axum::{
    extract::{Json, Query, State},
    response::IntoResponse,
    routing::{get, patch},
    Router,
};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

/// Creates the router for cart endpoints
pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart).post(add_to_cart).delete(remove_from_cart))
        .route("/check", patch(check_item))
        .route("/check-all", patch(check_all))
        .route("/count", get(cart_count))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct CartItemQuery {
    /// Product id of the cart line
    pub id: Uuid,
}

#[utoipa::path(
    get,
    path = "/api/v1/cart",
    responses(
        (status = 200, description = "Cart lines", body = [CartLineView]),
        (status = 404, description = "Cart is empty", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    customer: AuthCustomer,
) -> ApiResult<Vec<CartLineView>> {
    let lines = state.services.cart.cart(customer.customer_id).await?;
    Ok(Json(ApiResponse::success(lines)))
}

#[utoipa::path(
    post,
    path = "/api/v1/cart",
    request_body = AddToCartInput,
    responses(
        (status = 201, description = "Line added or quantity replaced"),
        (status = 404, description = "Unknown product", body = crate::errors::ErrorResponse),
        (status = 409, description = "Quantity exceeds stock", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn add_to_cart(
    State(state): State<AppState>,
    customer: AuthCustomer,
    Json(payload): Json<AddToCartInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let product_id = payload.product_id;
    state
        .services
        .cart
        .add_to_cart(customer.customer_id, payload)
        .await?;
    Ok(created_response(serde_json::json!({ "product_id": product_id })))
}

#[utoipa::path(
    delete,
    path = "/api/v1/cart",
    params(CartItemQuery),
    responses(
        (status = 204, description = "Line removed"),
        (status = 404, description = "No such line", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn remove_from_cart(
    State(state): State<AppState>,
    customer: AuthCustomer,
    Query(query): Query<CartItemQuery>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .cart
        .remove_from_cart(customer.customer_id, query.id)
        .await?;
    Ok(no_content_response())
}

#[utoipa::path(
    patch,
    path = "/api/v1/cart/check",
    request_body = CheckItemInput,
    responses(
        (status = 204, description = "Line state changed"),
        (status = 404, description = "No purchasable line", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn check_item(
    State(state): State<AppState>,
    customer: AuthCustomer,
    Json(payload): Json<CheckItemInput>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .cart
        .set_checked(customer.customer_id, payload.product_id, payload.state)
        .await?;
    Ok(no_content_response())
}

#[utoipa::path(
    patch,
    path = "/api/v1/cart/check-all",
    request_body = CheckAllInput,
    responses(
        (status = 204, description = "Line states changed"),
        (status = 409, description = "No line can change state", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn check_all(
    State(state): State<AppState>,
    customer: AuthCustomer,
    Json(payload): Json<CheckAllInput>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .cart
        .set_all_checked(customer.customer_id, payload.state)
        .await?;
    Ok(no_content_response())
}

#[utoipa::path(
    get,
    path = "/api/v1/cart/count",
    responses((status = 200, description = "Number of cart lines", body = CartCount)),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn cart_count(
    State(state): State<AppState>,
    customer: AuthCustomer,
) -> ApiResult<CartCount> {
    let count = state.services.cart.cart_count(customer.customer_id).await?;
    Ok(Json(ApiResponse::success(count)))
}
