use axum::Json;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront Checkout API",
        version = "1.0.0",
        description = r#"
# Storefront Checkout API

Cart, pre-checkout, checkout, order and payment-notification endpoints of the
storefront backend.

## Authentication

Customer endpoints require a bearer JWT whose `sub` claim is the customer id:

```
Authorization: Bearer <token>
```

The payment notification endpoint is authenticated by the gateway signature
carried in the body.
        "#
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Cart", description = "Cart line management"),
        (name = "Checkout", description = "Freight quotes and order placement"),
        (name = "Orders", description = "Order history and cancellation"),
        (name = "Shipping", description = "Per-product freight rates"),
        (name = "Payments", description = "Gateway notifications")
    ),
    paths(
        // Cart
        crate::handlers::commerce::cart::get_cart,
        crate::handlers::commerce::cart::add_to_cart,
        crate::handlers::commerce::cart::remove_from_cart,
        crate::handlers::commerce::cart::check_item,
        crate::handlers::commerce::cart::check_all,
        crate::handlers::commerce::cart::cart_count,

        // Checkout
        crate::handlers::commerce::checkout::freight_options,
        crate::handlers::commerce::checkout::checked_items,
        crate::handlers::commerce::checkout::checkout,

        // Orders
        crate::handlers::commerce::orders::list_orders,
        crate::handlers::commerce::orders::get_order,
        crate::handlers::commerce::orders::cancel_order,

        // Shipping
        crate::handlers::shipping::product_rates,

        // Webhooks
        crate::handlers::payment_webhooks::payment_notification,
    ),
    components(
        schemas(
            crate::services::commerce::CartLineView,
            crate::services::commerce::AddToCartInput,
            crate::services::commerce::CheckItemInput,
            crate::services::commerce::CheckAllInput,
            crate::services::commerce::CartCount,
            crate::services::commerce::PreCheckoutItem,
            crate::services::commerce::CheckoutRequest,
            crate::services::commerce::OrderSummary,
            crate::services::commerce::OrderDetail,
            crate::services::commerce::CancelOutcome,
            crate::services::commerce::PaymentNotification,
            crate::services::freight::FreightOption,
            crate::services::payment_gateway::PaymentIntent,
            crate::handlers::commerce::orders::CancelResponse,

            // Error types
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&BearerAuth)
)]
pub struct ApiDocV1;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// GET /api-docs/openapi.json
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDocV1::openapi())
}
