/*!
 * # Storefront Checkout
 *
 * Order-placement backend of an online storefront: cart management,
 * concurrent pre-checkout aggregation, transactional checkout against a
 * hosted payment gateway, cancellation, signed payment notifications and
 * the locked stock reconciliation that runs once per paid order.
 */

pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod handlers;
pub mod logging;
pub mod middleware_helpers;
pub mod migrator;
pub mod openapi;
pub mod services;
pub mod tracing;

use axum::{extract::State, middleware, response::Json, routing::get, Router};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::auth::{AuthRouterExt, AuthService};
use crate::cache::CacheBackend;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<config::AppConfig>,
    pub services: handlers::AppServices,
    pub cache: Arc<dyn CacheBackend>,
    pub auth: Arc<AuthService>,
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            meta: Some(ResponseMeta::capture()),
        }
    }
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use chrono::DateTime;

    #[tokio::test]
    async fn success_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-123"), async {
                ApiResponse::success("ok")
            })
            .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-123"));
        DateTime::parse_from_rfc3339(&meta.timestamp).expect("timestamp should parse");
    }

    #[tokio::test]
    async fn error_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-err"), async {
                ApiResponse::<()>::error("oops".into())
            })
            .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-err"));
        assert!(!response.success);
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// Routes mounted under `/api/v1`
pub fn api_v1_routes(auth: Arc<AuthService>) -> Router<AppState> {
    // Customer routes (bearer token)
    let customer = Router::new()
        .nest("/cart", handlers::commerce::cart_routes())
        .nest("/checkout", handlers::commerce::checkout_routes())
        .nest("/orders", handlers::commerce::orders_routes())
        .with_auth(auth);

    // Payment notification (no bearer token, signature-verified)
    let payment_webhook = Router::new().route(
        "/payments/notification",
        axum::routing::post(handlers::payment_webhooks::payment_notification),
    );

    Router::new()
        // Status and health endpoints
        .route("/status", get(api_status))
        .route("/health", get(health_check))
        .nest("/shipping", handlers::shipping::shipping_routes())
        .merge(payment_webhook)
        .merge(customer)
}

/// Complete application router with request ids and HTTP tracing.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_v1_routes(state.auth.clone()))
        .route("/api-docs/openapi.json", get(openapi::openapi_json))
        .layer(crate::tracing::configure_http_tracing())
        .layer(middleware::from_fn(
            middleware_helpers::request_id::request_id_middleware,
        ))
        .with_state(state)
}

async fn api_status(State(state): State<AppState>) -> Json<ApiResponse<Value>> {
    let status_data = json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "storefront-checkout",
        "environment": state.config.environment,
        "timestamp": Utc::now().to_rfc3339(),
    });

    Json(ApiResponse::success(status_data))
}

async fn health_check(
    State(state): State<AppState>,
) -> (axum::http::StatusCode, Json<ApiResponse<Value>>) {
    let (db, cache) = tokio::join!(db::check_connection(&state.db), state.cache.ping());
    let db_status = if db.is_ok() { "healthy" } else { "unhealthy" };
    let cache_status = if cache.is_ok() { "healthy" } else { "unhealthy" };
    let healthy = db.is_ok() && cache.is_ok();

    let health_data = json!({
        "status": if healthy { "healthy" } else { "unhealthy" },
        "checks": {
            "database": db_status,
            "cache": cache_status,
        },
        "timestamp": Utc::now().to_rfc3339(),
    });

    let status = if healthy {
        axum::http::StatusCode::OK
    } else {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(ApiResponse::success(health_data)))
}
