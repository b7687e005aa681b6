use crate::{services::commerce::PaymentNotification, AppState};
use axum::{body::Bytes, extract::State, http::StatusCode};
use tracing::{info, warn};

// POST /api/v1/payments/notification
#[utoipa::path(
    post,
    path = "/api/v1/payments/notification",
    request_body = PaymentNotification,
    responses(
        (status = 200, description = "Notification accepted"),
        (status = 400, description = "Malformed notification"),
        (status = 401, description = "Invalid signature"),
        (status = 500, description = "Not persisted; the gateway should redeliver")
    ),
    tag = "Payments"
)]
pub async fn payment_notification(State(state): State<AppState>, body: Bytes) -> StatusCode {
    let notification: PaymentNotification = match serde_json::from_slice(&body) {
        Ok(notification) => notification,
        Err(e) => {
            warn!(error = %e, "unparseable payment notification");
            return StatusCode::BAD_REQUEST;
        }
    };

    match state
        .services
        .settlement
        .handle_notification(notification)
        .await
    {
        Ok(outcome) => {
            info!(?outcome, "payment notification handled");
            StatusCode::OK
        }
        Err(e) => {
            let status = e.status_code();
            if status.is_server_error() {
                tracing::error!(error = %e, "payment notification not persisted");
            } else {
                warn!(error = %e, "payment notification rejected");
            }
            status
        }
    }
}
