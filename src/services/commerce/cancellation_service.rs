use crate::{
    entities::order::{self, TransactionStatus},
    errors::ServiceError,
    logging::OperationalLog,
    services::payment_gateway::{order_reference, PaymentGateway},
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QuerySelect,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

pub const CANCEL_DESCRIPTION: &str = "customer request for cancel";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// No payment intent was confirmed; the order is cancelled.
    Cancelled,
    /// The gateway accepted the cancel request; the webhook finalizes it.
    PendingCancel,
}

#[derive(Clone)]
pub struct CancellationService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    order_id_prefix: String,
    oplog: OperationalLog,
}

impl CancellationService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        order_id_prefix: impl Into<String>,
        oplog: OperationalLog,
    ) -> Self {
        Self {
            db,
            gateway,
            order_id_prefix: order_id_prefix.into(),
            oplog,
        }
    }

    #[instrument(skip(self))]
    pub async fn cancel(&self, customer_id: Uuid, order_id: i64) -> Result<CancelOutcome, ServiceError> {
        let status: String = order::Entity::find()
            .select_only()
            .column(order::Column::TransactionStatus)
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::CustomerId.eq(customer_id))
            .filter(order::Column::IsPaid.eq(false))
            .filter(order::Column::IsCancelled.eq(false))
            .into_tuple()
            .one(&*self.db)
            .await?
            .ok_or(ServiceError::OrderNotFound)?;

        if TransactionStatus::from_db(&status) == TransactionStatus::Unplaced {
            let result = order::Entity::update_many()
                .col_expr(order::Column::IsCancelled, Expr::value(true))
                .col_expr(
                    order::Column::TransactionStatus,
                    Expr::value(TransactionStatus::Cancel.as_str()),
                )
                .col_expr(order::Column::StatusDescription, Expr::value(CANCEL_DESCRIPTION))
                .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
                .filter(order::Column::Id.eq(order_id))
                .filter(order::Column::CustomerId.eq(customer_id))
                .filter(order::Column::TransactionStatus.eq(""))
                .filter(order::Column::IsPaid.eq(false))
                .filter(order::Column::IsCancelled.eq(false))
                .exec(&*self.db)
                .await?;
            if result.rows_affected == 0 {
                return Err(ServiceError::Conflict(
                    "order changed state while cancelling".to_string(),
                ));
            }
            counter!("storefront.orders.cancelled", 1);
            info!(order_id, "order cancelled before payment");
            return Ok(CancelOutcome::Cancelled);
        }

        let reference = order_reference(&self.order_id_prefix, order_id);
        if let Err(e) = self.gateway.cancel_transaction(&reference).await {
            warn!(order_id, error = %e, "gateway refused cancellation");
            self.oplog
                .error(format!("unable to cancel order {}: {}", reference, e));
            return Err(e.into());
        }

        order::Entity::update_many()
            .col_expr(
                order::Column::TransactionStatus,
                Expr::value(TransactionStatus::PendingCancel.as_str()),
            )
            .col_expr(order::Column::StatusDescription, Expr::value(CANCEL_DESCRIPTION))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::IsPaid.eq(false))
            .filter(order::Column::IsCancelled.eq(false))
            .exec(&*self.db)
            .await?;

        counter!("storefront.orders.cancel_requested", 1);
        info!(order_id, "cancellation forwarded to gateway");
        Ok(CancelOutcome::PendingCancel)
    }
}
