use crate::{
    config::PaymentGatewayConfig,
    entities::order::{self, TransactionStatus},
    errors::ServiceError,
    logging::OperationalLog,
    services::{
        commerce::stock_reconciler::StockReconciler,
        payment_gateway::{notification_signature, parse_order_reference, signature_matches},
    },
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;

/// Payment status notification posted by the gateway.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PaymentNotification {
    pub transaction_status: String,
    pub status_code: String,
    pub signature_key: String,
    pub order_id: String,
    pub gross_amount: String,
    #[serde(default)]
    pub payment_type: String,
    #[serde(default)]
    pub fraud_status: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Paid,
    Void,
    StatusOnly,
}

impl PaymentNotification {
    fn transition(&self) -> Transition {
        let status = TransactionStatus::from_db(&self.transaction_status);
        let fraud_flagged = matches!(self.fraud_status.as_deref(), Some("deny" | "challenge"));
        if status.is_paid() && !fraud_flagged {
            Transition::Paid
        } else if status.is_void() {
            Transition::Void
        } else {
            Transition::StatusOnly
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementOutcome {
    Paid,
    Voided,
    StatusRecorded,
    /// Late or duplicate notification after a different final state.
    Ignored,
}

/// Applies gateway notifications to orders and starts stock reconciliation
/// on the paid transition.
#[derive(Clone)]
pub struct SettlementService {
    db: Arc<DatabaseConnection>,
    config: Arc<PaymentGatewayConfig>,
    reconciler: StockReconciler,
    oplog: OperationalLog,
}

impl SettlementService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: Arc<PaymentGatewayConfig>,
        reconciler: StockReconciler,
        oplog: OperationalLog,
    ) -> Self {
        Self {
            db,
            config,
            reconciler,
            oplog,
        }
    }

    pub fn verify_signature(&self, notification: &PaymentNotification) -> bool {
        let expected = notification_signature(
            &notification.order_id,
            &notification.status_code,
            &notification.gross_amount,
            &self.config.server_key,
        );
        signature_matches(&expected, &notification.signature_key)
    }

    #[instrument(skip(self, notification), fields(reference = %notification.order_id, status = %notification.transaction_status))]
    pub async fn handle_notification(
        &self,
        notification: PaymentNotification,
    ) -> Result<SettlementOutcome, ServiceError> {
        if !self.verify_signature(&notification) {
            counter!("storefront.webhook.invalid_signature", 1);
            return Err(ServiceError::InvalidSignature);
        }

        let order_id = parse_order_reference(&self.config.order_id_prefix, &notification.order_id)
            .ok_or_else(|| ServiceError::BadRequest("unrecognized order reference".to_string()))?;

        let status = TransactionStatus::from_db(&notification.transaction_status);
        let transition = notification.transition();
        let mut update = order::Entity::update_many()
            .col_expr(
                order::Column::TransactionStatus,
                Expr::value(notification.transaction_status.clone()),
            )
            .col_expr(
                order::Column::PaymentType,
                Expr::value(notification.payment_type.clone()),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()));
        update = match transition {
            Transition::Paid => update.col_expr(order::Column::IsPaid, Expr::value(true)),
            Transition::Void => update.col_expr(order::Column::IsCancelled, Expr::value(true)),
            Transition::StatusOnly => update,
        };

        let mut update = update.filter(order::Column::Id.eq(order_id));
        if status.is_lifecycle() {
            update = update.filter(Self::accepts(&notification.transaction_status));
        }
        let applied = update
            .exec(&*self.db)
            .await?
            .rows_affected;

        if applied == 0 {
            self.report_ignored(order_id, &notification, transition).await;
            return Ok(SettlementOutcome::Ignored);
        }

        info!(order_id, ?transition, "payment notification applied");
        Ok(match transition {
            Transition::Paid => {
                counter!("storefront.webhook.paid", 1);
                self.spawn_reconcile(order_id);
                SettlementOutcome::Paid
            }
            Transition::Void => SettlementOutcome::Voided,
            Transition::StatusOnly => SettlementOutcome::StatusRecorded,
        })
    }

    /// Runs stock reconciliation for the order on a background task.
    pub fn spawn_reconcile(&self, order_id: i64) -> JoinHandle<()> {
        let reconciler = self.reconciler.clone();
        let oplog = self.oplog.clone();
        tokio::spawn(async move {
            if let Err(e) = reconciler.reconcile(order_id).await {
                error!(order_id, error = %e, "stock reconciliation failed");
                oplog.error(format!("stock reconciliation failed for order {}: {}", order_id, e));
            }
        })
    }

    // Open orders accept any lifecycle status; a settled or voided order only
    // accepts a redelivery of its own status. Statuses outside the lifecycle
    // skip this guard and never touch the paid or cancelled flags.
    fn accepts(incoming: &str) -> Condition {
        Condition::any()
            .add(
                Condition::all()
                    .add(order::Column::IsPaid.eq(false))
                    .add(order::Column::IsCancelled.eq(false)),
            )
            .add(order::Column::TransactionStatus.eq(incoming))
    }

    async fn report_ignored(
        &self,
        order_id: i64,
        notification: &PaymentNotification,
        transition: Transition,
    ) {
        match order::Entity::find_by_id(order_id).one(&*self.db).await {
            Ok(Some(order)) => {
                warn!(order_id, current = %order.transaction_status, "notification ignored for closed order");
                if transition == Transition::Paid && !order.is_paid {
                    self.oplog.error(format!(
                        "payment {} received for closed order {}; refund required",
                        notification.transaction_status, order_id
                    ));
                }
            }
            Ok(None) => warn!(order_id, "notification for unknown order"),
            Err(e) => warn!(order_id, error = %e, "could not inspect ignored notification"),
        }
    }
}
