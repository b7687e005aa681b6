use crate::{
    entities::{
        inventory,
        order::{self, TransactionStatus},
        order_item,
    },
    errors::ServiceError,
    logging::OperationalLog,
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, TransactionTrait,
};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Every line was deducted from inventory.
    Reconciled,
    /// The order was not paid or another run already claimed it.
    AlreadyClaimed,
    /// A product ran short; the order is denied and flagged for refund.
    Insufficient { product_id: Uuid, product_name: String },
}

/// Deducts a paid order's quantities from inventory exactly once.
#[derive(Clone)]
pub struct StockReconciler {
    db: Arc<DatabaseConnection>,
    oplog: OperationalLog,
}

impl StockReconciler {
    pub fn new(db: Arc<DatabaseConnection>, oplog: OperationalLog) -> Self {
        Self { db, oplog }
    }

    #[instrument(skip(self))]
    pub async fn reconcile(&self, order_id: i64) -> Result<ReconcileOutcome, ServiceError> {
        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::ProductId)
            .all(&*self.db)
            .await?;

        let txn = self.db.begin().await?;

        let claimed = order::Entity::update_many()
            .col_expr(order::Column::StockReconciled, Expr::value(true))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::IsPaid.eq(true))
            .filter(order::Column::StockReconciled.eq(false))
            .exec(&txn)
            .await?;
        if claimed.rows_affected == 0 {
            txn.rollback().await?;
            debug!(order_id, "stock already reconciled");
            return Ok(ReconcileOutcome::AlreadyClaimed);
        }

        let product_ids: Vec<Uuid> = items.iter().map(|item| item.product_id).collect();
        inventory::Entity::find()
            .filter(inventory::Column::ProductId.is_in(product_ids))
            .order_by_asc(inventory::Column::ProductId)
            .lock_exclusive()
            .all(&txn)
            .await?;

        // Decrements run inside a savepoint so a shortage can undo them
        // while the claim stays in place.
        let decrements = txn.begin().await?;
        for item in &items {
            let result = inventory::Entity::update_many()
                .col_expr(
                    inventory::Column::Quantity,
                    Expr::col(inventory::Column::Quantity).sub(item.quantity),
                )
                .filter(inventory::Column::ProductId.eq(item.product_id))
                .filter(inventory::Column::Quantity.gte(item.quantity))
                .exec(&decrements)
                .await?;

            if result.rows_affected == 0 {
                decrements.rollback().await?;
                Self::deny_for_refund(&txn, order_id, &item.on_buy_name).await?;
                txn.commit().await?;

                counter!("storefront.stock.insufficient", 1);
                warn!(order_id, product_id = %item.product_id, "insufficient stock for paid order");
                self.oplog.warn(format!(
                    "order {} denied, insufficient stock for {}; refund required",
                    order_id, item.on_buy_name
                ));
                return Ok(ReconcileOutcome::Insufficient {
                    product_id: item.product_id,
                    product_name: item.on_buy_name.clone(),
                });
            }
        }
        decrements.commit().await?;
        txn.commit().await?;

        counter!("storefront.stock.reconciled", 1);
        info!(order_id, lines = items.len(), "stock reconciled");
        Ok(ReconcileOutcome::Reconciled)
    }

    async fn deny_for_refund<C: ConnectionTrait>(
        conn: &C,
        order_id: i64,
        product_name: &str,
    ) -> Result<(), ServiceError> {
        order::Entity::update_many()
            .col_expr(
                order::Column::TransactionStatus,
                Expr::value(TransactionStatus::Deny.as_str()),
            )
            .col_expr(order::Column::NeedRefund, Expr::value(true))
            .col_expr(order::Column::StockReconciled, Expr::value(true))
            .col_expr(
                order::Column::StatusDescription,
                Expr::value(format!("insufficient stock for {}", product_name)),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .exec(conn)
            .await?;
        Ok(())
    }
}
