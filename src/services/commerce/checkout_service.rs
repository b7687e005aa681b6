use crate::{
    config::PaymentGatewayConfig,
    entities::{customer, order, order_item},
    errors::ServiceError,
    logging::OperationalLog,
    services::{
        commerce::{
            cart_service::CartService,
            precheckout_service::{CheckedLine, PrecheckoutService},
        },
        freight::find_option,
        payment_gateway::{CustomerDetails, IntentLine, PaymentGateway, PaymentIntent, SnapRequest},
    },
    tracing::with_metrics,
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, Set, TransactionTrait,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CheckoutRequest {
    /// Composite `courier-productcode` chosen from the freight options.
    #[validate(length(min = 3, max = 64))]
    pub courier_code: String,
    #[serde(alias = "address_code")]
    pub address_id: Uuid,
}

struct OrderTotals {
    freight_cost: i64,
    item_cost: i64,
    gross_amount: i64,
}

/// Converts the checked cart into an order and a payment intent.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    precheckout: PrecheckoutService,
    cart: CartService,
    gateway: Arc<dyn PaymentGateway>,
    gateway_config: Arc<PaymentGatewayConfig>,
    oplog: OperationalLog,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        precheckout: PrecheckoutService,
        cart: CartService,
        gateway: Arc<dyn PaymentGateway>,
        gateway_config: Arc<PaymentGatewayConfig>,
        oplog: OperationalLog,
    ) -> Self {
        Self {
            db,
            precheckout,
            cart,
            gateway,
            gateway_config,
            oplog,
        }
    }

    /// Places the order and returns the hosted payment page.
    ///
    /// The order and its items are written in one transaction that commits
    /// only after the gateway accepted the intent. Clearing the cart and
    /// storing the payment references happen after the commit on a
    /// background task.
    #[instrument(skip(self, request), fields(address_id = %request.address_id, courier = %request.courier_code))]
    pub async fn checkout(
        &self,
        customer_id: Uuid,
        request: CheckoutRequest,
    ) -> Result<PaymentIntent, ServiceError> {
        request.validate()?;

        let prepared = self
            .precheckout
            .prepare(customer_id, request.address_id)
            .await?;
        let options = self
            .precheckout
            .quote(prepared.area_id, &prepared.aggregate)
            .await?;
        let freight_cost = find_option(&options, &request.courier_code)
            .ok_or(ServiceError::InvalidCourierChoice)?
            .rates;

        let item_cost: i64 = prepared.lines.iter().map(CheckedLine::line_total).sum();
        let totals = OrderTotals {
            freight_cost,
            item_cost,
            gross_amount: item_cost + freight_cost,
        };

        let txn = self.db.begin().await?;
        let (inserted, contact) = tokio::join!(
            Self::insert_order(&txn, customer_id, &request, &totals, &prepared.lines),
            self.billing_contact(customer_id),
        );
        let (order_id, contact) = match (inserted, contact) {
            (Ok(id), Ok(contact)) => (id, contact),
            (inserted, contact) => {
                let err = inserted.err().or(contact.err()).unwrap_or_else(|| {
                    ServiceError::InternalError("checkout persistence failed".into())
                });
                Self::rollback(txn).await;
                self.record_failure(customer_id, &err);
                return Err(err);
            }
        };

        let intent_lines: Vec<IntentLine> = prepared
            .lines
            .iter()
            .map(|line| IntentLine {
                product_id: line.product_id.to_string(),
                name: line.name.clone(),
                price: line.price,
                quantity: line.quantity,
            })
            .collect();
        let snap = SnapRequest::for_order(
            &self.gateway_config,
            order_id,
            &intent_lines,
            &request.courier_code,
            totals.freight_cost,
            totals.gross_amount,
            contact,
            &Utc::now(),
        );

        let created = with_metrics("storefront.gateway.create_intent", || {
            self.gateway.create_intent(&snap)
        })
        .await;
        let intent = match created {
            Ok(intent) => intent,
            Err(e) => {
                Self::rollback(txn).await;
                let err = ServiceError::from(e);
                self.record_failure(customer_id, &err);
                return Err(err);
            }
        };

        if let Err(e) = txn.commit().await {
            error!(order_id, error = %e, "commit failed after payment intent was created");
            let err = ServiceError::from(e);
            self.record_failure(customer_id, &err);
            return Err(err);
        }

        counter!("storefront.checkout.placed", 1);
        info!(order_id, gross_amount = totals.gross_amount, "order placed");

        self.spawn_after_commit(customer_id, order_id, intent.clone());
        Ok(intent)
    }

    async fn insert_order<C: ConnectionTrait>(
        conn: &C,
        customer_id: Uuid,
        request: &CheckoutRequest,
        totals: &OrderTotals,
        lines: &[CheckedLine],
    ) -> Result<i64, ServiceError> {
        let now = Utc::now();
        let order = order::ActiveModel {
            customer_id: Set(customer_id),
            address_id: Set(request.address_id),
            courier_code: Set(request.courier_code.clone()),
            freight_cost: Set(totals.freight_cost),
            item_cost: Set(totals.item_cost),
            gross_amount: Set(totals.gross_amount),
            payment_token: Set(None),
            payment_redirect_url: Set(None),
            transaction_status: Set(String::new()),
            payment_type: Set(String::new()),
            status_description: Set(String::new()),
            is_paid: Set(false),
            is_cancelled: Set(false),
            need_refund: Set(false),
            stock_reconciled: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(conn)
        .await?;

        let items = lines.iter().map(|line| order_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(line.product_id),
            on_buy_name: Set(line.name.clone()),
            on_buy_description: Set(line.description.clone()),
            on_buy_price: Set(line.price),
            on_buy_weight: Set(line.weight),
            quantity: Set(line.quantity),
        });
        order_item::Entity::insert_many(items)
            .exec_without_returning(conn)
            .await?;

        Ok(order.id)
    }

    async fn billing_contact(&self, customer_id: Uuid) -> Result<CustomerDetails, ServiceError> {
        let customer = customer::Entity::find_by_id(customer_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("customer not found".to_string()))?;
        Ok(CustomerDetails {
            first_name: customer.first_name,
            last_name: customer.last_name,
            email: customer.email,
            phone: customer.phone_number,
        })
    }

    async fn rollback(txn: sea_orm::DatabaseTransaction) {
        if let Err(e) = txn.rollback().await {
            error!(error = %e, "checkout rollback failed");
        }
    }

    fn record_failure(&self, customer_id: Uuid, err: &ServiceError) {
        counter!("storefront.checkout.failed", 1);
        warn!(%customer_id, error = %err, "checkout failed");
        if err.status_code().is_server_error() {
            self.oplog
                .error(format!("checkout failed for customer {}: {}", customer_id, err));
        }
    }

    fn spawn_after_commit(
        &self,
        customer_id: Uuid,
        order_id: i64,
        intent: PaymentIntent,
    ) {
        let db = self.db.clone();
        let cart = self.cart.clone();
        let oplog = self.oplog.clone();
        tokio::spawn(async move {
            match cart.delete_checked_lines(customer_id).await {
                Ok(_) => {
                    if let Err(e) = cart.refresh_cart_count(customer_id).await {
                        oplog.error(format!(
                            "unable to update cart cache for {}: {}",
                            customer_id, e
                        ));
                    }
                }
                Err(e) => oplog.error(format!(
                    "unable to clear cart of {} after order {}: {}",
                    customer_id, order_id, e
                )),
            }

            let stored = order::Entity::update_many()
                .col_expr(order::Column::PaymentToken, Expr::value(intent.token))
                .col_expr(
                    order::Column::PaymentRedirectUrl,
                    Expr::value(intent.redirect_url),
                )
                .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
                .filter(order::Column::Id.eq(order_id))
                .exec(&*db)
                .await;
            if let Err(e) = stored {
                oplog.error(format!(
                    "unable to store payment token for order {}: {}",
                    order_id, e
                ));
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_accepts_legacy_address_field() {
        let id = Uuid::new_v4();
        let body = serde_json::json!({"courier_code": "anteraja-REG", "address_code": id});
        let request: CheckoutRequest = serde_json::from_value(body).unwrap();
        assert_eq!(request.address_id, id);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn request_rejects_blank_courier() {
        let request = CheckoutRequest {
            courier_code: String::new(),
            address_id: Uuid::new_v4(),
        };
        assert!(request.validate().is_err());
    }
}
