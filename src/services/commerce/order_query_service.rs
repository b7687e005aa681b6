use crate::{
    entities::{customer_address, order, order_item, shipping_area},
    errors::ServiceError,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Query, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderSummary {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub gross_amount: i64,
    pub transaction_status: String,
    pub is_paid: bool,
    pub is_cancelled: bool,
    pub item_count: usize,
    pub first_item_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderLineView {
    pub product_id: Uuid,
    pub name: String,
    pub description: String,
    pub price: i64,
    pub weight: Decimal,
    pub quantity: i32,
}

impl From<order_item::Model> for OrderLineView {
    fn from(item: order_item::Model) -> Self {
        Self {
            product_id: item.product_id,
            name: item.on_buy_name,
            description: item.on_buy_description,
            price: item.on_buy_price,
            weight: item.on_buy_weight,
            quantity: item.quantity,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ShippingAddressView {
    pub recipient_name: String,
    pub phone_number: String,
    pub full_address: String,
    pub shipping_area_id: i32,
    pub area_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderDetail {
    pub id: i64,
    pub courier_code: String,
    pub freight_cost: i64,
    pub item_cost: i64,
    pub gross_amount: i64,
    pub transaction_status: String,
    pub payment_type: String,
    pub status_description: String,
    pub is_paid: bool,
    pub is_cancelled: bool,
    pub need_refund: bool,
    /// Present only while the hosted payment page can still be used.
    pub payment_redirect_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub items: Vec<OrderLineView>,
    pub address: Option<ShippingAddressView>,
}

#[derive(Clone)]
pub struct OrderQueryService {
    db: Arc<DatabaseConnection>,
}

impl OrderQueryService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn list_orders(&self, customer_id: Uuid) -> Result<Vec<OrderSummary>, ServiceError> {
        let orders = order::Entity::find()
            .filter(order::Column::CustomerId.eq(customer_id))
            .order_by_desc(order::Column::CreatedAt)
            .order_by_desc(order::Column::Id)
            .all(&*self.db)
            .await?;
        if orders.is_empty() {
            return Err(ServiceError::NotFound("no orders yet".to_string()));
        }

        let ids: Vec<i64> = orders.iter().map(|o| o.id).collect();
        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.is_in(ids))
            .order_by_asc(order_item::Column::OrderId)
            .order_by_asc(order_item::Column::OnBuyName)
            .all(&*self.db)
            .await?;

        let mut by_order: HashMap<i64, Vec<order_item::Model>> = HashMap::new();
        for item in items {
            by_order.entry(item.order_id).or_default().push(item);
        }

        Ok(orders
            .into_iter()
            .map(|o| {
                let lines = by_order.remove(&o.id).unwrap_or_default();
                OrderSummary {
                    id: o.id,
                    created_at: o.created_at,
                    gross_amount: o.gross_amount,
                    transaction_status: o.transaction_status,
                    is_paid: o.is_paid,
                    is_cancelled: o.is_cancelled,
                    item_count: lines.len(),
                    first_item_name: lines.into_iter().next().map(|l| l.on_buy_name),
                }
            })
            .collect())
    }

    /// Order, items and shipping address are read concurrently.
    #[instrument(skip(self))]
    pub async fn order_detail(
        &self,
        customer_id: Uuid,
        order_id: i64,
    ) -> Result<OrderDetail, ServiceError> {
        let db = &*self.db;
        let order_read = order::Entity::find()
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::CustomerId.eq(customer_id))
            .one(db);
        let items_read = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::OnBuyName)
            .all(db);
        let address_read = customer_address::Entity::find()
            .filter(customer_address::Column::CustomerId.eq(customer_id))
            .filter(
                customer_address::Column::Id.in_subquery(
                    Query::select()
                        .column(order::Column::AddressId)
                        .from(order::Entity)
                        .and_where(order::Column::Id.eq(order_id))
                        .to_owned(),
                ),
            )
            .find_also_related(shipping_area::Entity)
            .one(db);

        let (order, items, address) = tokio::join!(order_read, items_read, address_read);
        let order = order?.ok_or(ServiceError::OrderNotFound)?;
        let items = items?;
        let address = address?;

        let payment_redirect_url = if order.status().awaits_payment() {
            order.payment_redirect_url.clone()
        } else {
            None
        };

        Ok(OrderDetail {
            id: order.id,
            courier_code: order.courier_code,
            freight_cost: order.freight_cost,
            item_cost: order.item_cost,
            gross_amount: order.gross_amount,
            transaction_status: order.transaction_status,
            payment_type: order.payment_type,
            status_description: order.status_description,
            is_paid: order.is_paid,
            is_cancelled: order.is_cancelled,
            need_refund: order.need_refund,
            payment_redirect_url,
            created_at: order.created_at,
            items: items.into_iter().map(OrderLineView::from).collect(),
            address: address.map(|(addr, area)| ShippingAddressView {
                recipient_name: addr.recipient_name,
                phone_number: addr.phone_number,
                full_address: addr.full_address,
                shipping_area_id: addr.shipping_area_id,
                area_name: area.map(|a| a.full_name),
            }),
        })
    }
}
