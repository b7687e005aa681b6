use crate::{
    entities::{cart_item, customer_address, inventory, product},
    errors::ServiceError,
    services::freight::{CartShipment, FreightOption, FreightQuoter},
    tracing::with_metrics,
};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ColumnTrait, DatabaseConnection, EntityTrait, FromQueryResult, JoinType,
    QueryFilter, QueryOrder, QuerySelect, RelationTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

/// A checked, purchasable cart line with the product data an order snapshots.
#[derive(Debug, Clone, PartialEq, FromQueryResult)]
pub struct CheckedLine {
    pub product_id: Uuid,
    pub name: String,
    pub description: String,
    pub price: i64,
    pub weight: Decimal,
    pub length: Decimal,
    pub width: Decimal,
    pub height: Decimal,
    pub quantity: i32,
}

impl CheckedLine {
    pub fn line_total(&self) -> i64 {
        self.price * i64::from(self.quantity)
    }
}

/// Totals of the checked cart used for the freight quote and order pricing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartAggregate {
    pub weight: Decimal,
    pub volume: Decimal,
    pub item_cost: i64,
}

impl CartAggregate {
    /// Sums the lines; `None` when there is nothing to ship.
    pub fn from_lines(lines: &[CheckedLine]) -> Option<Self> {
        if lines.is_empty() {
            return None;
        }
        Some(lines.iter().fold(
            CartAggregate {
                weight: Decimal::ZERO,
                volume: Decimal::ZERO,
                item_cost: 0,
            },
            |acc, line| {
                let qty = Decimal::from(line.quantity);
                CartAggregate {
                    weight: acc.weight + line.weight * qty,
                    volume: acc.volume + line.length * line.width * line.height * qty,
                    item_cost: acc.item_cost + line.line_total(),
                }
            },
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PreCheckoutItem {
    pub id: Uuid,
    pub name: String,
    pub price: i64,
    pub quantity: i32,
}

impl From<&CheckedLine> for PreCheckoutItem {
    fn from(line: &CheckedLine) -> Self {
        Self {
            id: line.product_id,
            name: line.name.clone(),
            price: line.price,
            quantity: line.quantity,
        }
    }
}

/// Result of the three-way checkout aggregation.
#[derive(Debug, Clone)]
pub struct PreparedCheckout {
    pub area_id: i32,
    pub aggregate: CartAggregate,
    pub lines: Vec<CheckedLine>,
}

// Lower ranks win when several concurrent reads fail.
fn fanout_rank(err: &ServiceError) -> u8 {
    match err {
        ServiceError::AddressNotFound => 0,
        ServiceError::EmptyCart => 1,
        _ => 2,
    }
}

/// Picks the error to report from the failed branches of a fan-out.
pub fn prioritize_errors(errors: impl IntoIterator<Item = ServiceError>) -> Option<ServiceError> {
    errors.into_iter().min_by_key(fanout_rank)
}

fn merge2<A, B>(a: Result<A, ServiceError>, b: Result<B, ServiceError>) -> Result<(A, B), ServiceError> {
    match (a, b) {
        (Ok(a), Ok(b)) => Ok((a, b)),
        (a, b) => Err(prioritize_errors([a.err(), b.err()].into_iter().flatten())
            .unwrap_or_else(|| ServiceError::InternalError("fan-out failed".into()))),
    }
}

fn merge3<A, B, C>(
    a: Result<A, ServiceError>,
    b: Result<B, ServiceError>,
    c: Result<C, ServiceError>,
) -> Result<(A, B, C), ServiceError> {
    match (a, b, c) {
        (Ok(a), Ok(b), Ok(c)) => Ok((a, b, c)),
        (a, b, c) => Err(prioritize_errors([a.err(), b.err(), c.err()].into_iter().flatten())
            .unwrap_or_else(|| ServiceError::InternalError("fan-out failed".into()))),
    }
}

/// Validates address and cart concurrently and quotes freight for them.
#[derive(Clone)]
pub struct PrecheckoutService {
    db: Arc<DatabaseConnection>,
    freight: Arc<dyn FreightQuoter>,
}

impl PrecheckoutService {
    pub fn new(db: Arc<DatabaseConnection>, freight: Arc<dyn FreightQuoter>) -> Self {
        Self { db, freight }
    }

    /// Shipping area of one of the customer's addresses.
    pub async fn shipping_area_of(
        &self,
        customer_id: Uuid,
        address_id: Uuid,
    ) -> Result<i32, ServiceError> {
        customer_address::Entity::find()
            .filter(customer_address::Column::Id.eq(address_id))
            .filter(customer_address::Column::CustomerId.eq(customer_id))
            .one(&*self.db)
            .await?
            .map(|address| address.shipping_area_id)
            .ok_or(ServiceError::AddressNotFound)
    }

    /// Checked lines whose product is live and whose quantity is covered by stock.
    pub async fn checked_lines(&self, customer_id: Uuid) -> Result<Vec<CheckedLine>, ServiceError> {
        let lines = cart_item::Entity::find()
            .select_only()
            .column_as(product::Column::Id, "product_id")
            .column_as(product::Column::Name, "name")
            .column_as(product::Column::Description, "description")
            .column_as(product::Column::Price, "price")
            .column_as(product::Column::Weight, "weight")
            .column_as(product::Column::Length, "length")
            .column_as(product::Column::Width, "width")
            .column_as(product::Column::Height, "height")
            .column_as(cart_item::Column::Quantity, "quantity")
            .join(JoinType::InnerJoin, cart_item::Relation::Product.def())
            .join(JoinType::InnerJoin, product::Relation::Inventory.def())
            .filter(cart_item::Column::CustomerId.eq(customer_id))
            .filter(cart_item::Column::Checked.eq(true))
            .filter(product::Column::DeletedAt.is_null())
            .filter(
                Expr::col((cart_item::Entity, cart_item::Column::Quantity))
                    .lte(Expr::col((inventory::Entity, inventory::Column::Quantity))),
            )
            .order_by_asc(product::Column::Id)
            .into_model::<CheckedLine>()
            .all(&*self.db)
            .await?;

        if lines.is_empty() {
            return Err(ServiceError::EmptyCart);
        }
        Ok(lines)
    }

    pub async fn aggregate(&self, customer_id: Uuid) -> Result<CartAggregate, ServiceError> {
        let lines = self.checked_lines(customer_id).await?;
        CartAggregate::from_lines(&lines).ok_or(ServiceError::EmptyCart)
    }

    /// Quotes the aggregate shipment and re-labels offers with composite codes.
    pub async fn quote(
        &self,
        area_id: i32,
        aggregate: &CartAggregate,
    ) -> Result<Vec<FreightOption>, ServiceError> {
        let shipment = CartShipment {
            area_id,
            weight: aggregate.weight,
            volume: aggregate.volume,
        };
        let options = with_metrics("storefront.freight.cart_quote", || {
            self.freight.quote_cart(&shipment)
        })
        .await?
        .into_options();
        debug!(area_id, offers = options.len(), "freight quoted");
        Ok(options)
    }

    #[instrument(skip(self))]
    pub async fn freight_options(
        &self,
        customer_id: Uuid,
        address_id: Uuid,
    ) -> Result<Vec<FreightOption>, ServiceError> {
        let (area, aggregate) = tokio::join!(
            self.shipping_area_of(customer_id, address_id),
            self.aggregate(customer_id),
        );
        let (area_id, aggregate) = merge2(area, aggregate)?;
        self.quote(area_id, &aggregate).await
    }

    #[instrument(skip(self))]
    pub async fn checked_items(&self, customer_id: Uuid) -> Result<Vec<PreCheckoutItem>, ServiceError> {
        let lines = self.checked_lines(customer_id).await?;
        Ok(lines.iter().map(PreCheckoutItem::from).collect())
    }

    /// Address, aggregate and line reads for checkout, joined before returning.
    #[instrument(skip(self))]
    pub async fn prepare(
        &self,
        customer_id: Uuid,
        address_id: Uuid,
    ) -> Result<PreparedCheckout, ServiceError> {
        // Three independent reads, matching the freight-options fan-out. The
        // aggregate repeats the line query on its own connection; freight is
        // priced from `aggregate`, order totals from `lines`.
        let (area, aggregate, lines) = tokio::join!(
            self.shipping_area_of(customer_id, address_id),
            self.aggregate(customer_id),
            self.checked_lines(customer_id),
        );
        let (area_id, aggregate, lines) = merge3(area, aggregate, lines)?;
        Ok(PreparedCheckout {
            area_id,
            aggregate,
            lines,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn line(price: i64, quantity: i32, weight: Decimal, dims: (Decimal, Decimal, Decimal)) -> CheckedLine {
        CheckedLine {
            product_id: Uuid::new_v4(),
            name: "Kopi".into(),
            description: String::new(),
            price,
            weight,
            length: dims.0,
            width: dims.1,
            height: dims.2,
            quantity,
        }
    }

    #[test]
    fn aggregate_sums_weight_volume_and_cost() {
        let lines = vec![
            line(10_000, 2, dec!(0.5), (dec!(10), dec!(5), dec!(2))),
            line(3_500, 3, dec!(0.25), (dec!(4), dec!(4), dec!(4))),
        ];
        let agg = CartAggregate::from_lines(&lines).unwrap();
        assert_eq!(agg.weight, dec!(1.75));
        assert_eq!(agg.volume, dec!(392));
        assert_eq!(agg.item_cost, 30_500);
    }

    #[test]
    fn empty_cart_has_no_aggregate() {
        assert!(CartAggregate::from_lines(&[]).is_none());
    }

    #[test]
    fn address_error_outranks_empty_cart() {
        let picked = prioritize_errors([
            ServiceError::EmptyCart,
            ServiceError::InternalError("boom".into()),
            ServiceError::AddressNotFound,
        ]);
        assert_matches!(picked, Some(ServiceError::AddressNotFound));

        let picked = merge3::<(), (), ()>(
            Err(ServiceError::InternalError("boom".into())),
            Err(ServiceError::EmptyCart),
            Ok(()),
        );
        assert_matches!(picked, Err(ServiceError::EmptyCart));
    }

    proptest! {
        #[test]
        fn item_cost_is_sum_of_line_totals(
            parts in proptest::collection::vec((1i64..1_000_000, 1i32..100), 1..20)
        ) {
            let lines: Vec<_> = parts
                .iter()
                .map(|(p, q)| line(*p, *q, dec!(1), (dec!(1), dec!(1), dec!(1))))
                .collect();
            let agg = CartAggregate::from_lines(&lines).unwrap();
            let expected: i64 = parts.iter().map(|(p, q)| p * i64::from(*q)).sum();
            prop_assert_eq!(agg.item_cost, expected);
            let qty: i32 = parts.iter().map(|(_, q)| q).sum();
            prop_assert_eq!(agg.weight, Decimal::from(qty));
        }
    }
}
