use crate::{
    cache::{cart_count_key, CacheBackend},
    entities::{cart_item, inventory, product},
    errors::ServiceError,
    logging::OperationalLog,
};
use chrono::Utc;
use sea_orm::{
    sea_query::{Alias, Expr, OnConflict, Query},
    ColumnTrait, DatabaseConnection, EntityTrait, FromQueryResult, JoinType, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, RelationTrait, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Upper bound of a single cart line quantity.
pub const MAX_LINE_QUANTITY: i32 = 10_000;

/// One cart line joined with its product and current stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromQueryResult, ToSchema)]
pub struct CartLineView {
    pub product_id: Uuid,
    pub name: String,
    pub price: i64,
    pub quantity: i32,
    pub current_stock: i32,
    pub checked: bool,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct AddToCartInput {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 10000))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CheckItemInput {
    pub product_id: Uuid,
    pub state: bool,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CheckAllInput {
    pub state: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CartCount {
    pub count: u64,
}

/// Cart line management plus the cached per-customer line count.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    cache: Arc<dyn CacheBackend>,
    oplog: OperationalLog,
    count_ttl: Duration,
}

impl CartService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        cache: Arc<dyn CacheBackend>,
        oplog: OperationalLog,
        count_ttl: Duration,
    ) -> Self {
        Self {
            db,
            cache,
            oplog,
            count_ttl,
        }
    }

    /// Lists the customer's cart lines of non-deleted products.
    #[instrument(skip(self))]
    pub async fn cart(&self, customer_id: Uuid) -> Result<Vec<CartLineView>, ServiceError> {
        let lines = cart_item::Entity::find()
            .select_only()
            .column_as(product::Column::Id, "product_id")
            .column_as(product::Column::Name, "name")
            .column_as(product::Column::Price, "price")
            .column_as(cart_item::Column::Quantity, "quantity")
            .column_as(inventory::Column::Quantity, "current_stock")
            .column_as(cart_item::Column::Checked, "checked")
            .join(JoinType::InnerJoin, cart_item::Relation::Product.def())
            .join(JoinType::InnerJoin, product::Relation::Inventory.def())
            .filter(cart_item::Column::CustomerId.eq(customer_id))
            .filter(product::Column::DeletedAt.is_null())
            .order_by_asc(cart_item::Column::UpdatedAt)
            .into_model::<CartLineView>()
            .all(&*self.db)
            .await?;

        if lines.is_empty() {
            return Err(ServiceError::NotFound("cart is empty".to_string()));
        }
        Ok(lines)
    }

    /// Adds a product to the cart, replacing the quantity of an existing line.
    #[instrument(skip(self))]
    pub async fn add_to_cart(
        &self,
        customer_id: Uuid,
        input: AddToCartInput,
    ) -> Result<(), ServiceError> {
        input.validate()?;

        let stock = inventory::Entity::find_by_id(input.product_id)
            .join(JoinType::InnerJoin, inventory::Relation::Product.def())
            .filter(product::Column::DeletedAt.is_null())
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("product not found".to_string()))?
            .quantity;

        if stock < input.quantity {
            return Err(ServiceError::InsufficientStock {
                current_stock: stock,
            });
        }

        let line = cart_item::ActiveModel {
            customer_id: Set(customer_id),
            product_id: Set(input.product_id),
            quantity: Set(input.quantity),
            checked: Set(false),
            updated_at: Set(Utc::now()),
        };
        cart_item::Entity::insert(line)
            .on_conflict(
                OnConflict::columns([cart_item::Column::CustomerId, cart_item::Column::ProductId])
                    .update_columns([cart_item::Column::Quantity, cart_item::Column::UpdatedAt])
                    .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;

        info!(%customer_id, product_id = %input.product_id, quantity = input.quantity, "cart line upserted");
        self.spawn_refresh_cart_count(customer_id);
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn remove_from_cart(
        &self,
        customer_id: Uuid,
        product_id: Uuid,
    ) -> Result<(), ServiceError> {
        let result = cart_item::Entity::delete_many()
            .filter(cart_item::Column::CustomerId.eq(customer_id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound("cart item not found".to_string()));
        }
        self.spawn_refresh_cart_count(customer_id);
        Ok(())
    }

    /// Ticks or unticks one line. Lines of deleted or out-of-stock products
    /// cannot change state.
    #[instrument(skip(self))]
    pub async fn set_checked(
        &self,
        customer_id: Uuid,
        product_id: Uuid,
        state: bool,
    ) -> Result<(), ServiceError> {
        let result = cart_item::Entity::update_many()
            .col_expr(cart_item::Column::Checked, Expr::value(state))
            .filter(cart_item::Column::CustomerId.eq(customer_id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .filter(Self::line_is_purchasable())
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound("cart item not found".to_string()));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn set_all_checked(&self, customer_id: Uuid, state: bool) -> Result<u64, ServiceError> {
        let result = cart_item::Entity::update_many()
            .col_expr(cart_item::Column::Checked, Expr::value(state))
            .filter(cart_item::Column::CustomerId.eq(customer_id))
            .filter(Self::line_is_purchasable())
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(
                "no cart item can change state".to_string(),
            ));
        }
        Ok(result.rows_affected)
    }

    /// Cached number of cart lines; a miss is counted from the store and
    /// written back in the background.
    #[instrument(skip(self))]
    pub async fn cart_count(&self, customer_id: Uuid) -> Result<CartCount, ServiceError> {
        let key = cart_count_key(&customer_id);
        match self.cache.get(&key).await {
            Ok(Some(raw)) => match raw.parse::<u64>() {
                Ok(count) => return Ok(CartCount { count }),
                Err(_) => warn!(%customer_id, "ignoring malformed cached cart count"),
            },
            Ok(None) => {}
            Err(e) => warn!(%customer_id, error = %e, "cart count cache read failed"),
        }

        let count = self.count_lines(customer_id).await?;

        let cache = self.cache.clone();
        let ttl = self.count_ttl;
        tokio::spawn(async move {
            if let Err(e) = cache.set(&key, &count.to_string(), Some(ttl)).await {
                warn!(error = %e, "failed to populate cart count cache");
            }
        });

        Ok(CartCount { count })
    }

    /// Recounts the customer's lines and overwrites the cached value.
    pub async fn refresh_cart_count(&self, customer_id: Uuid) -> Result<u64, ServiceError> {
        let count = self.count_lines(customer_id).await?;
        self.cache
            .set(
                &cart_count_key(&customer_id),
                &count.to_string(),
                Some(self.count_ttl),
            )
            .await?;
        Ok(count)
    }

    pub fn spawn_refresh_cart_count(&self, customer_id: Uuid) {
        let service = self.clone();
        tokio::spawn(async move {
            if let Err(e) = service.refresh_cart_count(customer_id).await {
                warn!(%customer_id, error = %e, "cart count refresh failed");
                service
                    .oplog
                    .error(format!("unable to update cart cache for {}: {}", customer_id, e));
            }
        });
    }

    /// Deletes every checked line of the customer; used after checkout.
    pub async fn delete_checked_lines(&self, customer_id: Uuid) -> Result<u64, ServiceError> {
        let result = cart_item::Entity::delete_many()
            .filter(cart_item::Column::CustomerId.eq(customer_id))
            .filter(cart_item::Column::Checked.eq(true))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected)
    }

    async fn count_lines(&self, customer_id: Uuid) -> Result<u64, ServiceError> {
        Ok(cart_item::Entity::find()
            .filter(cart_item::Column::CustomerId.eq(customer_id))
            .count(&*self.db)
            .await?)
    }

    // EXISTS (inventory of this line's product covers its quantity and the
    // product is not deleted)
    fn line_is_purchasable() -> sea_orm::sea_query::SimpleExpr {
        let inv = Alias::new("inv");
        let prod = Alias::new("prod");
        Expr::exists(
            Query::select()
                .expr(Expr::val(1))
                .from_as(inventory::Entity, inv.clone())
                .join_as(
                    JoinType::InnerJoin,
                    product::Entity,
                    prod.clone(),
                    Expr::col((prod.clone(), product::Column::Id))
                        .equals((inv.clone(), inventory::Column::ProductId)),
                )
                .and_where(
                    Expr::col((inv.clone(), inventory::Column::ProductId))
                        .equals((cart_item::Entity, cart_item::Column::ProductId)),
                )
                .and_where(
                    Expr::col((inv, inventory::Column::Quantity))
                        .gte(Expr::col((cart_item::Entity, cart_item::Column::Quantity))),
                )
                .and_where(Expr::col((prod, product::Column::DeletedAt)).is_null())
                .to_owned(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{InMemoryCache, MockCacheBackend};

    #[test]
    fn add_input_rejects_non_positive_quantity() {
        let input = AddToCartInput {
            product_id: Uuid::new_v4(),
            quantity: 0,
        };
        assert!(input.validate().is_err());
        let input = AddToCartInput {
            quantity: MAX_LINE_QUANTITY + 1,
            ..input
        };
        assert!(input.validate().is_err());
    }

    async fn service_with_cache(cache: Arc<dyn CacheBackend>) -> CartService {
        let db = crate::db::establish_connection_with_config(&crate::db::DbConfig {
            url: "sqlite::memory:".into(),
            max_connections: 1,
            ..Default::default()
        })
        .await
        .unwrap();
        crate::db::run_migrations(&db).await.unwrap();
        let db = Arc::new(db);
        CartService::new(
            db.clone(),
            cache,
            OperationalLog::new(db),
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn cart_count_prefers_cached_value() {
        let customer = Uuid::new_v4();
        let mut cache = MockCacheBackend::new();
        let key = cart_count_key(&customer);
        cache
            .expect_get()
            .withf(move |k| k == key)
            .times(1)
            .returning(|_| Ok(Some("7".to_string())));
        cache.expect_set().never();

        let service = service_with_cache(Arc::new(cache)).await;
        assert_eq!(service.cart_count(customer).await.unwrap().count, 7);
    }

    #[tokio::test]
    async fn cart_count_miss_counts_store_and_refresh_writes_cache() {
        let cache = Arc::new(InMemoryCache::new());
        let service = service_with_cache(cache.clone()).await;
        let customer = Uuid::new_v4();

        assert_eq!(service.cart_count(customer).await.unwrap().count, 0);
        assert_eq!(service.refresh_cart_count(customer).await.unwrap(), 0);
        assert_eq!(
            cache.get(&cart_count_key(&customer)).await.unwrap().as_deref(),
            Some("0")
        );
    }
}
