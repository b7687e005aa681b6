use crate::{
    cache::{product_rates_key, CacheBackend},
    entities::product,
    errors::ServiceError,
    services::freight::{FreightOption, FreightQuoter, ProductShipment},
};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Freight options for shipping a single product to an area, cached per
/// product and area.
#[derive(Clone)]
pub struct ProductRatesService {
    db: Arc<DatabaseConnection>,
    freight: Arc<dyn FreightQuoter>,
    cache: Arc<dyn CacheBackend>,
    ttl: Duration,
}

impl ProductRatesService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        freight: Arc<dyn FreightQuoter>,
        cache: Arc<dyn CacheBackend>,
        ttl: Duration,
    ) -> Self {
        Self {
            db,
            freight,
            cache,
            ttl,
        }
    }

    #[instrument(skip(self))]
    pub async fn product_rates(
        &self,
        product_id: Uuid,
        area_id: i32,
    ) -> Result<Vec<FreightOption>, ServiceError> {
        let key = product_rates_key(&product_id, area_id);
        if let Some(cached) = self.cached(&key).await {
            debug!(%product_id, area_id, "product rates served from cache");
            return Ok(cached);
        }

        let product = product::Entity::find_by_id(product_id)
            .filter(product::Column::DeletedAt.is_null())
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("product not found".to_string()))?;

        let shipment = ProductShipment {
            area_id,
            weight: product.weight,
            length: product.length,
            width: product.width,
            height: product.height,
        };
        let options = self.freight.quote_product(&shipment).await?.into_options();

        let payload = serde_json::to_string(&options)?;
        let cache = self.cache.clone();
        let ttl = self.ttl;
        tokio::spawn(async move {
            if let Err(e) = cache.set(&key, &payload, Some(ttl)).await {
                warn!(error = %e, "failed to cache product rates");
            }
        });

        Ok(options)
    }

    // Entries that no longer decode are dropped so the next call recomputes.
    async fn cached(&self, key: &str) -> Option<Vec<FreightOption>> {
        let raw = match self.cache.get(key).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(key, error = %e, "product rates cache read failed");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(options) => Some(options),
            Err(e) => {
                warn!(key, error = %e, "dropping corrupt product rates entry");
                if let Err(e) = self.cache.delete(key).await {
                    warn!(key, error = %e, "failed to delete corrupt cache entry");
                }
                None
            }
        }
    }
}
