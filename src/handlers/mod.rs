pub mod commerce;
pub mod common;
pub mod payment_webhooks;
pub mod shipping;

use crate::{
    cache::CacheBackend,
    config::AppConfig,
    db::DbPool,
    logging::OperationalLog,
    services::{
        commerce::{
            CancellationService, CartService, CheckoutService, OrderQueryService,
            PrecheckoutService, ProductRatesService, SettlementService, StockReconciler,
        },
        freight::FreightQuoter,
        payment_gateway::PaymentGateway,
    },
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub cart: CartService,
    pub precheckout: PrecheckoutService,
    pub checkout: CheckoutService,
    pub cancellation: CancellationService,
    pub settlement: SettlementService,
    pub orders: OrderQueryService,
    pub product_rates: ProductRatesService,
}

impl AppServices {
    /// Wires every service over the shared pool, cache and remote clients.
    pub fn new(
        db_pool: Arc<DbPool>,
        cache: Arc<dyn CacheBackend>,
        freight: Arc<dyn FreightQuoter>,
        gateway: Arc<dyn PaymentGateway>,
        config: &AppConfig,
    ) -> Self {
        let oplog = OperationalLog::new(db_pool.clone());
        let gateway_config = Arc::new(config.payment.clone());

        let cart = CartService::new(
            db_pool.clone(),
            cache.clone(),
            oplog.clone(),
            config.cart_count_ttl(),
        );
        let precheckout = PrecheckoutService::new(db_pool.clone(), freight.clone());
        let checkout = CheckoutService::new(
            db_pool.clone(),
            precheckout.clone(),
            cart.clone(),
            gateway.clone(),
            gateway_config.clone(),
            oplog.clone(),
        );
        let cancellation = CancellationService::new(
            db_pool.clone(),
            gateway,
            config.payment.order_id_prefix.clone(),
            oplog.clone(),
        );
        let reconciler = StockReconciler::new(db_pool.clone(), oplog.clone());
        let settlement =
            SettlementService::new(db_pool.clone(), gateway_config, reconciler, oplog);
        let orders = OrderQueryService::new(db_pool.clone());
        let product_rates =
            ProductRatesService::new(db_pool, freight, cache, config.product_rates_ttl());

        Self {
            cart,
            precheckout,
            checkout,
            cancellation,
            settlement,
            orders,
            product_rates,
        }
    }
}
