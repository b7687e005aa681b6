/// Commerce services module - cart, checkout, cancellation and settlement logic
pub mod cancellation_service;
pub mod cart_service;
pub mod checkout_service;
pub mod order_query_service;
pub mod precheckout_service;
pub mod product_rates_service;
pub mod settlement_service;
pub mod stock_reconciler;

// Re-export services for convenience
pub use cancellation_service::{CancelOutcome, CancellationService};
pub use cart_service::{AddToCartInput, CartCount, CartLineView, CartService, CheckAllInput, CheckItemInput};
pub use checkout_service::{CheckoutRequest, CheckoutService};
pub use order_query_service::{OrderDetail, OrderQueryService, OrderSummary};
pub use precheckout_service::{PreCheckoutItem, PrecheckoutService};
pub use product_rates_service::ProductRatesService;
pub use settlement_service::{PaymentNotification, SettlementOutcome, SettlementService};
pub use stock_reconciler::{ReconcileOutcome, StockReconciler};
