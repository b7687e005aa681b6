pub mod cart;
pub mod checkout;
pub mod orders;

pub use cart::cart_routes;
pub use checkout::checkout_routes;
pub use orders::orders_routes;
