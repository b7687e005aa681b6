// Remote collaborators
pub mod freight;
pub mod payment_gateway;

// Checkout, cart and order business logic
pub mod commerce;
