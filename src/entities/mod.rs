pub mod cart_item;
pub mod customer;
pub mod customer_address;
pub mod inventory;
pub mod log_entry;
pub mod order;
pub mod order_item;
pub mod product;
pub mod shipping_area;
