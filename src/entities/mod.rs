pub mod customer;
pub mod customer_address;
pub mod discount;
pub mod order;
pub mod order_item;
pub mod product_variant;
pub mod subscription;

pub use customer::Entity as Customer;
pub use customer_address::Entity as CustomerAddress;
pub use discount::Entity as Discount;
pub use order::Entity as Order;
pub use order_item::Entity as OrderItem;
pub use product_variant::Entity as ProductVariant;
pub use subscription::Entity as Subscription;
