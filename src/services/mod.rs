pub mod checkout;
pub mod customers;
pub mod inventory;
pub mod notifications;
pub mod orders;
pub mod pricing;
pub mod reconciliation;
pub mod subscriptions;

pub use checkout::CheckoutService;
pub use inventory::InventoryService;
pub use notifications::NotificationService;
pub use orders::OrderService;
pub use pricing::PricingService;
pub use reconciliation::ReconciliationService;
pub use subscriptions::SubscriptionService;
