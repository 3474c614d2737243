pub mod checkout;
pub mod common;
pub mod discounts;
pub mod health;
pub mod orders;
pub mod subscriptions;
pub mod webhooks;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::{
    db::DbPool,
    events::EventSender,
    gateway::PaymentGateway,
    services::{
        CheckoutService, InventoryService, OrderService, PricingService, ReconciliationService,
        SubscriptionService,
    },
    AppState,
};

/// Business-logic container handed to every handler through [`AppState`].
#[derive(Clone)]
pub struct AppServices {
    pub pricing: PricingService,
    pub checkout: CheckoutService,
    pub orders: OrderService,
    pub inventory: InventoryService,
    pub reconciliation: ReconciliationService,
    pub subscriptions: SubscriptionService,
}

impl AppServices {
    pub fn new(
        db: Arc<DbPool>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: EventSender,
        checkout_return_url: Option<String>,
    ) -> Self {
        let pricing = PricingService::new(db.clone());
        let inventory = InventoryService::new(db.clone(), event_sender.clone());
        let checkout = CheckoutService::new(
            db.clone(),
            pricing.clone(),
            gateway.clone(),
            event_sender.clone(),
            checkout_return_url,
        );
        let orders = OrderService::new(db.clone());
        let reconciliation = ReconciliationService::new(
            db.clone(),
            gateway,
            inventory.clone(),
            event_sender,
        );
        let subscriptions = SubscriptionService::new(db);

        Self {
            pricing,
            checkout,
            orders,
            inventory,
            reconciliation,
            subscriptions,
        }
    }
}

/// All `/api/v1` routes.
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .route("/checkout", post(checkout::checkout))
        .route("/discounts/validate", post(discounts::validate_discount))
        .route("/orders", get(orders::list_orders))
        .route("/orders/:id", get(orders::get_order))
        .route(
            "/orders/by-number/:order_number",
            get(orders::get_order_by_number),
        )
        .route("/subscriptions", post(subscriptions::create_subscription))
        .route("/subscriptions/:id", get(subscriptions::get_subscription))
        .route("/webhooks/gateway", post(webhooks::gateway_webhook))
}
