use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "0.1.0",
        description = r#"
Order-intake and payment-reconciliation backend for a retail checkout flow.

Prices and discounts are always recomputed server-side; gateway webhook
notifications are signature-verified and reconciled against the gateway's
own record before any order state changes.
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Checkout", description = "Order submission"),
        (name = "Discounts", description = "Discount code validation"),
        (name = "Orders", description = "Order lookup"),
        (name = "Subscriptions", description = "Subscription billing"),
        (name = "Webhooks", description = "Payment gateway notifications"),
        (name = "Health", description = "Health checks")
    ),
    paths(
        crate::handlers::checkout::checkout,
        crate::handlers::discounts::validate_discount,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::get_order_by_number,
        crate::handlers::subscriptions::create_subscription,
        crate::handlers::subscriptions::get_subscription,
        crate::handlers::webhooks::gateway_webhook,
        crate::handlers::health::health,
    ),
    components(schemas(
        crate::errors::ErrorResponse,
        crate::services::checkout::CheckoutRequest,
        crate::services::checkout::CheckoutItemInput,
        crate::services::checkout::CustomerInput,
        crate::services::checkout::AddressInput,
        crate::services::checkout::CheckoutResponse,
        crate::handlers::discounts::ValidateDiscountRequest,
        crate::handlers::discounts::ValidateDiscountResponse,
        crate::handlers::discounts::DiscountInfo,
        crate::handlers::orders::OrderResponse,
        crate::handlers::orders::OrderItemResponse,
        crate::handlers::subscriptions::CreateSubscriptionRequest,
        crate::handlers::subscriptions::SubscriptionResponse,
    ))
)]
pub struct ApiDoc;

/// Swagger UI mounted at `/docs`, serving the document at
/// `/api-docs/openapi.json`.
pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi())
}
