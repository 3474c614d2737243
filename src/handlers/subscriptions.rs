use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::subscription::{self, SubscriptionStatus},
    errors::ServiceError,
    handlers::common::{created_response, success_response},
    services::{customers::CustomerService, subscriptions::CreateSubscriptionInput},
    AppState,
};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateSubscriptionRequest {
    #[validate(length(min = 1, message = "customer name is required"))]
    pub customer_name: String,
    #[validate(email(message = "must be a well-formed email address"))]
    pub customer_email: String,
    #[validate(length(min = 1, message = "plan is required"))]
    pub plan: String,
    #[validate(length(min = 1, message = "billing cycle is required"))]
    pub billing_cycle: String,
    pub price: Decimal,
    pub next_payment_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SubscriptionResponse {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub plan: String,
    pub billing_cycle: String,
    pub status: SubscriptionStatus,
    pub price: Decimal,
    /// Reference the gateway echoes back in preapproval notifications.
    pub external_reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_payment_date: Option<DateTime<Utc>>,
}

impl From<subscription::Model> for SubscriptionResponse {
    fn from(model: subscription::Model) -> Self {
        Self {
            id: model.id,
            customer_id: model.customer_id,
            plan: model.plan,
            billing_cycle: model.billing_cycle,
            status: model.status,
            price: model.price,
            external_reference: model.external_reference,
            next_payment_date: model.next_payment_date,
        }
    }
}

/// POST /api/v1/subscriptions
#[utoipa::path(
    post,
    path = "/api/v1/subscriptions",
    summary = "Start a subscription",
    description = "Creates a pending subscription; activation follows the gateway's preapproval notifications",
    request_body = CreateSubscriptionRequest,
    responses(
        (status = 201, description = "Subscription created", body = SubscriptionResponse),
        (status = 400, description = "Validation failure", body = crate::errors::ErrorResponse),
        (status = 409, description = "Customer already has an active or pending subscription", body = crate::errors::ErrorResponse),
    ),
    tag = "Subscriptions"
)]
pub async fn create_subscription(
    State(state): State<AppState>,
    Json(request): Json<CreateSubscriptionRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    request.validate()?;
    if request.price <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "price: must be a positive amount".to_string(),
        ));
    }

    let customer = CustomerService::find_or_create(
        &*state.db,
        &request.customer_email,
        &request.customer_name,
        None,
    )
    .await?;

    let created = state
        .services
        .subscriptions
        .create_subscription(CreateSubscriptionInput {
            customer_id: customer.id,
            plan: request.plan,
            billing_cycle: request.billing_cycle,
            price: request.price,
            next_payment_date: request.next_payment_date,
        })
        .await?;

    Ok(created_response(SubscriptionResponse::from(created)))
}

/// GET /api/v1/subscriptions/:id
#[utoipa::path(
    get,
    path = "/api/v1/subscriptions/{id}",
    summary = "Get a subscription",
    params(("id" = Uuid, Path, description = "Subscription id")),
    responses(
        (status = 200, description = "Subscription", body = SubscriptionResponse),
        (status = 404, description = "Subscription not found", body = crate::errors::ErrorResponse),
    ),
    tag = "Subscriptions"
)]
pub async fn get_subscription(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let found = state
        .services
        .subscriptions
        .get_subscription(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Subscription {} not found", id)))?;
    Ok(success_response(SubscriptionResponse::from(found)))
}
