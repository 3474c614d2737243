use axum::{extract::State, response::IntoResponse, Json};

use crate::{
    errors::ServiceError,
    handlers::common::created_response,
    services::checkout::CheckoutRequest,
    AppState,
};

/// POST /api/v1/checkout
#[utoipa::path(
    post,
    path = "/api/v1/checkout",
    summary = "Submit an order",
    description = "Validates and re-prices the cart, persists the order and returns a payment handle for gateway payments",
    request_body = CheckoutRequest,
    responses(
        (status = 201, description = "Order created", body = crate::services::checkout::CheckoutResponse),
        (status = 400, description = "Validation, discount or stale-pricing rejection", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment gateway unavailable; the order was persisted as pending", body = crate::errors::ErrorResponse),
    ),
    tag = "Checkout"
)]
pub async fn checkout(
    State(state): State<AppState>,
    Json(request): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let response = state.services.checkout.checkout(request).await?;
    Ok(created_response(response))
}
