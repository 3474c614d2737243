use axum::{extract::State, response::IntoResponse, Json};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    entities::discount::DiscountType,
    errors::ServiceError,
    handlers::common::success_response,
    services::PricingService,
    AppState,
};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ValidateDiscountRequest {
    #[validate(length(min = 1, message = "code is required"))]
    pub code: String,
    pub subtotal: Decimal,
    #[serde(default)]
    pub shipping_cost: Decimal,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DiscountInfo {
    #[serde(rename = "type")]
    pub discount_type: DiscountType,
    pub value: Decimal,
    pub computed_amount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Outcome of a pre-checkout discount check. An unusable code is a normal
/// answer here, not an error status.
#[derive(Debug, Serialize, ToSchema)]
pub struct ValidateDiscountResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount: Option<DiscountInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// POST /api/v1/discounts/validate
#[utoipa::path(
    post,
    path = "/api/v1/discounts/validate",
    summary = "Validate a discount code",
    description = "Read-only check of a code against a cart subtotal; never consumes a use",
    request_body = ValidateDiscountRequest,
    responses(
        (status = 200, description = "Validation outcome", body = ValidateDiscountResponse),
        (status = 400, description = "Malformed request", body = crate::errors::ErrorResponse),
    ),
    tag = "Discounts"
)]
pub async fn validate_discount(
    State(state): State<AppState>,
    Json(request): Json<ValidateDiscountRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    request.validate()?;
    if request.subtotal <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "subtotal: must be a positive amount".to_string(),
        ));
    }

    let found = state
        .services
        .pricing
        .find_discount(&request.code)
        .await?;

    let disc = match found {
        Some(disc) => disc,
        None => {
            return Ok(success_response(ValidateDiscountResponse {
                valid: false,
                discount: None,
                message: Some(format!(
                    "Discount code {} not found",
                    request.code.to_uppercase()
                )),
            }))
        }
    };

    match PricingService::check_discount(&disc, request.subtotal, chrono::Utc::now()) {
        Ok(()) => {
            let computed_amount =
                PricingService::discount_amount(&disc, request.subtotal, request.shipping_cost);
            Ok(success_response(ValidateDiscountResponse {
                valid: true,
                discount: Some(DiscountInfo {
                    discount_type: disc.discount_type,
                    value: disc.value,
                    computed_amount,
                    description: disc.description,
                }),
                message: None,
            }))
        }
        Err(rejection) => Ok(success_response(ValidateDiscountResponse {
            valid: false,
            discount: None,
            message: Some(rejection.to_string()),
        })),
    }
}
