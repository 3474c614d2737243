use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, Set, TransactionTrait};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{
    db::DbPool,
    entities::order::{self, OrderStatus, PaymentMethod, PaymentStatus},
    entities::order_item,
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::{PaymentGateway, PreferenceHandle, PreferenceRequest},
    services::{
        customers::CustomerService,
        pricing::{LineInput, PricingService},
    },
};

/// Maximum accepted drift between the server-recomputed total and the
/// client-declared total, in currency units.
pub const TOTAL_TOLERANCE: Decimal = dec!(0.01);

static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[0-9][0-9 ().-]{5,19}$").expect("valid phone pattern"));
static POSTAL_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9 -]{2,9}$").expect("valid postal pattern"));

fn validate_unit_price(unit_price: &Decimal) -> Result<(), ValidationError> {
    if *unit_price > Decimal::ZERO {
        Ok(())
    } else {
        let mut err = ValidationError::new("unit_price");
        err.message = Some("unit price must be positive".into());
        Err(err)
    }
}

fn validate_phone(phone: &str) -> Result<(), ValidationError> {
    if PHONE_RE.is_match(phone) {
        Ok(())
    } else {
        let mut err = ValidationError::new("phone");
        err.message = Some("must be a valid phone number".into());
        Err(err)
    }
}

fn validate_postal_code(postal_code: &str) -> Result<(), ValidationError> {
    if POSTAL_CODE_RE.is_match(postal_code) {
        Ok(())
    } else {
        let mut err = ValidationError::new("postal_code");
        err.message = Some("must be a valid postal code".into());
        Err(err)
    }
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CheckoutItemInput {
    pub variant_id: Uuid,
    #[validate(length(min = 1, message = "item name is required"))]
    pub name: String,
    #[validate(custom = "validate_unit_price")]
    pub unit_price: Decimal,
    #[validate(range(min = 1, message = "quantity must be a positive integer"))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CustomerInput {
    #[validate(length(min = 1, message = "customer name is required"))]
    pub name: String,
    #[validate(email(message = "must be a well-formed email address"))]
    pub email: String,
    #[validate(custom = "validate_phone")]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct AddressInput {
    #[validate(length(min = 1, message = "street is required"))]
    pub street: String,
    #[validate(length(min = 1, message = "city is required"))]
    pub city: String,
    #[validate(length(min = 1, message = "province is required"))]
    pub province: String,
    #[validate(custom = "validate_postal_code")]
    pub postal_code: String,
    #[validate(length(min = 2, message = "country is required"))]
    pub country: String,
}

/// Checkout submission. Client-declared amounts are never trusted: the
/// server reprices the cart and rejects on disagreement.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CheckoutRequest {
    #[validate]
    pub items: Vec<CheckoutItemInput>,
    #[validate]
    pub customer: CustomerInput,
    #[validate]
    pub shipping_address: AddressInput,
    pub discount_code: Option<String>,
    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub total: Decimal,
    pub payment_method: PaymentMethod,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutResponse {
    pub order_id: Uuid,
    pub order_number: String,
    pub subtotal: Decimal,
    pub discount_amount: Decimal,
    pub shipping_cost: Decimal,
    pub total: Decimal,
    /// Present for gateway payments: where to send the shopper next.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment: Option<PreferenceHandle>,
}

/// Whether the client-declared total agrees with the server-derived one
/// within the cent tolerance.
pub fn totals_match(server_total: Decimal, client_total: Decimal) -> bool {
    (server_total - client_total).abs() <= TOTAL_TOLERANCE
}

/// Checkout orchestrator: the synchronous entry point of the intake flow.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DbPool>,
    pricing: PricingService,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: EventSender,
    return_url: Option<String>,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DbPool>,
        pricing: PricingService,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: EventSender,
        return_url: Option<String>,
    ) -> Self {
        Self {
            db,
            pricing,
            gateway,
            event_sender,
            return_url,
        }
    }

    /// Validates, re-prices, persists and (for gateway payments) requests a
    /// payment handle.
    ///
    /// Ordering matters: the order is committed before the gateway call so a
    /// downstream failure still leaves a valid, reconcilable `Pending`
    /// order; the discount redemption is recorded only after the commit so a
    /// failed order never consumes a use.
    #[instrument(skip(self, request), fields(email = %request.customer.email))]
    pub async fn checkout(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutResponse, ServiceError> {
        request.validate()?;

        let lines: Vec<LineInput> = request
            .items
            .iter()
            .map(|item| LineInput {
                unit_price: item.unit_price,
                quantity: item.quantity,
            })
            .collect();

        let quote = self
            .pricing
            .quote(&lines, request.discount_code.as_deref(), request.shipping_cost)
            .await?;

        if !totals_match(quote.total, request.total) {
            return Err(ServiceError::PriceMismatch(format!(
                "expected total {} but client declared {}; reload the cart and retry",
                quote.total, request.total
            )));
        }

        let order_id = Uuid::new_v4();
        let order_number = format!(
            "ORD-{}",
            order_id.simple().to_string()[..8].to_uppercase()
        );
        let now = Utc::now();

        let txn = self.db.begin().await?;

        let customer = CustomerService::find_or_create(
            &txn,
            &request.customer.email,
            &request.customer.name,
            request.customer.phone.clone(),
        )
        .await?;

        let address = CustomerService::create_address(
            &txn,
            customer.id,
            &request.shipping_address.street,
            &request.shipping_address.city,
            &request.shipping_address.province,
            &request.shipping_address.postal_code,
            &request.shipping_address.country,
        )
        .await?;

        order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number.clone()),
            customer_id: Set(customer.id),
            status: Set(OrderStatus::Pending),
            payment_status: Set(PaymentStatus::Pending),
            payment_method: Set(request.payment_method),
            subtotal: Set(quote.subtotal),
            shipping_cost: Set(quote.shipping_charged),
            discount_amount: Set(quote.discount_amount),
            total: Set(quote.total),
            discount_code: Set(quote
                .discount
                .as_ref()
                .map(|d| d.code.clone())),
            notes: Set(request.notes.clone()),
            gateway_payment_id: Set(None),
            gateway_preference_id: Set(None),
            shipping_address_id: Set(Some(address.id)),
            created_at: Set(now),
            updated_at: Set(None),
            version: Set(1),
        }
        .insert(&txn)
        .await?;

        for item in &request.items {
            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                variant_id: Set(item.variant_id),
                name: Set(item.name.clone()),
                unit_price: Set(item.unit_price),
                quantity: Set(item.quantity),
                line_total: Set(item.unit_price * Decimal::from(item.quantity)),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
        }

        txn.commit().await?;

        info!(%order_number, total = %quote.total, "order created");

        // One redemption per durably created order. A failure here leaves a
        // valid order and is only logged.
        if let Some(disc) = &quote.discount {
            if let Err(e) = self.pricing.increment_usage(disc.id).await {
                error!(code = %disc.code, error = %e, "failed to record discount redemption");
            }
        }

        self.event_sender
            .emit(Event::OrderCreated {
                order_id,
                order_number: order_number.clone(),
                customer_email: customer.email.clone(),
            })
            .await;

        let payment = match request.payment_method {
            PaymentMethod::Gateway => {
                let handle = self
                    .gateway
                    .create_preference(&PreferenceRequest {
                        external_reference: order_number.clone(),
                        title: format!("Order {}", order_number),
                        total: quote.total,
                        payer_email: customer.email,
                        back_url: self.return_url.clone(),
                    })
                    .await?;
                self.store_preference_id(order_id, &handle.preference_id)
                    .await?;
                Some(handle)
            }
            PaymentMethod::Manual => None,
        };

        Ok(CheckoutResponse {
            order_id,
            order_number,
            subtotal: quote.subtotal,
            discount_amount: quote.discount_amount,
            shipping_cost: quote.shipping_charged,
            total: quote.total,
            payment,
        })
    }

    async fn store_preference_id(
        &self,
        order_id: Uuid,
        preference_id: &str,
    ) -> Result<(), ServiceError> {
        use sea_orm::EntityTrait;

        let found = order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let mut active: order::ActiveModel = found.into();
        active.gateway_preference_id = Set(Some(preference_id.to_string()));
        active.updated_at = Set(Some(Utc::now()));
        active.update(&*self.db).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::flatten_validation_errors;

    fn valid_request() -> CheckoutRequest {
        CheckoutRequest {
            items: vec![CheckoutItemInput {
                variant_id: Uuid::new_v4(),
                name: "Blue mug".to_string(),
                unit_price: dec!(100),
                quantity: 2,
            }],
            customer: CustomerInput {
                name: "Ada".to_string(),
                email: "ada@example.com".to_string(),
                phone: Some("+54 11 5555-0001".to_string()),
            },
            shipping_address: AddressInput {
                street: "Av. Siempreviva 742".to_string(),
                city: "Springfield".to_string(),
                province: "BA".to_string(),
                postal_code: "1414".to_string(),
                country: "AR".to_string(),
            },
            discount_code: None,
            subtotal: dec!(200),
            shipping_cost: dec!(150),
            total: dec!(350),
            payment_method: PaymentMethod::Gateway,
            notes: None,
        }
    }

    #[test]
    fn valid_request_passes_validation() {
        assert!(valid_request().validate().is_ok());
    }

    #[test]
    fn validation_reports_every_broken_field() {
        let mut request = valid_request();
        request.customer.email = "not-an-email".to_string();
        request.customer.name = String::new();
        request.shipping_address.postal_code = "!".to_string();
        request.items[0].unit_price = dec!(-5);

        let errors = request.validate().unwrap_err();
        let message = flatten_validation_errors(&errors);
        assert!(message.contains("well-formed email"), "{}", message);
        assert!(message.contains("customer name is required"), "{}", message);
        assert!(message.contains("valid postal code"), "{}", message);
        assert!(
            message.contains("items[0].unit_price: unit price must be positive"),
            "{}",
            message
        );
    }

    #[test]
    fn every_non_positive_unit_price_is_reported() {
        let mut request = valid_request();
        request.items.push(CheckoutItemInput {
            variant_id: Uuid::new_v4(),
            name: "Red mug".to_string(),
            unit_price: dec!(50),
            quantity: 1,
        });
        request.items[0].unit_price = Decimal::ZERO;
        request.items[1].unit_price = dec!(-1);

        let message = flatten_validation_errors(&request.validate().unwrap_err());
        assert!(message.contains("items[0].unit_price"), "{}", message);
        assert!(message.contains("items[1].unit_price"), "{}", message);
    }

    #[test]
    fn phone_validation_accepts_common_shapes() {
        assert!(validate_phone("+54 11 5555-0001").is_ok());
        assert!(validate_phone("01155550001").is_ok());
        assert!(validate_phone("call me").is_err());
        assert!(validate_phone("1").is_err());
    }

    #[test]
    fn totals_match_within_a_cent() {
        assert!(totals_match(dec!(330.00), dec!(330.00)));
        assert!(totals_match(dec!(330.00), dec!(330.01)));
        assert!(totals_match(dec!(330.00), dec!(329.99)));
        // More than a cent out is a stale-pricing rejection.
        assert!(!totals_match(dec!(330.00), dec!(331.50)));
        assert!(!totals_match(dec!(330.00), dec!(329.98)));
    }
}
