use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::{
    db::DbPool,
    entities::discount::{self, DiscountType, Entity as DiscountEntity},
    errors::ServiceError,
};

/// Why a discount code cannot be applied. The rendered message is surfaced
/// to the caller verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscountRejection {
    NotFound,
    Inactive,
    NotYetValid,
    Expired,
    UsageExhausted,
    BelowMinimum { minimum: Decimal },
}

impl fmt::Display for DiscountRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "Discount code not found"),
            Self::Inactive => write!(f, "Discount code is not active"),
            Self::NotYetValid => write!(f, "Discount code is not valid yet"),
            Self::Expired => write!(f, "Discount code has expired"),
            Self::UsageExhausted => write!(f, "Discount code usage limit reached"),
            Self::BelowMinimum { minimum } => {
                write!(f, "Order subtotal is below the minimum purchase of {}", minimum)
            }
        }
    }
}

impl From<DiscountRejection> for ServiceError {
    fn from(rejection: DiscountRejection) -> Self {
        ServiceError::DiscountRejected(rejection.to_string())
    }
}

/// One priced line of a cart.
#[derive(Debug, Clone)]
pub struct LineInput {
    pub unit_price: Decimal,
    pub quantity: i32,
}

/// Server-derived pricing breakdown for a cart.
#[derive(Debug, Clone)]
pub struct Quote {
    pub subtotal: Decimal,
    pub discount_amount: Decimal,
    /// Shipping actually charged on the order. Zero when a free-shipping
    /// discount applies.
    pub shipping_charged: Decimal,
    pub total: Decimal,
    pub discount: Option<discount::Model>,
}

/// Pricing & discount engine.
///
/// Pure computation over line items plus a read-only discount lookup. This
/// engine never mutates `used_count`; [`PricingService::increment_usage`] is
/// the separate, explicit redemption step performed only after an order is
/// durably created.
#[derive(Clone)]
pub struct PricingService {
    db: Arc<DbPool>,
}

impl PricingService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Sum of `unit_price * quantity` across all lines. Rejects any
    /// non-positive unit price or quantity.
    pub fn compute_subtotal(items: &[LineInput]) -> Result<Decimal, ServiceError> {
        if items.is_empty() {
            return Err(ServiceError::ValidationError(
                "items: at least one item is required".to_string(),
            ));
        }

        let mut subtotal = Decimal::ZERO;
        for (idx, item) in items.iter().enumerate() {
            if item.unit_price <= Decimal::ZERO {
                return Err(ServiceError::ValidationError(format!(
                    "items[{}].unit_price: must be a positive amount",
                    idx
                )));
            }
            if item.quantity <= 0 {
                return Err(ServiceError::ValidationError(format!(
                    "items[{}].quantity: must be a positive integer",
                    idx
                )));
            }
            subtotal += item.unit_price * Decimal::from(item.quantity);
        }
        Ok(subtotal)
    }

    /// Checks activity flag, validity window, usage cap and minimum purchase.
    pub fn check_discount(
        disc: &discount::Model,
        subtotal: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), DiscountRejection> {
        if !disc.active {
            return Err(DiscountRejection::Inactive);
        }
        if let Some(starts_at) = disc.starts_at {
            if now < starts_at {
                return Err(DiscountRejection::NotYetValid);
            }
        }
        if let Some(ends_at) = disc.ends_at {
            if now > ends_at {
                return Err(DiscountRejection::Expired);
            }
        }
        if let Some(max_uses) = disc.max_uses {
            if disc.used_count >= max_uses {
                return Err(DiscountRejection::UsageExhausted);
            }
        }
        if let Some(minimum) = disc.min_purchase {
            if subtotal < minimum {
                return Err(DiscountRejection::BelowMinimum { minimum });
            }
        }
        Ok(())
    }

    /// Discount amount for an already-validated discount.
    ///
    /// A discount may never exceed the order's own subtotal; free shipping
    /// reports the shipping cost that would have been charged.
    pub fn discount_amount(
        disc: &discount::Model,
        subtotal: Decimal,
        shipping_cost: Decimal,
    ) -> Decimal {
        match disc.discount_type {
            DiscountType::Percentage => {
                (subtotal * disc.value / Decimal::from(100)).round_dp(2)
            }
            DiscountType::Fixed => disc.value.min(subtotal),
            DiscountType::FreeShipping => shipping_cost,
        }
    }

    /// Case-insensitive exact-match lookup. Codes are stored uppercase.
    pub async fn find_discount(
        &self,
        code: &str,
    ) -> Result<Option<discount::Model>, ServiceError> {
        let found = DiscountEntity::find()
            .filter(discount::Column::Code.eq(code.trim().to_uppercase()))
            .one(&*self.db)
            .await?;
        Ok(found)
    }

    /// Produces the authoritative `(subtotal, discount, total)` breakdown for
    /// a cart, applying at most one discount code.
    #[instrument(skip(self, items), fields(item_count = items.len()))]
    pub async fn quote(
        &self,
        items: &[LineInput],
        discount_code: Option<&str>,
        shipping_cost: Decimal,
    ) -> Result<Quote, ServiceError> {
        if shipping_cost < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "shipping_cost: must not be negative".to_string(),
            ));
        }

        let subtotal = Self::compute_subtotal(items)?;

        let discount = match discount_code {
            Some(code) if !code.trim().is_empty() => {
                let disc = self
                    .find_discount(code)
                    .await?
                    .ok_or(DiscountRejection::NotFound)?;
                Self::check_discount(&disc, subtotal, Utc::now())?;
                Some(disc)
            }
            _ => None,
        };

        let quote = Self::build_quote(subtotal, shipping_cost, discount);
        debug!(
            subtotal = %quote.subtotal,
            discount = %quote.discount_amount,
            total = %quote.total,
            "cart priced"
        );
        Ok(quote)
    }

    /// Assembles the breakdown once the discount (if any) has been validated.
    pub fn build_quote(
        subtotal: Decimal,
        shipping_cost: Decimal,
        discount: Option<discount::Model>,
    ) -> Quote {
        match discount {
            Some(disc) => {
                let amount = Self::discount_amount(&disc, subtotal, shipping_cost);
                let free_shipping = disc.discount_type == DiscountType::FreeShipping;
                let shipping_charged = if free_shipping {
                    Decimal::ZERO
                } else {
                    shipping_cost
                };
                // For free shipping the discount line offsets shipping, not
                // the product subtotal.
                let total = if free_shipping {
                    subtotal
                } else {
                    subtotal + shipping_cost - amount
                };
                Quote {
                    subtotal,
                    discount_amount: amount,
                    shipping_charged,
                    total,
                    discount: Some(disc),
                }
            }
            None => Quote {
                subtotal,
                discount_amount: Decimal::ZERO,
                shipping_charged: shipping_cost,
                total: subtotal + shipping_cost,
                discount: None,
            },
        }
    }

    /// Records one redemption. Called exactly once per durably created order,
    /// after the order transaction has committed. The increment runs as a
    /// single update expression so concurrent redemptions cannot lose counts.
    #[instrument(skip(self))]
    pub async fn increment_usage(&self, discount_id: uuid::Uuid) -> Result<(), ServiceError> {
        let result = DiscountEntity::update_many()
            .col_expr(
                discount::Column::UsedCount,
                Expr::col(discount::Column::UsedCount).add(1),
            )
            .col_expr(discount::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(discount::Column::Id.eq(discount_id))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Discount {} not found",
                discount_id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn line(price: Decimal, qty: i32) -> LineInput {
        LineInput {
            unit_price: price,
            quantity: qty,
        }
    }

    fn make_discount(discount_type: DiscountType, value: Decimal) -> discount::Model {
        discount::Model {
            id: Uuid::new_v4(),
            code: "TEST".to_string(),
            description: None,
            discount_type,
            value,
            min_purchase: None,
            max_uses: None,
            used_count: 0,
            starts_at: None,
            ends_at: None,
            active: true,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    #[test]
    fn subtotal_is_exact_sum() {
        let subtotal = PricingService::compute_subtotal(&[
            line(dec!(100), 2),
            line(dec!(19.99), 3),
        ])
        .unwrap();
        assert_eq!(subtotal, dec!(259.97));
    }

    #[test]
    fn rejects_non_positive_amounts() {
        assert!(PricingService::compute_subtotal(&[line(dec!(0), 1)]).is_err());
        assert!(PricingService::compute_subtotal(&[line(dec!(-5), 1)]).is_err());
        assert!(PricingService::compute_subtotal(&[line(dec!(10), 0)]).is_err());
        assert!(PricingService::compute_subtotal(&[line(dec!(10), -2)]).is_err());
        assert!(PricingService::compute_subtotal(&[]).is_err());
    }

    #[test]
    fn percentage_discount_example_from_checkout_flow() {
        // cart [{price: 100, qty: 2}], shipping 150, PERCENTAGE 10
        let subtotal = PricingService::compute_subtotal(&[line(dec!(100), 2)]).unwrap();
        let disc = make_discount(DiscountType::Percentage, dec!(10));
        let quote = PricingService::build_quote(subtotal, dec!(150), Some(disc));

        assert_eq!(quote.subtotal, dec!(200));
        assert_eq!(quote.discount_amount, dec!(20));
        assert_eq!(quote.shipping_charged, dec!(150));
        assert_eq!(quote.total, dec!(330));
    }

    #[test]
    fn percentage_discount_rounds_to_cents() {
        let disc = make_discount(DiscountType::Percentage, dec!(15));
        // 15% of 33.33 = 4.9995 -> 5.00
        assert_eq!(
            PricingService::discount_amount(&disc, dec!(33.33), Decimal::ZERO),
            dec!(5.00)
        );
    }

    #[test]
    fn percentage_discount_never_exceeds_subtotal() {
        let disc = make_discount(DiscountType::Percentage, dec!(100));
        let amount = PricingService::discount_amount(&disc, dec!(80), Decimal::ZERO);
        assert!(amount <= dec!(80));
    }

    #[test]
    fn fixed_discount_is_capped_at_subtotal() {
        let disc = make_discount(DiscountType::Fixed, dec!(500));
        assert_eq!(
            PricingService::discount_amount(&disc, dec!(120), Decimal::ZERO),
            dec!(120)
        );

        let quote = PricingService::build_quote(dec!(120), dec!(10), Some(disc));
        assert_eq!(quote.total, dec!(10));
        assert!(quote.total >= Decimal::ZERO);
    }

    #[test]
    fn free_shipping_zeroes_shipping_and_reports_it_as_discount() {
        let disc = make_discount(DiscountType::FreeShipping, Decimal::ZERO);
        let quote = PricingService::build_quote(dec!(200), dec!(150), Some(disc));

        assert_eq!(quote.discount_amount, dec!(150));
        assert_eq!(quote.shipping_charged, Decimal::ZERO);
        assert_eq!(quote.total, dec!(200));
    }

    #[test]
    fn inactive_discount_is_rejected() {
        let mut disc = make_discount(DiscountType::Fixed, dec!(10));
        disc.active = false;
        assert_eq!(
            PricingService::check_discount(&disc, dec!(100), Utc::now()),
            Err(DiscountRejection::Inactive)
        );
    }

    #[test]
    fn window_bounds_are_enforced() {
        let now = Utc::now();

        let mut not_yet = make_discount(DiscountType::Fixed, dec!(10));
        not_yet.starts_at = Some(now + Duration::days(1));
        assert_eq!(
            PricingService::check_discount(&not_yet, dec!(100), now),
            Err(DiscountRejection::NotYetValid)
        );

        let mut expired = make_discount(DiscountType::Fixed, dec!(10));
        expired.ends_at = Some(now - Duration::days(1));
        assert_eq!(
            PricingService::check_discount(&expired, dec!(100), now),
            Err(DiscountRejection::Expired)
        );

        // Open-ended bounds are valid.
        let open = make_discount(DiscountType::Fixed, dec!(10));
        assert!(PricingService::check_discount(&open, dec!(100), now).is_ok());
    }

    #[test]
    fn usage_cap_is_enforced() {
        let mut disc = make_discount(DiscountType::Fixed, dec!(10));
        disc.max_uses = Some(3);
        disc.used_count = 3;
        assert_eq!(
            PricingService::check_discount(&disc, dec!(100), Utc::now()),
            Err(DiscountRejection::UsageExhausted)
        );

        disc.used_count = 2;
        assert!(PricingService::check_discount(&disc, dec!(100), Utc::now()).is_ok());
    }

    #[test]
    fn minimum_purchase_is_enforced() {
        let mut disc = make_discount(DiscountType::Percentage, dec!(10));
        disc.min_purchase = Some(dec!(50));
        assert_eq!(
            PricingService::check_discount(&disc, dec!(49.99), Utc::now()),
            Err(DiscountRejection::BelowMinimum { minimum: dec!(50) })
        );
        assert!(PricingService::check_discount(&disc, dec!(50), Utc::now()).is_ok());
    }

    #[test]
    fn rejection_messages_are_human_readable() {
        assert_eq!(
            DiscountRejection::Expired.to_string(),
            "Discount code has expired"
        );
        assert_eq!(
            DiscountRejection::BelowMinimum { minimum: dec!(50) }.to_string(),
            "Order subtotal is below the minimum purchase of 50"
        );
    }
}
