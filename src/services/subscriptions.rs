use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::subscription::{self, Entity as SubscriptionEntity, SubscriptionStatus},
    errors::ServiceError,
};

#[derive(Debug, Clone)]
pub struct CreateSubscriptionInput {
    pub customer_id: Uuid,
    pub plan: String,
    pub billing_cycle: String,
    pub price: Decimal,
    pub next_payment_date: Option<DateTime<Utc>>,
}

/// Subscription billing manager.
///
/// Enforces the single-active-subscription rule at creation time; status
/// transitions afterwards belong to the reconciliation engine.
#[derive(Clone)]
pub struct SubscriptionService {
    db: Arc<DbPool>,
}

impl SubscriptionService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Creates a subscription in `Pending`, rejecting with a conflict when
    /// the customer already has one in `{Pending, Authorized}`.
    #[instrument(skip(self, input), fields(customer_id = %input.customer_id))]
    pub async fn create_subscription(
        &self,
        input: CreateSubscriptionInput,
    ) -> Result<subscription::Model, ServiceError> {
        let existing = SubscriptionEntity::find()
            .filter(subscription::Column::CustomerId.eq(input.customer_id))
            .filter(
                subscription::Column::Status
                    .is_in([SubscriptionStatus::Pending, SubscriptionStatus::Authorized]),
            )
            .one(&*self.db)
            .await?;

        if existing.is_some() {
            return Err(ServiceError::Conflict(
                "Customer already has an active or pending subscription".to_string(),
            ));
        }

        let id = Uuid::new_v4();
        let created = subscription::ActiveModel {
            id: Set(id),
            customer_id: Set(input.customer_id),
            plan: Set(input.plan),
            billing_cycle: Set(input.billing_cycle),
            status: Set(SubscriptionStatus::Pending),
            price: Set(input.price),
            preapproval_id: Set(None),
            external_reference: Set(format!("SUB-{}", id.simple())),
            next_payment_date: Set(input.next_payment_date),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.db)
        .await?;

        info!(subscription_id = %created.id, "subscription created");
        Ok(created)
    }

    pub async fn get_subscription(
        &self,
        id: Uuid,
    ) -> Result<Option<subscription::Model>, ServiceError> {
        Ok(SubscriptionEntity::find_by_id(id).one(&*self.db).await?)
    }
}
