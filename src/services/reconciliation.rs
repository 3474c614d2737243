use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, ModelTrait, QueryFilter, Set};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    db::DbPool,
    entities::{
        customer::Entity as CustomerEntity,
        order::{self, Entity as OrderEntity, OrderStatus, PaymentStatus},
        order_item::Entity as OrderItemEntity,
        subscription::{self, Entity as SubscriptionEntity, SubscriptionStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::{GatewayPaymentStatus, GatewayPreapprovalStatus, PaymentGateway},
    services::inventory::InventoryService,
};

/// Deterministic mapping from the gateway's payment status to the internal
/// `(PaymentStatus, OrderStatus)` pair. `None` means the status is not
/// actionable and the event is ignored.
pub fn map_payment_status(status: GatewayPaymentStatus) -> Option<(PaymentStatus, OrderStatus)> {
    match status {
        GatewayPaymentStatus::Approved => Some((PaymentStatus::Paid, OrderStatus::Confirmed)),
        GatewayPaymentStatus::Rejected | GatewayPaymentStatus::Cancelled => {
            Some((PaymentStatus::Failed, OrderStatus::Cancelled))
        }
        GatewayPaymentStatus::Refunded => Some((PaymentStatus::Refunded, OrderStatus::Refunded)),
        GatewayPaymentStatus::InProcess
        | GatewayPaymentStatus::Pending
        | GatewayPaymentStatus::Authorized => Some((PaymentStatus::Pending, OrderStatus::Pending)),
        GatewayPaymentStatus::Unknown => None,
    }
}

/// Mapping from gateway preapproval status to the internal subscription
/// status.
pub fn map_preapproval_status(status: GatewayPreapprovalStatus) -> Option<SubscriptionStatus> {
    match status {
        GatewayPreapprovalStatus::Authorized => Some(SubscriptionStatus::Authorized),
        GatewayPreapprovalStatus::Paused => Some(SubscriptionStatus::Paused),
        GatewayPreapprovalStatus::Cancelled => Some(SubscriptionStatus::Cancelled),
        GatewayPreapprovalStatus::Pending => Some(SubscriptionStatus::Pending),
        GatewayPreapprovalStatus::Unknown => None,
    }
}

/// Inventory is a relative (delta) operation: it must fire only on the
/// Pending/Processing -> Confirmed edge, never on a Confirmed-carrying
/// replay.
pub fn deduction_edge(prior: OrderStatus, target: OrderStatus) -> bool {
    target == OrderStatus::Confirmed
        && matches!(prior, OrderStatus::Pending | OrderStatus::Processing)
}

/// Restoration fires only when an order whose payment was previously `Paid`
/// transitions into `Cancelled`.
pub fn restoration_edge(
    prior_status: OrderStatus,
    prior_payment: PaymentStatus,
    target: OrderStatus,
) -> bool {
    target == OrderStatus::Cancelled
        && prior_status != OrderStatus::Cancelled
        && prior_payment == PaymentStatus::Paid
}

/// Webhook reconciliation engine.
///
/// Applies externally observed payment and preapproval state to orders and
/// subscriptions. Target state is re-derived from a corroborating gateway
/// fetch on every invocation, so duplicate and out-of-order deliveries
/// converge; only the inventory side effects are edge-triggered.
#[derive(Clone)]
pub struct ReconciliationService {
    db: Arc<DbPool>,
    gateway: Arc<dyn PaymentGateway>,
    inventory: InventoryService,
    event_sender: EventSender,
}

impl ReconciliationService {
    pub fn new(
        db: Arc<DbPool>,
        gateway: Arc<dyn PaymentGateway>,
        inventory: InventoryService,
        event_sender: EventSender,
    ) -> Self {
        Self {
            db,
            gateway,
            inventory,
            event_sender,
        }
    }

    /// Handles a `payment` notification.
    ///
    /// Never trusts the webhook payload's own status field: the full payment
    /// detail is fetched from the gateway first, then the mapped update is
    /// applied. A reference that resolves to no order is logged and ignored,
    /// as some notifications are legitimately about unrelated references.
    #[instrument(skip(self), fields(payment_id = %payment_id))]
    pub async fn process_payment_event(&self, payment_id: &str) -> Result<(), ServiceError> {
        let detail = self.gateway.get_payment(payment_id).await?;

        let Some(reference) = detail.external_reference.as_deref() else {
            warn!("payment event carries no external reference; ignoring");
            return Ok(());
        };

        let Some(order) = OrderEntity::find()
            .filter(order::Column::OrderNumber.eq(reference))
            .one(&*self.db)
            .await?
        else {
            info!(%reference, "no order matches external reference; ignoring");
            return Ok(());
        };

        let Some((target_payment, target_status)) = map_payment_status(detail.status) else {
            info!(status = ?detail.status, "gateway payment status not actionable; ignoring");
            return Ok(());
        };

        let prior_status = order.status;
        let prior_payment = order.payment_status;

        if prior_status == target_status && prior_payment == target_payment {
            debug!(
                order_number = %order.order_number,
                status = %prior_status,
                "replayed event matches stored state; no-op"
            );
            return Ok(());
        }

        let order_id = order.id;
        let order_number = order.order_number.clone();
        let customer_id = order.customer_id;
        let version = order.version;

        let mut active: order::ActiveModel = order.into();
        active.status = Set(target_status);
        active.payment_status = Set(target_payment);
        active.gateway_payment_id = Set(Some(detail.id.clone()));
        active.updated_at = Set(Some(Utc::now()));
        active.version = Set(version + 1);
        let updated = active.update(&*self.db).await?;

        info!(
            %order_number,
            from = %prior_status,
            to = %target_status,
            payment = %target_payment,
            "order reconciled"
        );
        self.event_sender
            .emit(Event::OrderStatusChanged {
                order_id,
                old_status: prior_status,
                new_status: target_status,
            })
            .await;

        // Side effects are subordinate to the status update: failures here
        // are logged, never rolled back into the transition.
        if deduction_edge(prior_status, target_status) {
            let items = updated
                .find_related(OrderItemEntity)
                .all(&*self.db)
                .await
                .unwrap_or_else(|e| {
                    error!(%order_number, error = %e, "failed to load items for deduction");
                    Vec::new()
                });
            if let Err(e) = self.inventory.deduct_for_order(order_id, &items).await {
                error!(%order_number, error = %e, "inventory deduction failed");
            }

            match CustomerEntity::find_by_id(customer_id).one(&*self.db).await {
                Ok(Some(customer)) => {
                    self.event_sender
                        .emit(Event::PaymentConfirmed {
                            order_id,
                            order_number: order_number.clone(),
                            customer_email: customer.email,
                        })
                        .await;
                }
                Ok(None) => warn!(%order_number, "customer missing for confirmation notice"),
                Err(e) => error!(%order_number, error = %e, "customer lookup failed"),
            }
        }

        if restoration_edge(prior_status, prior_payment, target_status) {
            let items = updated
                .find_related(OrderItemEntity)
                .all(&*self.db)
                .await
                .unwrap_or_else(|e| {
                    error!(%order_number, error = %e, "failed to load items for restoration");
                    Vec::new()
                });
            if let Err(e) = self.inventory.restore_for_order(order_id, &items).await {
                error!(%order_number, error = %e, "inventory restoration failed");
            }
        }

        if target_status == OrderStatus::Cancelled {
            self.event_sender
                .emit(Event::OrderCancelled {
                    order_id,
                    order_number,
                })
                .await;
        }

        Ok(())
    }

    /// Handles a `subscription_preapproval` notification with the same
    /// fetch-before-apply shape as payments.
    ///
    /// Resolution tries the stored preapproval id first and falls back to
    /// the event's external reference for the bootstrap case, learning the
    /// preapproval id on first contact.
    #[instrument(skip(self), fields(preapproval_id = %preapproval_id))]
    pub async fn process_preapproval_event(
        &self,
        preapproval_id: &str,
    ) -> Result<(), ServiceError> {
        let detail = self.gateway.get_preapproval(preapproval_id).await?;

        let mut subscription = SubscriptionEntity::find()
            .filter(subscription::Column::PreapprovalId.eq(detail.id.clone()))
            .one(&*self.db)
            .await?;

        if subscription.is_none() {
            if let Some(reference) = detail.external_reference.as_deref() {
                subscription = SubscriptionEntity::find()
                    .filter(subscription::Column::ExternalReference.eq(reference))
                    .one(&*self.db)
                    .await?;
            }
        }

        let Some(subscription) = subscription else {
            info!("no subscription matches preapproval event; ignoring");
            return Ok(());
        };

        let Some(target) = map_preapproval_status(detail.status) else {
            info!(status = ?detail.status, "preapproval status not actionable; ignoring");
            return Ok(());
        };

        if subscription.status == target && subscription.preapproval_id.is_some() {
            debug!(subscription_id = %subscription.id, "replayed preapproval event; no-op");
            return Ok(());
        }

        let subscription_id = subscription.id;
        let mut active: subscription::ActiveModel = subscription.into();
        active.status = Set(target);
        active.preapproval_id = Set(Some(detail.id));
        active.updated_at = Set(Some(Utc::now()));
        active.update(&*self.db).await?;

        info!(%subscription_id, status = %target, "subscription reconciled");
        self.event_sender
            .emit(Event::SubscriptionStatusChanged {
                subscription_id,
                new_status: target,
            })
            .await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_status_mapping_table() {
        assert_eq!(
            map_payment_status(GatewayPaymentStatus::Approved),
            Some((PaymentStatus::Paid, OrderStatus::Confirmed))
        );
        assert_eq!(
            map_payment_status(GatewayPaymentStatus::Rejected),
            Some((PaymentStatus::Failed, OrderStatus::Cancelled))
        );
        assert_eq!(
            map_payment_status(GatewayPaymentStatus::Cancelled),
            Some((PaymentStatus::Failed, OrderStatus::Cancelled))
        );
        assert_eq!(
            map_payment_status(GatewayPaymentStatus::Refunded),
            Some((PaymentStatus::Refunded, OrderStatus::Refunded))
        );
        for pending in [
            GatewayPaymentStatus::InProcess,
            GatewayPaymentStatus::Pending,
            GatewayPaymentStatus::Authorized,
        ] {
            assert_eq!(
                map_payment_status(pending),
                Some((PaymentStatus::Pending, OrderStatus::Pending))
            );
        }
        assert_eq!(map_payment_status(GatewayPaymentStatus::Unknown), None);
    }

    #[test]
    fn preapproval_status_mapping_table() {
        assert_eq!(
            map_preapproval_status(GatewayPreapprovalStatus::Authorized),
            Some(SubscriptionStatus::Authorized)
        );
        assert_eq!(
            map_preapproval_status(GatewayPreapprovalStatus::Paused),
            Some(SubscriptionStatus::Paused)
        );
        assert_eq!(
            map_preapproval_status(GatewayPreapprovalStatus::Cancelled),
            Some(SubscriptionStatus::Cancelled)
        );
        assert_eq!(
            map_preapproval_status(GatewayPreapprovalStatus::Pending),
            Some(SubscriptionStatus::Pending)
        );
        assert_eq!(map_preapproval_status(GatewayPreapprovalStatus::Unknown), None);
    }

    #[test]
    fn deduction_fires_only_on_the_confirm_edge() {
        assert!(deduction_edge(OrderStatus::Pending, OrderStatus::Confirmed));
        assert!(deduction_edge(OrderStatus::Processing, OrderStatus::Confirmed));

        // Replays and other transitions never deduct.
        assert!(!deduction_edge(OrderStatus::Confirmed, OrderStatus::Confirmed));
        assert!(!deduction_edge(OrderStatus::Shipped, OrderStatus::Confirmed));
        assert!(!deduction_edge(OrderStatus::Cancelled, OrderStatus::Confirmed));
        assert!(!deduction_edge(OrderStatus::Pending, OrderStatus::Cancelled));
    }

    #[test]
    fn restoration_requires_prior_paid_state() {
        assert!(restoration_edge(
            OrderStatus::Confirmed,
            PaymentStatus::Paid,
            OrderStatus::Cancelled
        ));

        // Never-paid cancellations leave stock alone.
        assert!(!restoration_edge(
            OrderStatus::Pending,
            PaymentStatus::Pending,
            OrderStatus::Cancelled
        ));
        // Replayed cancellation is a no-op.
        assert!(!restoration_edge(
            OrderStatus::Cancelled,
            PaymentStatus::Paid,
            OrderStatus::Cancelled
        ));
        // Confirm edges do not restore.
        assert!(!restoration_edge(
            OrderStatus::Pending,
            PaymentStatus::Pending,
            OrderStatus::Confirmed
        ));
    }
}
