use chrono::Utc;
use sea_orm::{ActiveModelTrait, EntityTrait, Set, TransactionTrait};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::{
        order_item,
        product_variant::{self, Entity as VariantEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Inventory ledger.
///
/// The only component allowed to mutate variant stock. Every per-order
/// mutation runs inside a single transaction: a partial deduction must never
/// be observable. Deduction and restoration are relative (delta) operations,
/// so the caller guards them with the order's prior stored state: they must
/// fire once per edge, never per replay.
#[derive(Clone)]
pub struct InventoryService {
    db: Arc<DbPool>,
    event_sender: EventSender,
}

impl InventoryService {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Decrements each variant's stock by the ordered quantity, atomically
    /// across all lines of one order.
    ///
    /// `in_stock` is recomputed as `(stock - quantity) > 0` at decrement
    /// time, not re-read afterwards, to avoid a race between check and write.
    /// An order with no items is logged and treated as a no-op.
    #[instrument(skip(self, items), fields(order_id = %order_id))]
    pub async fn deduct_for_order(
        &self,
        order_id: Uuid,
        items: &[order_item::Model],
    ) -> Result<(), ServiceError> {
        if items.is_empty() {
            warn!(%order_id, "confirmed order has no items; skipping inventory deduction");
            return Ok(());
        }

        let txn = self.db.begin().await?;

        for item in items {
            let variant = VariantEntity::find_by_id(item.variant_id)
                .one(&txn)
                .await?
                .ok_or_else(|| {
                    error!(variant_id = %item.variant_id, "variant missing during deduction");
                    ServiceError::NotFound(format!("Variant {} not found", item.variant_id))
                })?;

            let remaining = variant.stock - item.quantity;
            if remaining < 0 {
                warn!(
                    variant_id = %variant.id,
                    stock = variant.stock,
                    ordered = item.quantity,
                    "stock would go negative; clamping to zero"
                );
            }

            let mut active: product_variant::ActiveModel = variant.into();
            active.stock = Set(remaining.max(0));
            active.in_stock = Set(remaining > 0);
            active.updated_at = Set(Some(Utc::now()));
            active.update(&txn).await?;
        }

        txn.commit().await?;

        info!(%order_id, lines = items.len(), "inventory deducted");
        self.event_sender
            .emit(Event::InventoryDeducted {
                order_id,
                line_count: items.len(),
            })
            .await;

        Ok(())
    }

    /// Restores each line's quantity after cancellation of a previously paid
    /// order, atomically, and marks the variants back in stock.
    #[instrument(skip(self, items), fields(order_id = %order_id))]
    pub async fn restore_for_order(
        &self,
        order_id: Uuid,
        items: &[order_item::Model],
    ) -> Result<(), ServiceError> {
        if items.is_empty() {
            warn!(%order_id, "cancelled order has no items; skipping inventory restoration");
            return Ok(());
        }

        let txn = self.db.begin().await?;

        for item in items {
            let variant = VariantEntity::find_by_id(item.variant_id)
                .one(&txn)
                .await?
                .ok_or_else(|| {
                    error!(variant_id = %item.variant_id, "variant missing during restoration");
                    ServiceError::NotFound(format!("Variant {} not found", item.variant_id))
                })?;

            let stock = variant.stock + item.quantity;
            let mut active: product_variant::ActiveModel = variant.into();
            active.stock = Set(stock);
            active.in_stock = Set(true);
            active.updated_at = Set(Some(Utc::now()));
            active.update(&txn).await?;
        }

        txn.commit().await?;

        info!(%order_id, lines = items.len(), "inventory restored");
        self.event_sender
            .emit(Event::InventoryRestored {
                order_id,
                line_count: items.len(),
            })
            .await;

        Ok(())
    }
}
