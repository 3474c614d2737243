use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::order::OrderStatus;
use crate::entities::subscription::SubscriptionStatus;
use crate::services::notifications::NotificationService;

/// Events emitted by the checkout and reconciliation flows.
///
/// Emission is fire-and-forget: a full or closed channel is logged and
/// swallowed so notification plumbing can never fail or block the state
/// change that triggered it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        order_number: String,
        customer_email: String,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    PaymentConfirmed {
        order_id: Uuid,
        order_number: String,
        customer_email: String,
    },
    OrderCancelled {
        order_id: Uuid,
        order_number: String,
    },
    InventoryDeducted {
        order_id: Uuid,
        line_count: usize,
    },
    InventoryRestored {
        order_id: Uuid,
        line_count: usize,
    },
    SubscriptionStatusChanged {
        subscription_id: Uuid,
        new_status: SubscriptionStatus,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Best-effort send: failures are logged, never propagated.
    pub async fn emit(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("Dropping event: {}", e);
        }
    }
}

/// Detached consumer loop. Logs every transition and drives outbound
/// notifications; spawned once at startup and runs until the channel closes.
pub async fn process_events(
    mut receiver: mpsc::Receiver<Event>,
    notifier: Arc<NotificationService>,
) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::OrderCreated {
                order_id,
                order_number,
                customer_email,
            } => {
                info!(%order_id, %order_number, "order created");
                notifier
                    .order_placed(customer_email, order_number)
                    .await;
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(%order_id, %old_status, %new_status, "order status changed");
            }
            Event::PaymentConfirmed {
                order_id,
                order_number,
                customer_email,
            } => {
                info!(%order_id, %order_number, "payment confirmed");
                notifier
                    .payment_confirmed(customer_email, order_number)
                    .await;
            }
            Event::OrderCancelled {
                order_id,
                order_number,
            } => {
                info!(%order_id, %order_number, "order cancelled");
            }
            Event::InventoryDeducted {
                order_id,
                line_count,
            } => {
                info!(%order_id, line_count, "inventory deducted");
            }
            Event::InventoryRestored {
                order_id,
                line_count,
            } => {
                info!(%order_id, line_count, "inventory restored");
            }
            Event::SubscriptionStatusChanged {
                subscription_id,
                new_status,
            } => {
                info!(%subscription_id, %new_status, "subscription status changed");
            }
        }
    }
    info!("Event channel closed; event processor exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_swallows_send_failure_when_receiver_dropped() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);

        // Must not panic or error outward.
        sender
            .emit(Event::OrderCancelled {
                order_id: Uuid::new_v4(),
                order_number: "ORD-TEST".to_string(),
            })
            .await;
    }

    #[tokio::test]
    async fn send_delivers_event() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);

        sender
            .send(Event::InventoryDeducted {
                order_id: Uuid::new_v4(),
                line_count: 2,
            })
            .await
            .expect("send should succeed");

        let received = rx.recv().await.expect("event expected");
        assert!(matches!(received, Event::InventoryDeducted { line_count: 2, .. }));
    }
}
