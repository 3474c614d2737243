use tracing::{info, warn};

/// Outbound notification sender.
///
/// Rendering and delivery belong to an external collaborator; this service
/// is the fire-and-forget boundary in front of it. Sends are driven from the
/// event processor, never from a request handler, and a failed send is
/// logged and dropped; it must never fail or delay the state change that
/// triggered it.
#[derive(Debug, Default)]
pub struct NotificationService {
    ops_channel: Option<String>,
}

impl NotificationService {
    pub fn new(ops_channel: Option<String>) -> Self {
        Self { ops_channel }
    }

    /// Order receipt for the customer plus a heads-up on the ops channel.
    pub async fn order_placed(&self, customer_email: &str, order_number: &str) {
        self.deliver(customer_email, &format!("Order {} received", order_number))
            .await;
        if let Some(ops) = &self.ops_channel {
            self.deliver(ops, &format!("New order {}", order_number)).await;
        }
    }

    /// Payment-confirmed notice for the customer.
    pub async fn payment_confirmed(&self, customer_email: &str, order_number: &str) {
        self.deliver(
            customer_email,
            &format!("Payment confirmed for order {}", order_number),
        )
        .await;
    }

    async fn deliver(&self, recipient: &str, subject: &str) {
        // Hand-off point to the delivery collaborator. Failures are
        // contained here by contract.
        if recipient.is_empty() {
            warn!(subject, "notification dropped: empty recipient");
            return;
        }
        info!(recipient, subject, "notification dispatched");
    }
}
