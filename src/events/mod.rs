use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod consumer;
pub mod producer;

pub use consumer::{EventConsumer, EventHandler};
pub use producer::{EventPublisher, RedisStreamProducer};

/// Fixed service-identity tag stamped into every published message header.
pub const SERVICE_IDENTITY: &str = "payments-api";

/// Topic names for payment lifecycle events.
pub mod topics {
    pub const PAYMENT_COMPLETED: &str = "order.payment.completed";
    pub const PAYMENT_FAILED: &str = "order.payment.failed";
    pub const PAYMENT_REFUNDED: &str = "order.payment.refunded";
    /// Inbound: payment failures reported by an external reconciliation
    /// source rather than a gateway webhook.
    pub const PAYMENT_EXTERNAL_FAILED: &str = "order.payment.external_failed";
}

/// Lifecycle events published to the message bus. The saga id correlates
/// every event belonging to one business transaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PaymentEvent {
    PaymentCompleted {
        order_id: Uuid,
        payment_id: String,
        saga_id: String,
        amount: Decimal,
        paid_at: DateTime<Utc>,
    },
    PaymentFailed {
        order_id: Uuid,
        saga_id: String,
        reason: String,
    },
    PaymentRefunded {
        order_id: Uuid,
        saga_id: String,
        original_payment_id: String,
        refund_amount: Decimal,
        reason: Option<String>,
    },
}

impl PaymentEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            PaymentEvent::PaymentCompleted { .. } => topics::PAYMENT_COMPLETED,
            PaymentEvent::PaymentFailed { .. } => topics::PAYMENT_FAILED,
            PaymentEvent::PaymentRefunded { .. } => topics::PAYMENT_REFUNDED,
        }
    }

    pub fn saga_id(&self) -> &str {
        match self {
            PaymentEvent::PaymentCompleted { saga_id, .. }
            | PaymentEvent::PaymentFailed { saga_id, .. }
            | PaymentEvent::PaymentRefunded { saga_id, .. } => saga_id,
        }
    }

    /// Stable business key for partitioning, in priority order: saga id,
    /// then transaction/order reference. `None` means unpartitioned.
    pub fn partition_key(&self) -> Option<String> {
        let saga = self.saga_id();
        if !saga.is_empty() {
            return Some(saga.to_string());
        }
        match self {
            PaymentEvent::PaymentCompleted { payment_id, .. } => Some(payment_id.clone()),
            PaymentEvent::PaymentRefunded {
                original_payment_id,
                ..
            } => Some(original_payment_id.clone()),
            PaymentEvent::PaymentFailed { order_id, .. } => Some(order_id.to_string()),
        }
    }
}
