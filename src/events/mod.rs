use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(tx: mpsc::Sender<Event>) -> Self {
        Self { tx }
    }

    /// Queues an event for the audit loop.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.tx
            .send(event)
            .await
            .map_err(|e| format!("event channel closed: {}", e))
    }

    /// Sends an event, logging instead of failing when the bus is down.
    /// Event delivery is best-effort; it must never abort the operation
    /// that produced the event.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("Event bus unavailable, dropping event: {}", e);
        }
    }
}

// The various events that can occur in the checkout pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Cart events
    CartCreated(Uuid),
    CartItemAdded {
        cart_id: Uuid,
        item_id: Uuid,
    },
    CartItemUpdated {
        cart_id: Uuid,
        item_id: Uuid,
    },
    CartItemRemoved {
        cart_id: Uuid,
        item_id: Uuid,
    },
    CartCleared(Uuid),

    // Checkout events
    CheckoutStarted {
        cart_id: Uuid,
        payment_intent_id: String,
    },
    CheckoutCompleted {
        payment_intent_id: String,
        order_id: Uuid,
    },
    CheckoutFailed {
        payment_intent_id: String,
    },

    // Fulfillment events
    OrderCreated(Uuid),
    EnrollmentCreated {
        enrollment_id: Uuid,
        item_id: Uuid,
    },
    MembershipActivated {
        family_id: Uuid,
        expiry: DateTime<Utc>,
    },

    // Gateway webhook audit events
    PaymentSucceeded {
        payment_intent_id: String,
    },
    PaymentFailed {
        payment_intent_id: String,
    },
}

// Consumes the event channel and writes the audit trail. Fulfillment is
// never triggered from here; webhook payment events are recorded only.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::CartCreated(cart_id) => {
                info!(%cart_id, "Cart created");
            }
            Event::CartItemAdded { cart_id, item_id } => {
                info!(%cart_id, %item_id, "Cart item added");
            }
            Event::CartItemUpdated { cart_id, item_id } => {
                info!(%cart_id, %item_id, "Cart item updated");
            }
            Event::CartItemRemoved { cart_id, item_id } => {
                info!(%cart_id, %item_id, "Cart item removed");
            }
            Event::CartCleared(cart_id) => {
                info!(%cart_id, "Cart cleared");
            }
            Event::CheckoutStarted {
                cart_id,
                payment_intent_id,
            } => {
                info!(%cart_id, %payment_intent_id, "Checkout started");
            }
            Event::CheckoutCompleted {
                payment_intent_id,
                order_id,
            } => {
                info!(%payment_intent_id, %order_id, "Checkout completed");
            }
            Event::CheckoutFailed { payment_intent_id } => {
                warn!(%payment_intent_id, "Checkout failed");
            }
            Event::OrderCreated(order_id) => {
                info!(%order_id, "Order created");
            }
            Event::EnrollmentCreated {
                enrollment_id,
                item_id,
            } => {
                info!(%enrollment_id, %item_id, "Enrollment created");
            }
            Event::MembershipActivated { family_id, expiry } => {
                info!(%family_id, %expiry, "Membership activated");
            }
            Event::PaymentSucceeded { payment_intent_id } => {
                info!(%payment_intent_id, "Gateway reported payment succeeded");
            }
            Event::PaymentFailed { payment_intent_id } => {
                warn!(%payment_intent_id, "Gateway reported payment failed");
            }
        }
    }

    info!("Event processing loop stopped");
}
