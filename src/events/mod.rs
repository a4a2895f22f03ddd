use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::entities::order::{OrderStatus, PaymentMethod};
use crate::notifications::{Notification, NotificationKind, OrderNotifier};

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the processor is gone
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("{}", e);
            counter!("bookstore_events.dropped", 1);
        }
    }
}

/// Domain events emitted after a transaction commits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Event {
    OrderPlaced {
        order_id: Uuid,
        order_number: String,
        payment_method: PaymentMethod,
        total: Decimal,
    },
    OrderConfirmed {
        order_id: Uuid,
        order_number: String,
    },
    OrderCancelled {
        order_id: Uuid,
        order_number: String,
    },
    OrderStatusChanged {
        order_id: Uuid,
        order_number: String,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    CouponRedeemed {
        coupon_id: Uuid,
        order_id: Uuid,
    },
    PaymentCompleted {
        payment_id: Uuid,
        order_id: Uuid,
        transaction_id: String,
    },
    PaymentFailed {
        payment_id: Uuid,
        order_number: String,
        transaction_id: String,
        reason: String,
    },
    PaymentFlaggedForReview {
        payment_id: Uuid,
        order_number: String,
        reason: String,
    },
    RentalConfirmed {
        rental_id: Uuid,
        rental_number: String,
    },
    RentalOverdue {
        rental_id: Uuid,
        rental_number: String,
        late_fee: Decimal,
    },
}

impl Event {
    /// Customer notification for this event, if any
    pub fn notification(&self) -> Option<Notification> {
        match self {
            Event::OrderConfirmed { order_number, .. } => Some(Notification::new(
                NotificationKind::OrderConfirmed,
                order_number,
                format!("Your order #{} has been confirmed.", order_number),
            )),
            Event::OrderCancelled { order_number, .. } => Some(Notification::new(
                NotificationKind::OrderCancelled,
                order_number,
                format!("Your order #{} has been cancelled.", order_number),
            )),
            Event::PaymentFailed { order_number, .. } => Some(Notification::new(
                NotificationKind::PaymentFailed,
                order_number,
                format!(
                    "Payment for order #{} did not go through. You can retry from your order page.",
                    order_number
                ),
            )),
            Event::PaymentFlaggedForReview {
                order_number,
                reason,
                ..
            } => Some(Notification::new(
                NotificationKind::PaymentNeedsReview,
                order_number,
                format!("Payment for order #{} is under review: {}", order_number, reason),
            )),
            Event::RentalConfirmed { rental_number, .. } => Some(Notification::new(
                NotificationKind::RentalConfirmed,
                rental_number,
                format!("Your rental #{} is active.", rental_number),
            )),
            Event::RentalOverdue {
                rental_number,
                late_fee,
                ..
            } => Some(Notification::new(
                NotificationKind::RentalOverdue,
                rental_number,
                format!(
                    "Rental #{} is overdue. Late fee so far: ৳{}",
                    rental_number,
                    late_fee.normalize()
                ),
            )),
            Event::OrderPlaced { .. }
            | Event::OrderStatusChanged { .. }
            | Event::CouponRedeemed { .. }
            | Event::PaymentCompleted { .. } => None,
        }
    }
}

/// Drains the event channel, delivering notifications.
/// Delivery failures are logged and never reach the request path.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, notifier: Arc<dyn OrderNotifier>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        info!("Received event: {:?}", event);
        counter!("bookstore_events.processed", 1);

        if let Some(notification) = event.notification() {
            let reference = notification.reference.clone();
            if let Err(e) = notifier.notify(notification).await {
                counter!("bookstore_notifications.failed", 1);
                error!(
                    "Failed to deliver notification: reference={}, error={}",
                    reference, e
                );
            }
        }
    }

    info!("Event channel closed; processor stopping");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::{MockOrderNotifier, NotificationError};

    #[tokio::test]
    async fn confirmed_order_triggers_one_notification() {
        let mut notifier = MockOrderNotifier::new();
        notifier
            .expect_notify()
            .withf(|n| n.kind == NotificationKind::OrderConfirmed && n.reference == "BS1")
            .times(1)
            .returning(|_| Ok(()));

        let (tx, rx) = mpsc::channel(8);
        let sender = EventSender::new(tx);
        let handle = tokio::spawn(process_events(rx, Arc::new(notifier)));

        sender
            .send(Event::OrderConfirmed {
                order_id: Uuid::new_v4(),
                order_number: "BS1".into(),
            })
            .await
            .unwrap();
        sender
            .send(Event::PaymentCompleted {
                payment_id: Uuid::new_v4(),
                order_id: Uuid::new_v4(),
                transaction_id: "SSL-BS1-abcdef12".into(),
            })
            .await
            .unwrap();
        drop(sender);

        handle.await.unwrap();
    }

    #[tokio::test]
    async fn notifier_failure_does_not_stop_the_loop() {
        let mut notifier = MockOrderNotifier::new();
        notifier
            .expect_notify()
            .times(2)
            .returning(|_| Err(NotificationError::Delivery("smtp down".into())));

        let (tx, rx) = mpsc::channel(8);
        let sender = EventSender::new(tx);
        let handle = tokio::spawn(process_events(rx, Arc::new(notifier)));

        for n in ["BS1", "BS2"] {
            sender
                .send_or_log(Event::OrderCancelled {
                    order_id: Uuid::new_v4(),
                    order_number: n.into(),
                })
                .await;
        }
        drop(sender);

        handle.await.unwrap();
    }

    #[tokio::test]
    async fn send_after_processor_exit_is_reported() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);
        let result = sender
            .send(Event::CouponRedeemed {
                coupon_id: Uuid::new_v4(),
                order_id: Uuid::new_v4(),
            })
            .await;
        assert!(result.is_err());
    }
}
