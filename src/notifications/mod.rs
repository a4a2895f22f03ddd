use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

/// A customer-facing message produced by an order or rental event
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Notification {
    pub id: Uuid,
    pub kind: NotificationKind,
    /// Order or rental number the message is about
    pub reference: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(kind: NotificationKind, reference: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            reference: reference.into(),
            message: message.into(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    OrderConfirmed,
    OrderCancelled,
    PaymentFailed,
    PaymentNeedsReview,
    RentalConfirmed,
    RentalOverdue,
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Delivery failed: {0}")]
    Delivery(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Delivery seam for customer notifications (mail, SMS, ...)
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderNotifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), NotificationError>;
}

/// Writes notifications to the structured log; used until a mail relay is wired in
#[derive(Debug, Clone, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl OrderNotifier for LoggingNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NotificationError> {
        info!(
            notification_id = %notification.id,
            kind = ?notification.kind,
            reference = %notification.reference,
            "{}",
            notification.message
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn logging_notifier_accepts_everything() {
        let notifier = LoggingNotifier;
        let result = notifier
            .notify(Notification::new(
                NotificationKind::OrderConfirmed,
                "BS20240101120000123456",
                "Your order is confirmed",
            ))
            .await;
        assert!(result.is_ok());
    }

    #[test]
    fn kinds_serialize_snake_case() {
        let json = serde_json::to_string(&NotificationKind::PaymentNeedsReview).unwrap();
        assert_eq!(json, "\"payment_needs_review\"");
    }
}
