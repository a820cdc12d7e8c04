use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::orders::model::Order;
use crate::orders::store::StoreError;
use crate::providers::types::UsageSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    OrderCompleted,
    OrderFailed,
    OrderRefunded,
    OrderCancelled,
    LowData,
    ExpiringSoon,
    OpsAlert,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::OrderCompleted => "order_completed",
            NotificationKind::OrderFailed => "order_failed",
            NotificationKind::OrderRefunded => "order_refunded",
            NotificationKind::OrderCancelled => "order_cancelled",
            NotificationKind::LowData => "low_data",
            NotificationKind::ExpiringSoon => "expiring_soon",
            NotificationKind::OpsAlert => "ops_alert",
        }
    }
}

/// Persistence side of notifications; delivery (email, push) hangs off the
/// stored rows elsewhere.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn create_notification(
        &self,
        user_id: Uuid,
        kind: NotificationKind,
        title: &str,
        message: &str,
        metadata: JsonValue,
    ) -> Result<(), StoreError>;
}

/// Fire-and-forget notification emission. A failure to record or deliver a
/// notification is logged and swallowed; it must never roll back or delay
/// the order mutation that triggered it.
pub struct NotificationService {
    store: Arc<dyn NotificationStore>,
}

impl NotificationService {
    pub fn new(store: Arc<dyn NotificationStore>) -> Self {
        Self { store }
    }

    pub async fn order_completed(&self, order: &Order) {
        info!(
            order_id = %order.id,
            display_id = %order.display_id,
            "🔔 order completed"
        );
        self.emit(
            order,
            NotificationKind::OrderCompleted,
            "Your eSIM is ready",
            &format!("Order {} has been provisioned.", order.display_id),
            serde_json::json!({ "iccid": order.iccid }),
        )
        .await;
    }

    pub async fn order_failed(&self, order: &Order, reason: &str) {
        error!(
            order_id = %order.id,
            display_id = %order.display_id,
            reason = %reason,
            "🔔 order failed"
        );
        self.emit(
            order,
            NotificationKind::OrderFailed,
            "Order could not be completed",
            &format!("Order {} failed: {}", order.display_id, reason),
            JsonValue::Null,
        )
        .await;
    }

    pub async fn order_refunded(&self, order: &Order) {
        info!(order_id = %order.id, "🔔 order refunded");
        self.emit(
            order,
            NotificationKind::OrderRefunded,
            "Your order was refunded",
            &format!("Order {} has been refunded.", order.display_id),
            JsonValue::Null,
        )
        .await;
    }

    pub async fn order_cancelled(&self, order: &Order) {
        info!(order_id = %order.id, "🔔 order cancelled");
        self.emit(
            order,
            NotificationKind::OrderCancelled,
            "Your order was cancelled",
            &format!("Order {} has been cancelled.", order.display_id),
            JsonValue::Null,
        )
        .await;
    }

    pub async fn low_data(&self, order: &Order, usage: &UsageSnapshot) {
        self.emit(
            order,
            NotificationKind::LowData,
            "Your data is running low",
            &format!(
                "eSIM {} has {} MB remaining.",
                usage.iccid,
                usage.data_remaining_mb.unwrap_or(0)
            ),
            serde_json::json!({
                "remaining_mb": usage.data_remaining_mb,
                "total_mb": usage.data_total_mb,
            }),
        )
        .await;
    }

    pub async fn expiring_soon(&self, order: &Order) {
        self.emit(
            order,
            NotificationKind::ExpiringSoon,
            "Your eSIM expires soon",
            &format!("Order {} is approaching its expiry date.", order.display_id),
            JsonValue::Null,
        )
        .await;
    }

    /// Operational alert, e.g. a payment reversal that failed after a
    /// vendor-side refund succeeded. Routed to the order's user row for
    /// lack of a dedicated ops channel; the log line is the primary signal.
    pub async fn ops_alert(&self, order: &Order, message: &str) {
        error!(
            order_id = %order.id,
            display_id = %order.display_id,
            "🔔 OPS ALERT: {}", message
        );
        self.emit(
            order,
            NotificationKind::OpsAlert,
            "Manual review required",
            message,
            JsonValue::Null,
        )
        .await;
    }

    async fn emit(
        &self,
        order: &Order,
        kind: NotificationKind,
        title: &str,
        message: &str,
        metadata: JsonValue,
    ) {
        if let Err(e) = self
            .store
            .create_notification(order.user_id, kind, title, message, metadata)
            .await
        {
            warn!(
                order_id = %order.id,
                kind = kind.as_str(),
                error = %e,
                "failed to record notification"
            );
        }
    }
}
