use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::providers::types::StatusQuery;

/// Order lifecycle status. All status writes go through
/// `can_transition_to`; terminal states admit no further mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    Pending,
    Processing,
    Completed,
    Failed,
    PermanentlyFailed,
    Cancelled,
    Refunded,
    PendingRefund,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "created",
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Completed => "completed",
            OrderStatus::Failed => "failed",
            OrderStatus::PermanentlyFailed => "permanently_failed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
            OrderStatus::PendingRefund => "pending_refund",
        }
    }

    pub fn from_db_status(s: &str) -> Option<Self> {
        match s {
            "created" => Some(OrderStatus::Created),
            "pending" => Some(OrderStatus::Pending),
            "processing" => Some(OrderStatus::Processing),
            "completed" => Some(OrderStatus::Completed),
            "failed" => Some(OrderStatus::Failed),
            "permanently_failed" => Some(OrderStatus::PermanentlyFailed),
            "cancelled" => Some(OrderStatus::Cancelled),
            "refunded" => Some(OrderStatus::Refunded),
            "pending_refund" => Some(OrderStatus::PendingRefund),
            _ => None,
        }
    }

    /// Terminal states: no further status, retry-bookkeeping or
    /// provisioning mutation once reached.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Refunded | OrderStatus::Cancelled | OrderStatus::PermanentlyFailed
        )
    }

    pub fn valid_transitions(&self) -> &'static [OrderStatus] {
        match self {
            OrderStatus::Created => &[
                OrderStatus::Pending,
                OrderStatus::Processing,
                OrderStatus::Completed,
                OrderStatus::Failed,
                OrderStatus::Cancelled,
            ],
            OrderStatus::Pending => &[
                OrderStatus::Processing,
                OrderStatus::Completed,
                OrderStatus::Failed,
                OrderStatus::Cancelled,
                OrderStatus::Refunded,
                OrderStatus::PendingRefund,
            ],
            OrderStatus::Processing => &[
                OrderStatus::Completed,
                OrderStatus::Failed,
                OrderStatus::Cancelled,
                OrderStatus::Refunded,
                OrderStatus::PendingRefund,
            ],
            OrderStatus::Completed => &[
                OrderStatus::Cancelled,
                OrderStatus::Refunded,
                OrderStatus::PendingRefund,
            ],
            // A failed retry leaves the order failed; `failed -> failed`
            // is the only self-transition in the graph.
            OrderStatus::Failed => &[
                OrderStatus::Failed,
                OrderStatus::PermanentlyFailed,
                OrderStatus::Completed,
                OrderStatus::Processing,
                OrderStatus::Pending,
                OrderStatus::Cancelled,
                OrderStatus::Refunded,
                OrderStatus::PendingRefund,
            ],
            OrderStatus::PendingRefund => &[OrderStatus::Refunded, OrderStatus::Cancelled],
            OrderStatus::Refunded | OrderStatus::Cancelled | OrderStatus::PermanentlyFailed => &[],
        }
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        self.valid_transitions().contains(&next)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub const MAX_RETRY_ATTEMPTS: i32 = 3;

/// The central order entity. Rows are owned by the persistence layer; the
/// core holds a copy only for the span of a single operation.
#[derive(Debug, Clone)]
pub struct Order {
    pub id: Uuid,
    pub display_id: String,
    pub user_id: Uuid,
    pub package_id: Uuid,
    pub provider_id: Option<Uuid>,
    /// Sync-tracked vendor reference.
    pub vendor_order_id: Option<String>,
    /// Async-tracked submission reference.
    pub request_id: Option<String>,
    pub iccid: Option<String>,
    pub quantity: i32,
    pub retail_price: BigDecimal,
    pub wholesale_price: BigDecimal,
    pub currency: String,
    pub qr_code: Option<String>,
    pub qr_code_url: Option<String>,
    pub smdp_address: Option<String>,
    pub activation_code: Option<String>,
    pub roaming_enabled: bool,
    pub apple_install_url: Option<String>,
    pub status: OrderStatus,
    pub retry_count: i32,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub last_status_check: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub payment_intent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set once the vendor reports the profile network-active; never
    /// cleared afterwards.
    pub activated_at: Option<DateTime<Utc>>,
}

impl Order {
    /// The addressing mode for vendor status queries. An async-tracked
    /// order is addressed by request reference even if a vendor order id
    /// later appears in webhook traffic.
    pub fn status_query(&self) -> Option<StatusQuery> {
        if let Some(request_id) = &self.request_id {
            return Some(StatusQuery::RequestId(request_id.clone()));
        }
        self.vendor_order_id
            .as_ref()
            .map(|id| StatusQuery::VendorOrderId(id.clone()))
    }

    /// At least one vendor-side identifier is required for any
    /// post-purchase operation.
    pub fn has_vendor_reference(&self) -> bool {
        self.iccid.is_some() || self.vendor_order_id.is_some() || self.request_id.is_some()
    }

    pub fn is_activated(&self) -> bool {
        self.activated_at.is_some()
    }

    pub fn is_retry_exhausted(&self) -> bool {
        self.retry_count >= MAX_RETRY_ATTEMPTS
    }
}

/// Short user-visible order reference, derived from the internal id.
pub fn generate_display_id(id: &Uuid) -> String {
    let hex = id.simple().to_string();
    format!("RL-{}", hex[..10].to_uppercase())
}

/// Apple universal-link for direct eSIM install, available when the vendor
/// returned both an SM-DP+ address and an activation code.
pub fn apple_install_url(smdp_address: &str, activation_code: &str) -> String {
    format!(
        "https://esimsetup.apple.com/esim_qrcode_provisioning?carddata=LPA:1${}${}",
        smdp_address, activation_code
    )
}

/// Partial update applied by the reconciler and webhook handlers when a
/// vendor reports provisioning progress. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct ProvisioningUpdate {
    pub status: Option<OrderStatus>,
    pub iccid: Option<String>,
    pub qr_code: Option<String>,
    pub qr_code_url: Option<String>,
    pub smdp_address: Option<String>,
    pub activation_code: Option<String>,
    pub apple_install_url: Option<String>,
    pub vendor_order_id: Option<String>,
    pub request_id: Option<String>,
    pub failure_reason: Option<String>,
}

impl ProvisioningUpdate {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.iccid.is_none()
            && self.qr_code.is_none()
            && self.qr_code_url.is_none()
            && self.smdp_address.is_none()
            && self.activation_code.is_none()
            && self.apple_install_url.is_none()
            && self.vendor_order_id.is_none()
            && self.request_id.is_none()
            && self.failure_reason.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;

    pub fn order_with_status(status: OrderStatus) -> Order {
        let id = Uuid::new_v4();
        Order {
            id,
            display_id: generate_display_id(&id),
            user_id: Uuid::new_v4(),
            package_id: Uuid::new_v4(),
            provider_id: Some(Uuid::new_v4()),
            vendor_order_id: None,
            request_id: None,
            iccid: None,
            quantity: 1,
            retail_price: BigDecimal::from(10),
            wholesale_price: BigDecimal::from(7),
            currency: "USD".to_string(),
            qr_code: None,
            qr_code_url: None,
            smdp_address: None,
            activation_code: None,
            roaming_enabled: false,
            apple_install_url: None,
            status,
            retry_count: 0,
            last_retry_at: None,
            last_status_check: None,
            failure_reason: None,
            payment_intent_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            activated_at: None,
        }
    }

    #[test]
    fn terminal_states_have_no_transitions() {
        for status in [
            OrderStatus::Refunded,
            OrderStatus::Cancelled,
            OrderStatus::PermanentlyFailed,
        ] {
            assert!(status.is_terminal());
            assert!(status.valid_transitions().is_empty());
            assert!(!status.can_transition_to(OrderStatus::Completed));
            assert!(!status.can_transition_to(OrderStatus::Failed));
        }
    }

    #[test]
    fn submission_transitions() {
        assert!(OrderStatus::Created.can_transition_to(OrderStatus::Completed));
        assert!(OrderStatus::Created.can_transition_to(OrderStatus::Processing));
        assert!(OrderStatus::Created.can_transition_to(OrderStatus::Failed));
        assert!(!OrderStatus::Created.can_transition_to(OrderStatus::PermanentlyFailed));
    }

    #[test]
    fn reconciliation_transitions() {
        assert!(OrderStatus::Processing.can_transition_to(OrderStatus::Completed));
        assert!(OrderStatus::Processing.can_transition_to(OrderStatus::Failed));
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Completed));
        assert!(!OrderStatus::Processing.can_transition_to(OrderStatus::Created));
        assert!(!OrderStatus::Completed.can_transition_to(OrderStatus::Processing));
    }

    #[test]
    fn retry_transitions() {
        assert!(OrderStatus::Failed.can_transition_to(OrderStatus::Failed));
        assert!(OrderStatus::Failed.can_transition_to(OrderStatus::PermanentlyFailed));
        assert!(OrderStatus::Failed.can_transition_to(OrderStatus::Completed));
        assert!(OrderStatus::Failed.can_transition_to(OrderStatus::Processing));
    }

    #[test]
    fn refund_transitions() {
        assert!(OrderStatus::Completed.can_transition_to(OrderStatus::Refunded));
        assert!(OrderStatus::Completed.can_transition_to(OrderStatus::PendingRefund));
        assert!(OrderStatus::Completed.can_transition_to(OrderStatus::Cancelled));
        assert!(OrderStatus::PendingRefund.can_transition_to(OrderStatus::Refunded));
        assert!(!OrderStatus::PendingRefund.can_transition_to(OrderStatus::Completed));
    }

    #[test]
    fn db_status_round_trip() {
        for status in [
            OrderStatus::Created,
            OrderStatus::Pending,
            OrderStatus::Processing,
            OrderStatus::Completed,
            OrderStatus::Failed,
            OrderStatus::PermanentlyFailed,
            OrderStatus::Cancelled,
            OrderStatus::Refunded,
            OrderStatus::PendingRefund,
        ] {
            assert_eq!(OrderStatus::from_db_status(status.as_str()), Some(status));
        }
        assert_eq!(OrderStatus::from_db_status("shipped"), None);
    }

    #[test]
    fn status_query_prefers_request_id() {
        let mut order = order_with_status(OrderStatus::Processing);
        assert!(order.status_query().is_none());

        order.vendor_order_id = Some("VO-1".to_string());
        assert_eq!(
            order.status_query(),
            Some(StatusQuery::VendorOrderId("VO-1".to_string()))
        );

        order.request_id = Some("req_1".to_string());
        assert_eq!(
            order.status_query(),
            Some(StatusQuery::RequestId("req_1".to_string()))
        );
    }

    #[test]
    fn apple_install_url_format() {
        let url = apple_install_url("rsp.example.net", "ABC-123");
        assert_eq!(
            url,
            "https://esimsetup.apple.com/esim_qrcode_provisioning?carddata=LPA:1$rsp.example.net$ABC-123"
        );
    }

    #[test]
    fn display_id_is_short_and_prefixed() {
        let id = Uuid::new_v4();
        let display = generate_display_id(&id);
        assert!(display.starts_with("RL-"));
        assert_eq!(display.len(), 13);
    }
}
