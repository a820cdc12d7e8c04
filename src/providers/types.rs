use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;

use crate::providers::error::ProviderError;

/// Normalized provisioning status reported by a vendor, independent of the
/// vendor's own status vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VendorOrderStatus {
    Completed,
    Processing,
    Pending,
    Failed,
    Cancelled,
}

impl VendorOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VendorOrderStatus::Completed => "completed",
            VendorOrderStatus::Processing => "processing",
            VendorOrderStatus::Pending => "pending",
            VendorOrderStatus::Failed => "failed",
            VendorOrderStatus::Cancelled => "cancelled",
        }
    }

    /// Still waiting on the vendor; neither success nor failure yet.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, VendorOrderStatus::Processing | VendorOrderStatus::Pending)
    }
}

impl fmt::Display for VendorOrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Purchase request sent to a vendor adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Vendor-side package code, resolved from our catalog linkage.
    pub package_code: String,
    pub quantity: u32,
    /// Our idempotency reference, echoed to the vendor where supported.
    pub idempotency_ref: String,
    pub customer_ref: Option<String>,
}

/// Normalized result of a vendor order submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderResponse {
    pub success: bool,
    pub status: Option<VendorOrderStatus>,
    pub iccid: Option<String>,
    pub qr_code: Option<String>,
    pub qr_code_url: Option<String>,
    pub smdp_address: Option<String>,
    pub activation_code: Option<String>,
    pub vendor_order_id: Option<String>,
    pub request_id: Option<String>,
    pub error_message: Option<String>,
}

/// Reference used to query a vendor for order progress. Exactly one
/// addressing mode is meaningful per order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusQuery {
    /// Sync-tracked order, addressed by the vendor's own order id.
    VendorOrderId(String),
    /// Async-tracked order, addressed by the submission request reference.
    RequestId(String),
}

impl StatusQuery {
    pub fn reference(&self) -> &str {
        match self {
            StatusQuery::VendorOrderId(r) | StatusQuery::RequestId(r) => r,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: Option<VendorOrderStatus>,
    pub iccid: Option<String>,
    pub qr_code: Option<String>,
    pub qr_code_url: Option<String>,
    pub smdp_address: Option<String>,
    pub activation_code: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundReason {
    ServiceIssues,
    CustomerRequest,
    Duplicate,
    Fraudulent,
    Others,
}

impl RefundReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundReason::ServiceIssues => "SERVICE_ISSUES",
            RefundReason::CustomerRequest => "CUSTOMER_REQUEST",
            RefundReason::Duplicate => "DUPLICATE",
            RefundReason::Fraudulent => "FRAUDULENT",
            RefundReason::Others => "OTHERS",
        }
    }
}

impl fmt::Display for RefundReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RefundReason {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "SERVICE_ISSUES" => Ok(RefundReason::ServiceIssues),
            "CUSTOMER_REQUEST" => Ok(RefundReason::CustomerRequest),
            "DUPLICATE" => Ok(RefundReason::Duplicate),
            "FRAUDULENT" => Ok(RefundReason::Fraudulent),
            "OTHERS" => Ok(RefundReason::Others),
            other => Err(ProviderError::Validation {
                message: format!("Unknown refund reason: {}", other),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequest {
    pub iccid: String,
    pub reason: RefundReason,
    pub notes: Option<String>,
    pub email: Option<String>,
    pub order_created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Approved,
    Pending,
    Rejected,
    NotSupported,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundResponse {
    pub success: bool,
    pub approved: bool,
    pub status: RefundStatus,
    pub refund_id: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelRequest {
    pub iccid: Option<String>,
    pub vendor_order_id: Option<String>,
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelStatus {
    Cancelled,
    Pending,
    Failed,
    NotSupported,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    pub success: bool,
    pub status: CancelStatus,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookVerification {
    pub valid: bool,
    pub reason: Option<String>,
}

impl WebhookVerification {
    pub fn ok() -> Self {
        Self { valid: true, reason: None }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookKind {
    OrderStatus,
    LowData,
    Expiring,
    Other,
}

/// Vendor webhook payload normalized across vendors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorWebhookEvent {
    pub kind: WebhookKind,
    pub vendor_order_id: Option<String>,
    pub request_id: Option<String>,
    pub iccid: Option<String>,
    pub status: Option<VendorOrderStatus>,
    pub data: JsonValue,
    pub timestamp: DateTime<Utc>,
}

/// Declared outbound rate limit for a vendor API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub requests_per_hour: u32,
    pub requests_per_second: Option<u32>,
}

/// Remaining-data snapshot for a provisioned profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub iccid: String,
    pub active: bool,
    pub data_total_mb: Option<i64>,
    pub data_remaining_mb: Option<i64>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl UsageSnapshot {
    /// Less than 10% of the bundle remaining counts as low.
    pub fn is_low_data(&self) -> bool {
        match (self.data_total_mb, self.data_remaining_mb) {
            (Some(total), Some(remaining)) if total > 0 => remaining * 10 < total,
            _ => false,
        }
    }
}
