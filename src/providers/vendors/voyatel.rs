use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::info;

use crate::providers::adapter::EsimProvider;
use crate::providers::error::{ProviderError, ProviderResult};
use crate::providers::http::{verify_hmac_sha512_hex, ProviderHttpClient, RateGate};
use crate::providers::types::{
    CancelRequest, CancelResponse, CancelStatus, OrderRequest, OrderResponse, RateLimit,
    RefundRequest, RefundResponse, RefundStatus, StatusQuery, StatusResponse, UsageSnapshot,
    VendorOrderStatus, VendorWebhookEvent, WebhookKind, WebhookVerification,
};

pub const VOYATEL_SLUG: &str = "voyatel";

/// Voyatel provisions synchronously for small orders and exposes a bulk
/// endpoint that answers with a request reference for large ones. Refunds
/// are supported per ICCID; cancellation is not.
#[derive(Debug, Clone)]
pub struct VoyatelConfig {
    pub api_key: String,
    pub webhook_secret: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub min_interval_ms: u64,
}

impl Default for VoyatelConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            webhook_secret: None,
            base_url: "https://api.voyatel.io".to_string(),
            timeout_secs: 30,
            max_retries: 3,
            min_interval_ms: 500,
        }
    }
}

impl VoyatelConfig {
    /// Build from a provider configuration row's settings document.
    pub fn from_settings(
        settings: &JsonValue,
        webhook_secret: Option<String>,
    ) -> ProviderResult<Self> {
        let api_key = settings
            .get("api_key")
            .and_then(|v| v.as_str())
            .filter(|v| !v.trim().is_empty())
            .ok_or(ProviderError::Validation {
                message: "voyatel settings require api_key".to_string(),
            })?
            .to_string();

        let defaults = Self::default();
        Ok(Self {
            api_key,
            webhook_secret,
            base_url: settings
                .get("base_url")
                .and_then(|v| v.as_str())
                .map(|v| v.to_string())
                .unwrap_or(defaults.base_url),
            timeout_secs: settings
                .get("timeout_secs")
                .and_then(|v| v.as_u64())
                .unwrap_or(defaults.timeout_secs),
            max_retries: settings
                .get("max_retries")
                .and_then(|v| v.as_u64())
                .map(|v| v as u32)
                .unwrap_or(defaults.max_retries),
            min_interval_ms: settings
                .get("min_interval_ms")
                .and_then(|v| v.as_u64())
                .unwrap_or(defaults.min_interval_ms),
        })
    }
}

pub struct VoyatelAdapter {
    config: VoyatelConfig,
    http: ProviderHttpClient,
    gate: RateGate,
}

impl VoyatelAdapter {
    pub fn new(config: VoyatelConfig) -> ProviderResult<Self> {
        let http = ProviderHttpClient::new(
            VOYATEL_SLUG,
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;
        let gate = RateGate::new(Duration::from_millis(config.min_interval_ms));
        Ok(Self { config, http, gate })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn order_response_from(data: VoyatelOrderData) -> OrderResponse {
        let status = map_order_status(&data.status);
        let sim = data.sims.into_iter().next();
        OrderResponse {
            success: status != Some(VendorOrderStatus::Failed),
            status,
            iccid: sim.as_ref().and_then(|s| s.iccid.clone()),
            qr_code: sim.as_ref().and_then(|s| s.qr_code.clone()),
            qr_code_url: sim.as_ref().and_then(|s| s.qr_code_url.clone()),
            smdp_address: sim.as_ref().and_then(|s| s.smdp_address.clone()),
            activation_code: sim.as_ref().and_then(|s| s.activation_code.clone()),
            vendor_order_id: Some(data.order_id),
            request_id: None,
            error_message: data.failure_reason,
        }
    }
}

fn map_order_status(raw: &str) -> Option<VendorOrderStatus> {
    match raw {
        "completed" | "delivered" => Some(VendorOrderStatus::Completed),
        "processing" | "in_progress" => Some(VendorOrderStatus::Processing),
        "pending" | "queued" => Some(VendorOrderStatus::Pending),
        "failed" | "rejected" => Some(VendorOrderStatus::Failed),
        "cancelled" => Some(VendorOrderStatus::Cancelled),
        _ => None,
    }
}

#[async_trait]
impl EsimProvider for VoyatelAdapter {
    fn slug(&self) -> &str {
        VOYATEL_SLUG
    }

    async fn create_order(&self, request: &OrderRequest) -> ProviderResult<OrderResponse> {
        self.gate.acquire().await;
        let payload = serde_json::json!({
            "package": request.package_code,
            "quantity": request.quantity,
            "reference": request.idempotency_ref,
            "customer": request.customer_ref,
        });

        let raw: VoyatelEnvelope<VoyatelOrderData> = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/v2/orders"),
                Some(&self.config.api_key),
                Some(&payload),
                &[("Content-Type", "application/json")],
            )
            .await?;

        if !raw.success {
            return Err(ProviderError::Vendor {
                provider: VOYATEL_SLUG.to_string(),
                message: raw.message,
                vendor_code: raw.code,
                retryable: false,
            });
        }
        info!(order_id = %raw.data.order_id, "voyatel order submitted");
        Ok(Self::order_response_from(raw.data))
    }

    async fn create_order_async(&self, request: &OrderRequest) -> ProviderResult<OrderResponse> {
        self.gate.acquire().await;
        let payload = serde_json::json!({
            "package": request.package_code,
            "quantity": request.quantity,
            "reference": request.idempotency_ref,
        });

        let raw: VoyatelEnvelope<VoyatelBulkData> = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/v2/orders/bulk"),
                Some(&self.config.api_key),
                Some(&payload),
                &[("Content-Type", "application/json")],
            )
            .await?;

        if !raw.success {
            return Err(ProviderError::Vendor {
                provider: VOYATEL_SLUG.to_string(),
                message: raw.message,
                vendor_code: raw.code,
                retryable: false,
            });
        }
        info!(request_id = %raw.data.request_id, "voyatel bulk order queued");
        Ok(OrderResponse {
            success: true,
            status: Some(VendorOrderStatus::Processing),
            request_id: Some(raw.data.request_id),
            ..OrderResponse::default()
        })
    }

    async fn get_order_status(&self, query: &StatusQuery) -> ProviderResult<StatusResponse> {
        self.gate.acquire().await;
        let path = match query {
            StatusQuery::VendorOrderId(id) => format!("/v2/orders/{}", id),
            StatusQuery::RequestId(id) => format!("/v2/orders/bulk/{}", id),
        };

        let raw: VoyatelEnvelope<VoyatelOrderData> = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&path),
                Some(&self.config.api_key),
                None,
                &[],
            )
            .await?;

        if !raw.success {
            return Err(ProviderError::Vendor {
                provider: VOYATEL_SLUG.to_string(),
                message: raw.message,
                vendor_code: raw.code,
                retryable: false,
            });
        }

        let sim = raw.data.sims.into_iter().next();
        Ok(StatusResponse {
            status: map_order_status(&raw.data.status),
            iccid: sim.as_ref().and_then(|s| s.iccid.clone()),
            qr_code: sim.as_ref().and_then(|s| s.qr_code.clone()),
            qr_code_url: sim.as_ref().and_then(|s| s.qr_code_url.clone()),
            smdp_address: sim.as_ref().and_then(|s| s.smdp_address.clone()),
            activation_code: sim.as_ref().and_then(|s| s.activation_code.clone()),
            error_message: raw.data.failure_reason,
        })
    }

    async fn request_refund(&self, request: &RefundRequest) -> ProviderResult<RefundResponse> {
        self.gate.acquire().await;
        let payload = serde_json::json!({
            "iccid": request.iccid,
            "reason": request.reason.as_str(),
            "notes": request.notes,
            "contact_email": request.email,
        });

        let raw: VoyatelEnvelope<VoyatelRefundData> = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/v2/refunds"),
                Some(&self.config.api_key),
                Some(&payload),
                &[("Content-Type", "application/json")],
            )
            .await?;

        let status = match raw.data.status.as_str() {
            "approved" => RefundStatus::Approved,
            "pending" | "under_review" => RefundStatus::Pending,
            _ => RefundStatus::Rejected,
        };
        Ok(RefundResponse {
            success: raw.success && status != RefundStatus::Rejected,
            approved: status == RefundStatus::Approved,
            status,
            refund_id: raw.data.refund_id,
            message: Some(raw.message),
        })
    }

    async fn cancel_order(&self, _request: &CancelRequest) -> ProviderResult<CancelResponse> {
        Ok(CancelResponse {
            success: false,
            status: CancelStatus::NotSupported,
            message: Some("voyatel does not support order cancellation".to_string()),
        })
    }

    fn validate_webhook(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> ProviderResult<WebhookVerification> {
        let secret = self
            .config
            .webhook_secret
            .as_deref()
            .unwrap_or(&self.config.api_key);
        let signature = match signature {
            Some(s) if !s.trim().is_empty() => s,
            _ => return Ok(WebhookVerification::rejected("missing signature")),
        };
        if verify_hmac_sha512_hex(payload, secret, signature) {
            Ok(WebhookVerification::ok())
        } else {
            Ok(WebhookVerification::rejected("invalid voyatel signature"))
        }
    }

    fn parse_webhook(&self, payload: &[u8]) -> ProviderResult<VendorWebhookEvent> {
        let parsed: JsonValue = serde_json::from_slice(payload).map_err(|e| {
            ProviderError::MalformedResponse {
                message: format!("invalid webhook JSON payload: {}", e),
            }
        })?;

        let event = parsed.get("event").and_then(|v| v.as_str()).unwrap_or("");
        let kind = match event {
            "order.completed" | "order.failed" | "order.updated" => WebhookKind::OrderStatus,
            "sim.low_data" => WebhookKind::LowData,
            "sim.expiring" => WebhookKind::Expiring,
            _ => WebhookKind::Other,
        };
        let data = parsed.get("data").cloned().unwrap_or(JsonValue::Null);

        Ok(VendorWebhookEvent {
            kind,
            vendor_order_id: data
                .get("order_id")
                .and_then(|v| v.as_str())
                .map(|v| v.to_string()),
            request_id: data
                .get("request_id")
                .and_then(|v| v.as_str())
                .map(|v| v.to_string()),
            iccid: data
                .get("iccid")
                .and_then(|v| v.as_str())
                .map(|v| v.to_string()),
            status: data
                .get("status")
                .and_then(|v| v.as_str())
                .and_then(map_order_status),
            data,
            timestamp: chrono::Utc::now(),
        })
    }

    async fn get_usage(&self, iccid: &str) -> ProviderResult<UsageSnapshot> {
        self.gate.acquire().await;
        let raw: VoyatelEnvelope<VoyatelUsageData> = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/v2/sims/{}/usage", iccid)),
                Some(&self.config.api_key),
                None,
                &[],
            )
            .await?;

        Ok(UsageSnapshot {
            iccid: iccid.to_string(),
            active: raw.data.state == "active",
            data_total_mb: raw.data.total_mb,
            data_remaining_mb: raw.data.remaining_mb,
            expires_at: raw.data.expires_at,
        })
    }

    fn supports_refunds(&self) -> bool {
        true
    }

    fn supports_cancellation(&self) -> bool {
        false
    }

    fn sync_rate_limit(&self) -> RateLimit {
        RateLimit {
            requests_per_hour: 3600,
            requests_per_second: Some(2),
        }
    }
}

#[derive(Debug, Deserialize)]
struct VoyatelEnvelope<T> {
    success: bool,
    message: String,
    #[serde(default)]
    code: Option<String>,
    data: T,
}

#[derive(Debug, Deserialize)]
struct VoyatelOrderData {
    order_id: String,
    status: String,
    #[serde(default)]
    sims: Vec<VoyatelSim>,
    #[serde(default)]
    failure_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VoyatelSim {
    #[serde(default)]
    iccid: Option<String>,
    #[serde(default)]
    qr_code: Option<String>,
    #[serde(default)]
    qr_code_url: Option<String>,
    #[serde(default)]
    smdp_address: Option<String>,
    #[serde(default)]
    activation_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VoyatelBulkData {
    request_id: String,
}

#[derive(Debug, Deserialize)]
struct VoyatelRefundData {
    #[serde(default)]
    refund_id: Option<String>,
    status: String,
}

#[derive(Debug, Deserialize)]
struct VoyatelUsageData {
    state: String,
    #[serde(default)]
    total_mb: Option<i64>,
    #[serde(default)]
    remaining_mb: Option<i64>,
    #[serde(default)]
    expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> VoyatelAdapter {
        VoyatelAdapter::new(VoyatelConfig {
            api_key: "vt_test".to_string(),
            webhook_secret: Some("whsec_test".to_string()),
            timeout_secs: 5,
            max_retries: 1,
            ..VoyatelConfig::default()
        })
        .expect("adapter init should succeed")
    }

    #[test]
    fn capabilities_are_refund_only() {
        let adapter = adapter();
        assert!(adapter.supports_refunds());
        assert!(!adapter.supports_cancellation());
        assert_eq!(adapter.sync_threshold(), 5);
    }

    #[test]
    fn status_mapping_covers_vendor_vocabulary() {
        assert_eq!(map_order_status("delivered"), Some(VendorOrderStatus::Completed));
        assert_eq!(map_order_status("in_progress"), Some(VendorOrderStatus::Processing));
        assert_eq!(map_order_status("queued"), Some(VendorOrderStatus::Pending));
        assert_eq!(map_order_status("rejected"), Some(VendorOrderStatus::Failed));
        assert_eq!(map_order_status("whatever"), None);
    }

    #[test]
    fn webhook_rejects_missing_and_invalid_signatures() {
        let adapter = adapter();
        let payload = br#"{"event":"order.completed"}"#;

        let result = adapter.validate_webhook(payload, None).unwrap();
        assert!(!result.valid);

        let result = adapter.validate_webhook(payload, Some("bogus")).unwrap();
        assert!(!result.valid);
    }

    #[test]
    fn webhook_accepts_valid_signature() {
        use hmac::{Hmac, Mac};
        use sha2::Sha512;

        let adapter = adapter();
        let payload = br#"{"event":"order.completed","data":{"order_id":"VO-1"}}"#;
        let mut mac = Hmac::<Sha512>::new_from_slice(b"whsec_test").unwrap();
        mac.update(payload);
        let sig = hex::encode(mac.finalize().into_bytes());

        let result = adapter.validate_webhook(payload, Some(&sig)).unwrap();
        assert!(result.valid);
    }

    #[test]
    fn webhook_parsing_normalizes_order_events() {
        let adapter = adapter();
        let payload = br#"{
            "event": "order.completed",
            "data": {"order_id": "VO-42", "iccid": "894400000000000001", "status": "completed"}
        }"#;

        let event = adapter.parse_webhook(payload).unwrap();
        assert_eq!(event.kind, WebhookKind::OrderStatus);
        assert_eq!(event.vendor_order_id.as_deref(), Some("VO-42"));
        assert_eq!(event.iccid.as_deref(), Some("894400000000000001"));
        assert_eq!(event.status, Some(VendorOrderStatus::Completed));
    }

    #[test]
    fn settings_require_api_key() {
        let settings = serde_json::json!({"base_url": "https://sandbox.voyatel.io"});
        assert!(VoyatelConfig::from_settings(&settings, None).is_err());

        let settings = serde_json::json!({"api_key": "vt_live", "timeout_secs": 10});
        let config = VoyatelConfig::from_settings(&settings, Some("s".into())).unwrap();
        assert_eq!(config.api_key, "vt_live");
        assert_eq!(config.timeout_secs, 10);
        assert_eq!(config.min_interval_ms, 500);
    }
}
