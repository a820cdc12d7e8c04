use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::info;

use crate::providers::adapter::EsimProvider;
use crate::providers::error::{ProviderError, ProviderResult};
use crate::providers::http::{verify_hmac_sha256_hex, ProviderHttpClient, RateGate};
use crate::providers::types::{
    CancelRequest, CancelResponse, CancelStatus, OrderRequest, OrderResponse, RateLimit,
    RefundRequest, RefundResponse, RefundStatus, StatusQuery, StatusResponse, UsageSnapshot,
    VendorOrderStatus, VendorWebhookEvent, WebhookKind, WebhookVerification,
};

pub const GLOBIMO_SLUG: &str = "globimo";

/// Globimo provisions asynchronously: every submission answers with a
/// request reference and completion arrives later via polling or webhook.
/// Orders can be cancelled while unactivated; refunds are not offered.
#[derive(Debug, Clone)]
pub struct GlobimoConfig {
    pub api_key: String,
    pub webhook_secret: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub min_interval_ms: u64,
}

impl Default for GlobimoConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            webhook_secret: None,
            base_url: "https://connect.globimo.com".to_string(),
            timeout_secs: 30,
            max_retries: 3,
            min_interval_ms: 1000,
        }
    }
}

impl GlobimoConfig {
    pub fn from_settings(
        settings: &JsonValue,
        webhook_secret: Option<String>,
    ) -> ProviderResult<Self> {
        let api_key = settings
            .get("api_key")
            .and_then(|v| v.as_str())
            .filter(|v| !v.trim().is_empty())
            .ok_or(ProviderError::Validation {
                message: "globimo settings require api_key".to_string(),
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

pub struct GlobimoAdapter {
    config: GlobimoConfig,
    http: ProviderHttpClient,
    gate: RateGate,
}

impl GlobimoAdapter {
    pub fn new(config: GlobimoConfig) -> ProviderResult<Self> {
        let http = ProviderHttpClient::new(
            GLOBIMO_SLUG,
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;
        let gate = RateGate::new(Duration::from_millis(config.min_interval_ms));
        Ok(Self { config, http, gate })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    async fn submit(&self, request: &OrderRequest) -> ProviderResult<OrderResponse> {
        self.gate.acquire().await;
        let payload = serde_json::json!({
            "package_code": request.package_code,
            "count": request.quantity,
            "client_reference": request.idempotency_ref,
        });

        let raw: GlobimoEnvelope<GlobimoSubmitData> = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/api/v1/esims/orders"),
                Some(&self.config.api_key),
                Some(&payload),
                &[("Content-Type", "application/json")],
            )
            .await?;

        if raw.status != "success" {
            return Err(ProviderError::Vendor {
                provider: GLOBIMO_SLUG.to_string(),
                message: raw.message.unwrap_or_else(|| "submission rejected".to_string()),
                vendor_code: raw.error_code,
                retryable: false,
            });
        }
        info!(request_id = %raw.data.request_id, "globimo order queued");
        Ok(OrderResponse {
            success: true,
            status: Some(VendorOrderStatus::Processing),
            request_id: Some(raw.data.request_id),
            ..OrderResponse::default()
        })
    }
}

fn map_state(raw: &str) -> Option<VendorOrderStatus> {
    match raw {
        "COMPLETED" => Some(VendorOrderStatus::Completed),
        "IN_PROGRESS" => Some(VendorOrderStatus::Processing),
        "QUEUED" => Some(VendorOrderStatus::Pending),
        "FAILED" => Some(VendorOrderStatus::Failed),
        "CANCELLED" => Some(VendorOrderStatus::Cancelled),
        _ => None,
    }
}

#[async_trait]
impl EsimProvider for GlobimoAdapter {
    fn slug(&self) -> &str {
        GLOBIMO_SLUG
    }

    /// Globimo has no synchronous path; even single-profile orders come
    /// back with a request reference and an in-flight state.
    async fn create_order(&self, request: &OrderRequest) -> ProviderResult<OrderResponse> {
        self.submit(request).await
    }

    async fn create_order_async(&self, request: &OrderRequest) -> ProviderResult<OrderResponse> {
        self.submit(request).await
    }

    async fn get_order_status(&self, query: &StatusQuery) -> ProviderResult<StatusResponse> {
        self.gate.acquire().await;
        let reference = query.reference();

        let raw: GlobimoEnvelope<GlobimoStatusData> = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/api/v1/esims/orders/{}", reference)),
                Some(&self.config.api_key),
                None,
                &[],
            )
            .await?;

        if raw.status != "success" {
            return Err(ProviderError::Vendor {
                provider: GLOBIMO_SLUG.to_string(),
                message: raw.message.unwrap_or_else(|| "status query rejected".to_string()),
                vendor_code: raw.error_code,
                retryable: false,
            });
        }

        let profile = raw.data.esims.into_iter().next();
        Ok(StatusResponse {
            status: map_state(&raw.data.state),
            iccid: profile.as_ref().and_then(|p| p.iccid.clone()),
            qr_code: profile.as_ref().and_then(|p| p.qr.clone()),
            qr_code_url: profile.as_ref().and_then(|p| p.qr_url.clone()),
            smdp_address: profile.as_ref().and_then(|p| p.smdp.clone()),
            activation_code: profile.as_ref().and_then(|p| p.matching_id.clone()),
            error_message: raw.data.failure,
        })
    }

    async fn request_refund(&self, _request: &RefundRequest) -> ProviderResult<RefundResponse> {
        Ok(RefundResponse {
            success: false,
            approved: false,
            status: RefundStatus::NotSupported,
            refund_id: None,
            message: Some("globimo does not support refunds".to_string()),
        })
    }

    async fn cancel_order(&self, request: &CancelRequest) -> ProviderResult<CancelResponse> {
        let reference = request
            .request_id
            .clone()
            .or_else(|| request.vendor_order_id.clone())
            .ok_or(ProviderError::Validation {
                message: "globimo cancellation requires a request reference".to_string(),
            })?;

        self.gate.acquire().await;
        let payload = serde_json::json!({ "request_id": reference });
        let raw: GlobimoEnvelope<GlobimoCancelData> = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/api/v1/esims/orders/cancel"),
                Some(&self.config.api_key),
                Some(&payload),
                &[("Content-Type", "application/json")],
            )
            .await?;

        let status = match raw.data.state.as_str() {
            "CANCELLED" => CancelStatus::Cancelled,
            "CANCEL_PENDING" => CancelStatus::Pending,
            _ => CancelStatus::Failed,
        };
        Ok(CancelResponse {
            success: raw.status == "success" && status != CancelStatus::Failed,
            status,
            message: raw.message,
        })
    }

    fn validate_webhook(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> ProviderResult<WebhookVerification> {
        let secret = match self.config.webhook_secret.as_deref() {
            Some(s) => s,
            None => {
                return Ok(WebhookVerification::rejected(
                    "globimo webhook secret not configured",
                ))
            }
        };
        let signature = match signature {
            Some(s) if !s.trim().is_empty() => s,
            _ => return Ok(WebhookVerification::rejected("missing signature")),
        };
        if verify_hmac_sha256_hex(payload, secret, signature) {
            Ok(WebhookVerification::ok())
        } else {
            Ok(WebhookVerification::rejected("invalid globimo signature"))
        }
    }

    fn parse_webhook(&self, payload: &[u8]) -> ProviderResult<VendorWebhookEvent> {
        let parsed: JsonValue = serde_json::from_slice(payload).map_err(|e| {
            ProviderError::MalformedResponse {
                message: format!("invalid webhook JSON payload: {}", e),
            }
        })?;

        let event_type = parsed.get("type").and_then(|v| v.as_str()).unwrap_or("");
        let kind = match event_type {
            "esim.order.updated" | "esim.order.completed" => WebhookKind::OrderStatus,
            "esim.usage.low" => WebhookKind::LowData,
            "esim.expiring" => WebhookKind::Expiring,
            _ => WebhookKind::Other,
        };

        Ok(VendorWebhookEvent {
            kind,
            vendor_order_id: None,
            request_id: parsed
                .get("request_id")
                .and_then(|v| v.as_str())
                .map(|v| v.to_string()),
            iccid: parsed
                .get("iccid")
                .and_then(|v| v.as_str())
                .map(|v| v.to_string()),
            status: parsed
                .get("state")
                .and_then(|v| v.as_str())
                .and_then(map_state),
            data: parsed,
            timestamp: chrono::Utc::now(),
        })
    }

    async fn get_usage(&self, iccid: &str) -> ProviderResult<UsageSnapshot> {
        self.gate.acquire().await;
        let raw: GlobimoEnvelope<GlobimoUsageData> = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/api/v1/esims/{}/usage", iccid)),
                Some(&self.config.api_key),
                None,
                &[],
            )
            .await?;

        Ok(UsageSnapshot {
            iccid: iccid.to_string(),
            active: raw.data.status == "ACTIVE",
            data_total_mb: raw.data.total_volume_mb,
            data_remaining_mb: raw.data.remaining_volume_mb,
            expires_at: raw.data.expiry_date,
        })
    }

    fn supports_refunds(&self) -> bool {
        false
    }

    fn supports_cancellation(&self) -> bool {
        true
    }

    fn sync_rate_limit(&self) -> RateLimit {
        RateLimit {
            requests_per_hour: 1800,
            requests_per_second: Some(1),
        }
    }

    /// Every Globimo order is asynchronous, so the synchronous path is
    /// never preferred regardless of quantity.
    fn sync_threshold(&self) -> u32 {
        0
    }
}

#[derive(Debug, Deserialize)]
struct GlobimoEnvelope<T> {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
    data: T,
}

#[derive(Debug, Deserialize)]
struct GlobimoSubmitData {
    request_id: String,
}

#[derive(Debug, Deserialize)]
struct GlobimoStatusData {
    state: String,
    #[serde(default)]
    esims: Vec<GlobimoProfile>,
    #[serde(default)]
    failure: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GlobimoProfile {
    #[serde(default)]
    iccid: Option<String>,
    #[serde(default)]
    qr: Option<String>,
    #[serde(default)]
    qr_url: Option<String>,
    #[serde(default)]
    smdp: Option<String>,
    #[serde(default)]
    matching_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GlobimoCancelData {
    state: String,
}

#[derive(Debug, Deserialize)]
struct GlobimoUsageData {
    status: String,
    #[serde(default)]
    total_volume_mb: Option<i64>,
    #[serde(default)]
    remaining_volume_mb: Option<i64>,
    #[serde(default)]
    expiry_date: Option<chrono::DateTime<chrono::Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> GlobimoAdapter {
        GlobimoAdapter::new(GlobimoConfig {
            api_key: "gm_test".to_string(),
            webhook_secret: Some("whsec_gm".to_string()),
            timeout_secs: 5,
            max_retries: 1,
            ..GlobimoConfig::default()
        })
        .expect("adapter init should succeed")
    }

    #[test]
    fn capabilities_are_cancel_only() {
        let adapter = adapter();
        assert!(!adapter.supports_refunds());
        assert!(adapter.supports_cancellation());
        assert_eq!(adapter.sync_threshold(), 0);
    }

    #[test]
    fn state_mapping_covers_vendor_vocabulary() {
        assert_eq!(map_state("COMPLETED"), Some(VendorOrderStatus::Completed));
        assert_eq!(map_state("IN_PROGRESS"), Some(VendorOrderStatus::Processing));
        assert_eq!(map_state("QUEUED"), Some(VendorOrderStatus::Pending));
        assert_eq!(map_state("CANCELLED"), Some(VendorOrderStatus::Cancelled));
        assert_eq!(map_state("PAUSED"), None);
    }

    #[tokio::test]
    async fn refund_reports_not_supported() {
        let adapter = adapter();
        let response = adapter
            .request_refund(&RefundRequest {
                iccid: "894400000000000002".to_string(),
                reason: crate::providers::types::RefundReason::CustomerRequest,
                notes: None,
                email: None,
                order_created_at: None,
            })
            .await
            .unwrap();
        assert!(!response.success);
        assert_eq!(response.status, RefundStatus::NotSupported);
    }

    #[tokio::test]
    async fn cancellation_requires_a_reference() {
        let adapter = adapter();
        let result = adapter.cancel_order(&CancelRequest::default()).await;
        assert!(matches!(result, Err(ProviderError::Validation { .. })));
    }

    #[test]
    fn webhook_requires_configured_secret() {
        let adapter = GlobimoAdapter::new(GlobimoConfig {
            api_key: "gm_test".to_string(),
            webhook_secret: None,
            ..GlobimoConfig::default()
        })
        .unwrap();
        let result = adapter
            .validate_webhook(br#"{"type":"esim.order.updated"}"#, Some("sig"))
            .unwrap();
        assert!(!result.valid);
    }

    #[test]
    fn webhook_accepts_valid_sha256_signature() {
        use hmac::{Hmac, Mac};
        use sha2::Sha256;

        let adapter = adapter();
        let payload = br#"{"type":"esim.order.completed","request_id":"req_7","state":"COMPLETED"}"#;
        let mut mac = Hmac::<Sha256>::new_from_slice(b"whsec_gm").unwrap();
        mac.update(payload);
        let sig = hex::encode(mac.finalize().into_bytes());

        assert!(adapter.validate_webhook(payload, Some(&sig)).unwrap().valid);

        let event = adapter.parse_webhook(payload).unwrap();
        assert_eq!(event.kind, WebhookKind::OrderStatus);
        assert_eq!(event.request_id.as_deref(), Some("req_7"));
        assert_eq!(event.status, Some(VendorOrderStatus::Completed));
    }
}
