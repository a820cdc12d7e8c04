use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;

use crate::providers::adapter::EsimProvider;
use crate::providers::error::{ProviderError, ProviderResult};
use crate::providers::http::{verify_hmac_sha256_hex, ProviderHttpClient, RateGate};
use crate::providers::types::{
    CancelRequest, CancelResponse, CancelStatus, OrderRequest, OrderResponse, RateLimit,
    RefundRequest, RefundResponse, RefundStatus, StatusQuery, StatusResponse, UsageSnapshot,
    VendorOrderStatus, VendorWebhookEvent, WebhookKind, WebhookVerification,
};

pub const MOBIROAM_SLUG: &str = "mobiroam";

/// Mobiroam: synchronous provisioning only, no refund or cancellation
/// capability. Sales through this vendor are final.
#[derive(Debug, Clone)]
pub struct MobiroamConfig {
    pub api_key: String,
    pub webhook_secret: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub min_interval_ms: u64,
}

impl Default for MobiroamConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            webhook_secret: None,
            base_url: "https://partner-api.mobiroam.net".to_string(),
            timeout_secs: 30,
            max_retries: 3,
            min_interval_ms: 750,
        }
    }
}

impl MobiroamConfig {
    pub fn from_settings(
        settings: &JsonValue,
        webhook_secret: Option<String>,
    ) -> ProviderResult<Self> {
        let api_key = settings
            .get("api_key")
            .and_then(|v| v.as_str())
            .filter(|v| !v.trim().is_empty())
            .ok_or(ProviderError::Validation {
                message: "mobiroam settings require api_key".to_string(),
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

pub struct MobiroamAdapter {
    config: MobiroamConfig,
    http: ProviderHttpClient,
    gate: RateGate,
}

impl MobiroamAdapter {
    pub fn new(config: MobiroamConfig) -> ProviderResult<Self> {
        let http = ProviderHttpClient::new(
            MOBIROAM_SLUG,
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;
        let gate = RateGate::new(Duration::from_millis(config.min_interval_ms));
        Ok(Self { config, http, gate })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }
}

fn map_status(raw: &str) -> Option<VendorOrderStatus> {
    match raw {
        "ok" | "fulfilled" => Some(VendorOrderStatus::Completed),
        "working" => Some(VendorOrderStatus::Processing),
        "accepted" => Some(VendorOrderStatus::Pending),
        "error" => Some(VendorOrderStatus::Failed),
        _ => None,
    }
}

#[async_trait]
impl EsimProvider for MobiroamAdapter {
    fn slug(&self) -> &str {
        MOBIROAM_SLUG
    }

    async fn create_order(&self, request: &OrderRequest) -> ProviderResult<OrderResponse> {
        self.gate.acquire().await;
        let payload = serde_json::json!({
            "sku": request.package_code,
            "qty": request.quantity,
            "ext_ref": request.idempotency_ref,
        });

        let raw: MobiroamOrder = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/v1/purchase"),
                None,
                Some(&payload),
                &[
                    ("Content-Type", "application/json"),
                    ("X-Api-Key", &self.config.api_key),
                ],
            )
            .await?;

        let status = map_status(&raw.result);
        Ok(OrderResponse {
            success: status != Some(VendorOrderStatus::Failed),
            status,
            iccid: raw.iccid,
            qr_code: raw.lpa_string,
            qr_code_url: None,
            smdp_address: raw.smdp,
            activation_code: raw.matching_id,
            vendor_order_id: Some(raw.purchase_id),
            request_id: None,
            error_message: raw.error,
        })
    }

    async fn get_order_status(&self, query: &StatusQuery) -> ProviderResult<StatusResponse> {
        let id = match query {
            StatusQuery::VendorOrderId(id) => id,
            StatusQuery::RequestId(_) => {
                return Err(ProviderError::Validation {
                    message: "mobiroam orders are tracked by purchase id only".to_string(),
                })
            }
        };

        self.gate.acquire().await;
        let raw: MobiroamOrder = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/v1/purchase/{}", id)),
                None,
                None,
                &[("X-Api-Key", &self.config.api_key)],
            )
            .await?;

        Ok(StatusResponse {
            status: map_status(&raw.result),
            iccid: raw.iccid,
            qr_code: raw.lpa_string,
            qr_code_url: None,
            smdp_address: raw.smdp,
            activation_code: raw.matching_id,
            error_message: raw.error,
        })
    }

    async fn request_refund(&self, _request: &RefundRequest) -> ProviderResult<RefundResponse> {
        Ok(RefundResponse {
            success: false,
            approved: false,
            status: RefundStatus::NotSupported,
            refund_id: None,
            message: Some("mobiroam sales are final".to_string()),
        })
    }

    async fn cancel_order(&self, _request: &CancelRequest) -> ProviderResult<CancelResponse> {
        Ok(CancelResponse {
            success: false,
            status: CancelStatus::NotSupported,
            message: Some("mobiroam sales are final".to_string()),
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
        if verify_hmac_sha256_hex(payload, secret, signature) {
            Ok(WebhookVerification::ok())
        } else {
            Ok(WebhookVerification::rejected("invalid mobiroam signature"))
        }
    }

    fn parse_webhook(&self, payload: &[u8]) -> ProviderResult<VendorWebhookEvent> {
        let parsed: JsonValue = serde_json::from_slice(payload).map_err(|e| {
            ProviderError::MalformedResponse {
                message: format!("invalid webhook JSON payload: {}", e),
            }
        })?;

        // Mobiroam only posts purchase updates.
        Ok(VendorWebhookEvent {
            kind: WebhookKind::OrderStatus,
            vendor_order_id: parsed
                .get("purchase_id")
                .and_then(|v| v.as_str())
                .map(|v| v.to_string()),
            request_id: None,
            iccid: parsed
                .get("iccid")
                .and_then(|v| v.as_str())
                .map(|v| v.to_string()),
            status: parsed
                .get("result")
                .and_then(|v| v.as_str())
                .and_then(map_status),
            data: parsed,
            timestamp: chrono::Utc::now(),
        })
    }

    async fn get_usage(&self, iccid: &str) -> ProviderResult<UsageSnapshot> {
        self.gate.acquire().await;
        let raw: MobiroamUsage = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/v1/sims/{}", iccid)),
                None,
                None,
                &[("X-Api-Key", &self.config.api_key)],
            )
            .await?;

        Ok(UsageSnapshot {
            iccid: iccid.to_string(),
            active: raw.live,
            data_total_mb: raw.quota_mb,
            data_remaining_mb: raw.left_mb,
            expires_at: raw.valid_until,
        })
    }

    fn supports_refunds(&self) -> bool {
        false
    }

    fn supports_cancellation(&self) -> bool {
        false
    }

    fn sync_rate_limit(&self) -> RateLimit {
        RateLimit {
            requests_per_hour: 1200,
            requests_per_second: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct MobiroamOrder {
    purchase_id: String,
    result: String,
    #[serde(default)]
    iccid: Option<String>,
    #[serde(default)]
    lpa_string: Option<String>,
    #[serde(default)]
    smdp: Option<String>,
    #[serde(default)]
    matching_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MobiroamUsage {
    live: bool,
    #[serde(default)]
    quota_mb: Option<i64>,
    #[serde(default)]
    left_mb: Option<i64>,
    #[serde(default)]
    valid_until: Option<chrono::DateTime<chrono::Utc>>,
}
