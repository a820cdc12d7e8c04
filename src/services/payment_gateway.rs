use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Gateway network error: {0}")]
    Network(String),
    #[error("Gateway rejected the request: {0}")]
    Rejected(String),
    #[error("Gateway configuration error: {0}")]
    Configuration(String),
}

#[derive(Debug, Clone)]
pub struct GatewayRefundRequest {
    pub payment_reference: String,
    pub reason: String,
    pub metadata: JsonValue,
}

#[derive(Debug, Clone)]
pub struct GatewayRefundResponse {
    pub success: bool,
    pub refund_id: Option<String>,
    pub amount: Option<BigDecimal>,
    pub status: String,
    pub error_message: Option<String>,
}

/// External payment gateway used to reverse the original charge after a
/// vendor-side refund or cancellation succeeds.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn process_refund(
        &self,
        request: &GatewayRefundRequest,
    ) -> Result<GatewayRefundResponse, GatewayError>;
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout_secs: u64,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, GatewayError> {
        let api_key = std::env::var("PAYMENT_GATEWAY_API_KEY").map_err(|_| {
            GatewayError::Configuration(
                "PAYMENT_GATEWAY_API_KEY environment variable is required".to_string(),
            )
        })?;
        Ok(Self {
            base_url: std::env::var("PAYMENT_GATEWAY_BASE_URL")
                .unwrap_or_else(|_| "https://api.interpay.example.com".to_string()),
            api_key,
            timeout_secs: std::env::var("PAYMENT_GATEWAY_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30),
        })
    }
}

/// HTTP-backed gateway client. A single refund call, no internal retry:
/// reversal failures are surfaced to the refund orchestrator, which records
/// them instead of re-driving.
pub struct HttpPaymentGateway {
    config: GatewayConfig,
    client: reqwest::Client,
}

impl HttpPaymentGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GatewayError::Network(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    pub fn from_env() -> Result<Self, GatewayError> {
        Self::new(GatewayConfig::from_env()?)
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn process_refund(
        &self,
        request: &GatewayRefundRequest,
    ) -> Result<GatewayRefundResponse, GatewayError> {
        let payload = serde_json::json!({
            "payment_intent": request.payment_reference,
            "reason": request.reason,
            "metadata": request.metadata,
        });

        let response = self
            .client
            .post(format!("{}/v1/refunds", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| GatewayError::Network(format!("refund request failed: {}", e)))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(GatewayError::Rejected(format!("HTTP {}: {}", status, body)));
        }

        let parsed: GatewayRefundBody = serde_json::from_str(&body)
            .map_err(|e| GatewayError::Rejected(format!("invalid gateway response: {}", e)))?;

        info!(
            payment_reference = %request.payment_reference,
            refund_id = ?parsed.id,
            status = %parsed.status,
            "payment gateway refund processed"
        );

        let succeeded = parsed.status == "succeeded" || parsed.status == "pending";
        Ok(GatewayRefundResponse {
            success: succeeded,
            refund_id: parsed.id,
            amount: parsed.amount,
            status: parsed.status,
            error_message: parsed.failure_reason,
        })
    }
}

#[derive(Debug, Deserialize)]
struct GatewayRefundBody {
    #[serde(default)]
    id: Option<String>,
    status: String,
    #[serde(default)]
    amount: Option<BigDecimal>,
    #[serde(default)]
    failure_reason: Option<String>,
}
