use async_trait::async_trait;

use crate::providers::error::ProviderResult;
use crate::providers::types::{
    CancelRequest, CancelResponse, OrderRequest, OrderResponse, RateLimit, RefundRequest,
    RefundResponse, StatusQuery, StatusResponse, UsageSnapshot, VendorWebhookEvent,
    WebhookVerification,
};

/// Uniform contract over one eSIM vendor's API.
///
/// Implementations own their HTTP client, rate gate and credentials; the
/// rest of the system only sees the normalized shapes in
/// `providers::types`. All implementations must be thread-safe since
/// adapter instances are shared across sweeps and request handlers.
#[async_trait]
pub trait EsimProvider: Send + Sync {
    /// Stable vendor identifier, matching the configuration row slug.
    fn slug(&self) -> &str;

    /// Submit an order on the vendor's synchronous path. Vendors with an
    /// asynchronous completion model may still answer with only a
    /// `request_id` and an in-flight status.
    async fn create_order(&self, request: &OrderRequest) -> ProviderResult<OrderResponse>;

    /// Submit an order on the vendor's asynchronous (bulk) path, returning
    /// a `request_id` to poll. Vendors without a dedicated bulk endpoint
    /// process the order synchronously regardless of quantity.
    async fn create_order_async(&self, request: &OrderRequest) -> ProviderResult<OrderResponse> {
        self.create_order(request).await
    }

    /// Query order progress by vendor order id or request reference.
    async fn get_order_status(&self, query: &StatusQuery) -> ProviderResult<StatusResponse>;

    /// Request a refund for a provisioned profile. Only meaningful when
    /// `supports_refunds()` is true.
    async fn request_refund(&self, request: &RefundRequest) -> ProviderResult<RefundResponse>;

    /// Cancel an order before or after submission. Only meaningful when
    /// `supports_cancellation()` is true.
    async fn cancel_order(&self, request: &CancelRequest) -> ProviderResult<CancelResponse>;

    /// Verify the vendor's webhook signature over the raw body.
    fn validate_webhook(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> ProviderResult<WebhookVerification>;

    /// Normalize a verified webhook body into a `VendorWebhookEvent`.
    fn parse_webhook(&self, payload: &[u8]) -> ProviderResult<VendorWebhookEvent>;

    /// Fetch the remaining-data snapshot for a provisioned profile.
    async fn get_usage(&self, iccid: &str) -> ProviderResult<UsageSnapshot>;

    fn supports_refunds(&self) -> bool;

    fn supports_cancellation(&self) -> bool;

    /// The vendor's declared API rate limit, used for documentation and
    /// sweep sizing; enforcement happens through the adapter's rate gate.
    fn sync_rate_limit(&self) -> RateLimit;

    /// Largest quantity the submission flow sends down the synchronous
    /// path; larger orders go through `create_order_async`.
    fn sync_threshold(&self) -> u32 {
        5
    }
}

impl std::fmt::Debug for dyn EsimProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EsimProvider")
            .field("slug", &self.slug())
            .finish_non_exhaustive()
    }
}
