use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::orders::model::Order;
use crate::orders::reconciler::StatusReconciler;
use crate::orders::store::{OrderStore, StoreError};
use crate::providers::error::ProviderError;
use crate::providers::registry::{ProviderResolver, RegistryError};
use crate::providers::types::{StatusResponse, UsageSnapshot, VendorWebhookEvent, WebhookKind};
use crate::services::notification::NotificationService;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),
    #[error("Webhook signature rejected: {0}")]
    InvalidSignature(String),
    #[error("Malformed webhook payload: {0}")]
    Malformed(String),
    #[error("No order matches the webhook reference")]
    OrderNotFound,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, PartialEq, Eq)]
pub enum WebhookDisposition {
    /// An order was advanced or a user notification was emitted.
    Processed,
    /// Verified and parsed, but the event carried nothing new.
    NoChange,
    /// An event kind we accept but do not act on.
    Ignored,
}

/// Ingests vendor push notifications. Every payload is signature-verified
/// against the provider's webhook secret before it is parsed; status events
/// are funneled through the same reconciliation logic as the polling sweep
/// so duplicate deliveries are absorbed.
pub struct WebhookProcessor {
    resolver: Arc<dyn ProviderResolver>,
    store: Arc<dyn OrderStore>,
    reconciler: Arc<StatusReconciler>,
    notifier: Arc<NotificationService>,
}

impl WebhookProcessor {
    pub fn new(
        resolver: Arc<dyn ProviderResolver>,
        store: Arc<dyn OrderStore>,
        reconciler: Arc<StatusReconciler>,
        notifier: Arc<NotificationService>,
    ) -> Self {
        Self {
            resolver,
            store,
            reconciler,
            notifier,
        }
    }

    pub async fn process(
        &self,
        provider_slug: &str,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookDisposition, WebhookError> {
        let (_record, adapter) = self
            .resolver
            .resolve_by_slug(provider_slug)
            .await
            .map_err(|e| match e {
                RegistryError::UnknownSlug(slug) => WebhookError::UnknownProvider(slug),
                RegistryError::ProviderDisabled(slug) => WebhookError::UnknownProvider(slug),
                other => WebhookError::Store(StoreError(other.to_string())),
            })?;

        let verification = adapter
            .validate_webhook(payload, signature)
            .map_err(provider_to_webhook_error)?;
        if !verification.valid {
            warn!(
                provider = provider_slug,
                reason = ?verification.reason,
                "webhook signature rejected"
            );
            return Err(WebhookError::InvalidSignature(
                verification
                    .reason
                    .unwrap_or_else(|| "signature mismatch".to_string()),
            ));
        }

        let event = adapter
            .parse_webhook(payload)
            .map_err(provider_to_webhook_error)?;

        info!(
            provider = provider_slug,
            kind = ?event.kind,
            vendor_order_id = ?event.vendor_order_id,
            request_id = ?event.request_id,
            "webhook received"
        );

        match event.kind {
            WebhookKind::OrderStatus => self.handle_order_status(&event).await,
            WebhookKind::LowData => self.handle_low_data(&event).await,
            WebhookKind::Expiring => self.handle_expiring(&event).await,
            WebhookKind::Other => Ok(WebhookDisposition::Ignored),
        }
    }

    async fn handle_order_status(
        &self,
        event: &VendorWebhookEvent,
    ) -> Result<WebhookDisposition, WebhookError> {
        let order = self
            .find_order(event)
            .await?
            .ok_or(WebhookError::OrderNotFound)?;

        let response = StatusResponse {
            status: event.status,
            iccid: event.iccid.clone(),
            qr_code: event.data.get("qr_code").and_then(as_string),
            qr_code_url: event.data.get("qr_code_url").and_then(as_string),
            smdp_address: event.data.get("smdp_address").and_then(as_string),
            activation_code: event.data.get("activation_code").and_then(as_string),
            error_message: event.data.get("failure_reason").and_then(as_string),
        };

        match self.reconciler.apply_vendor_status(&order, &response).await? {
            Some(_) => Ok(WebhookDisposition::Processed),
            None => Ok(WebhookDisposition::NoChange),
        }
    }

    async fn handle_low_data(
        &self,
        event: &VendorWebhookEvent,
    ) -> Result<WebhookDisposition, WebhookError> {
        let Some(iccid) = &event.iccid else {
            return Err(WebhookError::Malformed(
                "low-data event without an ICCID".to_string(),
            ));
        };
        let Some(order) = self.store.find_by_iccid(iccid).await? else {
            return Err(WebhookError::OrderNotFound);
        };

        let usage = UsageSnapshot {
            iccid: iccid.clone(),
            active: true,
            data_total_mb: event.data.get("data_total_mb").and_then(|v| v.as_i64()),
            data_remaining_mb: event.data.get("data_remaining_mb").and_then(|v| v.as_i64()),
            expires_at: None,
        };
        self.notifier.low_data(&order, &usage).await;
        Ok(WebhookDisposition::Processed)
    }

    async fn handle_expiring(
        &self,
        event: &VendorWebhookEvent,
    ) -> Result<WebhookDisposition, WebhookError> {
        let Some(iccid) = &event.iccid else {
            return Err(WebhookError::Malformed(
                "expiry event without an ICCID".to_string(),
            ));
        };
        let Some(order) = self.store.find_by_iccid(iccid).await? else {
            return Err(WebhookError::OrderNotFound);
        };
        self.notifier.expiring_soon(&order).await;
        Ok(WebhookDisposition::Processed)
    }

    /// Async-tracked orders are matched by request reference first; webhook
    /// traffic for sync-tracked orders carries the vendor order id.
    async fn find_order(&self, event: &VendorWebhookEvent) -> Result<Option<Order>, StoreError> {
        if let Some(request_id) = &event.request_id {
            if let Some(order) = self.store.find_by_request_id(request_id).await? {
                return Ok(Some(order));
            }
        }
        if let Some(vendor_order_id) = &event.vendor_order_id {
            if let Some(order) = self.store.find_by_vendor_order_id(vendor_order_id).await? {
                return Ok(Some(order));
            }
        }
        Ok(None)
    }
}

fn provider_to_webhook_error(e: ProviderError) -> WebhookError {
    match e {
        ProviderError::WebhookVerification { reason } => WebhookError::InvalidSignature(reason),
        ProviderError::MalformedResponse { message } => WebhookError::Malformed(message),
        other => WebhookError::Malformed(other.to_string()),
    }
}

fn as_string(value: &serde_json::Value) -> Option<String> {
    value.as_str().map(|s| s.to_string())
}
