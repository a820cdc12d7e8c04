use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::orders::model::{Order, OrderStatus};
use crate::orders::store::{OrderStore, StoreError};
use crate::providers::error::ProviderError;
use crate::providers::registry::{ProviderResolver, RegistryError};
use crate::providers::types::{
    CancelRequest, CancelStatus, RefundReason, RefundRequest, RefundStatus,
};
use crate::services::notification::NotificationService;
use crate::services::payment_gateway::{GatewayRefundRequest, PaymentGateway};

#[derive(Debug, Error)]
pub enum RefundError {
    #[error("Order not found: {0}")]
    OrderNotFound(Uuid),
    #[error("Order {0} is already finalized as {1}")]
    AlreadyFinalized(Uuid, OrderStatus),
    #[error("Order {0} has no provider attached")]
    NoProvider(Uuid),
    #[error("Order {0} has no vendor reference to refund against")]
    NoVendorReference(Uuid),
    #[error("Order {order_id} is not eligible: {reason}")]
    NotEligible { order_id: Uuid, reason: String },
    #[error("Vendor rejected the refund: {0}")]
    VendorRejected(String),
    #[error("Vendor rejected the cancellation: {0}")]
    CancellationRejected(String),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What a given order qualifies for, before any vendor call is made.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Eligibility {
    pub can_refund: bool,
    pub can_cancel: bool,
    pub reason: Option<String>,
}

impl Eligibility {
    fn none(reason: impl Into<String>) -> Self {
        Self {
            can_refund: false,
            can_cancel: false,
            reason: Some(reason.into()),
        }
    }
}

/// Refund/cancellation qualification matrix. Cancellation only applies to
/// a profile that was never activated; while cancellation is available a
/// refund request is serviceable through it even on a vendor that takes no
/// refund requests of its own. Outside that window a refund needs a
/// provisioned ICCID and a refund-capable vendor.
pub fn check_eligibility(
    order: &Order,
    supports_refunds: bool,
    supports_cancellation: bool,
) -> Eligibility {
    if order.status.is_terminal() || order.status == OrderStatus::PendingRefund {
        return Eligibility::none(format!("order is already {}", order.status));
    }
    if !order.has_vendor_reference() {
        return Eligibility::none("order was never submitted to a vendor");
    }

    let can_cancel = supports_cancellation && !order.is_activated();
    let can_refund = can_cancel || (supports_refunds && order.iccid.is_some());

    let reason = if !can_refund && !can_cancel {
        Some(if order.is_activated() {
            "provider does not accept refunds for activated profiles".to_string()
        } else {
            "provider supports neither refunds nor cancellation".to_string()
        })
    } else {
        None
    };

    Eligibility {
        can_refund,
        can_cancel,
        reason,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundAction {
    Cancelled,
    Refunded,
    RefundPending,
}

#[derive(Debug)]
pub struct RefundOutcome {
    pub order: Order,
    pub action: RefundAction,
    /// Whether the original charge was reversed at the payment gateway.
    /// `false` with `payment_error` set means the vendor side succeeded
    /// but the reversal did not; that case is flagged for manual review,
    /// never compensated automatically.
    pub payment_refunded: bool,
    pub payment_error: Option<String>,
}

/// Drives vendor-side refunds and cancellations, then the payment-side
/// reversal. Vendor rejection leaves the order untouched; a reversal
/// failure after vendor success is recorded and alerted, not rolled back.
pub struct RefundOrchestrator {
    resolver: Arc<dyn ProviderResolver>,
    store: Arc<dyn OrderStore>,
    gateway: Option<Arc<dyn PaymentGateway>>,
    notifier: Arc<NotificationService>,
}

impl RefundOrchestrator {
    pub fn new(
        resolver: Arc<dyn ProviderResolver>,
        store: Arc<dyn OrderStore>,
        gateway: Option<Arc<dyn PaymentGateway>>,
        notifier: Arc<NotificationService>,
    ) -> Self {
        Self {
            resolver,
            store,
            gateway,
            notifier,
        }
    }

    pub async fn eligibility(&self, order_id: Uuid) -> Result<Eligibility, RefundError> {
        let order = self.load(order_id).await?;
        let provider_id = order.provider_id.ok_or(RefundError::NoProvider(order_id))?;
        let (_record, adapter) = self.resolver.resolve_by_id(provider_id).await?;
        Ok(check_eligibility(
            &order,
            adapter.supports_refunds(),
            adapter.supports_cancellation(),
        ))
    }

    /// Refund an order, preferring cancellation when the profile was never
    /// activated and the vendor supports it (cancellation usually settles
    /// immediately where a refund goes through review).
    pub async fn process_refund(
        &self,
        order_id: Uuid,
        reason: RefundReason,
        notes: Option<String>,
    ) -> Result<RefundOutcome, RefundError> {
        let order = self.load(order_id).await?;
        let provider_id = order.provider_id.ok_or(RefundError::NoProvider(order_id))?;
        let (record, adapter) = self.resolver.resolve_by_id(provider_id).await?;

        let eligibility = check_eligibility(
            &order,
            adapter.supports_refunds(),
            adapter.supports_cancellation(),
        );

        if eligibility.can_cancel {
            return self.cancel_with_vendor(&order, adapter.as_ref(), &record.slug).await;
        }
        if !eligibility.can_refund {
            return Err(RefundError::NotEligible {
                order_id,
                reason: eligibility
                    .reason
                    .unwrap_or_else(|| "refund not available".to_string()),
            });
        }

        let iccid = order
            .iccid
            .clone()
            .ok_or(RefundError::NoVendorReference(order_id))?;
        let response = adapter
            .request_refund(&RefundRequest {
                iccid,
                reason,
                notes,
                email: None,
                order_created_at: Some(order.created_at),
            })
            .await?;

        match response.status {
            RefundStatus::Approved => {
                let updated = self
                    .store
                    .update_status(order.id, OrderStatus::Refunded, None)
                    .await?;
                info!(
                    order_id = %order.id,
                    provider = %record.slug,
                    refund_id = ?response.refund_id,
                    "vendor approved refund"
                );
                let (payment_refunded, payment_error) =
                    self.reverse_payment(&updated, reason).await;
                self.notifier.order_refunded(&updated).await;
                Ok(RefundOutcome {
                    order: updated,
                    action: RefundAction::Refunded,
                    payment_refunded,
                    payment_error,
                })
            }
            RefundStatus::Pending => {
                // Vendor review pending: no payment reversal until the
                // refund is confirmed.
                let updated = self
                    .store
                    .update_status(order.id, OrderStatus::PendingRefund, None)
                    .await?;
                info!(order_id = %order.id, provider = %record.slug, "vendor refund under review");
                Ok(RefundOutcome {
                    order: updated,
                    action: RefundAction::RefundPending,
                    payment_refunded: false,
                    payment_error: None,
                })
            }
            RefundStatus::Rejected | RefundStatus::NotSupported => Err(
                RefundError::VendorRejected(
                    response
                        .message
                        .unwrap_or_else(|| "no reason given".to_string()),
                ),
            ),
        }
    }

    /// Cancel an order outright. Unlike `process_refund` this never falls
    /// back to the refund path.
    pub async fn process_cancellation(&self, order_id: Uuid) -> Result<RefundOutcome, RefundError> {
        let order = self.load(order_id).await?;
        let provider_id = order.provider_id.ok_or(RefundError::NoProvider(order_id))?;
        let (record, adapter) = self.resolver.resolve_by_id(provider_id).await?;

        let eligibility = check_eligibility(
            &order,
            adapter.supports_refunds(),
            adapter.supports_cancellation(),
        );
        if !eligibility.can_cancel {
            return Err(RefundError::NotEligible {
                order_id,
                reason: eligibility
                    .reason
                    .unwrap_or_else(|| "cancellation not available".to_string()),
            });
        }

        self.cancel_with_vendor(&order, adapter.as_ref(), &record.slug)
            .await
    }

    async fn cancel_with_vendor(
        &self,
        order: &Order,
        adapter: &dyn crate::providers::adapter::EsimProvider,
        provider_slug: &str,
    ) -> Result<RefundOutcome, RefundError> {
        let response = adapter
            .cancel_order(&CancelRequest {
                iccid: order.iccid.clone(),
                vendor_order_id: order.vendor_order_id.clone(),
                request_id: order.request_id.clone(),
            })
            .await?;

        match response.status {
            CancelStatus::Cancelled | CancelStatus::Pending => {
                let updated = self
                    .store
                    .update_status(order.id, OrderStatus::Cancelled, None)
                    .await?;
                info!(order_id = %order.id, provider = %provider_slug, "order cancelled with vendor");
                let (payment_refunded, payment_error) = self
                    .reverse_payment(&updated, RefundReason::CustomerRequest)
                    .await;
                self.notifier.order_cancelled(&updated).await;
                Ok(RefundOutcome {
                    order: updated,
                    action: RefundAction::Cancelled,
                    payment_refunded,
                    payment_error,
                })
            }
            CancelStatus::Failed | CancelStatus::NotSupported => Err(
                RefundError::CancellationRejected(
                    response
                        .message
                        .unwrap_or_else(|| "no reason given".to_string()),
                ),
            ),
        }
    }

    /// Reverse the original charge. Returns `(refunded, error)`; a failure
    /// here raises an ops alert and is left for manual settlement.
    async fn reverse_payment(&self, order: &Order, reason: RefundReason) -> (bool, Option<String>) {
        let Some(gateway) = &self.gateway else {
            return (false, None);
        };
        let Some(payment_intent) = &order.payment_intent_id else {
            return (false, None);
        };

        let request = GatewayRefundRequest {
            payment_reference: payment_intent.clone(),
            reason: reason.to_string(),
            metadata: serde_json::json!({
                "order_id": order.id,
                "display_id": order.display_id,
            }),
        };

        match gateway.process_refund(&request).await {
            Ok(response) if response.success => (true, None),
            Ok(response) => {
                let message = response
                    .error_message
                    .unwrap_or_else(|| format!("gateway returned status {}", response.status));
                self.alert_reversal_failure(order, &message).await;
                (false, Some(message))
            }
            Err(e) => {
                let message = e.to_string();
                self.alert_reversal_failure(order, &message).await;
                (false, Some(message))
            }
        }
    }

    async fn alert_reversal_failure(&self, order: &Order, message: &str) {
        warn!(
            order_id = %order.id,
            payment_intent = ?order.payment_intent_id,
            error = %message,
            "payment reversal failed after vendor-side refund"
        );
        self.notifier
            .ops_alert(
                order,
                &format!(
                    "Payment reversal for order {} failed and needs manual settlement: {}",
                    order.display_id, message
                ),
            )
            .await;
    }

    async fn load(&self, order_id: Uuid) -> Result<Order, RefundError> {
        let order = self
            .store
            .find_by_id(order_id)
            .await?
            .ok_or(RefundError::OrderNotFound(order_id))?;
        if order.status.is_terminal() {
            return Err(RefundError::AlreadyFinalized(order_id, order.status));
        }
        Ok(order)
    }
}
