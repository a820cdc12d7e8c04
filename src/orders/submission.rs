use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::orders::model::{
    apple_install_url, generate_display_id, Order, OrderStatus, ProvisioningUpdate,
};
use crate::orders::store::{OrderStore, StoreError};
use crate::providers::adapter::EsimProvider;
use crate::providers::error::ProviderError;
use crate::providers::registry::{ProviderResolver, RegistryError};
use crate::providers::types::{OrderRequest, OrderResponse, VendorOrderStatus};
use crate::services::notification::NotificationService;
use crate::services::pricing::{PricingError, PricingSource};

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error(transparent)]
    Pricing(#[from] PricingError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct SubmitOrderRequest {
    pub user_id: Uuid,
    pub package_id: Uuid,
    pub quantity: u32,
    pub payment_intent_id: Option<String>,
    pub customer_ref: Option<String>,
}

/// Submits purchase orders to vendors and persists the initial record.
///
/// The sync/async path decision lives here: quantities at or below the
/// vendor's synchronous threshold go through `create_order`, larger ones
/// through the asynchronous path that answers with a request reference.
pub struct OrderSubmissionService {
    resolver: Arc<dyn ProviderResolver>,
    store: Arc<dyn OrderStore>,
    pricing: Arc<dyn PricingSource>,
    notifier: Arc<NotificationService>,
}

impl OrderSubmissionService {
    pub fn new(
        resolver: Arc<dyn ProviderResolver>,
        store: Arc<dyn OrderStore>,
        pricing: Arc<dyn PricingSource>,
        notifier: Arc<NotificationService>,
    ) -> Self {
        Self {
            resolver,
            store,
            pricing,
            notifier,
        }
    }

    /// Submit a purchase. Vendor-side failure does not surface as an error:
    /// the order is persisted as `failed` with its reason and handed to the
    /// retry coordinator.
    pub async fn submit(&self, request: SubmitOrderRequest) -> Result<Order, SubmissionError> {
        let quote = self
            .pricing
            .quote(request.package_id, request.quantity)
            .await?;
        let (record, adapter) = self.resolver.resolve_by_id(quote.provider_id).await?;

        let id = Uuid::new_v4();
        let now = Utc::now();
        let order = Order {
            id,
            display_id: generate_display_id(&id),
            user_id: request.user_id,
            package_id: request.package_id,
            provider_id: Some(record.id),
            vendor_order_id: None,
            request_id: None,
            iccid: None,
            quantity: request.quantity as i32,
            retail_price: quote.retail_price.clone(),
            wholesale_price: quote.wholesale_price.clone(),
            currency: quote.currency.clone(),
            qr_code: None,
            qr_code_url: None,
            smdp_address: None,
            activation_code: None,
            roaming_enabled: quote.roaming_enabled,
            apple_install_url: None,
            status: OrderStatus::Created,
            retry_count: 0,
            last_retry_at: None,
            last_status_check: None,
            failure_reason: None,
            payment_intent_id: request.payment_intent_id.clone(),
            created_at: now,
            updated_at: now,
            activated_at: None,
        };
        let order = self.store.insert(&order).await?;

        let vendor_request = OrderRequest {
            package_code: quote.package_code.clone(),
            quantity: request.quantity,
            idempotency_ref: order.display_id.clone(),
            customer_ref: request.customer_ref.clone(),
        };

        let response = self.dispatch(adapter.as_ref(), &vendor_request).await;
        let (status, update) = match &response {
            Ok(resp) => outcome_from_response(resp),
            Err(e) => failed_outcome(e.to_string()),
        };

        if !order.status.can_transition_to(status) {
            warn!(
                order_id = %order.id,
                from = %order.status,
                to = %status,
                "submission outcome rejected by transition rules"
            );
            return Ok(order);
        }

        let order = self.store.apply_provisioning(order.id, &update).await?;
        info!(
            order_id = %order.id,
            display_id = %order.display_id,
            provider = %record.slug,
            status = %order.status,
            "order submitted"
        );

        if order.status == OrderStatus::Completed {
            self.notifier.order_completed(&order).await;
        }
        Ok(order)
    }

    /// Resubmission path used by the retry coordinator: same pricing and
    /// sync/async decision as a fresh submission. Vendor errors come back
    /// as an unsuccessful response rather than an `Err`, since a retry
    /// attempt treats both identically.
    pub async fn dispatch_for(&self, order: &Order) -> Result<OrderResponse, SubmissionError> {
        let quote = self
            .pricing
            .quote(order.package_id, order.quantity as u32)
            .await?;
        let (_record, adapter) = self.resolver.resolve_by_id(quote.provider_id).await?;

        let vendor_request = OrderRequest {
            package_code: quote.package_code.clone(),
            quantity: order.quantity as u32,
            idempotency_ref: format!("{}-r{}", order.display_id, order.retry_count + 1),
            customer_ref: None,
        };

        match self.dispatch(adapter.as_ref(), &vendor_request).await {
            Ok(response) => Ok(response),
            Err(e) => Ok(OrderResponse {
                success: false,
                error_message: Some(e.to_string()),
                ..OrderResponse::default()
            }),
        }
    }

    async fn dispatch(
        &self,
        adapter: &dyn EsimProvider,
        request: &OrderRequest,
    ) -> Result<OrderResponse, ProviderError> {
        if request.quantity <= adapter.sync_threshold() {
            adapter.create_order(request).await
        } else {
            adapter.create_order_async(request).await
        }
    }
}

/// Maps a vendor submission response onto the order's initial state.
pub(crate) fn outcome_from_response(resp: &OrderResponse) -> (OrderStatus, ProvisioningUpdate) {
    if !resp.success {
        return failed_outcome(
            resp.error_message
                .clone()
                .unwrap_or_else(|| "vendor rejected the order".to_string()),
        );
    }

    match resp.status {
        Some(VendorOrderStatus::Completed) if resp.iccid.is_some() => {
            let apple = match (&resp.smdp_address, &resp.activation_code) {
                (Some(smdp), Some(code)) => Some(apple_install_url(smdp, code)),
                _ => None,
            };
            (
                OrderStatus::Completed,
                ProvisioningUpdate {
                    status: Some(OrderStatus::Completed),
                    iccid: resp.iccid.clone(),
                    qr_code: resp.qr_code.clone(),
                    qr_code_url: resp.qr_code_url.clone(),
                    smdp_address: resp.smdp_address.clone(),
                    activation_code: resp.activation_code.clone(),
                    apple_install_url: apple,
                    vendor_order_id: resp.vendor_order_id.clone(),
                    request_id: None,
                    failure_reason: None,
                },
            )
        }
        Some(VendorOrderStatus::Failed) | Some(VendorOrderStatus::Cancelled) => {
            let (status, mut update) = failed_outcome(
                resp.error_message
                    .clone()
                    .unwrap_or_else(|| "vendor reported failure".to_string()),
            );
            update.vendor_order_id = resp.vendor_order_id.clone();
            (status, update)
        }
        Some(VendorOrderStatus::Pending) if resp.request_id.is_none() => (
            OrderStatus::Pending,
            ProvisioningUpdate {
                status: Some(OrderStatus::Pending),
                vendor_order_id: resp.vendor_order_id.clone(),
                ..ProvisioningUpdate::default()
            },
        ),
        // Asynchronous dispatch or a sync order still provisioning.
        _ => (
            OrderStatus::Processing,
            ProvisioningUpdate {
                status: Some(OrderStatus::Processing),
                vendor_order_id: resp.vendor_order_id.clone(),
                request_id: resp.request_id.clone(),
                ..ProvisioningUpdate::default()
            },
        ),
    }
}

fn failed_outcome(reason: String) -> (OrderStatus, ProvisioningUpdate) {
    (
        OrderStatus::Failed,
        ProvisioningUpdate {
            status: Some(OrderStatus::Failed),
            failure_reason: Some(reason),
            ..ProvisioningUpdate::default()
        },
    )
}
