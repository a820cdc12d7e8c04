use chrono::{Duration, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::orders::model::{apple_install_url, Order, OrderStatus, ProvisioningUpdate};
use crate::orders::store::{OrderStore, StoreError};
use crate::providers::registry::{ProviderResolver, RegistryError};
use crate::providers::types::{StatusResponse, VendorOrderStatus};
use crate::services::notification::NotificationService;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Provider(#[from] crate::providers::error::ProviderError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Orders whose `last_status_check` is older than this are due again.
    pub recheck_after: Duration,
    pub batch_size: i64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            recheck_after: Duration::minutes(5),
            batch_size: 50,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SweepStats {
    pub examined: usize,
    pub advanced: usize,
    pub errors: usize,
}

/// Re-queries vendors for orders still in flight and advances them.
///
/// `last_status_check` is stamped before the vendor call so an order whose
/// processing throws is not reselected until its next window. The stamp is
/// a soft lease, not a lock: overlapping scheduler instances can still
/// double-process an order within one window.
pub struct StatusReconciler {
    resolver: Arc<dyn ProviderResolver>,
    store: Arc<dyn OrderStore>,
    notifier: Arc<NotificationService>,
    config: ReconcilerConfig,
}

impl StatusReconciler {
    pub fn new(
        resolver: Arc<dyn ProviderResolver>,
        store: Arc<dyn OrderStore>,
        notifier: Arc<NotificationService>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            resolver,
            store,
            notifier,
            config,
        }
    }

    pub async fn run_sweep(&self) -> Result<SweepStats, StoreError> {
        let cutoff = Utc::now() - self.config.recheck_after;
        let due = self
            .store
            .find_due_for_status_check(cutoff, self.config.batch_size)
            .await?;

        let mut stats = SweepStats {
            examined: due.len(),
            ..SweepStats::default()
        };

        for order in due {
            if let Err(e) = self.store.touch_status_check(order.id, Utc::now()).await {
                warn!(order_id = %order.id, error = %e, "failed to stamp status check");
                stats.errors += 1;
                continue;
            }

            match self.reconcile_order(&order).await {
                Ok(true) => stats.advanced += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(order_id = %order.id, error = %e, "reconciliation failed for order");
                    stats.errors += 1;
                }
            }
        }

        if stats.examined > 0 {
            info!(
                examined = stats.examined,
                advanced = stats.advanced,
                errors = stats.errors,
                "status reconciliation sweep finished"
            );
        }
        Ok(stats)
    }

    async fn reconcile_order(&self, order: &Order) -> Result<bool, ReconcileError> {
        let Some(query) = order.status_query() else {
            warn!(order_id = %order.id, "in-flight order has no vendor reference");
            return Ok(false);
        };
        let Some(provider_id) = order.provider_id else {
            warn!(order_id = %order.id, "in-flight order has no provider");
            return Ok(false);
        };

        let (_record, adapter) = self.resolver.resolve_by_id(provider_id).await?;
        match adapter.get_order_status(&query).await {
            Ok(response) => Ok(self.apply_vendor_status(order, &response).await?.is_some()),
            Err(e) if e.is_reconciliation_gap() => {
                // Vendor-side propagation delay: leave the order for the
                // next sweep instead of forcing a failure.
                warn!(
                    order_id = %order.id,
                    reference = query.reference(),
                    "vendor has no record for order yet"
                );
                Ok(false)
            }
            // Any other vendor failure counts against the sweep's error
            // tally; the caller logs it and moves on to the next order.
            Err(e) => Err(e.into()),
        }
    }

    /// Applies a vendor-reported status to an order. Shared by the polling
    /// sweep and the webhook path; duplicate deliveries are absorbed here
    /// because an unchanged vendor state produces no write.
    pub async fn apply_vendor_status(
        &self,
        order: &Order,
        response: &StatusResponse,
    ) -> Result<Option<Order>, StoreError> {
        if order.status.is_terminal() {
            debug!(order_id = %order.id, status = %order.status, "ignoring update for terminal order");
            return Ok(None);
        }

        if order.request_id.is_some() {
            self.apply_async_tracked(order, response).await
        } else {
            self.apply_sync_tracked(order, response).await
        }
    }

    async fn apply_async_tracked(
        &self,
        order: &Order,
        response: &StatusResponse,
    ) -> Result<Option<Order>, StoreError> {
        match response.status {
            Some(VendorOrderStatus::Completed) if response.iccid.is_some() => {
                if order.status == OrderStatus::Completed {
                    // Duplicate completion: refresh artifacts if anything
                    // differs, without re-notifying.
                    let update = diff_artifacts(order, response);
                    if update.is_empty() {
                        return Ok(None);
                    }
                    return Ok(Some(self.store.apply_provisioning(order.id, &update).await?));
                }
                if !order.status.can_transition_to(OrderStatus::Completed) {
                    warn!(order_id = %order.id, from = %order.status, "completion rejected by transition rules");
                    return Ok(None);
                }

                let mut update = diff_artifacts(order, response);
                update.status = Some(OrderStatus::Completed);
                let updated = self.store.apply_provisioning(order.id, &update).await?;
                self.notifier.order_completed(&updated).await;
                Ok(Some(updated))
            }
            Some(VendorOrderStatus::Failed) => {
                if order.status == OrderStatus::Failed
                    || !order.status.can_transition_to(OrderStatus::Failed)
                {
                    return Ok(None);
                }
                let reason = response
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "vendor reported failure".to_string());
                let updated = self
                    .store
                    .update_status(order.id, OrderStatus::Failed, Some(reason.clone()))
                    .await?;
                self.notifier.order_failed(&updated, &reason).await;
                Ok(Some(updated))
            }
            // Still provisioning, or the vendor reported completion without
            // profile data: wait for the next sweep.
            _ => Ok(None),
        }
    }

    async fn apply_sync_tracked(
        &self,
        order: &Order,
        response: &StatusResponse,
    ) -> Result<Option<Order>, StoreError> {
        let mut update = diff_artifacts(order, response);

        match response.status {
            Some(VendorOrderStatus::Completed) if response.iccid.is_some() => {
                if order.status != OrderStatus::Completed
                    && order.status.can_transition_to(OrderStatus::Completed)
                {
                    update.status = Some(OrderStatus::Completed);
                }
            }
            Some(status) if !status.is_in_flight() => {
                let new_status = match status {
                    VendorOrderStatus::Cancelled => OrderStatus::Cancelled,
                    _ => OrderStatus::Failed,
                };
                if order.status != new_status && order.status.can_transition_to(new_status) {
                    update.status = Some(new_status);
                    update.failure_reason = Some(
                        response
                            .error_message
                            .clone()
                            .unwrap_or_else(|| format!("vendor reported {}", status)),
                    );
                }
            }
            _ => {}
        }

        if update.is_empty() {
            return Ok(None);
        }

        let updated = self.store.apply_provisioning(order.id, &update).await?;
        match update.status {
            Some(OrderStatus::Completed) => self.notifier.order_completed(&updated).await,
            Some(OrderStatus::Cancelled) => self.notifier.order_cancelled(&updated).await,
            Some(OrderStatus::Failed) => {
                let reason = updated.failure_reason.clone().unwrap_or_default();
                self.notifier.order_failed(&updated, &reason).await;
            }
            _ => {}
        }
        Ok(Some(updated))
    }
}

/// Artifact fields from the vendor response that differ from what is
/// already stored. Idempotent by construction: an unchanged vendor state
/// yields an empty update.
fn diff_artifacts(order: &Order, response: &StatusResponse) -> ProvisioningUpdate {
    let mut update = ProvisioningUpdate::default();

    let changed = |new: &Option<String>, current: &Option<String>| -> Option<String> {
        match new {
            Some(v) if current.as_deref() != Some(v.as_str()) => Some(v.clone()),
            _ => None,
        }
    };

    update.iccid = changed(&response.iccid, &order.iccid);
    update.qr_code = changed(&response.qr_code, &order.qr_code);
    update.qr_code_url = changed(&response.qr_code_url, &order.qr_code_url);
    update.smdp_address = changed(&response.smdp_address, &order.smdp_address);
    update.activation_code = changed(&response.activation_code, &order.activation_code);

    if let (Some(smdp), Some(code)) = (
        response.smdp_address.as_ref().or(order.smdp_address.as_ref()),
        response
            .activation_code
            .as_ref()
            .or(order.activation_code.as_ref()),
    ) {
        let url = apple_install_url(smdp, code);
        if order.apple_install_url.as_deref() != Some(url.as_str()) {
            update.apple_install_url = Some(url);
        }
    }

    update
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::error::ProviderError;
    use crate::services::notification::NotificationKind;
    use crate::testutil::{
        order_fixture, provider_record_fixture, MemoryOrderStore, RecordingNotifications,
        StubProvider, StubResolver,
    };
    use uuid::Uuid;

    struct Harness {
        reconciler: StatusReconciler,
        store: Arc<MemoryOrderStore>,
        provider: Arc<StubProvider>,
        notifications: Arc<RecordingNotifications>,
    }

    fn harness(build: impl FnOnce(Uuid) -> Vec<Order>) -> Harness {
        let record = provider_record_fixture("voyatel");
        let provider_id = record.id;
        let provider = Arc::new(StubProvider::new("voyatel"));
        let resolver = Arc::new(StubResolver::new().register(record, provider.clone()));
        let store = Arc::new(MemoryOrderStore::with_orders(build(provider_id)));
        let notifications = Arc::new(RecordingNotifications::new());
        let reconciler = StatusReconciler::new(
            resolver,
            store.clone(),
            Arc::new(NotificationService::new(notifications.clone())),
            ReconcilerConfig::default(),
        );
        Harness {
            reconciler,
            store,
            provider,
            notifications,
        }
    }

    fn async_order(provider_id: Uuid) -> Order {
        let mut order = order_fixture(OrderStatus::Processing);
        order.provider_id = Some(provider_id);
        order.request_id = Some("req_1".to_string());
        order
    }

    fn sync_order(provider_id: Uuid) -> Order {
        let mut order = order_fixture(OrderStatus::Pending);
        order.provider_id = Some(provider_id);
        order.vendor_order_id = Some("VO-1".to_string());
        order
    }

    fn completed_response() -> StatusResponse {
        StatusResponse {
            status: Some(VendorOrderStatus::Completed),
            iccid: Some("894400000000000001".to_string()),
            qr_code: Some("LPA:1$rsp.example.net$ABC-123".to_string()),
            smdp_address: Some("rsp.example.net".to_string()),
            activation_code: Some("ABC-123".to_string()),
            ..StatusResponse::default()
        }
    }

    #[tokio::test]
    async fn async_order_completes_when_vendor_reports_sim_data() {
        let order_id = Uuid::new_v4();
        let h = harness(|provider_id| {
            let mut order = async_order(provider_id);
            order.id = order_id;
            vec![order]
        });
        h.provider.push_status(Ok(completed_response()));

        let stats = h.reconciler.run_sweep().await.unwrap();
        assert_eq!(stats.examined, 1);
        assert_eq!(stats.advanced, 1);

        let stored = h.store.get(order_id).unwrap();
        assert_eq!(stored.status, OrderStatus::Completed);
        assert_eq!(stored.iccid.as_deref(), Some("894400000000000001"));
        assert!(stored.qr_code.is_some());
        assert!(stored.apple_install_url.is_some());
        assert!(stored.last_status_check.is_some());
        assert_eq!(
            h.notifications.kinds(),
            vec![NotificationKind::OrderCompleted]
        );
    }

    #[tokio::test]
    async fn async_order_fails_when_vendor_reports_failure() {
        let record = provider_record_fixture("voyatel");
        let order = {
            let mut o = order_fixture(OrderStatus::Processing);
            o.provider_id = Some(record.id);
            o.request_id = Some("req_2".to_string());
            o
        };
        let order_id = order.id;
        let provider = Arc::new(StubProvider::new("voyatel"));
        provider.push_status(Ok(StatusResponse {
            status: Some(VendorOrderStatus::Failed),
            error_message: Some("out of stock".to_string()),
            ..StatusResponse::default()
        }));
        let store = Arc::new(MemoryOrderStore::with_orders(vec![order]));
        let notifications = Arc::new(RecordingNotifications::new());
        let reconciler = StatusReconciler::new(
            Arc::new(StubResolver::new().register(record, provider)),
            store.clone(),
            Arc::new(NotificationService::new(notifications.clone())),
            ReconcilerConfig::default(),
        );

        reconciler.run_sweep().await.unwrap();

        let stored = store.get(order_id).unwrap();
        assert_eq!(stored.status, OrderStatus::Failed);
        assert_eq!(stored.failure_reason.as_deref(), Some("out of stock"));
        assert_eq!(notifications.kinds(), vec![NotificationKind::OrderFailed]);
    }

    #[tokio::test]
    async fn unchanged_vendor_state_writes_nothing_but_the_stamp() {
        let order_id = Uuid::new_v4();
        let h = harness(|provider_id| {
            let mut order = async_order(provider_id);
            order.id = order_id;
            vec![order]
        });

        h.provider.push_status(Ok(StatusResponse {
            status: Some(VendorOrderStatus::Processing),
            ..StatusResponse::default()
        }));
        h.provider.push_status(Ok(StatusResponse {
            status: Some(VendorOrderStatus::Processing),
            ..StatusResponse::default()
        }));

        h.reconciler.run_sweep().await.unwrap();
        let first_check = h.store.get(order_id).unwrap().last_status_check;
        assert!(first_check.is_some());

        // Force re-eligibility and sweep again.
        h.store
            .touch_status_check(order_id, Utc::now() - Duration::minutes(10))
            .await
            .unwrap();
        h.reconciler.run_sweep().await.unwrap();

        let stored = h.store.get(order_id).unwrap();
        assert_eq!(stored.status, OrderStatus::Processing);
        assert_eq!(h.store.mutation_count(), 0);
        assert!(h.notifications.kinds().is_empty());
    }

    #[tokio::test]
    async fn sync_tracked_order_picks_up_completion() {
        let order_id = Uuid::new_v4();
        let h = harness(|provider_id| {
            let mut order = sync_order(provider_id);
            order.id = order_id;
            vec![order]
        });
        h.provider.push_status(Ok(completed_response()));

        h.reconciler.run_sweep().await.unwrap();

        let stored = h.store.get(order_id).unwrap();
        assert_eq!(stored.status, OrderStatus::Completed);
        assert_eq!(stored.iccid.as_deref(), Some("894400000000000001"));
    }

    #[tokio::test]
    async fn sync_tracked_order_records_vendor_side_cancellation() {
        let order_id = Uuid::new_v4();
        let h = harness(|provider_id| {
            let mut order = sync_order(provider_id);
            order.id = order_id;
            vec![order]
        });
        h.provider.push_status(Ok(StatusResponse {
            status: Some(VendorOrderStatus::Cancelled),
            error_message: Some("cancelled by vendor support".to_string()),
            ..StatusResponse::default()
        }));

        h.reconciler.run_sweep().await.unwrap();

        let stored = h.store.get(order_id).unwrap();
        assert_eq!(stored.status, OrderStatus::Cancelled);
        assert_eq!(
            h.notifications.kinds(),
            vec![NotificationKind::OrderCancelled]
        );
    }

    #[tokio::test]
    async fn reconciliation_gap_leaves_order_untouched() {
        let order_id = Uuid::new_v4();
        let h = harness(|provider_id| {
            let mut order = async_order(provider_id);
            order.id = order_id;
            vec![order]
        });
        h.provider.push_status(Err(ProviderError::OrderNotFound {
            provider: "voyatel".to_string(),
            reference: "req_1".to_string(),
        }));

        let stats = h.reconciler.run_sweep().await.unwrap();
        assert_eq!(stats.advanced, 0);
        assert_eq!(stats.errors, 0);

        let stored = h.store.get(order_id).unwrap();
        assert_eq!(stored.status, OrderStatus::Processing);
        assert_eq!(h.store.mutation_count(), 0);
        // The stamp still lands, preventing immediate reselection.
        assert!(stored.last_status_check.is_some());
    }

    #[tokio::test]
    async fn one_failing_order_does_not_abort_the_batch() {
        let record = provider_record_fixture("voyatel");
        let provider = Arc::new(StubProvider::new("voyatel"));
        let mut first = order_fixture(OrderStatus::Processing);
        first.provider_id = Some(record.id);
        first.request_id = Some("req_a".to_string());
        first.created_at = Utc::now() - Duration::minutes(2);
        let mut second = order_fixture(OrderStatus::Processing);
        second.provider_id = Some(record.id);
        second.request_id = Some("req_b".to_string());
        let second_id = second.id;

        provider.push_status(Err(ProviderError::Network {
            provider: "voyatel".to_string(),
            message: "connection reset".to_string(),
        }));
        provider.push_status(Ok(completed_response()));

        let store = Arc::new(MemoryOrderStore::with_orders(vec![first, second]));
        let notifications = Arc::new(RecordingNotifications::new());
        let reconciler = StatusReconciler::new(
            Arc::new(StubResolver::new().register(record, provider)),
            store.clone(),
            Arc::new(NotificationService::new(notifications)),
            ReconcilerConfig::default(),
        );

        let stats = reconciler.run_sweep().await.unwrap();
        assert_eq!(stats.examined, 2);
        assert_eq!(stats.advanced, 1);
        // The vendor failure shows up in the tally; the gap case above
        // does not.
        assert_eq!(stats.errors, 1);
        assert_eq!(store.get(second_id).unwrap().status, OrderStatus::Completed);
    }

    #[tokio::test]
    async fn recently_checked_orders_are_not_reselected() {
        let h = harness(|provider_id| {
            let mut order = async_order(provider_id);
            order.last_status_check = Some(Utc::now());
            vec![order]
        });

        let stats = h.reconciler.run_sweep().await.unwrap();
        assert_eq!(stats.examined, 0);
    }
}
