use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use crate::orders::model::{Order, OrderStatus, MAX_RETRY_ATTEMPTS};
use crate::orders::store::{OrderStore, StoreError};
use crate::orders::submission::{outcome_from_response, OrderSubmissionService};
use crate::services::notification::NotificationService;

/// Escalating wait before each retry attempt, indexed by the number of
/// attempts already made. The last entry repeats for any further attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub windows_minutes: Vec<i64>,
    pub max_attempts: i32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            windows_minutes: vec![5, 15, 60],
            max_attempts: MAX_RETRY_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    pub fn with_windows(windows_minutes: Vec<i64>) -> Self {
        Self {
            windows_minutes,
            ..Self::default()
        }
    }

    fn window_for(&self, retry_count: i32) -> Duration {
        let idx = (retry_count.max(0) as usize).min(self.windows_minutes.len().saturating_sub(1));
        Duration::minutes(*self.windows_minutes.get(idx).unwrap_or(&60))
    }

    /// Whether a failed order may be retried at `now`. An order that has
    /// never been retried is eligible immediately; otherwise the wait
    /// window for its current attempt count must have elapsed.
    pub fn is_eligible(&self, order: &Order, now: DateTime<Utc>) -> bool {
        if order.status != OrderStatus::Failed || order.retry_count >= self.max_attempts {
            return false;
        }
        match order.last_retry_at {
            None => true,
            Some(last) => now >= last + self.window_for(order.retry_count),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RetryStats {
    pub examined: usize,
    pub attempted: usize,
    pub recovered: usize,
    pub exhausted: usize,
}

/// Re-drives failed orders through the submission path with escalating
/// backoff, marking them permanently failed once the attempt budget is
/// spent.
pub struct RetryCoordinator {
    store: Arc<dyn OrderStore>,
    submission: Arc<OrderSubmissionService>,
    notifier: Arc<NotificationService>,
    policy: RetryPolicy,
    batch_size: i64,
}

impl RetryCoordinator {
    pub fn new(
        store: Arc<dyn OrderStore>,
        submission: Arc<OrderSubmissionService>,
        notifier: Arc<NotificationService>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            submission,
            notifier,
            policy,
            batch_size: 50,
        }
    }

    pub async fn run_sweep(&self) -> Result<RetryStats, StoreError> {
        let candidates = self
            .store
            .find_retry_candidates(self.policy.max_attempts, self.batch_size)
            .await?;

        let now = Utc::now();
        let mut stats = RetryStats {
            examined: candidates.len(),
            ..RetryStats::default()
        };

        for order in candidates {
            if !self.policy.is_eligible(&order, now) {
                continue;
            }
            stats.attempted += 1;
            match self.retry_order(&order).await {
                Ok(outcome) => match outcome {
                    RetryOutcome::Recovered => stats.recovered += 1,
                    RetryOutcome::Exhausted => stats.exhausted += 1,
                    RetryOutcome::FailedAgain => {}
                },
                Err(e) => {
                    warn!(order_id = %order.id, error = %e, "retry attempt errored");
                }
            }
        }

        if stats.attempted > 0 {
            info!(
                examined = stats.examined,
                attempted = stats.attempted,
                recovered = stats.recovered,
                exhausted = stats.exhausted,
                "retry sweep finished"
            );
        }
        Ok(stats)
    }

    async fn retry_order(&self, order: &Order) -> Result<RetryOutcome, StoreError> {
        let attempt = order.retry_count + 1;
        info!(
            order_id = %order.id,
            display_id = %order.display_id,
            attempt,
            "retrying failed order"
        );

        let response = match self.submission.dispatch_for(order).await {
            Ok(response) => response,
            Err(e) => {
                // Resolution/pricing failure counts as a spent attempt like
                // any vendor rejection.
                warn!(order_id = %order.id, error = %e, "retry dispatch failed");
                return self.record_failure(order, attempt, e.to_string()).await;
            }
        };

        let (status, mut update) = outcome_from_response(&response);
        if status == OrderStatus::Failed {
            let reason = response
                .error_message
                .unwrap_or_else(|| "vendor rejected retry".to_string());
            return self.record_failure(order, attempt, reason).await;
        }

        if !order.status.can_transition_to(status) {
            warn!(
                order_id = %order.id,
                from = %order.status,
                to = %status,
                "retry outcome rejected by transition rules"
            );
            return Ok(RetryOutcome::FailedAgain);
        }

        // Success clears the failure reason along with the status change.
        let updated = self
            .store
            .record_retry_outcome(order.id, attempt, Utc::now(), status, None)
            .await?;
        update.status = None;
        if !update.is_empty() {
            let updated = self.store.apply_provisioning(order.id, &update).await?;
            if updated.status == OrderStatus::Completed {
                self.notifier.order_completed(&updated).await;
            }
        } else if updated.status == OrderStatus::Completed {
            self.notifier.order_completed(&updated).await;
        }
        Ok(RetryOutcome::Recovered)
    }

    async fn record_failure(
        &self,
        order: &Order,
        attempt: i32,
        reason: String,
    ) -> Result<RetryOutcome, StoreError> {
        let exhausted = attempt >= self.policy.max_attempts;
        let status = if exhausted {
            OrderStatus::PermanentlyFailed
        } else {
            OrderStatus::Failed
        };

        let updated = self
            .store
            .record_retry_outcome(order.id, attempt, Utc::now(), status, Some(reason.clone()))
            .await?;

        if exhausted {
            warn!(
                order_id = %order.id,
                display_id = %order.display_id,
                attempts = attempt,
                "order permanently failed after exhausting retries"
            );
            self.notifier.order_failed(&updated, &reason).await;
            Ok(RetryOutcome::Exhausted)
        } else {
            Ok(RetryOutcome::FailedAgain)
        }
    }
}

enum RetryOutcome {
    Recovered,
    FailedAgain,
    Exhausted,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::types::{OrderResponse, VendorOrderStatus};
    use crate::services::notification::NotificationKind;
    use crate::services::pricing::PricingSource;
    use crate::testutil::{
        order_fixture, provider_record_fixture, MemoryOrderStore, RecordingNotifications,
        StubPricing, StubProvider, StubResolver,
    };
    use uuid::Uuid;

    struct Harness {
        coordinator: RetryCoordinator,
        store: Arc<MemoryOrderStore>,
        provider: Arc<StubProvider>,
        notifications: Arc<RecordingNotifications>,
    }

    fn harness(policy: RetryPolicy, build: impl FnOnce(Uuid) -> Vec<Order>) -> Harness {
        let record = provider_record_fixture("voyatel");
        let provider_id = record.id;
        let provider = Arc::new(StubProvider::new("voyatel"));
        let resolver = Arc::new(StubResolver::new().register(record, provider.clone()));
        let store = Arc::new(MemoryOrderStore::with_orders(build(provider_id)));
        let notifications = Arc::new(RecordingNotifications::new());
        let notifier = Arc::new(NotificationService::new(notifications.clone()));
        let pricing: Arc<dyn PricingSource> = Arc::new(StubPricing::for_provider(provider_id));
        let submission = Arc::new(OrderSubmissionService::new(
            resolver,
            store.clone(),
            pricing,
            notifier.clone(),
        ));
        let coordinator = RetryCoordinator::new(store.clone(), submission, notifier, policy);
        Harness {
            coordinator,
            store,
            provider,
            notifications,
        }
    }

    fn failed_order(provider_id: Uuid, retry_count: i32) -> Order {
        let mut order = order_fixture(OrderStatus::Failed);
        order.provider_id = Some(provider_id);
        order.retry_count = retry_count;
        order.failure_reason = Some("first attempt failed".to_string());
        order
    }

    fn completed_response() -> OrderResponse {
        OrderResponse {
            success: true,
            status: Some(VendorOrderStatus::Completed),
            iccid: Some("894400000000000001".to_string()),
            vendor_order_id: Some("VO-2".to_string()),
            ..OrderResponse::default()
        }
    }

    #[test]
    fn never_retried_failed_order_is_immediately_eligible() {
        let policy = RetryPolicy::default();
        let mut order = order_fixture(OrderStatus::Failed);
        order.last_retry_at = None;
        assert!(policy.is_eligible(&order, Utc::now()));
    }

    #[test]
    fn backoff_windows_escalate_and_clamp() {
        let policy = RetryPolicy::default();
        let now = Utc::now();
        let mut order = order_fixture(OrderStatus::Failed);

        for (retry_count, minutes) in [(0, 5i64), (1, 15), (2, 60), (5, 60)] {
            order.retry_count = retry_count;
            order.last_retry_at = Some(now - Duration::minutes(minutes - 1));
            if retry_count < policy.max_attempts {
                assert!(
                    !policy.is_eligible(&order, now),
                    "retry {} should wait {} minutes",
                    retry_count,
                    minutes
                );
            }
            order.last_retry_at = Some(now - Duration::minutes(minutes + 1));
            assert_eq!(
                policy.is_eligible(&order, now),
                retry_count < policy.max_attempts
            );
        }
    }

    #[test]
    fn exhausted_and_non_failed_orders_are_ineligible() {
        let policy = RetryPolicy::default();
        let now = Utc::now();

        let mut order = order_fixture(OrderStatus::Failed);
        order.retry_count = MAX_RETRY_ATTEMPTS;
        assert!(!policy.is_eligible(&order, now));

        let order = order_fixture(OrderStatus::Processing);
        assert!(!policy.is_eligible(&order, now));
    }

    #[tokio::test]
    async fn successful_retry_recovers_the_order() {
        let order_id = Uuid::new_v4();
        let h = harness(RetryPolicy::default(), |provider_id| {
            let mut order = failed_order(provider_id, 0);
            order.id = order_id;
            vec![order]
        });
        h.provider.push_create(Ok(completed_response()));

        let stats = h.coordinator.run_sweep().await.unwrap();
        assert_eq!(stats.attempted, 1);
        assert_eq!(stats.recovered, 1);

        let stored = h.store.get(order_id).unwrap();
        assert_eq!(stored.status, OrderStatus::Completed);
        assert_eq!(stored.retry_count, 1);
        assert!(stored.last_retry_at.is_some());
        assert!(stored.failure_reason.is_none());
        assert_eq!(stored.iccid.as_deref(), Some("894400000000000001"));
        assert_eq!(
            h.notifications.kinds(),
            vec![NotificationKind::OrderCompleted]
        );
    }

    #[tokio::test]
    async fn failed_retry_stays_failed_below_the_attempt_budget() {
        let order_id = Uuid::new_v4();
        let h = harness(RetryPolicy::default(), |provider_id| {
            let mut order = failed_order(provider_id, 0);
            order.id = order_id;
            vec![order]
        });
        h.provider.push_create(Ok(OrderResponse {
            success: false,
            error_message: Some("vendor still out of stock".to_string()),
            ..OrderResponse::default()
        }));

        let stats = h.coordinator.run_sweep().await.unwrap();
        assert_eq!(stats.exhausted, 0);

        let stored = h.store.get(order_id).unwrap();
        assert_eq!(stored.status, OrderStatus::Failed);
        assert_eq!(stored.retry_count, 1);
        assert_eq!(
            stored.failure_reason.as_deref(),
            Some("vendor still out of stock")
        );
        assert!(h.notifications.kinds().is_empty());
    }

    #[tokio::test]
    async fn third_failed_attempt_is_permanent() {
        let order_id = Uuid::new_v4();
        let h = harness(RetryPolicy::default(), |provider_id| {
            let mut order = failed_order(provider_id, 2);
            order.last_retry_at = Some(Utc::now() - Duration::hours(2));
            order.id = order_id;
            vec![order]
        });
        h.provider.push_create(Ok(OrderResponse {
            success: false,
            error_message: Some("still failing".to_string()),
            ..OrderResponse::default()
        }));

        let stats = h.coordinator.run_sweep().await.unwrap();
        assert_eq!(stats.exhausted, 1);

        let stored = h.store.get(order_id).unwrap();
        assert_eq!(stored.status, OrderStatus::PermanentlyFailed);
        assert_eq!(stored.retry_count, 3);
        assert_eq!(h.notifications.kinds(), vec![NotificationKind::OrderFailed]);
    }

    #[tokio::test]
    async fn orders_inside_their_wait_window_are_skipped() {
        let order_id = Uuid::new_v4();
        let h = harness(RetryPolicy::default(), |provider_id| {
            let mut order = failed_order(provider_id, 1);
            order.last_retry_at = Some(Utc::now() - Duration::minutes(2));
            order.id = order_id;
            vec![order]
        });

        let stats = h.coordinator.run_sweep().await.unwrap();
        assert_eq!(stats.examined, 1);
        assert_eq!(stats.attempted, 0);
        assert!(h.provider.calls().is_empty());
    }

    #[tokio::test]
    async fn one_erroring_retry_does_not_abort_the_batch() {
        let first_id = Uuid::new_v4();
        let second_id = Uuid::new_v4();
        let h = harness(RetryPolicy::default(), |provider_id| {
            let mut first = failed_order(provider_id, 0);
            first.id = first_id;
            first.created_at = Utc::now() - Duration::minutes(2);
            let mut second = failed_order(provider_id, 0);
            second.id = second_id;
            vec![first, second]
        });
        h.provider.push_create(Ok(OrderResponse {
            success: false,
            error_message: Some("bad package".to_string()),
            ..OrderResponse::default()
        }));
        h.provider.push_create(Ok(completed_response()));

        let stats = h.coordinator.run_sweep().await.unwrap();
        assert_eq!(stats.attempted, 2);
        assert_eq!(stats.recovered, 1);
        assert_eq!(h.store.get(second_id).unwrap().status, OrderStatus::Completed);
        assert_eq!(h.store.get(first_id).unwrap().status, OrderStatus::Failed);
    }
}
